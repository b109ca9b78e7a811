//! Packet logging for the FC-level client
//!
//! A [`CallbackLogger`] is an explicit value handed to
//! [`GenericModbusClient::with_logger`](crate::GenericModbusClient::with_logger).
//! It either forwards request/response summaries to `tracing`, or to a
//! caller-supplied callback (useful for UIs and tests), or drops them.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::protocol::format_hex;

/// Severity of a log line, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(s)
    }
}

/// Receiver for formatted log lines.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    Disabled,
    /// Emit through the `tracing` macros.
    #[default]
    Tracing,
    /// Hand lines to the configured callback.
    Callback,
}

/// Logger passed to clients for packet-level tracing.
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<LogCallback>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Logger that hands every line at or above `min_level` to `callback`.
    pub fn new(callback: LogCallback, min_level: LogLevel) -> Self {
        Self {
            callback: Some(callback),
            min_level,
            mode: LoggingMode::Callback,
        }
    }

    /// Logger that forwards to `tracing`.
    pub fn tracing(min_level: LogLevel) -> Self {
        Self {
            callback: None,
            min_level,
            mode: LoggingMode::Tracing,
        }
    }

    pub fn disabled() -> Self {
        Self {
            callback: None,
            min_level: LogLevel::Error,
            mode: LoggingMode::Disabled,
        }
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    #[inline]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.mode != LoggingMode::Disabled && level <= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.is_enabled(level) {
            return;
        }
        match (self.mode, &self.callback) {
            (LoggingMode::Callback, Some(callback)) => callback(level, message),
            (LoggingMode::Tracing, _) => match level {
                LogLevel::Error => error!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Trace => trace!("{}", message),
            },
            _ => {}
        }
    }

    /// Summary of an outgoing request, logged at debug level.
    pub fn log_request(&self, slave_id: u8, function: u8, address: u16, quantity: u16, data: &[u8]) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        let mut line = format!(
            "[MODBUS] send slave:{} fc:0x{:02X} addr:{} qty:{}",
            slave_id, function, address, quantity
        );
        if !data.is_empty() {
            line.push_str(" data:");
            line.push_str(&format_hex(data));
        }
        self.log(LogLevel::Debug, &line);
    }

    /// Summary of an incoming response, logged at debug level.
    pub fn log_response(&self, slave_id: u8, function: u8, data: &[u8]) {
        if !self.is_enabled(LogLevel::Debug) {
            return;
        }
        let line = format!(
            "[MODBUS] recv slave:{} fc:0x{:02X} data:{}",
            slave_id,
            function,
            format_hex(data)
        );
        self.log(LogLevel::Debug, &line);
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::tracing(LogLevel::Info)
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("mode", &self.mode)
            .field("min_level", &self.min_level)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture(min_level: LogLevel) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = CallbackLogger::new(
            Arc::new(move |level: LogLevel, msg: &str| sink.lock().unwrap().push((level, msg.to_string()))),
            min_level,
        );
        (logger, lines)
    }

    #[test]
    fn test_callback_receives_packets() {
        let (logger, lines) = capture(LogLevel::Debug);
        logger.log_request(1, 0x10, 10, 2, &[0x86, 0xA0, 0x00, 0x01]);
        logger.log_response(1, 0x10, &[0x00, 0x0A, 0x00, 0x02]);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0].1,
            "[MODBUS] send slave:1 fc:0x10 addr:10 qty:2 data:86 A0 00 01"
        );
        assert!(lines[1].1.starts_with("[MODBUS] recv slave:1 fc:0x10"));
    }

    #[test]
    fn test_level_filtering() {
        let (logger, lines) = capture(LogLevel::Info);
        logger.log_request(1, 0x03, 0, 1, &[]);
        logger.log(LogLevel::Warn, "kept");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (LogLevel::Warn, "kept".to_string()));
    }

    #[test]
    fn test_disabled_logger() {
        let logger = CallbackLogger::disabled();
        assert!(!logger.is_enabled(LogLevel::Error));
        logger.log(LogLevel::Error, "dropped");
    }

    #[test]
    fn test_default_uses_tracing() {
        let logger = CallbackLogger::default();
        assert_eq!(logger.mode(), LoggingMode::Tracing);
        assert!(logger.is_enabled(LogLevel::Info));
        assert!(!logger.is_enabled(LogLevel::Debug));
    }
}
