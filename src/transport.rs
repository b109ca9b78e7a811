//! # Modbus Transport Layer
//!
//! Transport implementations behind one [`ModbusTransport`] trait.
//!
//! | Transport | Envelope | Integrity |
//! |-----------|----------|-----------|
//! | [`TcpTransport`] | MBAP header (transaction, protocol, length, unit) + PDU | TCP |
//! | [`RtuTransport`] | slave id + PDU + CRC | CRC-16/MODBUS |
//!
//! [`Connection`] picks one of them once, from a [`TransportConfig`], so the
//! layers above never branch on the transport kind again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use modbus_regmap::{Connection, ModbusTransport, TransportConfig};
//! use modbus_regmap::{ModbusFunction, ModbusRequest};
//!
//! # async fn example() -> modbus_regmap::ModbusResult<()> {
//! let config = TransportConfig::tcp("192.168.0.8", 502, 1);
//! let mut connection = Connection::open(&config).await?;
//!
//! let request = ModbusRequest::new_read(1, ModbusFunction::ReadInputRegisters, 10, 4);
//! let response = connection.request(&request).await?;
//! println!("{:?}", response.parse_registers()?);
//!
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{expected_response_pdu_len, format_hex, ModbusRequest, ModbusResponse, SlaveId};

/// CRC calculator for RTU frames
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

// ============================================================================
// Transport trait and statistics
// ============================================================================

/// Request/response exchange with one device.
///
/// Implementations own framing, timeouts and exception mapping: a Modbus
/// exception response comes back as [`ModbusError::Exception`].
pub trait ModbusTransport: Send + Sync {
    /// Send a request and wait for its response.
    fn request(
        &mut self,
        request: &ModbusRequest,
    ) -> impl std::future::Future<Output = ModbusResult<ModbusResponse>> + Send;

    /// Local view of the link; does not contact the device.
    fn is_connected(&self) -> bool;

    /// Close the link gracefully.
    fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Transport counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    /// Share of requests that got a response, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 0.0;
        }
        self.responses_received as f64 / self.requests_sent as f64 * 100.0
    }
}

fn log_packet(protocol: &str, direction: &str, data: &[u8], slave_id: SlaveId) {
    info!(
        "[MODBUS-{}] {} slave:{} {}",
        protocol,
        direction,
        slave_id,
        format_hex(data)
    );
}

// ============================================================================
// Configuration
// ============================================================================

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_unit() -> u8 {
    DEFAULT_UNIT_ID
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Transport parameters, chosen once per session.
///
/// Deserializes from `{"mode": "tcp", "host": ..., "port": ..., "unit": ...}`
/// or `{"mode": "rtu", "device": ..., "baud_rate": ..., "unit": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default = "default_unit")]
        unit: u8,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    Rtu {
        device: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_unit")]
        unit: u8,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

impl TransportConfig {
    pub fn tcp<S: Into<String>>(host: S, port: u16, unit: u8) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
            unit,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn rtu<S: Into<String>>(device: S, baud_rate: u32, unit: u8) -> Self {
        Self::Rtu {
            device: device.into(),
            baud_rate,
            unit,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, value: Duration) -> Self {
        let ms = value.as_millis().min(u128::from(u64::MAX)) as u64;
        match &mut self {
            Self::Tcp { timeout_ms, .. } | Self::Rtu { timeout_ms, .. } => *timeout_ms = ms,
        }
        self
    }

    pub fn unit(&self) -> u8 {
        match self {
            Self::Tcp { unit, .. } | Self::Rtu { unit, .. } => *unit,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Self::Tcp { timeout_ms, .. } | Self::Rtu { timeout_ms, .. } => {
                Duration::from_millis(*timeout_ms)
            }
        }
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Build an MBAP frame around a PDU.
pub fn encode_mbap_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.put_u16(transaction_id);
    frame.put_u16(0); // protocol id
    frame.put_u16((1 + pdu.len()) as u16);
    frame.put_u8(unit_id);
    frame.put_slice(pdu);
    frame
}

/// Validate a received MBAP header (7 bytes including unit id).
///
/// Returns the number of PDU bytes that follow.
pub fn check_mbap_header(header: &[u8; MBAP_HEADER_LEN + 1], transaction_id: u16) -> ModbusResult<usize> {
    let received_tid = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));

    if protocol_id != 0 {
        return Err(ModbusError::protocol(format!(
            "Invalid protocol id {} in MBAP header",
            protocol_id
        )));
    }
    if !(2..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(ModbusError::protocol(format!(
            "Invalid MBAP length {}",
            length
        )));
    }
    if received_tid != transaction_id {
        return Err(ModbusError::protocol(format!(
            "Transaction id mismatch: expected {}, got {}",
            transaction_id, received_tid
        )));
    }
    Ok(length - 1)
}

/// Modbus TCP transport
pub struct TcpTransport {
    stream: Option<TcpStream>,
    address: SocketAddr,
    timeout: Duration,
    transaction_id: u16,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Connect to `address`, failing after `timeout`.
    pub async fn new(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        let stream = Self::open_stream(address, timeout).await?;
        info!("Connected to Modbus TCP device at {}", address);
        Ok(Self {
            stream: Some(stream),
            address,
            timeout,
            transaction_id: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Resolve `host:port` and connect to the first address.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> ModbusResult<Self> {
        let address = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to resolve {}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| ModbusError::connection(format!("No address found for {}:{}", host, port)))?;
        Self::new(address, timeout).await
    }

    async fn open_stream(address: SocketAddr, limit: Duration) -> ModbusResult<TcpStream> {
        match timeout(limit, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                // Small request/response frames
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(ModbusError::connection(format!(
                "Failed to connect to {}: {}",
                address, e
            ))),
            Err(_) => Err(ModbusError::connection(format!(
                "Connecting to {} timed out after {}ms",
                address,
                limit.as_millis()
            ))),
        }
    }

    pub fn server_address(&self) -> SocketAddr {
        self.address
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Drop the current stream, if any, and connect again.
    ///
    /// A transport error or [`ModbusTransport::close`] leaves the transport
    /// disconnected; requests fail until this is called.
    pub async fn reconnect(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.stream = Some(Self::open_stream(self.address, self.timeout).await?);
        info!("Reconnected to Modbus TCP device at {}", self.address);
        Ok(())
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn exchange(&mut self, frame: &[u8], transaction_id: u16) -> ModbusResult<(SlaveId, Vec<u8>)> {
        let limit = self.timeout;
        let timeout_ms = self.timeout_ms();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP stream not connected"))?;

        match timeout(limit, stream.write_all(frame)).await {
            Ok(result) => result?,
            Err(_) => return Err(ModbusError::timeout("send request", timeout_ms)),
        }

        let mut header = [0u8; MBAP_HEADER_LEN + 1];
        match timeout(limit, stream.read_exact(&mut header)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err(ModbusError::timeout("read response header", timeout_ms)),
        }
        let pdu_len = check_mbap_header(&header, transaction_id)?;

        let mut pdu = vec![0u8; pdu_len];
        match timeout(limit, stream.read_exact(&mut pdu)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err(ModbusError::timeout("read response data", timeout_ms)),
        }

        self.stats.bytes_received += (header.len() + pdu.len()) as u64;
        if self.packet_logging {
            let mut raw = header.to_vec();
            raw.extend_from_slice(&pdu);
            log_packet("TCP", "receive", &raw, header[6]);
        }
        Ok((header[6], pdu))
    }
}

impl ModbusTransport for TcpTransport {
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let pdu = request.encode_pdu()?;

        if self.stream.is_none() {
            return Err(ModbusError::connection(format!(
                "Not connected to {}",
                self.address
            )));
        }

        let transaction_id = self.next_transaction_id();
        let frame = encode_mbap_frame(transaction_id, request.slave_id, &pdu);
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        if self.packet_logging {
            log_packet("TCP", "send", &frame, request.slave_id);
        }

        let (unit, pdu) = match self.exchange(&frame, transaction_id).await {
            Ok(reply) => reply,
            Err(e) => {
                self.stats.errors += 1;
                if matches!(e, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                // A late or partial reply would desynchronize the stream
                self.stream = None;
                return Err(e);
            }
        };
        self.stats.responses_received += 1;

        let response = ModbusResponse::from_pdu(unit, &pdu)?;
        if let Some(err) = response.get_exception() {
            self.stats.errors += 1;
            return Err(err);
        }
        if let Err(e) = response.check_matches(request) {
            self.stats.errors += 1;
            return Err(e);
        }
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!("Closed Modbus TCP connection to {}", self.address);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// RTU
// ============================================================================

/// Build an RTU frame: slave id + PDU + CRC (little-endian).
pub fn encode_rtu_frame(slave_id: SlaveId, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(1 + pdu.len() + 2);
    frame.put_u8(slave_id);
    frame.put_slice(pdu);
    let crc = CRC_MODBUS.checksum(&frame);
    frame.put_u16_le(crc);
    frame
}

/// Check the CRC of an RTU frame and split it into slave id and PDU.
pub fn decode_rtu_frame(frame: &[u8]) -> ModbusResult<(SlaveId, &[u8])> {
    if frame.len() < 4 {
        return Err(ModbusError::protocol(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame.len() > MAX_RTU_FRAME_SIZE {
        return Err(ModbusError::protocol(format!(
            "RTU frame too large: {} bytes",
            frame.len()
        )));
    }

    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let calculated = CRC_MODBUS.checksum(&frame[..data_len]);
    if received != calculated {
        return Err(ModbusError::protocol(format!(
            "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
            calculated, received
        )));
    }
    Ok((frame[0], &frame[1..data_len]))
}

/// Read one RTU response frame, sized from its function code.
#[cfg_attr(not(feature = "rtu"), allow(dead_code))]
async fn read_rtu_frame<R: AsyncRead + Unpin>(reader: &mut R) -> ModbusResult<Vec<u8>> {
    // slave id, function code and the first payload byte
    let mut frame = vec![0u8; 3];
    reader.read_exact(&mut frame).await?;

    let pdu_len = expected_response_pdu_len(&frame[1..]).ok_or_else(|| {
        ModbusError::protocol(format!(
            "Unexpected function code 0x{:02X} in RTU response",
            frame[1]
        ))
    })?;
    let total = 1 + pdu_len + 2;
    if total > MAX_RTU_FRAME_SIZE {
        return Err(ModbusError::protocol(format!(
            "RTU response of {} bytes exceeds the frame limit",
            total
        )));
    }

    frame.resize(total, 0);
    reader.read_exact(&mut frame[3..]).await?;
    Ok(frame)
}

/// Byte stream under an RTU transport.
#[cfg(feature = "rtu")]
trait SerialLink: AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync {
    /// Discard received bytes nobody has read yet.
    fn clear_input(&mut self) -> ModbusResult<()>;
}

#[cfg(feature = "rtu")]
impl SerialLink for tokio_serial::SerialStream {
    fn clear_input(&mut self) -> ModbusResult<()> {
        use tokio_serial::SerialPort;

        self.clear(tokio_serial::ClearBuffer::Input).map_err(|e| {
            ModbusError::connection(format!("Failed to clear serial input: {}", e))
        })
    }
}

/// Modbus RTU transport over a serial line
#[cfg(feature = "rtu")]
pub struct RtuTransport {
    port: Option<Box<dyn SerialLink>>,
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    /// Silent interval between frames (3.5 character times)
    frame_gap: Duration,
    stats: TransportStats,
    packet_logging: bool,
}

#[cfg(feature = "rtu")]
impl RtuTransport {
    /// Open `port` at `baud_rate`, 8N1.
    pub fn new(port: &str, baud_rate: u32, timeout: Duration) -> ModbusResult<Self> {
        if baud_rate == 0 {
            return Err(ModbusError::configuration("baud rate must be positive"));
        }
        let char_time_us = 11_000_000 / u64::from(baud_rate);
        // Fixed 1.75ms gap above 19200 baud
        let frame_gap = if baud_rate > 19_200 {
            Duration::from_micros(1750)
        } else {
            Duration::from_micros(char_time_us * 35 / 10)
        };

        let mut transport = Self {
            port: None,
            port_name: port.to_string(),
            baud_rate,
            timeout,
            frame_gap,
            stats: TransportStats::default(),
            packet_logging: false,
        };
        transport.open_port()?;
        info!("Opened Modbus RTU port {} at {} baud", port, baud_rate);
        Ok(transport)
    }

    fn open_port(&mut self) -> ModbusResult<()> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| {
                ModbusError::connection(format!(
                    "Failed to open serial port {}: {}",
                    self.port_name, e
                ))
            })?;
        self.port = Some(Box::new(port));
        Ok(())
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Reopen the serial port after a transport error or `close`.
    pub fn reconnect(&mut self) -> ModbusResult<()> {
        self.port = None;
        self.open_port()?;
        info!("Reopened Modbus RTU port {}", self.port_name);
        Ok(())
    }

    async fn exchange(&mut self, frame: &[u8]) -> ModbusResult<Vec<u8>> {
        let limit = self.timeout;
        let timeout_ms = limit.as_millis() as u64;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not open"))?;

        // Bytes still buffered belong to an earlier exchange
        port.clear_input()?;

        match timeout(limit, async {
            port.write_all(frame).await?;
            port.flush().await
        })
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ModbusError::timeout("send request", timeout_ms)),
        }

        match timeout(limit, read_rtu_frame(port)).await {
            Ok(result) => result,
            Err(_) => Err(ModbusError::timeout("read response", timeout_ms)),
        }
    }
}

#[cfg(feature = "rtu")]
impl ModbusTransport for RtuTransport {
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let pdu = request.encode_pdu()?;
        if self.port.is_none() {
            return Err(ModbusError::connection(format!(
                "Serial port {} not open",
                self.port_name
            )));
        }

        tokio::time::sleep(self.frame_gap).await;

        let frame = encode_rtu_frame(request.slave_id, &pdu);
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        if self.packet_logging {
            log_packet("RTU", "send", &frame, request.slave_id);
        }

        let raw = match self.exchange(&frame).await {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.errors += 1;
                if matches!(e, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                // A late reply would be read as the next response
                self.port = None;
                return Err(e);
            }
        };
        self.stats.responses_received += 1;
        self.stats.bytes_received += raw.len() as u64;
        if self.packet_logging {
            log_packet("RTU", "receive", &raw, request.slave_id);
        }

        let (slave_id, pdu) = decode_rtu_frame(&raw).inspect_err(|_| self.stats.errors += 1)?;
        let response = ModbusResponse::from_pdu(slave_id, pdu)?;
        if let Some(err) = response.get_exception() {
            self.stats.errors += 1;
            return Err(err);
        }
        if let Err(e) = response.check_matches(request) {
            self.stats.errors += 1;
            return Err(e);
        }
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if self.port.take().is_some() {
            info!("Closed Modbus RTU port {}", self.port_name);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Transport chosen at open time.
pub enum Connection {
    Tcp(TcpTransport),
    #[cfg(feature = "rtu")]
    Rtu(RtuTransport),
}

impl Connection {
    /// Open the transport described by `config`.
    ///
    /// RTU needs the `rtu` feature; without it this fails with a
    /// configuration error.
    pub async fn open(config: &TransportConfig) -> ModbusResult<Self> {
        match config {
            TransportConfig::Tcp { host, port, .. } => {
                let transport = TcpTransport::connect(host, *port, config.timeout()).await?;
                Ok(Self::Tcp(transport))
            }
            #[cfg(feature = "rtu")]
            TransportConfig::Rtu {
                device, baud_rate, ..
            } => Ok(Self::Rtu(RtuTransport::new(
                device,
                *baud_rate,
                config.timeout(),
            )?)),
            #[cfg(not(feature = "rtu"))]
            TransportConfig::Rtu { device, .. } => Err(ModbusError::configuration(format!(
                "RTU transport for {} requires the 'rtu' feature",
                device
            ))),
        }
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        match self {
            Self::Tcp(t) => t.set_packet_logging(enabled),
            #[cfg(feature = "rtu")]
            Self::Rtu(t) => t.set_packet_logging(enabled),
        }
    }

    /// Reopen the underlying socket or serial port.
    pub async fn reconnect(&mut self) -> ModbusResult<()> {
        match self {
            Self::Tcp(t) => t.reconnect().await,
            #[cfg(feature = "rtu")]
            Self::Rtu(t) => t.reconnect(),
        }
    }
}

impl ModbusTransport for Connection {
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        match self {
            Self::Tcp(t) => t.request(request).await,
            #[cfg(feature = "rtu")]
            Self::Rtu(t) => t.request(request).await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Tcp(t) => t.is_connected(),
            #[cfg(feature = "rtu")]
            Self::Rtu(t) => t.is_connected(),
        }
    }

    async fn close(&mut self) -> ModbusResult<()> {
        match self {
            Self::Tcp(t) => t.close().await,
            #[cfg(feature = "rtu")]
            Self::Rtu(t) => t.close().await,
        }
    }

    fn get_stats(&self) -> TransportStats {
        match self {
            Self::Tcp(t) => t.get_stats(),
            #[cfg(feature = "rtu")]
            Self::Rtu(t) => t.get_stats(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusFunction;
    use tokio::net::TcpListener;

    #[test]
    fn test_mbap_frame_layout() {
        let frame = encode_mbap_frame(0x0102, 0xB4, &[0x03, 0x00, 0x0A, 0x00, 0x04]);
        assert_eq!(
            &frame[..],
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0xB4, 0x03, 0x00, 0x0A, 0x00, 0x04]
        );
    }

    #[test]
    fn test_mbap_header_checks() {
        let ok = [0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01];
        assert_eq!(check_mbap_header(&ok, 7).unwrap(), 4);

        let bad_protocol = [0x00, 0x07, 0x00, 0x01, 0x00, 0x05, 0x01];
        assert!(check_mbap_header(&bad_protocol, 7).is_err());

        let bad_tid = [0x00, 0x08, 0x00, 0x00, 0x00, 0x05, 0x01];
        assert!(check_mbap_header(&bad_tid, 7).is_err());

        let too_long = [0x00, 0x07, 0x00, 0x00, 0x01, 0x00, 0x01];
        assert!(check_mbap_header(&too_long, 7).is_err());
    }

    #[test]
    fn test_rtu_frame_crc() {
        // Read 2 holding registers at 0 from slave 1: well-known frame
        let frame = encode_rtu_frame(1, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(&frame[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);

        let (slave, pdu) = decode_rtu_frame(&frame).unwrap();
        assert_eq!(slave, 1);
        assert_eq!(pdu, &[0x03, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_rtu_frame_bad_crc() {
        let mut frame = encode_rtu_frame(1, &[0x03, 0x02, 0x00, 0x2A]).to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            decode_rtu_frame(&frame),
            Err(ModbusError::Protocol { .. })
        ));
        assert!(decode_rtu_frame(&[0x01, 0x03]).is_err());
    }

    #[tokio::test]
    async fn test_read_rtu_frame_sizes_by_function() {
        let response = encode_rtu_frame(1, &[0x03, 0x04, 0x00, 0x01, 0x00, 0x02]);
        let mut input = tokio_test::io::Builder::new().read(&response).build();
        let frame = read_rtu_frame(&mut input).await.unwrap();
        assert_eq!(frame, response.to_vec());

        let exception = encode_rtu_frame(1, &[0x83, 0x02]);
        let mut input = tokio_test::io::Builder::new().read(&exception).build();
        let frame = read_rtu_frame(&mut input).await.unwrap();
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn test_transport_config_serde() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"mode": "tcp", "host": "10.0.0.2"}"#).unwrap();
        assert_eq!(config, TransportConfig::tcp("10.0.0.2", 502, 1));
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));

        let config: TransportConfig = serde_json::from_str(
            r#"{"mode": "rtu", "device": "/dev/ttyS0", "baud_rate": 19200, "unit": 10, "timeout_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(config.unit(), 10);
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }

    #[cfg(not(feature = "rtu"))]
    #[tokio::test]
    async fn test_rtu_requires_feature() {
        let result = Connection::open(&TransportConfig::rtu("/dev/ttyUSB0", 9600, 1)).await;
        assert!(matches!(result, Err(ModbusError::Configuration { .. })));
    }

    #[cfg(feature = "rtu")]
    impl SerialLink for tokio::io::DuplexStream {
        fn clear_input(&mut self) -> ModbusResult<()> {
            Ok(())
        }
    }

    /// RTU transport over an in-memory link; the other end plays the device.
    #[cfg(feature = "rtu")]
    fn rtu_over_duplex(limit: Duration) -> (RtuTransport, tokio::io::DuplexStream) {
        let (link, device) = tokio::io::duplex(MAX_RTU_FRAME_SIZE);
        let transport = RtuTransport {
            port: Some(Box::new(link)),
            port_name: "duplex".to_string(),
            baud_rate: 115_200,
            timeout: limit,
            frame_gap: Duration::ZERO,
            stats: TransportStats::default(),
            packet_logging: false,
        };
        (transport, device)
    }

    #[cfg(feature = "rtu")]
    #[tokio::test]
    async fn test_rtu_round_trip() {
        let (mut transport, mut device) = rtu_over_duplex(Duration::from_secs(2));
        let request = ModbusRequest::new_read(10, ModbusFunction::ReadHoldingRegisters, 10, 2);
        let expected = encode_rtu_frame(10, &request.encode_pdu().unwrap());

        let responder = tokio::spawn(async move {
            let mut sent = vec![0u8; expected.len()];
            device.read_exact(&mut sent).await.unwrap();
            assert_eq!(sent, expected.to_vec());
            let reply = encode_rtu_frame(10, &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]);
            device.write_all(&reply).await.unwrap();
            device
        });

        let response = transport.request(&request).await.unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![10, 11]);
        assert!(transport.is_connected());
        drop(responder.await.unwrap());
    }

    #[cfg(feature = "rtu")]
    #[tokio::test]
    async fn test_rtu_timeout_drops_port() {
        let (mut transport, mut device) = rtu_over_duplex(Duration::from_millis(50));
        let first = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 10, 2);

        let err = transport.request(&first).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(!transport.is_connected());

        // The device answers late; that reply must never surface
        let late = encode_rtu_frame(1, &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]);
        let _ = device.write_all(&late).await;

        let second = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 50, 2);
        let err = transport.request(&second).await.unwrap_err();
        assert!(err.is_connection_error());

        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.responses_received, 0);
    }

    /// Minimal Modbus TCP responder: answers FC03/FC04 with `address + i`
    /// and turns every other function into an illegal-function exception.
    /// Serves any number of connections.
    async fn spawn_responder() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    loop {
                        let mut header = [0u8; 7];
                        if socket.read_exact(&mut header).await.is_err() {
                            return;
                        }
                        let len = usize::from(u16::from_be_bytes([header[4], header[5]])) - 1;
                        let mut pdu = vec![0u8; len];
                        socket.read_exact(&mut pdu).await.unwrap();

                        let reply: Vec<u8> = match pdu[0] {
                            0x03 | 0x04 => {
                                let start = u16::from_be_bytes([pdu[1], pdu[2]]);
                                let count = u16::from_be_bytes([pdu[3], pdu[4]]);
                                let mut body = vec![pdu[0], (count * 2) as u8];
                                for i in 0..count {
                                    body.extend_from_slice(&(start + i).to_be_bytes());
                                }
                                body
                            }
                            fc => vec![fc | 0x80, 0x01],
                        };

                        let tid = u16::from_be_bytes([header[0], header[1]]);
                        let frame = encode_mbap_frame(tid, header[6], &reply);
                        socket.write_all(&frame).await.unwrap();
                    }
                });
            }
        });

        address
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let address = spawn_responder().await;
        let mut transport = TcpTransport::new(address, Duration::from_secs(2)).await.unwrap();

        let request = ModbusRequest::new_read(180, ModbusFunction::ReadInputRegisters, 10, 4);
        let response = transport.request(&request).await.unwrap();
        assert_eq!(response.slave_id, 180);
        assert_eq!(response.parse_registers().unwrap(), vec![10, 11, 12, 13]);

        // Transaction ids advance per request
        let response = transport.request(&request).await.unwrap();
        assert_eq!(response.parse_registers().unwrap().len(), 4);

        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 2);
        assert_eq!(stats.responses_received, 2);
        assert_eq!(stats.errors, 0);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_exception_response() {
        let address = spawn_responder().await;
        let mut transport = TcpTransport::new(address, Duration::from_secs(2)).await.unwrap();

        let request = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteSingleRegister,
            address: 210,
            quantity: 1,
            data: vec![0x00, 0x05],
        };
        let err = transport.request(&request).await.unwrap_err();
        assert_eq!(err, ModbusError::exception(0x06, 0x01));
        // Exceptions leave the connection usable
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::new(address, Duration::from_millis(100))
            .await
            .unwrap();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 1);
        let err = transport.request(&request).await.unwrap_err();

        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert_eq!(transport.get_stats().timeouts, 1);

        // The stream is dropped and not reopened behind the caller's back
        assert!(!transport.is_connected());
        let err = transport.request(&request).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(transport.get_stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_tcp_request_after_close_fails() {
        let address = spawn_responder().await;
        let mut transport = TcpTransport::new(address, Duration::from_secs(2)).await.unwrap();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);

        transport.close().await.unwrap();
        let err = transport.request(&request).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert!(!transport.is_connected());

        transport.reconnect().await.unwrap();
        assert!(transport.is_connected());
        let response = transport.request(&request).await.unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_connection_reconnect() {
        let address = spawn_responder().await;
        let config = TransportConfig::tcp(address.ip().to_string(), address.port(), 1);
        let mut connection = Connection::open(&config).await.unwrap();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadInputRegisters, 5, 1);

        connection.close().await.unwrap();
        assert!(connection.request(&request).await.is_err());

        connection.reconnect().await.unwrap();
        let response = connection.request(&request).await.unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let result = TcpTransport::new(address, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(ModbusError::Connection { .. })));
    }
}
