//! # Register Client
//!
//! Map-driven reads and writes on top of a [`RegisterIo`].
//!
//! ## Reads
//!
//! For each requested class the client plans request runs with the
//! [`RequestBatcher`], issues one `read_registers` per run and decodes every
//! register from its slice of the response. Failures are reported per
//! register:
//!
//! - a short response fails only the registers whose words are missing
//! - a timeout, protocol error or exception fails the registers of that run,
//!   and the next run is still attempted
//! - a connection error fails that run and every remaining register without
//!   further I/O
//!
//! ## Writes
//!
//! Every entry is validated before the first request goes out: unknown names,
//! read-only classes and values outside the declared range or the register
//! width never reach the device. Valid entries are encoded, merged into
//! contiguous runs per class and written one run at a time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use modbus_regmap::{
//!     json, ClientConfig, Connection, GenericModbusClient, ModbusResult, RegisterClass,
//!     RegisterClient, TransportConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let map = json::load_file("registers.json")?;
//!     let transport = TransportConfig::tcp("192.168.1.100", 502, 1);
//!     let io = GenericModbusClient::new(Connection::open(&transport).await?);
//!
//!     let mut client = RegisterClient::new(map, io, ClientConfig::new(transport.unit()))?;
//!     let report = client.read_all(&RegisterClass::ALL).await?;
//!     for (name, value) in report.values() {
//!         println!("{} = {}", name, value);
//!     }
//!     client.close().await
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::batcher::{RegisterSpan, RequestBatcher};
use crate::client::RegisterIo;
use crate::codec::{decode_register, encode_register, WordOrder};
use crate::constants::DEFAULT_UNIT_ID;
use crate::device_limits::DeviceLimits;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::register_map::{RegisterClass, RegisterDefinition, RegisterMap};
use crate::value::RegisterValue;

/// Session settings for a [`RegisterClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Unit id used unless overridden with [`RegisterClient::with_unit`].
    pub unit_id: SlaveId,
    pub limits: DeviceLimits,
    pub word_order: WordOrder,
}

impl ClientConfig {
    pub fn new(unit_id: SlaveId) -> Self {
        Self {
            unit_id,
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_word_order(mut self, word_order: WordOrder) -> Self {
        self.word_order = word_order;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            unit_id: DEFAULT_UNIT_ID,
            limits: DeviceLimits::default(),
            word_order: WordOrder::default(),
        }
    }
}

/// Result for one register of a read or write call.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterOutcome<T> {
    pub name: String,
    pub result: ModbusResult<T>,
}

impl<T> RegisterOutcome<T> {
    fn new(name: impl Into<String>, result: ModbusResult<T>) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ModbusError> {
        self.result.as_ref().err()
    }
}

/// Per-register results of a read call, in class then source order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadReport {
    pub outcomes: Vec<RegisterOutcome<RegisterValue>>,
    pub timestamp: DateTime<Utc>,
}

impl ReadReport {
    /// Successfully decoded values by register name.
    pub fn values(&self) -> BTreeMap<String, RegisterValue> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (o.name.clone(), *v)))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModbusResult<RegisterValue>> {
        self.outcomes.iter().find(|o| o.name == name).map(|o| &o.result)
    }

    pub fn failures(&self) -> Vec<(&str, &ModbusError)> {
        failures(&self.outcomes)
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(RegisterOutcome::is_ok)
    }

    /// `{"timestamp": .., "values": {..}, "errors": {..}}` for persisting.
    pub fn to_json(&self) -> Value {
        let values: Map<String, Value> = self
            .values()
            .into_iter()
            .map(|(name, value)| (name, json!(value)))
            .collect();
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "values": values,
            "errors": errors_to_json(&self.outcomes),
        })
    }
}

/// Per-register results of a write call, in the order the values were given.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub outcomes: Vec<RegisterOutcome<()>>,
    pub timestamp: DateTime<Utc>,
}

impl WriteReport {
    /// Names of the registers that were written.
    pub fn written(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ok())
            .map(|o| o.name.as_str())
            .collect()
    }

    pub fn failures(&self) -> Vec<(&str, &ModbusError)> {
        failures(&self.outcomes)
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(RegisterOutcome::is_ok)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "written": self.written(),
            "errors": errors_to_json(&self.outcomes),
        })
    }
}

fn failures<T>(outcomes: &[RegisterOutcome<T>]) -> Vec<(&str, &ModbusError)> {
    outcomes
        .iter()
        .filter_map(|o| o.error().map(|e| (o.name.as_str(), e)))
        .collect()
}

fn errors_to_json<T>(outcomes: &[RegisterOutcome<T>]) -> Value {
    let errors: Map<String, Value> = failures(outcomes)
        .into_iter()
        .map(|(name, err)| (name.to_string(), json!(err.to_string())))
        .collect();
    Value::Object(errors)
}

/// Sleeps between consecutive requests of one call.
struct Pacer {
    delay: Option<Duration>,
    started: bool,
}

impl Pacer {
    fn new(limits: &DeviceLimits) -> Self {
        Self {
            delay: limits.inter_request_delay(),
            started: false,
        }
    }

    async fn wait(&mut self) {
        if let (true, Some(delay)) = (self.started, self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.started = true;
    }
}

/// Reads and writes named registers of one device.
///
/// Owns the map and the I/O handle; every operation takes `&mut self`, so at
/// most one request is in flight.
pub struct RegisterClient<IO: RegisterIo> {
    map: RegisterMap,
    io: IO,
    config: ClientConfig,
    batcher: RequestBatcher,
}

impl<IO: RegisterIo> RegisterClient<IO> {
    /// Fails when the configured limits are unusable.
    pub fn new(map: RegisterMap, io: IO, config: ClientConfig) -> ModbusResult<Self> {
        config.limits.validate()?;
        info!(
            "Register client for unit {} with {} register(s)",
            config.unit_id,
            map.len()
        );
        Ok(Self {
            map,
            io,
            batcher: RequestBatcher::new(config.limits),
            config,
        })
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    /// Run the next call against another unit id.
    pub fn with_unit(&mut self, unit: SlaveId) -> UnitOverride<'_, IO> {
        UnitOverride { client: self, unit }
    }

    /// Read every register of the given classes.
    ///
    /// Per-register failures are reported in the [`ReadReport`].
    pub async fn read_all(&mut self, classes: &[RegisterClass]) -> ModbusResult<ReadReport> {
        let unit = self.config.unit_id;
        self.read_all_at(unit, classes).await
    }

    /// Read a single register by name.
    pub async fn read_one(&mut self, name: &str) -> ModbusResult<RegisterValue> {
        let unit = self.config.unit_id;
        self.read_one_at(unit, name).await
    }

    /// Validate, encode and write `values`.
    pub async fn write_all<I, K>(&mut self, values: I) -> ModbusResult<WriteReport>
    where
        I: IntoIterator<Item = (K, RegisterValue)>,
        K: Into<String>,
    {
        let unit = self.config.unit_id;
        let entries = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.write_all_at(unit, entries).await
    }

    /// Validate and write one register.
    pub async fn write_one(&mut self, name: &str, value: RegisterValue) -> ModbusResult<()> {
        let unit = self.config.unit_id;
        self.write_one_at(unit, name, value).await
    }

    pub async fn close(&mut self) -> ModbusResult<()> {
        info!("Closing register client for unit {}", self.config.unit_id);
        self.io.close().await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn read_all_at(&mut self, unit: SlaveId, classes: &[RegisterClass]) -> ModbusResult<ReadReport> {
        let mut outcomes = Vec::new();
        let mut pacer = Pacer::new(&self.config.limits);
        let mut fatal: Option<ModbusError> = None;
        let mut requests = 0usize;

        let mut seen = Vec::with_capacity(classes.len());
        for &class in classes {
            if seen.contains(&class) {
                continue;
            }
            seen.push(class);

            let defs: Vec<&RegisterDefinition> = self.map.registers(class).iter().collect();
            let runs = self.batcher.plan_reads(class, &defs);
            let mut results: Vec<Option<ModbusResult<RegisterValue>>> = vec![None; defs.len()];

            for run in runs {
                let response = match fatal {
                    Some(ref err) => Err(err.clone()),
                    None => {
                        pacer.wait().await;
                        requests += 1;
                        self.io.read_registers(class, unit, run.start, run.count).await
                    }
                };

                match response {
                    Ok(words) => {
                        if words.len() < usize::from(run.count) {
                            warn!(
                                "Short response for {} at {}: {} of {} words",
                                class,
                                run.start,
                                words.len(),
                                run.count
                            );
                        }
                        for &i in &run.members {
                            let def = defs[i];
                            let slice = words.get(run.offset_of(def.address)..).unwrap_or(&[]);
                            results[i] = Some(decode_register(def, slice, self.config.word_order));
                        }
                    }
                    Err(err) => {
                        if fatal.is_none() {
                            warn!("Read of {} x{} at {} failed: {}", class, run.count, run.start, err);
                            if err.is_connection_error() {
                                fatal = Some(err.clone());
                            }
                        }
                        for &i in &run.members {
                            results[i] = Some(Err(err.clone()));
                        }
                    }
                }
            }

            for (def, result) in defs.iter().zip(results) {
                let result = result.unwrap_or_else(|| {
                    Err(ModbusError::protocol(format!("{} was not requested", def.name)))
                });
                if let Err(ref err) = result {
                    debug!("{}: {}", def.name, err);
                }
                outcomes.push(RegisterOutcome::new(def.name.as_str(), result));
            }
        }

        let report = ReadReport {
            outcomes,
            timestamp: Utc::now(),
        };
        info!(
            "Read {} register(s) from unit {} in {} request(s), {} failed",
            report.outcomes.len(),
            unit,
            requests,
            report.failures().len()
        );
        Ok(report)
    }

    async fn read_one_at(&mut self, unit: SlaveId, name: &str) -> ModbusResult<RegisterValue> {
        let def = self
            .map
            .find(name)
            .ok_or_else(|| ModbusError::unknown_register(name))?;

        let words = self
            .io
            .read_registers(def.class, unit, def.address, u16::from(def.width))
            .await?;
        decode_register(def, &words, self.config.word_order)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    async fn write_all_at(
        &mut self,
        unit: SlaveId,
        entries: Vec<(String, RegisterValue)>,
    ) -> ModbusResult<WriteReport> {
        let mut results: Vec<Option<ModbusResult<()>>> = vec![None; entries.len()];
        let mut encoded: Vec<Vec<u16>> = vec![Vec::new(); entries.len()];
        let mut spans: BTreeMap<RegisterClass, Vec<RegisterSpan>> = BTreeMap::new();

        // Validate everything before the first request
        for (idx, (name, value)) in entries.iter().enumerate() {
            let def = match self.map.find(name) {
                Some(def) => def,
                None => {
                    results[idx] = Some(Err(ModbusError::unknown_register(name.as_str())));
                    continue;
                }
            };
            match encode_register(def, *value, self.config.word_order) {
                Ok(words) => {
                    let span = RegisterSpan::new(def.address, words.len() as u16, idx);
                    spans.entry(def.class).or_default().push(span);
                    encoded[idx] = words;
                }
                Err(err) => {
                    warn!("Rejected write of {} to {}: {}", value, name, err);
                    results[idx] = Some(Err(err));
                }
            }
        }

        let mut pacer = Pacer::new(&self.config.limits);
        let mut fatal: Option<ModbusError> = None;

        for (class, class_spans) in spans {
            for run in self.batcher.plan_writes(class, class_spans) {
                let result = match fatal {
                    Some(ref err) => Err(err.clone()),
                    None => {
                        let words: Vec<u16> = run
                            .members
                            .iter()
                            .flat_map(|&i| encoded[i].iter().copied())
                            .collect();
                        pacer.wait().await;
                        self.io.write_registers(class, unit, run.start, &words).await
                    }
                };

                if let Err(ref err) = result {
                    if fatal.is_none() {
                        warn!("Write of {} x{} at {} failed: {}", class, run.count, run.start, err);
                        if err.is_connection_error() {
                            fatal = Some(err.clone());
                        }
                    }
                }
                for &i in &run.members {
                    results[i] = Some(result.clone());
                }
            }
        }

        let outcomes = entries
            .into_iter()
            .zip(results)
            .map(|((name, _), result)| {
                let result = result.unwrap_or_else(|| {
                    Err(ModbusError::protocol(format!("{} was not written", name)))
                });
                RegisterOutcome::new(name, result)
            })
            .collect();

        let report = WriteReport {
            outcomes,
            timestamp: Utc::now(),
        };
        info!(
            "Wrote {} register(s) to unit {}, {} failed",
            report.written().len(),
            unit,
            report.failures().len()
        );
        Ok(report)
    }

    async fn write_one_at(&mut self, unit: SlaveId, name: &str, value: RegisterValue) -> ModbusResult<()> {
        let report = self
            .write_all_at(unit, vec![(name.to_string(), value)])
            .await?;
        match report.outcomes.into_iter().next() {
            Some(outcome) => outcome.result,
            None => Err(ModbusError::protocol(format!("{} was not written", name))),
        }
    }
}

/// One call against a unit other than the session default.
///
/// Returned by [`RegisterClient::with_unit`].
pub struct UnitOverride<'a, IO: RegisterIo> {
    client: &'a mut RegisterClient<IO>,
    unit: SlaveId,
}

impl<IO: RegisterIo> UnitOverride<'_, IO> {
    pub async fn read_all(self, classes: &[RegisterClass]) -> ModbusResult<ReadReport> {
        self.client.read_all_at(self.unit, classes).await
    }

    pub async fn read_one(self, name: &str) -> ModbusResult<RegisterValue> {
        self.client.read_one_at(self.unit, name).await
    }

    pub async fn write_all<I, K>(self, values: I) -> ModbusResult<WriteReport>
    where
        I: IntoIterator<Item = (K, RegisterValue)>,
        K: Into<String>,
    {
        let entries = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.client.write_all_at(self.unit, entries).await
    }

    pub async fn write_one(self, name: &str, value: RegisterValue) -> ModbusResult<()> {
        self.client.write_one_at(self.unit, name, value).await
    }
}
