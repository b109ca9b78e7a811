//! FC-level Modbus client
//!
//! Modbus TCP and RTU share the same application layer (PDU) and differ only
//! in transport encapsulation, so the function-code logic lives once in
//! [`GenericModbusClient`] and works over any [`ModbusTransport`].
//!
//! # API Naming Convention
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x01 | `read_01()` | `read_coils()` |
//! | 0x02 | `read_02()` | `read_discrete_inputs()` |
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//!
//! On top of the function codes, [`RegisterIo`] is the class-addressed
//! primitive the register client drives: one read or write of a contiguous
//! run of one register class.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modbus_regmap::{Connection, GenericModbusClient, ModbusClient, ModbusResult, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = TransportConfig::tcp("127.0.0.1", 502, 1);
//!     let mut client = GenericModbusClient::new(Connection::open(&config).await?);
//!
//!     let registers = client.read_03(1, 0, 10).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     ModbusClient::close(&mut client).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;

use tracing::debug;

use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{pack_bits, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
use crate::register_map::RegisterClass;
use crate::transport::{Connection, ModbusTransport, TransportStats};

/// Function-code operations against one device.
///
/// Quantities are checked against the protocol limits before anything is
/// sent: 2000 bits for FC01/FC02, 125 registers for FC03/FC04, 1968 coils
/// for FC0F and 123 registers for FC10.
pub trait ModbusClient: Send + Sync {
    /// Read coils (0x01).
    fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read discrete inputs (0x02).
    fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read holding registers (0x03).
    fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read input registers (0x04).
    fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write single coil (0x05).
    fn write_05(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write single register (0x06).
    fn write_06(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write multiple coils (0x0F).
    fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write multiple registers (0x10).
    fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;

    // === Semantic aliases ===

    fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_01(slave_id, address, quantity)
    }

    fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_02(slave_id, address, quantity)
    }

    fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(slave_id, address, quantity)
    }

    fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(slave_id, address, quantity)
    }

    fn write_single_coil(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_05(slave_id, address, value)
    }

    fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_06(slave_id, address, value)
    }

    fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_0f(slave_id, address, values)
    }

    fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_10(slave_id, address, values)
    }
}

/// Class-addressed register access used by the register client.
///
/// Boolean classes travel as 0/1 words so every class shares one shape.
pub trait RegisterIo: Send {
    /// Read `count` consecutive values of `class` starting at `start`.
    fn read_registers(
        &mut self,
        class: RegisterClass,
        unit: SlaveId,
        start: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write consecutive values of `class` starting at `start`.
    ///
    /// A single value uses FC05/FC06, longer runs FC0F/FC10. Read-only
    /// classes fail with [`ModbusError::ReadOnlyRegister`] without I/O.
    fn write_registers(
        &mut self,
        class: RegisterClass,
        unit: SlaveId,
        start: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;
}

/// Client over any transport; all function-code logic lives here.
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    logger: Option<CallbackLogger>,
}

/// Client over the transport picked by [`Connection::open`].
pub type ConnectionClient = GenericModbusClient<Connection>;

impl<T: ModbusTransport> GenericModbusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            logger: None,
        }
    }

    /// Client that reports every request and response to `logger`.
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        Self {
            transport,
            logger: Some(logger),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Execute a raw request
    pub async fn execute_request(&mut self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        if let Some(ref logger) = self.logger {
            logger.log_request(
                request.slave_id,
                request.function.to_u8(),
                request.address,
                request.quantity,
                &request.data,
            );
        }

        let response = self.transport.request(&request).await?;

        if let Some(ref logger) = self.logger {
            logger.log_response(response.slave_id, response.function.to_u8(), response.data());
        }

        Ok(response)
    }

    async fn read_bits(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        let request = ModbusRequest::new_read(slave_id, function, address, quantity);
        request.validate()?;

        let response = self.execute_request(request).await?;
        let mut bits = response.parse_bits()?;
        bits.truncate(usize::from(quantity));
        Ok(bits)
    }

    async fn read_words(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::new_read(slave_id, function, address, quantity);
        request.validate()?;

        let response = self.execute_request(request).await?;
        let mut words = response.parse_registers()?;
        words.truncate(usize::from(quantity));
        Ok(words)
    }

    async fn write(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
        data: Vec<u8>,
    ) -> ModbusResult<()> {
        let request = ModbusRequest {
            slave_id,
            function,
            address,
            quantity,
            data,
        };
        request.validate()?;
        let response = self.execute_request(request.clone()).await?;
        response.check_write_echo(&request)
    }
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(ModbusFunction::ReadCoils, slave_id, address, quantity)
            .await
    }

    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(ModbusFunction::ReadDiscreteInputs, slave_id, address, quantity)
            .await
    }

    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(ModbusFunction::ReadHoldingRegisters, slave_id, address, quantity)
            .await
    }

    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(ModbusFunction::ReadInputRegisters, slave_id, address, quantity)
            .await
    }

    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        let data = if value { vec![0xFF, 0x00] } else { vec![0x00, 0x00] };
        self.write(ModbusFunction::WriteSingleCoil, slave_id, address, 1, data)
            .await
    }

    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        let data = value.to_be_bytes().to_vec();
        self.write(ModbusFunction::WriteSingleRegister, slave_id, address, 1, data)
            .await
    }

    async fn write_0f(&mut self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()> {
        let quantity = u16::try_from(values.len())
            .map_err(|_| ModbusError::invalid_data("Too many coils"))?;
        // Byte count is added when the PDU is encoded
        let data = pack_bits(values);
        self.write(ModbusFunction::WriteMultipleCoils, slave_id, address, quantity, data)
            .await
    }

    async fn write_10(&mut self, slave_id: SlaveId, address: u16, values: &[u16]) -> ModbusResult<()> {
        let quantity = u16::try_from(values.len())
            .map_err(|_| ModbusError::invalid_data("Too many registers"))?;
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write(ModbusFunction::WriteMultipleRegisters, slave_id, address, quantity, data)
            .await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

impl<T: ModbusTransport> RegisterIo for GenericModbusClient<T> {
    async fn read_registers(
        &mut self,
        class: RegisterClass,
        unit: SlaveId,
        start: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        debug!("Reading {} x{} at {} from unit {}", class, count, start, unit);

        match class {
            RegisterClass::Coil => Ok(bits_to_words(self.read_01(unit, start, count).await?)),
            RegisterClass::DiscreteInput => {
                Ok(bits_to_words(self.read_02(unit, start, count).await?))
            }
            RegisterClass::HoldingRegister => self.read_03(unit, start, count).await,
            RegisterClass::InputRegister => self.read_04(unit, start, count).await,
        }
    }

    async fn write_registers(
        &mut self,
        class: RegisterClass,
        unit: SlaveId,
        start: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        if !class.is_writable() {
            return Err(ModbusError::read_only(format!("{}@{}", class, start)));
        }
        debug!("Writing {} x{} at {} to unit {}", class, values.len(), start, unit);

        match (class, values) {
            (_, []) => Ok(()),
            (RegisterClass::Coil, [value]) => self.write_05(unit, start, *value != 0).await,
            (RegisterClass::Coil, _) => {
                let bits: Vec<bool> = values.iter().map(|v| *v != 0).collect();
                self.write_0f(unit, start, &bits).await
            }
            (_, [value]) => self.write_06(unit, start, *value).await,
            _ => self.write_10(unit, start, values).await,
        }
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }
}

fn bits_to_words(bits: Vec<bool>) -> Vec<u16> {
    bits.into_iter().map(u16::from).collect()
}
