//! Header -> JSON -> reload -> read/write against an in-memory device.

use std::collections::HashMap;

use modbus_regmap::{
    json, ClientConfig, HeaderParser, ModbusError, ModbusResult, ParserOptions, RegisterClass,
    RegisterClient, RegisterIo, RegisterValue, SerializeOptions, SlaveId,
};

const EXAMPLE: &str = include_str!("fixtures/modbusRegisters.h");

/// Device whose registers all start at zero
#[derive(Default)]
struct ZeroDevice {
    memory: HashMap<(RegisterClass, u16), u16>,
    requests: usize,
}

impl RegisterIo for ZeroDevice {
    async fn read_registers(
        &mut self,
        class: RegisterClass,
        _unit: SlaveId,
        start: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.requests += 1;
        Ok((start..start + count)
            .map(|a| self.memory.get(&(class, a)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_registers(
        &mut self,
        class: RegisterClass,
        _unit: SlaveId,
        start: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        self.requests += 1;
        for (i, value) in values.iter().enumerate() {
            self.memory.insert((class, start + i as u16), *value);
        }
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        Ok(())
    }
}

fn reloaded_map() -> modbus_regmap::RegisterMap {
    let parsed = HeaderParser::new(ParserOptions::default())
        .parse(EXAMPLE)
        .unwrap();
    let text = json::to_json_string(&parsed.map, &SerializeOptions::new().pretty(true)).unwrap();
    let reloaded = json::from_json_str(&text).unwrap();
    assert_eq!(reloaded, parsed.map);
    reloaded
}

#[test]
fn test_header_json_round_trip() {
    let map = reloaded_map();

    let names = |class| -> Vec<&str> {
        map.registers(class).iter().map(|d| d.name.as_str()).collect()
    };
    assert_eq!(names(RegisterClass::Coil), ["SOME_EXAMPLE_COIL", "OTHER_TESTING_COIL"]);
    assert_eq!(names(RegisterClass::HoldingRegister), ["MY_DEFAULT_HREG", "SECOND_REG_HREG"]);
    assert_eq!(names(RegisterClass::DiscreteInput), ["SSR_STATE_ISTS", "ENABLE_BUTTON_STATE_ISTS"]);
    assert_eq!(names(RegisterClass::InputRegister), ["LOOP_TIME_US_IREG", "UPTIME_MS_IREG"]);

    let hreg = map.find("MY_DEFAULT_HREG").unwrap();
    assert_eq!((hreg.address, hreg.width), (10, 2));
    assert_eq!(hreg.range.map(|r| (r.min, r.max)), Some((0, 100000)));

    let loop_time = map.find("LOOP_TIME_US_IREG").unwrap();
    assert_eq!((loop_time.address, loop_time.width), (10, 2));
    assert_eq!(loop_time.unit, "us");
}

#[tokio::test]
async fn test_read_all_from_zero_device() {
    let mut client =
        RegisterClient::new(reloaded_map(), ZeroDevice::default(), ClientConfig::new(1)).unwrap();
    let report = client.read_all(&RegisterClass::ALL).await.unwrap();
    assert!(report.is_complete());

    let values = report.values();
    assert_eq!(values["SOME_EXAMPLE_COIL"], RegisterValue::Bool(false));
    assert_eq!(values["MY_DEFAULT_HREG"].as_i64(), 0);
    assert_eq!(values["SSR_STATE_ISTS"], RegisterValue::Bool(false));
    assert_eq!(values["LOOP_TIME_US_IREG"].as_i64(), 0);
    assert_eq!(values.len(), 8);

    // Coils 10-11, HREGS 10-11 and 210, ISTS 10-11, IREGS 10-13
    assert_eq!(client.io().requests, 5);
}

#[tokio::test]
async fn test_write_then_read_back() {
    let mut client =
        RegisterClient::new(reloaded_map(), ZeroDevice::default(), ClientConfig::new(1)).unwrap();

    let report = client
        .write_all([
            ("MY_DEFAULT_HREG", RegisterValue::I64(100000)),
            ("OTHER_TESTING_COIL", RegisterValue::Bool(true)),
            ("SSR_STATE_ISTS", RegisterValue::Bool(true)),
        ])
        .await
        .unwrap();
    assert_eq!(report.written(), ["MY_DEFAULT_HREG", "OTHER_TESTING_COIL"]);
    assert!(matches!(
        report.failures()[0].1,
        ModbusError::ReadOnlyRegister { .. }
    ));

    assert_eq!(
        client.read_one("MY_DEFAULT_HREG").await.unwrap(),
        RegisterValue::U32(100000)
    );
    assert_eq!(
        client.read_one("OTHER_TESTING_COIL").await.unwrap(),
        RegisterValue::Bool(true)
    );

    let err = client
        .write_one("MY_DEFAULT_HREG", RegisterValue::I64(150000))
        .await
        .unwrap_err();
    assert!(matches!(err, ModbusError::OutOfRange { .. }));
}
