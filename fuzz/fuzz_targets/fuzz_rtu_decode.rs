#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_regmap::transport::decode_rtu_frame;
use modbus_regmap::ModbusResponse;

fuzz_target!(|data: &[u8]| {
    if let Ok((slave, pdu)) = decode_rtu_frame(data) {
        if let Ok(response) = ModbusResponse::from_pdu(slave, pdu) {
            let _ = response.parse_registers();
            let _ = response.parse_bits();
        }
    }
});
