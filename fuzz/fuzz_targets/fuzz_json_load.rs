#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_regmap::{json, SerializeOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(map) = json::from_json_str(text) {
        let doc = json::to_json(&map, &SerializeOptions::default());
        assert_eq!(json::from_json(&doc).expect("loaded map must reload"), map);
    }
});
