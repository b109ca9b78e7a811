#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_regmap::{json, HeaderParser, ParserOptions, SerializeOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let parser = HeaderParser::new(ParserOptions::new().with_classify_by_suffix(true));
    if let Ok(parsed) = parser.parse(text) {
        // Anything the parser accepts must survive a document round trip
        let doc = json::to_json(&parsed.map, &SerializeOptions::default());
        let reloaded = json::from_json(&doc).expect("parsed map must reload");
        assert_eq!(reloaded, parsed.map);
    }
});
