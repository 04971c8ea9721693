#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_rtu::frame;

fuzz_target!(|data: &[u8]| {
    // Any byte sequence must decode or fail cleanly
    if let Ok(decoded) = frame::decode(data) {
        let reencoded = frame::encode(decoded.unit_id, decoded.function_code, &decoded.payload);
        assert_eq!(reencoded.as_slice(), data);
        if decoded.is_exception() {
            assert!(decoded.exception_code().is_some());
        }
    }
});
