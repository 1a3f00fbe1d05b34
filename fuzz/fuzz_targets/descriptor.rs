#![no_main]

use libfuzzer_sys::fuzz_target;
use tytest::descriptor::parse_descriptor;

fuzz_target!(|data: &[u8]| {
    // Convert bytes to UTF-8 string (ignore invalid UTF-8)
    if let Ok(s) = std::str::from_utf8(data) {
        // Syntax error spans must stay inside the input
        if let Err(tytest::DescriptorError::Syntax { span, .. }) = parse_descriptor("fuzz", s) {
            assert!(span.offset() <= s.len());
        }
    }
});
