#![no_main]

use libfuzzer_sys::fuzz_target;
use sni_transport::ServerSpec;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ServerSpec::parse(s, false);
        let _ = ServerSpec::parse(s, true);
    }
});
