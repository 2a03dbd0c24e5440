#![no_main]

use libfuzzer_sys::fuzz_target;
use sni_protocol::{FRAME_HEADER_SIZE, FrameHeader};

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    if let Ok(header) = FrameHeader::decode(&mut cursor) {
        // A decoded header re-encodes to the bytes it came from.
        assert_eq!(&header.encode_to_array()[..], &data[..FRAME_HEADER_SIZE]);
    }
});
