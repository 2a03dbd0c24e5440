#![no_main]

use arbitrary::Arbitrary;
use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use sni_protocol::FrameReassembler;

#[derive(Debug, Arbitrary)]
struct Input {
    max_payload: u16,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let mut reassembler = FrameReassembler::new().with_max_payload(usize::from(input.max_payload));
    let mut buf = BytesMut::new();

    for chunk in input.chunks {
        buf.extend_from_slice(&chunk);
        loop {
            match reassembler.next_frame(&mut buf) {
                Ok(Some(frame)) => {
                    assert!(frame.payload.len() <= usize::from(input.max_payload));
                }
                Ok(None) => break,
                Err(_) => {
                    reassembler.reset();
                    buf.advance(buf.remaining());
                    break;
                }
            }
        }
    }
});
