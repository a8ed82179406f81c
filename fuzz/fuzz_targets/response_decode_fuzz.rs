//! Fuzz the JSON-RPC response decoder used by the client.
//!
//! Run with: cargo +nightly fuzz run response_decode_fuzz -- -max_total_time=60

#![no_main]

use asap_core::{decode_response, encode_response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = decode_response(data) {
        let bytes = encode_response(&response).expect("decoded response re-encodes");
        let again = decode_response(&bytes).expect("re-encoded response decodes");
        assert_eq!(again.id(), response.id());
        assert_eq!(again.is_error(), response.is_error());
    }
});
