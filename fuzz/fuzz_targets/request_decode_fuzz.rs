//! Fuzz the JSON-RPC request decoder with arbitrary bytes.
//!
//! Run with: cargo +nightly fuzz run request_decode_fuzz -- -max_total_time=60

#![no_main]

use asap_core::{decode_request, encode_request, PayloadSchemaRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match decode_request(data) {
        Ok(request) => {
            // Schema validation must never panic either
            let schemas = PayloadSchemaRegistry::with_builtin();
            let _ = request.envelope().validate(&schemas);

            // Anything we accept must survive a re-encode
            let bytes = encode_request(&request).expect("decoded request re-encodes");
            let again = decode_request(&bytes).expect("re-encoded request decodes");
            assert_eq!(again.id, request.id);
            assert_eq!(again.envelope().id, request.envelope().id);
        }
        Err(err) => {
            // Every failure maps to a JSON-RPC error frame
            let rpc = err.to_rpc_error();
            assert!(rpc.code < 0);
        }
    }
});
