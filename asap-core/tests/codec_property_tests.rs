//! Property-based tests for the JSON-RPC codec.
//!
//! For any envelope and request id, decoding an encoded request yields the
//! same request, and decoding an encoded success response yields the same
//! envelope.

use asap_core::{
    decode_request, decode_response, encode_request, encode_response, JsonRpcRequest,
    JsonRpcResponse,
};
use asap_test_utils::generators::{arb_envelope, arb_request_id};
use proptest::prelude::*;

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_request_roundtrip(envelope in arb_envelope(), id in arb_request_id()) {
        let request = JsonRpcRequest::new(envelope, id);
        let bytes = encode_request(&request).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let decoded = decode_request(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn prop_success_response_roundtrip(envelope in arb_envelope(), id in arb_request_id()) {
        let response = JsonRpcResponse::success(id, envelope);
        let bytes = encode_response(&response).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let decoded = decode_response(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, response);
    }

    #[test]
    fn prop_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_request(&bytes);
        let _ = decode_response(&bytes);
    }
}
