//! ASAP Test Utilities
//!
//! Shared test infrastructure for the ASAP workspace:
//! - Proptest generators for protocol types
//! - Fixtures for manifests, envelopes and JSON-RPC frames
//! - Assertions over JSON-RPC responses
//!
//! Every helper here panics on misuse; it is meant for tests only.

pub use asap_core::{
    AgentUrn, Envelope, JsonRpcRequest, JsonRpcResponse, ManualClock, Manifest, RequestId,
    SharedClock, TaskStatus,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for protocol types.

    use super::*;
    use asap_core::EnvelopeId;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde_json::{Map, Value};
    use uuid::Uuid;

    /// Generate a valid agent URN, sometimes with a sub-agent segment.
    pub fn arb_agent_urn() -> impl Strategy<Value = AgentUrn> {
        "[a-z][a-z0-9-]{0,15}(:[a-z0-9_.]{1,8})?".prop_map(|name| fixtures::agent(&name))
    }

    /// Generate a JSON-RPC request id (integer or string).
    pub fn arb_request_id() -> impl Strategy<Value = RequestId> {
        prop_oneof![
            any::<i64>().prop_map(RequestId::Number),
            "[a-zA-Z0-9-]{1,20}".prop_map(RequestId::String),
        ]
    }

    /// Generate any task status.
    pub fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
        prop::sample::select(TaskStatus::ALL.to_vec())
    }

    /// Generate a timestamp with nanosecond precision, up to year 2100.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_102_444_800, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now))
    }

    /// Generate a finite float, subnormals included.
    pub fn arb_finite_f64() -> impl Strategy<Value = f64> {
        prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
    }

    /// Generate a JSON scalar.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            arb_finite_f64().prop_map(Value::from),
            "[ -~]{0,24}".prop_map(Value::String),
            Just(Value::Null),
        ]
    }

    /// Generate a flat JSON object payload.
    pub fn arb_payload_object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z_]{1,10}", arb_scalar(), 0..6).prop_map(|entries| {
            let map: Map<String, Value> = entries.into_iter().collect();
            Value::Object(map)
        })
    }

    /// Generate an envelope with an unregistered payload type.
    pub fn arb_envelope() -> impl Strategy<Value = Envelope> {
        (
            any::<[u8; 16]>(),
            arb_timestamp(),
            arb_agent_urn(),
            arb_agent_urn(),
            "[a-z]{1,8}\\.[a-z]{1,8}",
            arb_payload_object(),
            proptest::option::of("[a-zA-Z0-9-]{1,36}"),
            proptest::option::of("[a-f0-9]{32}"),
            proptest::option::of("[a-zA-Z0-9]{8,24}"),
            any::<bool>(),
        )
            .prop_map(
                |(id, timestamp, sender, recipient, payload_type, payload, corr, trace, nonce, ack)| {
                    let mut envelope = Envelope::new(sender, recipient, payload_type, payload)
                        .with_timestamp(timestamp)
                        .with_requires_ack(ack);
                    envelope.id = EnvelopeId::from_uuid(Uuid::from_bytes(id));
                    envelope.correlation_id = corr;
                    envelope.trace_id = trace;
                    if let Some(nonce) = nonce {
                        envelope = envelope.with_nonce(nonce);
                    }
                    envelope
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use asap_core::constants::{
        ASAP_PATH, PAYLOAD_MESSAGE_SEND, PAYLOAD_TASK_CANCEL, PAYLOAD_TASK_REQUEST,
    };
    use asap_core::{encode_request, Skill};
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Agent URN for `name`.
    #[track_caller]
    pub fn agent(name: &str) -> AgentUrn {
        AgentUrn::for_agent(name).unwrap_or_else(|e| panic!("invalid fixture agent '{name}': {e}"))
    }

    /// Manifest for an echo agent named `name` served at `base_url`.
    pub fn manifest_at(name: &str, base_url: &str) -> Manifest {
        Manifest::new(
            agent(name),
            name,
            "1.0.0",
            format!("{}{}", base_url.trim_end_matches('/'), ASAP_PATH),
        )
        .with_description("Test agent")
        .with_skill(Skill::new("echo", "Echo the input"))
    }

    /// Manifest for an echo agent named `name` on localhost.
    pub fn manifest(name: &str) -> Manifest {
        manifest_at(name, "http://127.0.0.1:8000")
    }

    /// Fixed instant used by deterministic tests: 2025-01-01T00:00:00Z.
    pub fn fixed_instant() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_else(Utc::now)
    }

    /// Manual clock starting at [`fixed_instant`].
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(fixed_instant()))
    }

    /// `task.request` envelope with `input`.
    pub fn task_request(sender: &str, recipient: &str, input: Value) -> Envelope {
        Envelope::new(
            agent(sender),
            agent(recipient),
            PAYLOAD_TASK_REQUEST,
            json!({
                "conversation_id": "conv-1",
                "skill_id": "echo",
                "input": input,
            }),
        )
    }

    /// `task.cancel` envelope for `task_id`.
    pub fn task_cancel(sender: &str, recipient: &str, task_id: &str) -> Envelope {
        Envelope::new(
            agent(sender),
            agent(recipient),
            PAYLOAD_TASK_CANCEL,
            json!({ "task_id": task_id, "reason": "no longer needed" }),
        )
    }

    /// `message.send` envelope.
    pub fn message_send(sender: &str, recipient: &str, content: &str) -> Envelope {
        Envelope::new(
            agent(sender),
            agent(recipient),
            PAYLOAD_MESSAGE_SEND,
            json!({ "conversation_id": "conv-1", "content": content }),
        )
    }

    /// Encoded `asap.send` request body.
    #[track_caller]
    pub fn rpc_body(envelope: &Envelope, id: i64) -> Vec<u8> {
        let request = JsonRpcRequest::new(envelope.clone(), id);
        encode_request(&request).unwrap_or_else(|e| panic!("failed to encode request: {e}"))
    }

    /// JSON-RPC success body wrapping `envelope`.
    pub fn rpc_success_body(envelope: &Envelope, id: i64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "result": { "envelope": envelope },
            "id": id,
        })
    }

    /// JSON-RPC error body.
    pub fn rpc_error_body(id: i64, code: i64, message: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": { "code": code, "message": message },
            "id": id,
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over decoded JSON-RPC responses.

    use super::*;

    /// Assert a success frame and return its envelope.
    #[track_caller]
    pub fn assert_success(response: &JsonRpcResponse) -> &Envelope {
        match response {
            JsonRpcResponse::Success { envelope, .. } => envelope,
            JsonRpcResponse::Error { error, .. } => {
                panic!("Expected success, got error {}: {}", error.code, error.message)
            }
        }
    }

    /// Assert an error frame with the given JSON-RPC code and, when given,
    /// the namespaced ASAP code in `error.data.code`.
    #[track_caller]
    pub fn assert_rpc_error(response: &JsonRpcResponse, code: i64, asap_code: Option<&str>) {
        match response {
            JsonRpcResponse::Error { error, .. } => {
                assert_eq!(error.code, code, "unexpected JSON-RPC code: {error:?}");
                if let Some(expected) = asap_code {
                    assert_eq!(error.asap_code(), Some(expected), "unexpected ASAP code");
                }
            }
            JsonRpcResponse::Success { .. } => {
                panic!("Expected error {code}, got success: {response:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asap_core::decode_request;
    use proptest::prelude::*;

    #[test]
    fn test_rpc_body_decodes() {
        let envelope = fixtures::task_request("alice", "bob", serde_json::json!({"x": 1}));
        let decoded = decode_request(&fixtures::rpc_body(&envelope, 7)).unwrap();
        assert_eq!(decoded.envelope(), &envelope);
        assert_eq!(decoded.id, RequestId::Number(7));
    }

    #[test]
    fn test_manual_clock_starts_at_fixed_instant() {
        use asap_core::Clock;
        assert_eq!(fixtures::manual_clock().now(), fixtures::fixed_instant());
    }

    proptest! {
        #[test]
        fn prop_generated_envelopes_have_urns(envelope in generators::arb_envelope()) {
            prop_assert!(envelope.sender.as_str().starts_with("urn:asap:agent:"));
            prop_assert!(!envelope.payload_type.is_empty());
        }
    }
}
