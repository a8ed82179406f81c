//! JSON-RPC 2.0 framing for envelopes.
//!
//! Request: `{"jsonrpc":"2.0","method":"asap.send","params":{"envelope":{..}},"id":..}`.
//! Success: `{"jsonrpc":"2.0","result":{"envelope":{..}},"id":..}`.
//! Error: `{"jsonrpc":"2.0","error":{"code":..,"message":..,"data":..},"id":..|null}`.
//!
//! Decoding checks the outer frame before touching the envelope so the
//! request id can be echoed back in as many error responses as possible.

use crate::constants::{ASAP_METHOD, JSONRPC_VERSION};
use crate::envelope::Envelope;
use crate::error::AsapError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR CODES
// ============================================================================

pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Resource exhaustion: rate limited, executor full, payload too large.
    pub const SERVER_ERROR: i64 = -32000;
    pub const UNAUTHORIZED: i64 = -32001;
    pub const FORBIDDEN: i64 = -32003;
}

// ============================================================================
// FRAME TYPES
// ============================================================================

/// JSON-RPC request id: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<RequestId> {
        match value {
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// `params` / `result` body: a single envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    pub envelope: Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: EnvelopeParams,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(envelope: Envelope, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: ASAP_METHOD.to_string(),
            params: EnvelopeParams { envelope },
            id: id.into(),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.params.envelope
    }

    pub fn into_envelope(self) -> Envelope {
        self.params.envelope
    }
}

/// The `error` member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Namespaced taxonomy code from `data.code`, when present.
    pub fn asap_code(&self) -> Option<&str> {
        self.data.as_ref()?.get("code")?.as_str()
    }
}

impl From<&AsapError> for JsonRpcError {
    fn from(err: &AsapError) -> Self {
        JsonRpcError::new(err.rpc_code(), err.to_string()).with_data(err.details())
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcResponse {
    Success { id: RequestId, envelope: Envelope },
    Error { id: Option<RequestId>, error: JsonRpcError },
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, envelope: Envelope) -> Self {
        JsonRpcResponse::Success { id, envelope }
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        JsonRpcResponse::Error { id, error }
    }

    /// Error frame for a protocol error.
    pub fn from_asap_error(id: Option<RequestId>, err: &AsapError) -> Self {
        JsonRpcResponse::Error {
            id,
            error: JsonRpcError::from(err),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcResponse::Success { id, .. } => Some(id),
            JsonRpcResponse::Error { id, .. } => id.as_ref(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JsonRpcResponse::Error { .. })
    }
}

#[derive(Serialize)]
struct ResultBody<'a> {
    envelope: &'a Envelope,
}

impl Serialize for JsonRpcResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut frame = serializer.serialize_struct("JsonRpcResponse", 3)?;
        frame.serialize_field("jsonrpc", JSONRPC_VERSION)?;
        match self {
            JsonRpcResponse::Success { id, envelope } => {
                frame.serialize_field("result", &ResultBody { envelope })?;
                frame.serialize_field("id", id)?;
            }
            JsonRpcResponse::Error { id, error } => {
                frame.serialize_field("error", error)?;
                frame.serialize_field("id", id)?;
            }
        }
        frame.end()
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeErrorKind {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Envelope(AsapError),
}

/// Decode failure, with the request id when it could be recovered.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct DecodeError {
    pub id: Option<RequestId>,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    fn new(id: Option<RequestId>, kind: DecodeErrorKind) -> Self {
        Self { id, kind }
    }

    /// JSON-RPC error object describing this failure.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match &self.kind {
            DecodeErrorKind::Parse(_) => JsonRpcError::new(codes::PARSE_ERROR, self.to_string()),
            DecodeErrorKind::InvalidRequest(_) => {
                JsonRpcError::new(codes::INVALID_REQUEST, self.to_string())
            }
            DecodeErrorKind::MethodNotFound(_) => {
                JsonRpcError::new(codes::METHOD_NOT_FOUND, self.to_string())
            }
            DecodeErrorKind::InvalidParams(_) => {
                JsonRpcError::new(codes::INVALID_PARAMS, self.to_string())
            }
            DecodeErrorKind::Envelope(err) => JsonRpcError::from(err),
        }
    }

    pub fn into_response(self) -> JsonRpcResponse {
        let error = self.to_rpc_error();
        JsonRpcResponse::Error { id: self.id, error }
    }

    /// Short label for metrics and logs.
    pub fn error_type(&self) -> &'static str {
        match &self.kind {
            DecodeErrorKind::Parse(_) => "parse_error",
            DecodeErrorKind::InvalidRequest(_) => "invalid_request",
            DecodeErrorKind::MethodNotFound(_) => "method_not_found",
            DecodeErrorKind::InvalidParams(_) => "invalid_params",
            DecodeErrorKind::Envelope(err) => err.code(),
        }
    }
}

fn take_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Decode a request frame from raw bytes.
///
/// Envelope schema validation is left to the caller; this only guarantees
/// the frame shape and that the envelope deserializes.
pub fn decode_request(bytes: &[u8]) -> Result<JsonRpcRequest, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::new(None, DecodeErrorKind::Parse(e.to_string())))?;
    let mut frame = take_object(value).ok_or_else(|| {
        DecodeError::new(
            None,
            DecodeErrorKind::InvalidRequest("request must be a JSON object".into()),
        )
    })?;

    let id = match frame.get("id") {
        Some(raw) => RequestId::from_value(raw).ok_or_else(|| {
            DecodeError::new(
                None,
                DecodeErrorKind::InvalidRequest("id must be a string or an integer".into()),
            )
        })?,
        None => {
            return Err(DecodeError::new(
                None,
                DecodeErrorKind::InvalidRequest("id is required".into()),
            ))
        }
    };
    let fail = |kind| Err(DecodeError::new(Some(id.clone()), kind));

    if frame.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return fail(DecodeErrorKind::InvalidRequest(
            "jsonrpc must be \"2.0\"".into(),
        ));
    }
    let method = match frame.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => {
            return fail(DecodeErrorKind::InvalidRequest(
                "method must be a string".into(),
            ))
        }
    };
    if method != ASAP_METHOD {
        return fail(DecodeErrorKind::MethodNotFound(method));
    }
    let mut params = match frame.remove("params").and_then(take_object) {
        Some(params) => params,
        None => {
            return fail(DecodeErrorKind::InvalidParams(
                "params must be an object".into(),
            ))
        }
    };
    let envelope = match params.remove("envelope") {
        Some(raw) => match Envelope::from_value(raw) {
            Ok(envelope) => envelope,
            Err(err) => return fail(DecodeErrorKind::Envelope(err)),
        },
        None => {
            return fail(DecodeErrorKind::Envelope(AsapError::malformed(
                "params.envelope is required",
            )))
        }
    };

    Ok(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method,
        params: EnvelopeParams { envelope },
        id,
    })
}

/// Decode a response frame from raw bytes.
pub fn decode_response(bytes: &[u8]) -> Result<JsonRpcResponse, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::new(None, DecodeErrorKind::Parse(e.to_string())))?;
    let mut frame = take_object(value).ok_or_else(|| {
        DecodeError::new(
            None,
            DecodeErrorKind::InvalidRequest("response must be a JSON object".into()),
        )
    })?;

    let id = frame.get("id").and_then(RequestId::from_value);
    let invalid = |id: Option<RequestId>, reason: &str| {
        Err(DecodeError::new(
            id,
            DecodeErrorKind::InvalidRequest(reason.to_string()),
        ))
    };

    if frame.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return invalid(id, "jsonrpc must be \"2.0\"");
    }

    match (frame.remove("result"), frame.remove("error")) {
        (Some(result), None) => {
            let Some(id) = id else {
                return invalid(None, "success response requires an id");
            };
            let envelope = take_object(result)
                .and_then(|mut r| r.remove("envelope"))
                .ok_or_else(|| {
                    DecodeError::new(
                        Some(id.clone()),
                        DecodeErrorKind::Envelope(AsapError::malformed(
                            "result.envelope is required",
                        )),
                    )
                })?;
            let envelope = Envelope::from_value(envelope).map_err(|e| {
                DecodeError::new(Some(id.clone()), DecodeErrorKind::Envelope(e))
            })?;
            Ok(JsonRpcResponse::Success { id, envelope })
        }
        (None, Some(error)) => {
            let error: JsonRpcError = serde_json::from_value(error).map_err(|e| {
                DecodeError::new(id.clone(), DecodeErrorKind::InvalidRequest(e.to_string()))
            })?;
            Ok(JsonRpcResponse::Error { id, error })
        }
        _ => invalid(id, "response must carry exactly one of result or error"),
    }
}

// ============================================================================
// ENCODING
// ============================================================================

pub fn encode_request(request: &JsonRpcRequest) -> Result<Vec<u8>, AsapError> {
    serde_json::to_vec(request).map_err(|e| AsapError::internal(e.to_string()))
}

pub fn encode_response(response: &JsonRpcResponse) -> Result<Vec<u8>, AsapError> {
    serde_json::to_vec(response).map_err(|e| AsapError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AgentUrn;
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope::new(
            AgentUrn::for_agent("alice").unwrap(),
            AgentUrn::for_agent("bob").unwrap(),
            "task.request",
            json!({"conversation_id": "c", "skill_id": "echo", "input": {"x": 1}}),
        )
    }

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_request_roundtrip() {
        let request = JsonRpcRequest::new(envelope(), 7);
        let bytes = encode_request(&request).unwrap();
        assert_eq!(decode_request(&bytes).unwrap(), request);
    }

    #[test]
    fn test_float_payloads_roundtrip_exactly() {
        let floats = [
            1.0715660391465826e-75,
            -1.81996730402717e-179,
            -1.603964615428183e143,
            -9.643915712060552e-234,
        ];
        let mut env = envelope();
        env.payload = json!({"a": floats[0], "b": floats[1], "c": floats[2], "d": floats[3]});

        let request = JsonRpcRequest::new(env, 1);
        let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.envelope().payload["c"].as_f64(), Some(floats[2]));
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let err = decode_request(b"{not json").unwrap_err();
        assert_eq!(err.id, None);
        assert_eq!(err.to_rpc_error().code, codes::PARSE_ERROR);
        let body = serde_json::to_value(err.into_response()).unwrap();
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["jsonrpc"], "2.0");
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        let err = decode_request(&frame(json!({
            "jsonrpc": "1.0", "method": "asap.send", "params": {}, "id": "abc"
        })))
        .unwrap_err();
        assert_eq!(err.id, Some(RequestId::from("abc")));
        assert_eq!(err.to_rpc_error().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn test_unknown_method() {
        let err = decode_request(&frame(json!({
            "jsonrpc": "2.0", "method": "asap.other", "params": {}, "id": 1
        })))
        .unwrap_err();
        assert_eq!(err.to_rpc_error().code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_bad_id_and_bad_params() {
        let err = decode_request(&frame(json!({
            "jsonrpc": "2.0", "method": "asap.send", "params": {}, "id": [1]
        })))
        .unwrap_err();
        assert_eq!(err.to_rpc_error().code, codes::INVALID_REQUEST);

        let err = decode_request(&frame(json!({
            "jsonrpc": "2.0", "method": "asap.send", "params": [], "id": 1
        })))
        .unwrap_err();
        assert_eq!(err.to_rpc_error().code, codes::INVALID_PARAMS);
    }

    #[test]
    fn test_malformed_envelope_maps_to_invalid_params_with_code() {
        let err = decode_request(&frame(json!({
            "jsonrpc": "2.0", "method": "asap.send", "params": {"envelope": {"id": "x"}}, "id": 3
        })))
        .unwrap_err();
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, codes::INVALID_PARAMS);
        assert_eq!(rpc.asap_code(), Some("protocol/malformed_envelope"));
        assert_eq!(err.id, Some(RequestId::Number(3)));
    }

    #[test]
    fn test_success_response_shape_and_decode() {
        let response = JsonRpcResponse::success(RequestId::from("r1"), envelope());
        let bytes = encode_response(&response).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["result"]["envelope"].is_object());
        assert!(value.get("error").is_none());
        assert_eq!(decode_response(&bytes).unwrap(), response);
    }

    #[test]
    fn test_error_response_decode() {
        let err = AsapError::TaskNotFound { task_id: "t".into() };
        let response = JsonRpcResponse::from_asap_error(Some(RequestId::Number(9)), &err);
        let bytes = encode_response(&response).unwrap();
        match decode_response(&bytes).unwrap() {
            JsonRpcResponse::Error { id, error } => {
                assert_eq!(id, Some(RequestId::Number(9)));
                assert_eq!(error.code, codes::INVALID_PARAMS);
                assert_eq!(error.asap_code(), Some("protocol/task_not_found"));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn test_response_with_both_members_is_invalid() {
        let err = decode_response(&frame(json!({
            "jsonrpc": "2.0", "result": {}, "error": {"code": 1, "message": "x"}, "id": 1
        })))
        .unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::InvalidRequest(_)));
    }
}
