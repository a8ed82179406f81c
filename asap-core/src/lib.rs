//! ASAP Core - protocol types
//!
//! Envelope model, identifiers, payload schemas, agent manifest, task
//! lifecycle state machine, JSON-RPC framing and the error taxonomy shared
//! by the server and client crates. No I/O happens here.

pub mod clock;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod jsonrpc;
pub mod manifest;
pub mod payload;
pub mod task;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use envelope::Envelope;
pub use error::{AsapError, AsapResult, ErrorCategory};
pub use ids::{AgentUrn, EnvelopeId, InvalidUrn, TaskId};
pub use jsonrpc::{
    decode_request, decode_response, encode_request, encode_response, DecodeError,
    DecodeErrorKind, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use manifest::{AuthScheme, Capabilities, Endpoints, Manifest, Skill};
pub use payload::{
    MessageSend, Payload, PayloadSchemaRegistry, SchemaCompileError, TaskCancel, TaskError,
    TaskProgress, TaskRequest, TaskResponse, TaskUpdate, UpdateType,
};
pub use task::{Task, TaskStatus};
