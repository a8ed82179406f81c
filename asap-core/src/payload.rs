//! Typed payloads and the payload schema registry.
//!
//! Built-in payload types have a serde struct and a JSON Schema. The schema
//! registry is what envelope validation consults; unknown payload types have
//! no schema and pass through to routing.

use crate::constants::{
    PAYLOAD_MESSAGE_SEND, PAYLOAD_TASK_CANCEL, PAYLOAD_TASK_REQUEST, PAYLOAD_TASK_RESPONSE,
    PAYLOAD_TASK_UPDATE,
};
use crate::envelope::Envelope;
use crate::error::AsapError;
use crate::task::TaskStatus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// TYPED PAYLOADS
// ============================================================================

/// A payload struct bound to its `payload_type` discriminator.
pub trait Payload: Serialize + DeserializeOwned {
    const PAYLOAD_TYPE: &'static str;

    fn to_value(&self) -> Result<Value, AsapError> {
        serde_json::to_value(self).map_err(|e| AsapError::internal(e.to_string()))
    }
}

/// Request to run a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub conversation_id: String,
    pub skill_id: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl Payload for TaskRequest {
    const PAYLOAD_TYPE: &'static str = PAYLOAD_TASK_REQUEST;
}

/// Error object reported inside a [`TaskResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

/// Outcome of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl Payload for TaskResponse {
    const PAYLOAD_TYPE: &'static str = PAYLOAD_TASK_RESPONSE;
}

/// Kind of a [`TaskUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Progress,
    Status,
}

/// Progress report attached to an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Intermediate progress or status change of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub update_type: UpdateType,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
}

impl Payload for TaskUpdate {
    const PAYLOAD_TYPE: &'static str = PAYLOAD_TASK_UPDATE;
}

/// Request to cancel a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCancel {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Payload for TaskCancel {
    const PAYLOAD_TYPE: &'static str = PAYLOAD_TASK_CANCEL;
}

/// Free-form conversational message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSend {
    pub conversation_id: String,
    pub content: String,
}

impl Payload for MessageSend {
    const PAYLOAD_TYPE: &'static str = PAYLOAD_MESSAGE_SEND;
}

impl Envelope {
    /// Deserialize the payload as `T`, checking the discriminator first.
    pub fn parse_payload<T: Payload>(&self) -> Result<T, AsapError> {
        if self.payload_type != T::PAYLOAD_TYPE {
            return Err(AsapError::malformed(format!(
                "expected payload type '{}', got '{}'",
                T::PAYLOAD_TYPE,
                self.payload_type
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| AsapError::malformed(format!("{}: {}", T::PAYLOAD_TYPE, e)))
    }
}

// ============================================================================
// SCHEMA REGISTRY
// ============================================================================

/// A schema failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid schema for payload type '{payload_type}': {reason}")]
pub struct SchemaCompileError {
    pub payload_type: String,
    pub reason: String,
}

/// Payload-type → compiled JSON Schema.
#[derive(Clone, Default)]
pub struct PayloadSchemaRegistry {
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl std::fmt::Debug for PayloadSchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.validators.keys().collect();
        types.sort();
        f.debug_struct("PayloadSchemaRegistry")
            .field("payload_types", &types)
            .finish()
    }
}

impl PayloadSchemaRegistry {
    /// An empty registry: every payload type is accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in payload schemas.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (payload_type, schema) in builtin_schemas() {
            // Built-in schemas are static and known to compile.
            if let Err(e) = registry.register(payload_type, &schema) {
                tracing::error!(error = %e, "built-in payload schema failed to compile");
            }
        }
        registry
    }

    /// Compile and register a schema, replacing any previous one.
    pub fn register(
        &mut self,
        payload_type: impl Into<String>,
        schema: &Value,
    ) -> Result<(), SchemaCompileError> {
        let payload_type = payload_type.into();
        let validator =
            jsonschema::draft202012::new(schema).map_err(|e| SchemaCompileError {
                payload_type: payload_type.clone(),
                reason: e.to_string(),
            })?;
        self.validators.insert(payload_type, Arc::new(validator));
        Ok(())
    }

    pub fn contains(&self, payload_type: &str) -> bool {
        self.validators.contains_key(payload_type)
    }

    /// Validate `payload` against the schema for `payload_type`, if any.
    pub fn validate(&self, payload_type: &str, payload: &Value) -> Result<(), AsapError> {
        let Some(validator) = self.validators.get(payload_type) else {
            return Ok(());
        };
        let errors: Vec<String> = validator
            .iter_errors(payload)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AsapError::malformed(format!(
                "payload does not match schema for '{}': {}",
                payload_type,
                errors.join("; ")
            )))
        }
    }
}

fn status_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["submitted", "running", "completed", "failed", "cancelled"]
    })
}

fn builtin_schemas() -> Vec<(&'static str, Value)> {
    vec![
        (
            PAYLOAD_TASK_REQUEST,
            json!({
                "type": "object",
                "required": ["conversation_id", "skill_id", "input"],
                "properties": {
                    "conversation_id": {"type": "string", "minLength": 1},
                    "skill_id": {"type": "string", "minLength": 1},
                    "input": {"type": "object"},
                    "config": {"type": "object"}
                }
            }),
        ),
        (
            PAYLOAD_TASK_RESPONSE,
            json!({
                "type": "object",
                "required": ["task_id", "status"],
                "properties": {
                    "task_id": {"type": "string", "minLength": 1},
                    "status": status_schema(),
                    "result": {"type": "object"},
                    "error": {
                        "type": "object",
                        "required": ["code", "message"],
                        "properties": {
                            "code": {"type": "string"},
                            "message": {"type": "string"}
                        }
                    }
                }
            }),
        ),
        (
            PAYLOAD_TASK_UPDATE,
            json!({
                "type": "object",
                "required": ["task_id", "update_type", "status"],
                "properties": {
                    "task_id": {"type": "string", "minLength": 1},
                    "update_type": {"type": "string", "enum": ["progress", "status"]},
                    "status": status_schema(),
                    "progress": {
                        "type": "object",
                        "properties": {
                            "percent": {"type": "number", "minimum": 0, "maximum": 100},
                            "message": {"type": "string"}
                        }
                    }
                }
            }),
        ),
        (
            PAYLOAD_TASK_CANCEL,
            json!({
                "type": "object",
                "required": ["task_id"],
                "properties": {
                    "task_id": {"type": "string", "minLength": 1},
                    "reason": {"type": "string"}
                }
            }),
        ),
        (
            PAYLOAD_MESSAGE_SEND,
            json!({
                "type": "object",
                "required": ["conversation_id", "content"],
                "properties": {
                    "conversation_id": {"type": "string", "minLength": 1},
                    "content": {"type": "string"}
                }
            }),
        ),
    ]
}
