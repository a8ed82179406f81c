//! The ASAP message envelope.

use crate::constants::{
    ASAP_PROTOCOL_VERSION, NONCE_EXTENSION_KEY, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::error::AsapError;
use crate::ids::{AgentUrn, EnvelopeId};
use crate::payload::PayloadSchemaRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_protocol_version() -> String {
    ASAP_PROTOCOL_VERSION.to_string()
}

/// Typed message exchanged between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    #[serde(rename = "asap_version", default = "default_protocol_version")]
    pub protocol_version: String,
    pub timestamp: DateTime<Utc>,
    pub sender: AgentUrn,
    pub recipient: AgentUrn,
    pub payload_type: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    #[serde(default)]
    pub requires_ack: bool,
}

impl Envelope {
    /// Build a new envelope stamped with a fresh id and the current time.
    pub fn new(
        sender: AgentUrn,
        recipient: AgentUrn,
        payload_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: EnvelopeId::new(),
            protocol_version: default_protocol_version(),
            timestamp: Utc::now(),
            sender,
            recipient,
            payload_type: payload_type.into(),
            payload,
            correlation_id: None,
            trace_id: None,
            extensions: Map::new(),
            requires_ack: false,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Attach a replay-protection nonce.
    pub fn with_nonce(self, nonce: impl Into<String>) -> Self {
        self.with_extension(NONCE_EXTENSION_KEY, Value::String(nonce.into()))
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_requires_ack(mut self, requires_ack: bool) -> Self {
        self.requires_ack = requires_ack;
        self
    }

    /// The replay nonce, if one is attached.
    ///
    /// A present but empty or non-string nonce is an error rather than `None`.
    pub fn nonce(&self) -> Result<Option<&str>, AsapError> {
        match self.extensions.get(NONCE_EXTENSION_KEY) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => {
                Err(AsapError::invalid_nonce("nonce must not be empty"))
            }
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(AsapError::invalid_nonce("nonce must be a string")),
        }
    }

    /// Build a response addressed back to this envelope's sender.
    pub fn reply(&self, payload_type: impl Into<String>, payload: Value) -> Envelope {
        let mut response = Envelope::new(
            self.recipient.clone(),
            self.sender.clone(),
            payload_type,
            payload,
        )
        .with_correlation_id(self.id.to_string());
        response.trace_id = self.trace_id.clone();
        response
    }

    /// Parse an envelope from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Envelope, AsapError> {
        serde_json::from_value(value).map_err(|e| AsapError::malformed(e.to_string()))
    }

    /// Check the envelope invariants serde cannot express.
    pub fn validate(&self, schemas: &PayloadSchemaRegistry) -> Result<(), AsapError> {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.protocol_version.as_str()) {
            return Err(AsapError::VersionMismatch {
                version: self.protocol_version.clone(),
                supported: SUPPORTED_PROTOCOL_VERSIONS.join(", "),
            });
        }
        if self.payload_type.trim().is_empty() {
            return Err(AsapError::malformed("payload_type must not be empty"));
        }
        if !self.payload.is_object() {
            return Err(AsapError::malformed("payload must be a JSON object"));
        }
        schemas.validate(&self.payload_type, &self.payload)
    }
}
