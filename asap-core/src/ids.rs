//! Identifier types: UUIDv7 ids and agent URNs.

use crate::constants::AGENT_URN_PREFIX;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length of an agent URN.
pub const MAX_URN_LENGTH: usize = 256;

static AGENT_URN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:asap:agent:[A-Za-z0-9][A-Za-z0-9._\-]*(:[A-Za-z0-9._\-]+)*$")
        .unwrap_or_else(|e| panic!("agent URN pattern must compile: {e}"))
});

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh timestamp-sortable UUIDv7 id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Envelope identifier (UUIDv7, unique per sender process).
    EnvelopeId
);

uuid_id!(
    /// Task identifier (UUIDv7).
    TaskId
);

/// Error returned when a string is not a valid agent URN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid agent URN '{value}': {reason}")]
pub struct InvalidUrn {
    pub value: String,
    pub reason: &'static str,
}

/// Agent identifier of the form `urn:asap:agent:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentUrn(String);

impl AgentUrn {
    /// Validate and wrap a URN string.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidUrn> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidUrn {
                value,
                reason: "must not be empty",
            });
        }
        if value.len() > MAX_URN_LENGTH {
            return Err(InvalidUrn {
                value,
                reason: "exceeds maximum length",
            });
        }
        if !value.starts_with(AGENT_URN_PREFIX) {
            return Err(InvalidUrn {
                value,
                reason: "must start with urn:asap:agent:",
            });
        }
        if !AGENT_URN_RE.is_match(&value) {
            return Err(InvalidUrn {
                value,
                reason: "agent name contains invalid characters",
            });
        }
        Ok(Self(value))
    }

    /// Build a URN from a bare agent name.
    pub fn for_agent(name: &str) -> Result<Self, InvalidUrn> {
        Self::parse(format!("{AGENT_URN_PREFIX}{name}"))
    }

    /// The full URN string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The agent name after the `urn:asap:agent:` prefix.
    pub fn agent_name(&self) -> &str {
        &self.0[AGENT_URN_PREFIX.len()..]
    }
}

impl fmt::Display for AgentUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentUrn {
    type Err = InvalidUrn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentUrn {
    type Error = InvalidUrn;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AgentUrn> for String {
    fn from(urn: AgentUrn) -> Self {
        urn.0
    }
}

impl AsRef<str> for AgentUrn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_v7_and_sortable() {
        let a = EnvelopeId::new();
        let b = EnvelopeId::new();
        assert_eq!(a.as_uuid().get_version_num(), 7);
        assert!(a <= b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_task_id_parse_roundtrip() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_valid_urns() {
        for raw in [
            "urn:asap:agent:planner",
            "urn:asap:agent:Planner-01",
            "urn:asap:agent:org.example:worker_2",
        ] {
            let urn = AgentUrn::parse(raw).unwrap();
            assert_eq!(urn.as_str(), raw);
        }
        assert_eq!(
            AgentUrn::for_agent("echo").unwrap().agent_name(),
            "echo"
        );
    }

    #[test]
    fn test_invalid_urns() {
        let too_long = format!("urn:asap:agent:{}", "a".repeat(MAX_URN_LENGTH));
        for raw in [
            "",
            "planner",
            "urn:asap:agent:",
            "urn:asap:agent:has space",
            "urn:other:agent:x",
            too_long.as_str(),
        ] {
            assert!(AgentUrn::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_urn_deserialize_rejects_invalid() {
        let ok: Result<AgentUrn, _> = serde_json::from_str("\"urn:asap:agent:a\"");
        assert!(ok.is_ok());
        let bad: Result<AgentUrn, _> = serde_json::from_str("\"not-a-urn\"");
        assert!(bad.is_err());
    }
}
