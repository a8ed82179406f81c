//! Agent manifest published at the well-known discovery path.

use crate::constants::ASAP_PROTOCOL_VERSION;
use crate::error::AsapError;
use crate::ids::AgentUrn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A skill the agent offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl Skill {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub asap_version: String,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub state_persistence: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            asap_version: ASAP_PROTOCOL_VERSION.to_string(),
            skills: Vec::new(),
            streaming: false,
            state_persistence: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub asap: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<String>,
}

/// Authentication schemes the agent requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthScheme {
    pub schemes: Vec<String>,
}

impl AuthScheme {
    pub fn bearer() -> Self {
        Self {
            schemes: vec!["bearer".to_string()],
        }
    }

    pub fn requires_bearer(&self) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case("bearer"))
    }
}

/// Self-description of an agent. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: AgentUrn,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: Capabilities,
    pub endpoints: Endpoints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthScheme>,
}

impl Manifest {
    pub fn new(
        id: AgentUrn,
        name: impl Into<String>,
        version: impl Into<String>,
        asap_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            version: version.into(),
            description: String::new(),
            capabilities: Capabilities::default(),
            endpoints: Endpoints {
                asap: asap_endpoint.into(),
                events: None,
            },
            auth: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.capabilities.skills.push(skill);
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Whether callers must present a bearer credential.
    pub fn requires_auth(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| !a.schemes.is_empty())
    }

    pub fn has_skill(&self, skill_id: &str) -> bool {
        self.capabilities.skills.iter().any(|s| s.id == skill_id)
    }

    pub fn validate(&self) -> Result<(), AsapError> {
        if self.name.trim().is_empty() {
            return Err(AsapError::malformed("manifest name must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(AsapError::malformed("manifest version must not be empty"));
        }
        if !self
            .version
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
        {
            return Err(AsapError::malformed(format!(
                "manifest version '{}' must start with a digit",
                self.version
            )));
        }
        if self.endpoints.asap.trim().is_empty() {
            return Err(AsapError::malformed("manifest asap endpoint must not be empty"));
        }
        Ok(())
    }
}
