//! The reasoning capability boundary.
//!
//! An agent does no reasoning of its own: the pipeline hands its persona and a
//! resolved task description to an injected [`Capability`], which returns text
//! and the number of tokens it consumed. Backends (HTTP model APIs, scripted
//! fakes) implement this trait; the credential and connection lifecycle of a
//! backend belongs to whoever constructs it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The persona an agent presents to the capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub agent_id: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub delegation_allowed: bool,
}

/// A successful capability invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub text: String,
    pub tokens_consumed: u64,
}

impl Invocation {
    pub fn new(text: impl Into<String>, tokens_consumed: u64) -> Self {
        Self {
            text: text.into(),
            tokens_consumed,
        }
    }
}

/// Failures a capability may report.
///
/// `Unavailable`, `RateLimited` and `Timeout` are transient and retried by the
/// pipeline. `InvalidResponse` is structural and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityError {
    #[error("backend unavailable: {detail}")]
    Unavailable { detail: String },

    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("invalid response: {detail}")]
    InvalidResponse { detail: String },
}

impl CapabilityError {
    /// Whether the retry loop may try again after this error.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CapabilityError::InvalidResponse { .. })
    }
}

/// An opaque reasoning backend.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Perform `description` as `persona`, honouring `expected_output`.
    async fn invoke(
        &self,
        persona: &Persona,
        description: &str,
        expected_output: &str,
    ) -> Result<Invocation, CapabilityError>;

    /// Short backend name used in logs.
    fn name(&self) -> &str {
        "capability"
    }
}

/// Shared handle to a capability, passed into agent definitions.
pub type CapabilityHandle = Arc<dyn Capability>;
