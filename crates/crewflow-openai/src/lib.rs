//! crewflow-openai: an OpenAI-compatible chat completions backend.
//!
//! [`OpenAiCapability`] implements the core [`crewflow_core::Capability`]
//! trait over `POST {base_url}/chat/completions`. The agent persona becomes
//! the system message and the resolved task description becomes the user
//! message. HTTP failures are mapped onto the transient/permanent split the
//! pipeline's retry loop understands.
//!
//! Credentials are checked when the config is built, so a missing
//! `OPENAI_API_KEY` is a [`crewflow_core::ConfigError`] before any task runs.

pub mod client;
pub mod config;
pub mod error;
mod wire;

pub use client::{system_prompt, user_prompt, OpenAiCapability};
pub use config::OpenAiConfig;
pub use error::{classify_status, OpenAiError};
