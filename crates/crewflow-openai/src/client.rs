//! Chat completions capability.

use std::time::Duration;

use async_trait::async_trait;
use crewflow_core::{Capability, CapabilityError, ConfigError, Invocation, Persona};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::error::{classify_status, OpenAiError};
use crate::wire::{ChatMessage, ChatRequest, ChatResponse};

/// The agent persona as a system message.
pub fn system_prompt(persona: &Persona) -> String {
    let mut prompt = format!(
        "You are {}.\n\nYour goal: {}\n\nBackground: {}",
        persona.role.trim(),
        persona.goal.trim(),
        persona.backstory.trim()
    );
    if persona.delegation_allowed {
        prompt.push_str(
            "\n\nYou lead other specialists on this crew and may frame work for them to pick up.",
        );
    }
    prompt
}

/// The task as a user message.
pub fn user_prompt(description: &str, expected_output: &str) -> String {
    let expected = expected_output.trim();
    if expected.is_empty() {
        description.trim().to_string()
    } else {
        format!(
            "{}\n\nThis is the expected criteria for your final answer: {}",
            description.trim(),
            expected
        )
    }
}

/// A [`Capability`] backed by an OpenAI-compatible `chat/completions` API.
#[derive(Debug, Clone)]
pub struct OpenAiCapability {
    config: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiCapability {
    pub fn new(config: OpenAiConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("crewflow/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    /// Build from `OPENAI_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(OpenAiConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    async fn complete(
        &self,
        persona: &Persona,
        description: &str,
        expected_output: &str,
    ) -> Result<Invocation, OpenAiError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::system(system_prompt(persona)),
                ChatMessage::user(user_prompt(description, expected_output)),
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let timeout_ms = self.config.timeout_secs.saturating_mul(1000);

        debug!(
            agent_id = %persona.agent_id,
            model = %self.config.model,
            "sending chat completion"
        );
        let response = self
            .http
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OpenAiError::from_reqwest(e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after_ms, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OpenAiError::from_reqwest(e, timeout_ms))?;
        parse_completion(&body, &request)
    }
}

/// Extract the first choice. Without a `usage` block, tokens are estimated
/// at four characters each over prompt and completion.
fn parse_completion(body: &str, request: &ChatRequest<'_>) -> Result<Invocation, OpenAiError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| OpenAiError::Malformed(e.to_string()))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| OpenAiError::Malformed("response has no message content".to_string()))?;
    let tokens = match parsed.usage {
        Some(usage) => usage.total_tokens,
        None => {
            let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
            ((prompt_chars + text.len()) as u64).div_ceil(4)
        }
    };
    Ok(Invocation::new(text, tokens))
}

#[async_trait]
impl Capability for OpenAiCapability {
    async fn invoke(
        &self,
        persona: &Persona,
        description: &str,
        expected_output: &str,
    ) -> Result<Invocation, CapabilityError> {
        self.complete(persona, description, expected_output)
            .await
            .map_err(CapabilityError::from)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(delegation: bool) -> Persona {
        Persona {
            agent_id: "pm".to_string(),
            role: "Geha Project Manager".to_string(),
            goal: "Turn product intent into clear specs".to_string(),
            backstory: "A community manager turned veteran PM.".to_string(),
            delegation_allowed: delegation,
        }
    }

    fn request() -> ChatRequest<'static> {
        ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage::system("abcd"), ChatMessage::user("efgh")],
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn test_system_prompt_carries_persona() {
        let prompt = system_prompt(&persona(false));
        assert!(prompt.starts_with("You are Geha Project Manager."));
        assert!(prompt.contains("Turn product intent"));
        assert!(!prompt.contains("lead other specialists"));
        assert!(system_prompt(&persona(true)).contains("lead other specialists"));
    }

    #[test]
    fn test_user_prompt_appends_expected_output() {
        assert_eq!(user_prompt("Do it. ", ""), "Do it.");
        assert!(user_prompt("Do it.", "A list").ends_with("final answer: A list"));
    }

    #[test]
    fn test_parse_completion_uses_reported_usage() {
        let body = r#"{"choices":[{"message":{"content":"done"}}],"usage":{"total_tokens":21}}"#;
        let invocation = parse_completion(body, &request()).unwrap();
        assert_eq!(invocation, Invocation::new("done", 21));
    }

    #[test]
    fn test_parse_completion_estimates_missing_usage() {
        let body = r#"{"choices":[{"message":{"content":"ijkl"}}]}"#;
        let invocation = parse_completion(body, &request()).unwrap();
        assert_eq!(invocation.tokens_consumed, 3);
    }

    #[test]
    fn test_parse_completion_rejects_empty_choices() {
        let err = parse_completion(r#"{"choices":[]}"#, &request()).unwrap_err();
        assert!(matches!(err, OpenAiError::Malformed(_)));
        let err = parse_completion("<html>", &request()).unwrap_err();
        assert!(matches!(err, OpenAiError::Malformed(_)));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = OpenAiCapability::new(OpenAiConfig::new("")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
    }
}
