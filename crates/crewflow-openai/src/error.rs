//! Error types for the chat completions backend

use crewflow_core::CapabilityError;
use thiserror::Error;

/// Errors raised while talking to the completions endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenAiError {
    /// The server answered 429.
    #[error("rate limited by server")]
    RateLimited { retry_after_ms: Option<u64> },

    /// The request or the server gave up in time.
    #[error("request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// 5xx, or the connection could not be made.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// A non-retryable 4xx.
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The body was not a usable completion.
    #[error("malformed completion: {0}")]
    Malformed(String),
}

impl OpenAiError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            OpenAiError::Timeout {
                elapsed_ms: timeout_ms,
            }
        } else if err.is_decode() {
            OpenAiError::Malformed(err.to_string())
        } else {
            OpenAiError::Unavailable(err.to_string())
        }
    }
}

impl From<OpenAiError> for CapabilityError {
    fn from(err: OpenAiError) -> Self {
        match err {
            OpenAiError::RateLimited { retry_after_ms } => {
                CapabilityError::RateLimited { retry_after_ms }
            }
            OpenAiError::Timeout { elapsed_ms } => CapabilityError::Timeout { elapsed_ms },
            OpenAiError::Unavailable(detail) => CapabilityError::Unavailable { detail },
            e @ (OpenAiError::Rejected { .. } | OpenAiError::Malformed(_)) => {
                CapabilityError::InvalidResponse {
                    detail: e.to_string(),
                }
            }
        }
    }
}

/// Map a non-success HTTP status onto the retry taxonomy.
///
/// 429 is rate limiting, 408 and 504 are timeouts, other 5xx are outages and
/// any remaining 4xx is a permanent rejection.
pub fn classify_status(status: u16, retry_after_ms: Option<u64>, body: &str) -> OpenAiError {
    let body = truncate(body, 500);
    match status {
        429 => OpenAiError::RateLimited { retry_after_ms },
        408 | 504 => OpenAiError::Timeout { elapsed_ms: 0 },
        500..=599 => OpenAiError::Unavailable(format!("HTTP {status}: {body}")),
        _ => OpenAiError::Rejected { status, body },
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
