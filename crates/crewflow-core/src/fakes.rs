//! In-process capabilities for tests and dry runs.
//!
//! Provides `EchoCapability`, which answers every task with a deterministic
//! digest of its input, and `ScriptedCapability`, which replays canned
//! responses and records every call it receives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityError, Invocation, Persona};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// EchoCapability
// ---------------------------------------------------------------------------

/// Answers with the persona's role and the task description, charging one
/// token per whitespace-separated word. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    async fn invoke(
        &self,
        persona: &Persona,
        description: &str,
        expected_output: &str,
    ) -> Result<Invocation, CapabilityError> {
        let text = format!(
            "[{}] {}\n\nExpected: {}",
            persona.role,
            description.trim(),
            expected_output.trim()
        );
        let tokens = text.split_whitespace().count() as u64;
        Ok(Invocation::new(text, tokens))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

// ---------------------------------------------------------------------------
// ScriptedCapability
// ---------------------------------------------------------------------------

/// One call observed by a [`ScriptedCapability`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub agent_id: String,
    pub description: String,
}

struct Rule {
    needle: String,
    responses: VecDeque<Result<Invocation, CapabilityError>>,
    panics: bool,
}

/// Replays scripted responses, chosen by the first rule whose needle occurs
/// in the task description. A rule's responses are consumed in order and the
/// last one repeats. Descriptions matching no rule succeed with
/// `"done: <description>"` at 10 tokens.
#[derive(Default)]
pub struct ScriptedCapability {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to descriptions containing `needle` with `responses`, in order.
    pub fn on(
        self,
        needle: impl Into<String>,
        responses: Vec<Result<Invocation, CapabilityError>>,
    ) -> Self {
        lock(&self.rules).push(Rule {
            needle: needle.into(),
            responses: responses.into(),
            panics: false,
        });
        self
    }

    /// Always answer descriptions containing `needle` with `text`.
    pub fn reply(self, needle: impl Into<String>, text: impl Into<String>, tokens: u64) -> Self {
        let invocation = Invocation::new(text, tokens);
        self.on(needle, vec![Ok(invocation)])
    }

    /// Panic when a description contains `needle`.
    pub fn panic_on(self, needle: impl Into<String>) -> Self {
        lock(&self.rules).push(Rule {
            needle: needle.into(),
            responses: VecDeque::new(),
            panics: true,
        });
        self
    }

    /// Sleep this long inside every call, so concurrent calls overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Calls whose description contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.description.contains(needle))
            .count()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, description: &str) -> Result<Invocation, CapabilityError> {
        let mut rules = lock(&self.rules);
        let Some(rule) = rules.iter_mut().find(|r| description.contains(&r.needle)) else {
            return Ok(Invocation::new(format!("done: {description}"), 10));
        };
        if rule.panics {
            drop(rules);
            panic!("scripted panic for {description:?}");
        }
        if rule.responses.len() > 1 {
            rule.responses
                .pop_front()
                .unwrap_or_else(|| Ok(Invocation::new("done", 10)))
        } else {
            rule.responses
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(Invocation::new("done", 10)))
        }
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn invoke(
        &self,
        persona: &Persona,
        description: &str,
        _expected_output: &str,
    ) -> Result<Invocation, CapabilityError> {
        lock(&self.calls).push(RecordedCall {
            agent_id: persona.agent_id.clone(),
            description: description.to_string(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.next_response(description);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
