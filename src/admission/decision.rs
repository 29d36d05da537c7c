//! Decision types returned by the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::resilience::{CircuitBreakerRegistry, TrialSlot};

/// Verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    DenyRateLimited,
    DenyCircuitOpen,
    /// The caller cancelled before a verdict was reached.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::DenyRateLimited => "deny_rate_limited",
            Outcome::DenyCircuitOpen => "deny_circuit_open",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allow)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an allowed request downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    Failure,
}

/// Admission decision for one request.
#[derive(Debug)]
pub struct Decision {
    pub outcome: Outcome,
    /// Routing target chosen by the gray router.
    pub target: String,
    /// Gray rule that chose the target, if any.
    pub matched_rule_id: Option<String>,
    /// Present only when the request is allowed.
    pub completion: Option<CompletionHandle>,
}

impl Decision {
    pub(crate) fn denied(outcome: Outcome, target: String, matched_rule_id: Option<String>) -> Self {
        Self {
            outcome,
            target,
            matched_rule_id,
            completion: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome.is_allowed()
    }

    /// Take the completion handle out of an allowed decision.
    pub fn take_completion(&mut self) -> Option<CompletionHandle> {
        self.completion.take()
    }
}

/// Reports the outcome of an allowed request to its circuit.
///
/// Consumed by the first report, so a request is counted at most once.
/// Dropping the handle unused records nothing; a handle issued for a
/// half-open trial gives its trial slot back.
#[must_use = "report the request outcome with success() or failure()"]
pub struct CompletionHandle {
    breaker: Arc<CircuitBreakerRegistry>,
    circuit_key: String,
    trial: Option<TrialSlot>,
}

impl CompletionHandle {
    pub(crate) fn new(breaker: Arc<CircuitBreakerRegistry>, circuit_key: String) -> Self {
        Self {
            breaker,
            circuit_key,
            trial: None,
        }
    }

    pub(crate) fn trial(breaker: Arc<CircuitBreakerRegistry>, circuit_key: String, slot: TrialSlot) -> Self {
        Self {
            breaker,
            circuit_key,
            trial: Some(slot),
        }
    }

    /// Whether this request holds a half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn circuit_key(&self) -> &str {
        &self.circuit_key
    }

    pub fn success(self) {
        self.complete(RequestOutcome::Success);
    }

    pub fn failure(self) {
        self.complete(RequestOutcome::Failure);
    }

    pub fn complete(mut self, outcome: RequestOutcome) {
        // the reported outcome settles the trial
        self.trial = None;
        tracing::debug!(key = %self.circuit_key, ?outcome, "Request completed");
        match outcome {
            RequestOutcome::Success => self.breaker.record_success(&self.circuit_key),
            RequestOutcome::Failure => self.breaker.record_failure(&self.circuit_key),
        }
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("circuit_key", &self.circuit_key)
            .field("trial", &self.trial.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(slot) = self.trial.take() {
            tracing::debug!(key = %self.circuit_key, "Trial handle dropped without an outcome");
            self.breaker.release_trial(&self.circuit_key, slot);
        }
    }
}
