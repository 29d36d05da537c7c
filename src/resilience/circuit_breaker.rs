//! Per-key circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, failures counted within a window
//! - Open: dependency assumed down, `is_open` answers true
//! - Half-Open: a bounded number of trial requests check for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures reach the threshold (or ratio) with enough throughput
//! Open → Half-Open: first is_open call after the open duration elapsed
//! Half-Open → Closed: a trial succeeds
//! Half-Open → Open: a trial fails (open duration grows by the backoff multiplier)
//! ```
//!
//! # Design Decisions
//! - One record per key, each behind its own mutex; keys never wait on each other
//! - Records are created lazily on first access
//! - Closed-state outcomes are timestamped and counted over a trailing window
//! - Counters reset on every transition
//! - Outcomes arriving while Open are late completions and are ignored
//! - A half-open trial slot is returned when its call ends unreported

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::{self, SharedClock};
use crate::config::schema::CircuitBreakerConfig;
use crate::config::validation::validate_circuit_breaker;
use crate::error::{TrafficError, TrafficResult};
use crate::observability::metrics;
use crate::resilience::backoff;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Verdict of [`CircuitBreakerRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rejected,
    Admitted,
    /// Admitted as a half-open trial holding one trial slot.
    Trial(TrialSlot),
}

impl Admission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected)
    }
}

/// One half-open trial slot, tied to the half-open period that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSlot {
    epoch: u64,
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    /// Closed-state failures inside the trailing window, oldest first.
    failures: VecDeque<Instant>,
    /// Closed-state successes inside the trailing window, oldest first.
    successes: VecDeque<Instant>,
    state_changed_at: Instant,
    half_open_trials_used: u32,
    /// Bumped on every entry into HalfOpen.
    half_open_epoch: u64,
    /// Consecutive failed trials; drives the open duration backoff.
    reopen_count: u32,
    last_access: Instant,
}

impl CircuitRecord {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            successes: VecDeque::new(),
            state_changed_at: now,
            half_open_trials_used: 0,
            half_open_epoch: 0,
            reopen_count: 0,
            last_access: now,
        }
    }

    /// Drop outcomes that fell out of the trailing window ending at `now`.
    fn prune(&mut self, now: Instant, window: Duration) {
        for events in [&mut self.failures, &mut self.successes] {
            while events
                .front()
                .is_some_and(|at| now.saturating_duration_since(*at) >= window)
            {
                events.pop_front();
            }
        }
    }

    fn failure_count(&self) -> u32 {
        count(&self.failures)
    }

    fn success_count(&self) -> u32 {
        count(&self.successes)
    }

    fn throughput(&self) -> u32 {
        self.failure_count().saturating_add(self.success_count())
    }

    fn clear_window(&mut self) {
        self.failures.clear();
        self.successes.clear();
    }
}

/// Point-in-time view of one key's circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_trials_used: u32,
    /// Open duration that applies to the current (or next) open period.
    pub open_duration: Duration,
    /// Time left before the circuit may go half-open, if open.
    pub open_remaining: Option<Duration>,
}

/// Registry of per-key circuit breakers sharing one configuration.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    records: DashMap<String, Arc<Mutex<CircuitRecord>>>,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub const POLICY_NAME: &'static str = "circuit-breaker";

    /// Create a registry on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> TrafficResult<Self> {
        Self::with_clock(config, clock::system())
    }

    /// Create a registry reading time from `clock`.
    ///
    /// Invalid parameters are rejected, never clamped.
    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> TrafficResult<Self> {
        let errors = validate_circuit_breaker(&config);
        if !errors.is_empty() {
            return Err(TrafficError::Configuration(errors));
        }

        Ok(Self {
            config,
            records: DashMap::new(),
            clock,
        })
    }

    pub fn policy_name(&self) -> &'static str {
        Self::POLICY_NAME
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether calls for `key` must be rejected right now.
    ///
    /// While half-open, each false answer hands out one trial slot that is
    /// only returned by a reported outcome. Use [`admit`](Self::admit) to
    /// get the slot back for calls that may end unreported.
    pub fn is_open(&self, key: &str) -> bool {
        self.admit(key).is_rejected()
    }

    /// Admit or reject a call for `key`, applying the timed Open to
    /// HalfOpen transition.
    pub fn admit(&self, key: &str) -> Admission {
        self.with_record(key, |record, now| match record.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::Open => {
                let open_for = self.open_duration_for(record);
                if now.saturating_duration_since(record.state_changed_at) < open_for {
                    return Admission::Rejected;
                }
                self.transition(key, record, CircuitState::HalfOpen, now);
                record.half_open_trials_used = 1;
                Admission::Trial(TrialSlot {
                    epoch: record.half_open_epoch,
                })
            }
            CircuitState::HalfOpen => {
                if record.half_open_trials_used < self.config.half_open_max_trials {
                    record.half_open_trials_used += 1;
                    Admission::Trial(TrialSlot {
                        epoch: record.half_open_epoch,
                    })
                } else {
                    Admission::Rejected
                }
            }
        })
    }

    /// Return a trial slot whose call ended without a reported outcome.
    ///
    /// Records no outcome. Slots from an earlier half-open period are ignored.
    pub fn release_trial(&self, key: &str, slot: TrialSlot) {
        let Some(record) = self.records.get(key).map(|entry| Arc::clone(entry.value())) else {
            return;
        };
        let mut record = lock(&record);
        if record.state == CircuitState::HalfOpen
            && record.half_open_epoch == slot.epoch
            && record.half_open_trials_used > 0
        {
            record.half_open_trials_used -= 1;
            tracing::debug!(
                key = %key,
                trials_used = record.half_open_trials_used,
                "Unreported half-open trial released"
            );
        }
    }

    /// Report a successful call to the dependency behind `key`.
    pub fn record_success(&self, key: &str) {
        self.with_record(key, |record, now| match record.state {
            CircuitState::Closed => {
                record.prune(now, self.config.rolling_window());
                self.push_event(&mut record.successes, now);
                if self.config.failure_ratio.is_none() {
                    record.failures.clear();
                }
            }
            CircuitState::HalfOpen => {
                self.transition(key, record, CircuitState::Closed, now);
            }
            CircuitState::Open => {}
        })
    }

    /// Report a failed call to the dependency behind `key`.
    pub fn record_failure(&self, key: &str) {
        self.with_record(key, |record, now| match record.state {
            CircuitState::Closed => {
                record.prune(now, self.config.rolling_window());
                self.push_event(&mut record.failures, now);
                if self.should_trip(record) {
                    self.transition(key, record, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                record.reopen_count = record.reopen_count.saturating_add(1);
                self.transition(key, record, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        })
    }

    /// Stored state of `key` without applying any timed transition.
    pub fn state(&self, key: &str) -> CircuitState {
        match self.records.get(key).map(|entry| Arc::clone(entry.value())) {
            Some(record) => {
                let state = lock(&record).state;
                state
            }
            None => CircuitState::Closed,
        }
    }

    /// Snapshot of `key`, or `None` if the key has never been seen.
    pub fn snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        let record = self.records.get(key).map(|entry| Arc::clone(entry.value()))?;
        let now = self.clock.now();
        let mut record = lock(&record);
        record.prune(now, self.config.rolling_window());
        let open_duration = self.open_duration_for(&record);
        let open_remaining = match record.state {
            CircuitState::Open => {
                Some(open_duration.saturating_sub(now.saturating_duration_since(record.state_changed_at)))
            }
            _ => None,
        };

        Some(CircuitSnapshot {
            key: key.to_string(),
            state: record.state,
            failure_count: record.failure_count(),
            success_count: record.success_count(),
            half_open_trials_used: record.half_open_trials_used,
            open_duration,
            open_remaining,
        })
    }

    /// Forget `key`; its next access starts Closed.
    pub fn reset(&self, key: &str) {
        if self.records.remove(key).is_some() {
            tracing::info!(key = %key, "Circuit reset");
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop closed records untouched for at least `max_idle`.
    ///
    /// Open and half-open records are kept so eviction never closes a
    /// circuit early. Records locked by an in-flight call are skipped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| {
            let keep = match record.try_lock() {
                Ok(record) => {
                    record.state != CircuitState::Closed
                        || now.saturating_duration_since(record.last_access) < max_idle
                }
                Err(_) => true,
            };
            keep
        });
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.records.len(), "Evicted idle circuit records");
            metrics::record_evicted(Self::POLICY_NAME, evicted);
        }
        evicted
    }

    fn record(&self, key: &str) -> Arc<Mutex<CircuitRecord>> {
        let existing = self.records.get(key).map(|entry| Arc::clone(entry.value()));
        if let Some(record) = existing {
            return record;
        }

        let now = self.clock.now();
        let entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitRecord::new(now))));
        Arc::clone(entry.value())
    }

    fn with_record<R>(&self, key: &str, f: impl FnOnce(&mut CircuitRecord, Instant) -> R) -> R {
        let record = self.record(key);
        let mut record = lock(&record);
        let now = self.clock.now();
        record.last_access = now;
        f(&mut *record, now)
    }

    /// Append one outcome. In count mode only the newest
    /// `max(failure_threshold, minimum_throughput)` entries can affect a trip,
    /// so older ones are dropped; ratio mode keeps the whole window.
    fn push_event(&self, events: &mut VecDeque<Instant>, now: Instant) {
        events.push_back(now);
        if self.config.failure_ratio.is_none() {
            let cap = self.config.failure_threshold.max(self.config.minimum_throughput) as usize;
            while events.len() > cap {
                events.pop_front();
            }
        }
    }

    fn should_trip(&self, record: &CircuitRecord) -> bool {
        let throughput = record.throughput();
        if throughput < self.config.minimum_throughput {
            return false;
        }
        let failures = record.failure_count();
        if failures >= self.config.failure_threshold {
            return true;
        }
        match self.config.failure_ratio {
            Some(ratio) => f64::from(failures) / f64::from(throughput) >= ratio,
            None => false,
        }
    }

    fn open_duration_for(&self, record: &CircuitRecord) -> Duration {
        backoff::open_duration(
            record.reopen_count,
            self.config.open_duration(),
            self.config.backoff_multiplier,
            self.config.max_open_duration(),
        )
    }

    fn transition(&self, key: &str, record: &mut CircuitRecord, to: CircuitState, now: Instant) {
        let from = record.state;
        record.state = to;
        record.state_changed_at = now;
        record.clear_window();
        record.half_open_trials_used = 0;

        match to {
            CircuitState::Open => {
                let open_for = self.open_duration_for(record);
                tracing::warn!(
                    key = %key,
                    from = from.as_str(),
                    open_for = ?open_for,
                    reopens = record.reopen_count,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                record.half_open_epoch = record.half_open_epoch.wrapping_add(1);
                tracing::info!(key = %key, "Circuit half-open, admitting trial requests");
            }
            CircuitState::Closed => {
                record.reopen_count = 0;
                tracing::info!(key = %key, from = from.as_str(), "Circuit closed");
            }
        }
        metrics::record_circuit_transition(to.as_str());
    }
}

fn count(events: &VecDeque<Instant>) -> u32 {
    u32::try_from(events.len()).unwrap_or(u32::MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
