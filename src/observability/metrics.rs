//! Metrics collection and exposition.
//!
//! # Metrics
//! - `traffic_decisions_total` (counter): admission decisions by outcome
//! - `traffic_circuit_transitions_total` (counter): breaker transitions by target state
//! - `traffic_rate_limited_total` (counter): denied rate checks by backend
//! - `traffic_rate_store_errors_total` (counter): store failures by fail mode
//! - `traffic_gray_rule_swaps_total` (counter): accepted rule set replacements
//! - `traffic_gray_rule_matches_total` (counter): routing decisions by rule
//! - `traffic_idle_records_evicted_total` (counter): swept records by policy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users and tests pay nothing
//! - Label values are bounded (outcomes, states, backends, rule ids)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_decision(outcome: &'static str) {
    metrics::counter!("traffic_decisions_total", "outcome" => outcome).increment(1);
}

pub fn record_circuit_transition(to: &'static str) {
    metrics::counter!("traffic_circuit_transitions_total", "to" => to).increment(1);
}

pub fn record_rate_limited(backend: &'static str) {
    metrics::counter!("traffic_rate_limited_total", "backend" => backend).increment(1);
}

pub fn record_store_error(fail_open: bool) {
    let mode = if fail_open { "fail_open" } else { "fail_closed" };
    metrics::counter!("traffic_rate_store_errors_total", "mode" => mode).increment(1);
}

pub fn record_rule_swap() {
    metrics::counter!("traffic_gray_rule_swaps_total").increment(1);
}

pub fn record_rule_match(rule_id: Option<&str>) {
    let rule = rule_id.unwrap_or("default").to_string();
    metrics::counter!("traffic_gray_rule_matches_total", "rule" => rule).increment(1);
}

pub fn record_evicted(policy: &'static str, count: usize) {
    metrics::counter!("traffic_idle_records_evicted_total", "policy" => policy)
        .increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_decision("allow");
        record_circuit_transition("open");
        record_rate_limited("local");
        record_store_error(false);
        record_rule_swap();
        record_rule_match(Some("canary"));
        record_rule_match(None);
        record_evicted("token-bucket", 3);
    }
}
