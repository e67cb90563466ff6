//! Prometheus metrics for the sentinel agent.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means a duplicate metric name, a fatal configuration error
//! that should crash at startup rather than fail silently. These panics
//! only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

/// Intent outcomes per batch execution.
/// Labels: action (buy/sell/close/...), outcome (executed/skipped/rejected)
pub static EXECUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_executions_total",
        "Total intent executions by action and outcome",
        &["action", "outcome"]
    )
    .unwrap()
});

/// Rejections by reason.
pub static REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_rejections_total",
        "Total intent rejections by reason",
        &["reason"]
    )
    .unwrap()
});

/// Duplicate intents suppressed.
pub static DEDUP_SKIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_dedup_skips_total",
        "Total duplicate intents suppressed",
        &["symbol"]
    )
    .unwrap()
});

/// Bracket reconciliation decisions.
/// Labels: decision (replaced/unchanged/manual_override)
pub static BRACKET_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_bracket_decisions_total",
        "Total protective-bracket reconciliation decisions",
        &["symbol", "decision"]
    )
    .unwrap()
});

/// Trigger fires by strategy and reason.
pub static TRIGGER_FIRES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_trigger_fires_total",
        "Total trigger fires by strategy and reason",
        &["strategy", "reason"]
    )
    .unwrap()
});

/// Advanced order slices executed by type.
pub static ADVANCED_SLICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sentinel_advanced_slices_total",
        "Total advanced-order child slices executed",
        &["order_type"]
    )
    .unwrap()
});

/// Batch duration in milliseconds.
pub static BATCH_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sentinel_batch_duration_ms",
        "Intent batch execution duration in milliseconds",
        &["user"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Positions currently protected by a resting stop-loss.
pub static PROTECTED_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sentinel_protected_positions",
        "Open positions with a resting stop-loss"
    )
    .unwrap()
});

/// Convenience facade for metric recording.
pub struct Metrics;

impl Metrics {
    /// Record one intent outcome.
    pub fn execution(action: &str, outcome: &str) {
        EXECUTIONS_TOTAL.with_label_values(&[action, outcome]).inc();
    }

    /// Record one rejection by reason.
    pub fn rejection(reason: &str) {
        REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a suppressed duplicate.
    pub fn dedup_skip(symbol: &str) {
        DEDUP_SKIPS_TOTAL.with_label_values(&[symbol]).inc();
    }

    /// Record a bracket reconciliation decision.
    pub fn bracket_decision(symbol: &str, decision: &str) {
        BRACKET_DECISIONS_TOTAL
            .with_label_values(&[symbol, decision])
            .inc();
    }

    /// Record a trigger fire.
    pub fn trigger_fire(strategy: &str, reason: &str) {
        TRIGGER_FIRES_TOTAL
            .with_label_values(&[strategy, reason])
            .inc();
    }

    /// Record an advanced-order slice execution.
    pub fn advanced_slice(order_type: &str) {
        ADVANCED_SLICES_TOTAL.with_label_values(&[order_type]).inc();
    }

    /// Record a batch duration.
    pub fn batch_duration(user: &str, duration_ms: f64) {
        BATCH_DURATION_MS
            .with_label_values(&[user])
            .observe(duration_ms);
    }

    /// Set the count of positions protected by a resting stop-loss.
    pub fn protected_positions(count: i64) {
        PROTECTED_POSITIONS.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = EXECUTIONS_TOTAL.with_label_values(&["buy", "executed"]).get();
        Metrics::execution("buy", "executed");
        Metrics::execution("buy", "executed");
        let after = EXECUTIONS_TOTAL.with_label_values(&["buy", "executed"]).get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_gauge_sets() {
        Metrics::protected_positions(3);
        assert_eq!(PROTECTED_POSITIONS.get(), 3);
    }
}
