//! Prometheus counters for review transitions and notification delivery.
//!
//! Exposed on `/metrics` for scraping. Counters live in the global default
//! registry and are registered lazily on first use.

use once_cell::sync::Lazy;
use prometheus::{opts, register_counter_vec, CounterVec, Encoder, TextEncoder};

struct Recorder {
    transitions_total: CounterVec,
    notifications_total: CounterVec,
}

static RECORDER: Lazy<Recorder> = Lazy::new(|| Recorder {
    transitions_total: register_counter_vec!(
        opts!(
            "loanzaar_transitions_total",
            "Review operations on staged submissions"
        ),
        &["kind", "action", "outcome"]
    )
    .expect("failed to register loanzaar_transitions_total"),
    notifications_total: register_counter_vec!(
        opts!(
            "loanzaar_notifications_total",
            "Best-effort notification deliveries"
        ),
        &["channel", "result"]
    )
    .expect("failed to register loanzaar_notifications_total"),
});

/// Count one approve / reject / update-status attempt.
/// `outcome` is `ok` or the error code returned to the caller.
pub fn record_transition(kind: &str, action: &str, outcome: &str) {
    RECORDER
        .transitions_total
        .with_label_values(&[kind, action, outcome])
        .inc();
}

/// `result` is `sent`, `failed` or `skipped`.
pub fn record_notification(channel: &str, result: &str) {
    RECORDER
        .notifications_total
        .with_label_values(&[channel, result])
        .inc();
}

pub fn transition_count(kind: &str, action: &str, outcome: &str) -> u64 {
    RECORDER
        .transitions_total
        .with_label_values(&[kind, action, outcome])
        .get() as u64
}

pub fn notification_count(channel: &str, result: &str) -> u64 {
    RECORDER
        .notifications_total
        .with_label_values(&[channel, result])
        .get() as u64
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    Lazy::force(&RECORDER);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_counter_increments() {
        let before = transition_count("loan", "approve", "test_marker");
        record_transition("loan", "approve", "test_marker");
        assert_eq!(transition_count("loan", "approve", "test_marker"), before + 1);
    }

    #[test]
    fn test_encode_includes_registered_families() {
        record_notification("fcm", "skipped");
        let output = encode_metrics();
        assert!(output.contains("loanzaar_notifications_total"));
    }
}
