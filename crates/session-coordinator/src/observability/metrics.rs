//! Metric definitions.
//!
//! All metrics use the `sc_` prefix and the `_total` suffix for counters.

use crate::dispatcher::Topic;
use crate::envelope::EnvelopeKind;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter with an HTTP listener.
///
/// # Errors
///
/// Returns an error if the address is invalid or a recorder is already installed.
pub fn init_metrics_exporter(bind_address: &str) -> Result<(), String> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| format!("Invalid metrics bind address {bind_address}: {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))
}

/// Set the current transport state code.
///
/// Metric: `sc_transport_state`
/// Values: 0 idle, 1 connecting, 2 connected, 3 reconnecting, 4 disconnected
pub fn set_transport_state(code: u8) {
    gauge!("sc_transport_state").set(f64::from(code));
}

/// Record one reconnect attempt.
///
/// Metric: `sc_transport_reconnect_attempts_total`
pub fn record_reconnect_attempt() {
    counter!("sc_transport_reconnect_attempts_total").increment(1);
}

/// Record an inbound envelope.
///
/// Metric: `sc_envelopes_received_total`
/// Labels: `kind`
pub fn record_envelope_received(kind: EnvelopeKind) {
    counter!("sc_envelopes_received_total", "kind" => kind.as_str()).increment(1);
}

/// Record an inbound frame that could not be decoded.
///
/// Metric: `sc_envelopes_malformed_total`
pub fn record_envelope_malformed() {
    counter!("sc_envelopes_malformed_total").increment(1);
}

/// Record a handler error or panic swallowed by the dispatcher.
///
/// Metric: `sc_dispatch_handler_failures_total`
/// Labels: `topic`
pub fn record_handler_failure(topic: Topic) {
    counter!("sc_dispatch_handler_failures_total", "topic" => topic.as_str()).increment(1);
}

/// Record a moderation action outcome.
///
/// Metric: `sc_actions_total`
/// Labels: `kind`, `outcome`
pub fn record_action(kind: &'static str, outcome: &'static str) {
    counter!("sc_actions_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a negotiation step outcome.
///
/// Metric: `sc_negotiation_total`
/// Labels: `step` (offer, answer, remote_answer, candidate, renegotiate), `outcome`
pub fn record_negotiation(step: &'static str, outcome: &'static str) {
    counter!("sc_negotiation_total", "step" => step, "outcome" => outcome).increment(1);
}

/// Record a candidate buffered until the remote description is set.
///
/// Metric: `sc_candidates_buffered_total`
pub fn record_candidate_buffered() {
    counter!("sc_candidates_buffered_total").increment(1);
}

/// Record a recording upload attempt outcome.
///
/// Metric: `sc_recording_uploads_total`
/// Labels: `outcome` (success, error, skipped, cancelled)
pub fn record_upload(outcome: &'static str) {
    counter!("sc_recording_uploads_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn test_metrics_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_transport_state(2);
            record_reconnect_attempt();
            record_envelope_received(EnvelopeKind::Offer);
            record_envelope_malformed();
            record_handler_failure(Topic::SessionChanged);
            record_action("mute", "applied");
            record_negotiation("offer", "success");
            record_candidate_buffered();
            record_upload("skipped");
        });

        let metrics = snapshotter.snapshot().into_vec();
        assert!(
            metrics.len() >= 9,
            "expected every metric to be recorded, got {}",
            metrics.len()
        );
    }

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_action("lock", "noop");
        record_upload("error");
    }

    #[test]
    fn test_invalid_exporter_address() {
        assert!(init_metrics_exporter("not-an-address").is_err());
    }
}
