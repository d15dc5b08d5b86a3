//! Centralized Prometheus metrics for the signaling server.

use lazy_static::lazy_static;
use prometheus::{register_counter, register_gauge, register_histogram, Counter, Encoder, Gauge, Histogram, TextEncoder};

lazy_static! {
    /// Number of currently open connections.
    pub static ref CONNECTIONS_ACTIVE: Gauge = register_gauge!(
        "callsign_connections_active",
        "Number of currently open connections"
    )
    .expect("failed to register connections_active metric");

    /// Number of authenticated sessions currently registered.
    pub static ref SESSIONS_ACTIVE: Gauge = register_gauge!(
        "callsign_sessions_active",
        "Number of authenticated sessions currently registered"
    )
    .expect("failed to register sessions_active metric");

    /// Number of calls currently in a non-terminal state.
    pub static ref CALLS_ACTIVE: Gauge = register_gauge!(
        "callsign_calls_active",
        "Number of calls currently in a non-terminal state"
    )
    .expect("failed to register calls_active metric");

    /// Total number of calls that have ended, by reason.
    pub static ref CALLS_ENDED_TOTAL: Counter = register_counter!(
        "callsign_calls_ended_total",
        "Total number of calls that have ended"
    )
    .expect("failed to register calls_ended_total metric");

    /// Total number of caption deltas broadcast to participants.
    pub static ref CAPTION_DELTAS_TOTAL: Counter = register_counter!(
        "callsign_caption_deltas_total",
        "Total number of caption deltas broadcast to participants"
    )
    .expect("failed to register caption_deltas_total metric");

    /// Handshake duration in seconds.
    pub static ref HANDSHAKE_DURATION_SECONDS: Histogram = register_histogram!(
        "callsign_handshake_duration_seconds",
        "Time to complete the crypto handshake",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("failed to register handshake_duration_seconds metric");
}

/// Render the current registry in the Prometheus text exposition format,
/// for a `/metrics` route.
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("prometheus text encoding never fails for well-formed metrics");
    String::from_utf8(buffer).expect("prometheus output is always valid utf-8")
}
