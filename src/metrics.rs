//! Prometheus metrics for the authorization gate
//!
//! Registered in the default registry; the surrounding daemon decides how to
//! expose them (`prometheus::gather()`).

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram, CounterVec, Histogram};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Decision Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Authorization decisions, by outcome and by the rule that produced them.
    ///
    /// Labels:
    /// - outcome: "allowed" or "denied"
    /// - reason: "root", "always_allowed", "authority", "refused",
    ///   "process_lookup", "authority_error", "caller" (request carried no
    ///   peer credentials or named an unknown target user)
    pub static ref AUTHZ_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "polgate_authz_decisions_total",
        "Authorization decisions by outcome and reason",
        &["outcome", "reason"]
    ).expect("failed to register AUTHZ_DECISIONS_TOTAL metric");

    /// Time spent waiting on the authority, interactive prompts included.
    pub static ref AUTHORITY_CALL_DURATION: Histogram = register_histogram!(
        "polgate_authority_call_duration_seconds",
        "Duration of authority CheckAuthorization calls",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).expect("failed to register AUTHORITY_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Transport Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Peer credential handshakes on accepted connections.
    ///
    /// Labels:
    /// - result: "ok" or "failed"
    pub static ref HANDSHAKES_TOTAL: CounterVec = register_counter_vec!(
        "polgate_handshakes_total",
        "Peer credential handshakes by result",
        &["result"]
    ).expect("failed to register HANDSHAKES_TOTAL metric");
}
