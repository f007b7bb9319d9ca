//! Observability for the session coordinator.
//!
//! # Privacy by Default
//!
//! Instrumentation never records payload contents (SDP, chat text, transcript
//! text); only lengths and bounded enums. Metric labels are bounded:
//! - `kind`: envelope kinds and action kinds (closed enums)
//! - `topic`: dispatcher topics (closed enum)
//! - `outcome`: applied, noop, forbidden, invalid_target, rejected, ended
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_transport_state` | Gauge | none | Current transport state code |
//! | `sc_transport_reconnect_attempts_total` | Counter | none | Reconnect attempts |
//! | `sc_envelopes_received_total` | Counter | `kind` | Inbound envelopes |
//! | `sc_envelopes_malformed_total` | Counter | none | Undecodable frames |
//! | `sc_dispatch_handler_failures_total` | Counter | `topic` | Isolated handler faults |
//! | `sc_actions_total` | Counter | `kind`, `outcome` | Moderation actions |
//! | `sc_negotiation_total` | Counter | `step`, `outcome` | Offer/answer steps |
//! | `sc_candidates_buffered_total` | Counter | none | Candidates held for remote description |
//! | `sc_recording_uploads_total` | Counter | `outcome` | Recording upload attempts |

pub mod metrics;

pub use metrics::init_metrics_exporter;
