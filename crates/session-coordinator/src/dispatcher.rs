//! Typed publish/subscribe registry.
//!
//! Inbound envelopes, transport state changes, session snapshots and media
//! ticks are all published here. Each topic keeps an ordered handler list;
//! `publish` runs the handlers registered at that moment in registration
//! order. A handler that fails (or panics) is logged and counted, and the
//! remaining handlers still run.
//!
//! Handlers are synchronous. A component that needs to do asynchronous work
//! forwards the event into its own mailbox from the handler.

use crate::control::model::Session;
use crate::envelope::{EnvelopeKind, SignalingEnvelope};
use crate::media::recording::RecordingState;
use crate::media::transcription::TranscriptionState;
use crate::observability::metrics;
use crate::transport::TransportState;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{trace, warn};

/// Dispatch topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound signaling envelope of the given kind.
    Envelope(EnvelopeKind),
    /// Transport channel state changed.
    TransportState,
    /// Transport channel exhausted its reconnect attempts.
    TransportFatal,
    /// Session/participant snapshot changed.
    SessionChanged,
    /// Recording lifecycle changed.
    RecordingChanged,
    /// Recording duration tick.
    RecordingTick,
    /// Transcript aggregate changed.
    TranscriptChanged,
}

impl Topic {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::Envelope(kind) => kind.as_str(),
            Topic::TransportState => "transport-state",
            Topic::TransportFatal => "transport-fatal",
            Topic::SessionChanged => "session-changed",
            Topic::RecordingChanged => "recording-changed",
            Topic::RecordingTick => "recording-tick",
            Topic::TranscriptChanged => "transcript-changed",
        }
    }
}

/// Event payload delivered to handlers.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Envelope(SignalingEnvelope),
    TransportState(TransportState),
    TransportFatal { attempts: u32 },
    SessionChanged(Arc<Session>),
    RecordingChanged(RecordingState),
    RecordingTick { elapsed: Duration },
    TranscriptChanged(TranscriptionState),
}

impl DispatchEvent {
    /// Topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            DispatchEvent::Envelope(envelope) => Topic::Envelope(envelope.kind),
            DispatchEvent::TransportState(_) => Topic::TransportState,
            DispatchEvent::TransportFatal { .. } => Topic::TransportFatal,
            DispatchEvent::SessionChanged(_) => Topic::SessionChanged,
            DispatchEvent::RecordingChanged(_) => Topic::RecordingChanged,
            DispatchEvent::RecordingTick { .. } => Topic::RecordingTick,
            DispatchEvent::TranscriptChanged(_) => Topic::TranscriptChanged,
        }
    }
}

/// Error returned by a handler. Reported and swallowed at the dispatch boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&DispatchEvent) -> Result<(), HandlerError> + Send + Sync>;

struct Registration {
    id: SubscriptionId,
    handler: Handler,
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Typed publish/subscribe registry.
pub struct EventDispatcher {
    registry: Mutex<HashMap<Topic, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventDispatcher")
            .field("topics", &registry.len())
            .finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler at the end of the topic's handler list.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&DispatchEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.entry(topic).or_default().push(Registration {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove one specific handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = registry.get_mut(&topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.remove(&topic);
        }
        removed
    }

    /// Number of handlers currently registered for a topic.
    #[must_use]
    pub fn handler_count(&self, topic: Topic) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.get(&topic).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's topic, in order.
    ///
    /// The handler list is snapshotted before invocation, so handlers may
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: &DispatchEvent) -> PublishReport {
        let topic = event.topic();
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .get(&topic)
                .map(|list| {
                    list.iter()
                        .map(|r| (r.id, Arc::clone(&r.handler)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut report = PublishReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    metrics::record_handler_failure(topic);
                    warn!(
                        target: "sc.dispatch",
                        topic = topic.as_str(),
                        subscription = id.0,
                        error = %e,
                        "Handler failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    metrics::record_handler_failure(topic);
                    warn!(
                        target: "sc.dispatch",
                        topic = topic.as_str(),
                        subscription = id.0,
                        "Handler panicked"
                    );
                }
            }
        }

        trace!(
            target: "sc.dispatch",
            topic = topic.as_str(),
            delivered = report.delivered,
            failed = report.failed,
            "Event published"
        );

        report
    }
}
