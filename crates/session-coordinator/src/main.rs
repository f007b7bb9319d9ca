//! Session Monitor
//!
//! Joins a session over signaling only (observer identity, no media, no
//! backend calls) and logs every dispatched event until Ctrl+C.
//!
//! ```text
//! sc-monitor <session-id> [participant-id]
//! ```
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Optionally install the Prometheus exporter
//! 4. Spawn the transport channel and subscribe a logger to every topic
//! 5. Connect, then wait for Ctrl+C or a fatal transport loss
//! 6. Disconnect (leave envelope) and stop the actor

#![warn(clippy::pedantic)]

use anyhow::Context;
use common::types::{ParticipantId, SessionId};
use session_coordinator::config::Config;
use session_coordinator::dispatcher::{DispatchEvent, EventDispatcher, HandlerError, Topic};
use session_coordinator::envelope::EnvelopeKind;
use session_coordinator::observability::init_metrics_exporter;
use session_coordinator::transport::{
    BackoffPolicy, TransportChannel, TransportState, WebSocketConnector,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: sc-monitor <session-id> [participant-id]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let (json_logs, log_level) = config.as_ref().map_or_else(
        |_| (false, common::config::DEFAULT_LOG_LEVEL.to_string()),
        |c| (c.observability.json_logs, c.observability.log_level.clone()),
    );
    init_tracing(json_logs, &log_level);

    let config = config
        .map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })
        .context("invalid configuration")?;

    let mut args = std::env::args().skip(1);
    let session_id = SessionId::from(args.next().context(USAGE)?);
    let participant_id = args
        .next()
        .map_or_else(|| ParticipantId::from(format!("monitor-{}", ParticipantId::new())), ParticipantId::from);

    info!(
        session_id = %session_id,
        participant_id = %participant_id,
        signaling_url = %config.signaling_url,
        reconnect_max_attempts = config.reconnect_max_attempts,
        "Starting session monitor"
    );

    if let Some(addr) = &config.observability.metrics_bind_address {
        init_metrics_exporter(addr)
            .map_err(|e| {
                error!(error = %e, "Failed to install Prometheus exporter");
                anyhow::Error::msg(e)
            })?;
        info!(bind_address = %addr, "Prometheus exporter listening");
    }

    let dispatcher = Arc::new(EventDispatcher::new());
    let topics = EnvelopeKind::ALL
        .into_iter()
        .map(Topic::Envelope)
        .chain([
            Topic::TransportState,
            Topic::TransportFatal,
            Topic::SessionChanged,
            Topic::RecordingChanged,
            Topic::RecordingTick,
            Topic::TranscriptChanged,
        ]);
    for topic in topics {
        dispatcher.subscribe(topic, log_event);
    }

    let cancel_token = CancellationToken::new();
    let (transport, transport_task) = TransportChannel::spawn(
        Arc::new(WebSocketConnector::new(config.signaling_url.clone())),
        Arc::clone(&dispatcher),
        BackoffPolicy::new(config.reconnect_base_delay, config.reconnect_max_attempts),
        config.handshake_timeout,
        cancel_token.clone(),
    );

    if let Err(e) = transport
        .connect(session_id.clone(), participant_id.clone())
        .await
    {
        error!(error = %e, "Failed to join session over signaling");
        cancel_token.cancel();
        let _ = transport_task.await;
        return Err(e).context("failed to join session over signaling");
    }
    info!("Monitoring; press Ctrl+C to leave");

    let mut state_rx = transport.subscribe_state();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state_rx.borrow() == TransportState::Disconnected {
                    warn!("Signaling lost for good, exiting");
                    break;
                }
            }
        }
    }

    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "Disconnect failed");
    }
    cancel_token.cancel();
    if let Err(e) = transport_task.await {
        warn!(error = %e, "Transport task ended abnormally");
    }

    info!("Session monitor stopped");
    Ok(())
}

/// `RUST_LOG` wins; otherwise `SC_LOG_LEVEL` applies to every target but the
/// library's own module path.
fn init_tracing(json_logs: bool, log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{log_level},session_coordinator=debug").into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: &DispatchEvent) -> Result<(), HandlerError> {
    match event {
        DispatchEvent::Envelope(envelope) => info!(
            target: "sc_monitor",
            kind = envelope.kind.as_str(),
            participant_id = envelope.participant_id.as_ref().map_or("-", ParticipantId::as_str),
            has_data = envelope.data.is_some(),
            "Envelope"
        ),
        DispatchEvent::TransportState(state) => {
            info!(target: "sc_monitor", state = ?state, "Transport state");
        }
        DispatchEvent::TransportFatal { attempts } => {
            error!(target: "sc_monitor", attempts, "Transport gave up reconnecting");
        }
        other => debug!(target: "sc_monitor", topic = other.topic().as_str(), "Event"),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
