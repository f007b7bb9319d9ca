//! Recording lifecycle.
//!
//! ```text
//! idle ─start─▶ recording ⇄ paused ─stop─▶ stopped
//!                    └────────stop─────────────▲
//! stopped ─start─▶ recording   (fresh instance)
//! ```
//!
//! The `RecordingActor` owns the recorder's chunk stream, the one-second
//! duration ticker (running only while recording) and the upload on stop.
//! Upload is retried with exponential backoff and is abandoned when the
//! actor is cancelled. Once the session has ended an upload gets a single
//! attempt and pending retries are dropped. Stopping while idle does nothing.

use super::capture::RecorderCapability;
use crate::backend::{BackendAuthority, RecordingCompletion, StartRecordingRequest};
use crate::dispatcher::{DispatchEvent, EventDispatcher};
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::transport::BackoffPolicy;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use common::types::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Base delay between upload retries.
pub const UPLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Duration tick period.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on waiting for the recorder's final chunk after stop.
const FINAL_CHUNK_TIMEOUT: Duration = Duration::from_secs(2);

/// Channel buffer size for the recording mailbox.
const RECORDING_CHANNEL_BUFFER: usize = 64;

/// Recording quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    Low,
    #[default]
    Standard,
    High,
    Ultra,
}

impl RecordingQuality {
    /// Target encoder bitrate.
    #[must_use]
    pub const fn bitrate_bps(&self) -> u64 {
        match self {
            RecordingQuality::Low => 500_000,
            RecordingQuality::Standard => 1_000_000,
            RecordingQuality::High => 2_500_000,
            RecordingQuality::Ultra => 5_000_000,
        }
    }
}

/// Recording status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Idle,
    Recording,
    Paused,
    Stopped,
}

/// Recording snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub status: RecordingStatus,
    pub quality: RecordingQuality,
    pub duration_secs: u64,
    pub size_bytes: u64,
    /// Another participant is recording this session.
    #[serde(default)]
    pub remote_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self {
            status: RecordingStatus::Idle,
            quality: RecordingQuality::default(),
            duration_secs: 0,
            size_bytes: 0,
            remote_recording: false,
            started_at: None,
        }
    }
}

/// Result of stopping an active recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSummary {
    pub duration_secs: u64,
    pub size_bytes: u64,
    pub uploaded: bool,
    /// Upload attempts made (0 when nothing was captured).
    pub upload_attempts: u32,
}

#[derive(Debug)]
enum RecordingCommand {
    Start {
        quality: RecordingQuality,
        with_transcription: bool,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Pause {
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Resume {
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<Option<RecordingSummary>, CoordinatorError>>,
    },
    Discard {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a `RecordingActor`.
#[derive(Clone, Debug)]
pub struct RecordingHandle {
    sender: mpsc::Sender<RecordingCommand>,
    remote_tx: mpsc::UnboundedSender<bool>,
    state_rx: watch::Receiver<RecordingState>,
    cancel_token: CancellationToken,
}

impl RecordingHandle {
    /// Start a fresh recording. Fails with `MediaUnavailable` without a
    /// capture stream.
    pub async fn start(
        &self,
        quality: RecordingQuality,
        with_transcription: bool,
    ) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RecordingCommand::Start {
                quality,
                with_transcription,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    pub async fn pause(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(RecordingCommand::Pause { respond_to: tx }, rx)
            .await?
    }

    pub async fn resume(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(RecordingCommand::Resume { respond_to: tx }, rx)
            .await?
    }

    /// Stop and upload. Returns `None` when nothing was recording.
    pub async fn stop(&self) -> Result<Option<RecordingSummary>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(RecordingCommand::Stop { respond_to: tx }, rx)
            .await?
    }

    /// Abandon the recording just started without uploading anything and
    /// restore the state it replaced. A no-op unless recording or paused.
    pub async fn discard(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(RecordingCommand::Discard { respond_to: tx }, rx)
            .await
    }

    /// Record that a remote participant started or stopped recording.
    pub fn set_remote_recording(&self, active: bool) -> bool {
        self.remote_tx.send(active).is_ok()
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.state_rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state_rx.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn request<T>(
        &self,
        command: RecordingCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, CoordinatorError> {
        self.sender
            .send(command)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `RecordingActor`.
pub struct RecordingActor {
    session_id: SessionId,
    recorder: Arc<dyn RecorderCapability>,
    backend: Arc<dyn BackendAuthority>,
    dispatcher: Arc<EventDispatcher>,
    upload_policy: BackoffPolicy,
    receiver: mpsc::Receiver<RecordingCommand>,
    remote_rx: mpsc::UnboundedReceiver<bool>,
    cancel_token: CancellationToken,
    end_token: CancellationToken,
    state: RecordingState,
    /// State replaced by the last start, restored on discard.
    replaced: RecordingState,
    state_tx: watch::Sender<RecordingState>,
    chunks: Option<mpsc::Receiver<Bytes>>,
    buffer: BytesMut,
    ticker: Option<Interval>,
}

impl RecordingActor {
    /// Spawn a recording actor.
    ///
    /// `end_token` is cancelled when the session ends; upload retries stop
    /// then. Returns a handle and the task join handle.
    pub fn spawn(
        session_id: SessionId,
        recorder: Arc<dyn RecorderCapability>,
        backend: Arc<dyn BackendAuthority>,
        dispatcher: Arc<EventDispatcher>,
        upload_max_retries: u32,
        cancel_token: CancellationToken,
        end_token: CancellationToken,
    ) -> (RecordingHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(RECORDING_CHANNEL_BUFFER);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RecordingState::default());

        let actor = Self {
            session_id,
            recorder,
            backend,
            dispatcher,
            upload_policy: BackoffPolicy::new(UPLOAD_RETRY_BASE_DELAY, upload_max_retries),
            receiver,
            remote_rx,
            cancel_token: cancel_token.clone(),
            end_token,
            state: RecordingState::default(),
            replaced: RecordingState::default(),
            state_tx,
            chunks: None,
            buffer: BytesMut::new(),
            ticker: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RecordingHandle {
            sender,
            remote_tx,
            state_rx,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sc.media.recording", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!(target: "sc.media.recording", "RecordingActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.abort().await;
                    break;
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.abort().await;
                            break;
                        }
                    }
                }

                Some(active) = self.remote_rx.recv() => self.set_remote(active),

                chunk = next_chunk(&mut self.chunks) => {
                    match chunk {
                        Some(bytes) => self.append(&bytes),
                        None => self.chunks = None,
                    }
                }

                () = next_tick(&mut self.ticker) => self.on_tick(),
            }
        }

        debug!(target: "sc.media.recording", "RecordingActor stopped");
    }

    async fn handle_command(&mut self, command: RecordingCommand) {
        match command {
            RecordingCommand::Start {
                quality,
                with_transcription,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_start(quality, with_transcription).await);
            }
            RecordingCommand::Pause { respond_to } => {
                let _ = respond_to.send(self.handle_pause().await);
            }
            RecordingCommand::Resume { respond_to } => {
                let _ = respond_to.send(self.handle_resume().await);
            }
            RecordingCommand::Stop { respond_to } => {
                let _ = respond_to.send(Ok(self.handle_stop().await));
            }
            RecordingCommand::Discard { respond_to } => {
                self.handle_discard().await;
                let _ = respond_to.send(());
            }
        }
    }

    async fn handle_start(
        &mut self,
        quality: RecordingQuality,
        with_transcription: bool,
    ) -> Result<(), CoordinatorError> {
        if matches!(
            self.state.status,
            RecordingStatus::Recording | RecordingStatus::Paused
        ) {
            return Err(CoordinatorError::ForbiddenAction(
                "A recording is already in progress".to_string(),
            ));
        }
        if !self.recorder.has_capture_stream() {
            return Err(CoordinatorError::MediaUnavailable(
                "no capture stream".to_string(),
            ));
        }

        let chunks = self.recorder.start(quality.bitrate_bps()).await?;

        let request = StartRecordingRequest {
            quality,
            bitrate_bps: quality.bitrate_bps(),
            with_transcription,
        };
        if let Err(e) = self.backend.start_recording(&self.session_id, &request).await {
            warn!(target: "sc.media.recording", error = %e, "Backend refused recording start");
            if let Err(stop_err) = self.recorder.stop().await {
                debug!(target: "sc.media.recording", error = %stop_err, "Recorder stop after refusal failed");
            }
            return Err(e.into());
        }

        self.buffer.clear();
        self.chunks = Some(chunks);
        self.ticker = Some(new_ticker());
        self.replaced = self.state.clone();
        self.state = RecordingState {
            status: RecordingStatus::Recording,
            quality,
            duration_secs: 0,
            size_bytes: 0,
            remote_recording: self.state.remote_recording,
            started_at: Some(Utc::now()),
        };
        self.publish();

        info!(
            target: "sc.media.recording",
            quality = ?quality,
            bitrate_bps = quality.bitrate_bps(),
            "Recording started"
        );
        Ok(())
    }

    async fn handle_pause(&mut self) -> Result<(), CoordinatorError> {
        if self.state.status != RecordingStatus::Recording {
            return Err(CoordinatorError::ForbiddenAction(
                "Recording is not active".to_string(),
            ));
        }

        self.recorder.pause().await?;
        if let Err(e) = self.backend.pause_recording(&self.session_id).await {
            if let Err(resume_err) = self.recorder.resume().await {
                debug!(target: "sc.media.recording", error = %resume_err, "Recorder resume after refusal failed");
            }
            return Err(e.into());
        }

        self.ticker = None;
        self.state.status = RecordingStatus::Paused;
        self.publish();
        info!(target: "sc.media.recording", duration_secs = self.state.duration_secs, "Recording paused");
        Ok(())
    }

    async fn handle_resume(&mut self) -> Result<(), CoordinatorError> {
        if self.state.status != RecordingStatus::Paused {
            return Err(CoordinatorError::ForbiddenAction(
                "Recording is not paused".to_string(),
            ));
        }

        self.recorder.resume().await?;
        if let Err(e) = self.backend.resume_recording(&self.session_id).await {
            if let Err(pause_err) = self.recorder.pause().await {
                debug!(target: "sc.media.recording", error = %pause_err, "Recorder pause after refusal failed");
            }
            return Err(e.into());
        }

        self.ticker = Some(new_ticker());
        self.state.status = RecordingStatus::Recording;
        self.publish();
        info!(target: "sc.media.recording", "Recording resumed");
        Ok(())
    }

    async fn handle_stop(&mut self) -> Option<RecordingSummary> {
        if matches!(
            self.state.status,
            RecordingStatus::Idle | RecordingStatus::Stopped
        ) {
            debug!(target: "sc.media.recording", "Stop ignored, nothing is recording");
            return None;
        }

        self.ticker = None;
        if let Err(e) = self.recorder.stop().await {
            warn!(target: "sc.media.recording", error = %e, "Recorder stop failed");
        }
        self.drain_final_chunks().await;

        self.state.status = RecordingStatus::Stopped;
        self.publish();

        let data = self.buffer.split().freeze();
        let size_bytes = data.len() as u64;
        let (uploaded, upload_attempts) = if data.is_empty() {
            (false, 0)
        } else {
            self.upload(data).await
        };

        if !self.cancel_token.is_cancelled() {
            let completion = RecordingCompletion {
                duration_secs: self.state.duration_secs,
                size_bytes,
                uploaded,
            };
            if let Err(e) = self
                .backend
                .stop_recording(&self.session_id, &completion)
                .await
            {
                warn!(target: "sc.media.recording", error = %e, "Completion notice failed");
            }
        }

        info!(
            target: "sc.media.recording",
            duration_secs = self.state.duration_secs,
            size_bytes,
            uploaded,
            "Recording stopped"
        );

        Some(RecordingSummary {
            duration_secs: self.state.duration_secs,
            size_bytes,
            uploaded,
            upload_attempts,
        })
    }

    async fn handle_discard(&mut self) {
        if !matches!(
            self.state.status,
            RecordingStatus::Recording | RecordingStatus::Paused
        ) {
            return;
        }

        self.ticker = None;
        self.chunks = None;
        if let Err(e) = self.recorder.stop().await {
            debug!(target: "sc.media.recording", error = %e, "Recorder stop on discard failed");
        }
        self.buffer.clear();

        let completion = RecordingCompletion {
            duration_secs: 0,
            size_bytes: 0,
            uploaded: false,
        };
        if let Err(e) = self
            .backend
            .stop_recording(&self.session_id, &completion)
            .await
        {
            warn!(target: "sc.media.recording", error = %e, "Discard notice failed");
        }

        let remote_recording = self.state.remote_recording;
        self.state = RecordingState {
            remote_recording,
            ..self.replaced.clone()
        };
        self.publish();
        info!(target: "sc.media.recording", "Recording discarded");
    }

    /// Upload with retries. Returns whether it succeeded and the attempts made.
    async fn upload(&self, data: Bytes) -> (bool, u32) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    metrics::record_upload("cancelled");
                    return (false, attempt);
                }
                result = self.backend.upload_recording(&self.session_id, data.clone()) => result,
            };

            match result {
                Ok(()) => {
                    metrics::record_upload("success");
                    return (true, attempt);
                }
                Err(e) => {
                    let next_delay = if self.end_token.is_cancelled() {
                        None
                    } else {
                        self.upload_policy.delay_for(attempt)
                    };
                    let Some(delay) = next_delay else {
                        warn!(
                            target: "sc.media.recording",
                            attempts = attempt,
                            error = %e,
                            "Recording upload failed"
                        );
                        metrics::record_upload("failed");
                        return (false, attempt);
                    };
                    warn!(
                        target: "sc.media.recording",
                        attempt,
                        error = %e,
                        "Recording upload failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel_token.cancelled() => {
                            metrics::record_upload("cancelled");
                            return (false, attempt);
                        }
                        () = self.end_token.cancelled() => {
                            info!(
                                target: "sc.media.recording",
                                attempts = attempt,
                                "Session ended, upload retries dropped"
                            );
                            metrics::record_upload("cancelled");
                            return (false, attempt);
                        }
                        () = sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn drain_final_chunks(&mut self) {
        let Some(mut chunks) = self.chunks.take() else {
            return;
        };
        let drained = timeout(FINAL_CHUNK_TIMEOUT, async {
            let mut tail = Vec::new();
            while let Some(bytes) = chunks.recv().await {
                tail.push(bytes);
            }
            tail
        })
        .await;

        match drained {
            Ok(tail) => {
                for bytes in tail {
                    self.append(&bytes);
                }
            }
            Err(_) => {
                warn!(target: "sc.media.recording", "Recorder did not close its stream after stop");
            }
        }
    }

    /// Cancellation: release the recorder, discard buffered data.
    async fn abort(&mut self) {
        self.ticker = None;
        self.chunks = None;
        if matches!(
            self.state.status,
            RecordingStatus::Recording | RecordingStatus::Paused
        ) {
            if let Err(e) = self.recorder.stop().await {
                debug!(target: "sc.media.recording", error = %e, "Recorder stop on cancel failed");
            }
            self.buffer.clear();
            self.state.status = RecordingStatus::Stopped;
            self.publish();
            info!(target: "sc.media.recording", "Recording abandoned on shutdown");
        }
    }

    fn append(&mut self, bytes: &Bytes) {
        self.buffer.extend_from_slice(bytes);
        self.state.size_bytes = self.buffer.len() as u64;
        self.state_tx.send_replace(self.state.clone());
    }

    fn on_tick(&mut self) {
        self.state.duration_secs += 1;
        self.state_tx.send_replace(self.state.clone());
        self.dispatcher.publish(&DispatchEvent::RecordingTick {
            elapsed: Duration::from_secs(self.state.duration_secs),
        });
    }

    fn set_remote(&mut self, active: bool) {
        if self.state.remote_recording == active {
            return;
        }
        self.state.remote_recording = active;
        self.publish();
        info!(target: "sc.media.recording", active, "Remote recording indicator changed");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
        self.dispatcher
            .publish(&DispatchEvent::RecordingChanged(self.state.clone()));
    }
}

fn new_ticker() -> Interval {
    let mut ticker = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_chunk(chunks: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match chunks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
