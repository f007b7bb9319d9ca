//! Transcription lifecycle and transcript buffer.
//!
//! Entries are keyed by a stable utterance id. An interim entry is replaced
//! in place by later results for the same utterance; once the final entry has
//! arrived, further results for that utterance are ignored. Aggregates (word
//! count, mean confidence) cover final entries only.
//!
//! Local entry ids are `{participant}-{run}-{utterance}`: the participant id
//! keeps them apart from other participants' recognizers and the run number
//! keeps them apart across stop/start, since recognizers restart their
//! numbering on every run.

use super::capture::{RecognitionResult, SpeechCapability};
use crate::backend::{BackendAuthority, ExportFormat, StartTranscriptionRequest};
use crate::dispatcher::{DispatchEvent, EventDispatcher};
use crate::envelope::{EnvelopeKind, SignalingEnvelope};
use crate::errors::CoordinatorError;
use crate::transport::EnvelopeSink;

use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Channel buffer size for the transcription mailbox.
const TRANSCRIPTION_CHANNEL_BUFFER: usize = 64;

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    /// Stable utterance id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
    pub text: String,
    /// Offset from transcription start.
    pub start_ms: u64,
    pub confidence: f32,
    pub is_final: bool,
}

impl TranscriptEntry {
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    fn speaker_label(&self) -> &str {
        self.speaker_name
            .as_deref()
            .or(self.speaker_id.as_ref().map(ParticipantId::as_str))
            .unwrap_or("Unknown")
    }
}

/// Effect of ingesting one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New utterance.
    Appended,
    /// Interim entry replaced in place.
    Replaced,
    /// Utterance already final.
    Ignored,
}

/// Deduplicating transcript buffer.
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer {
    entries: Vec<TranscriptEntry>,
    positions: HashMap<String, usize>,
}

impl TranscriptBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, entry: TranscriptEntry) -> IngestOutcome {
        match self.positions.get(&entry.id).copied() {
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
                IngestOutcome::Appended
            }
            Some(position) => match self.entries.get_mut(position) {
                Some(existing) if !existing.is_final => {
                    *existing = entry;
                    IngestOutcome::Replaced
                }
                _ => IngestOutcome::Ignored,
            },
        }
    }

    /// All entries in arrival order (interim included).
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Final entries ordered by start time.
    #[must_use]
    pub fn final_entries(&self) -> Vec<&TranscriptEntry> {
        let mut finals: Vec<&TranscriptEntry> =
            self.entries.iter().filter(|e| e.is_final).collect();
        finals.sort_by_key(|e| e.start_ms);
        finals
    }

    #[must_use]
    pub fn word_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_final)
            .map(TranscriptEntry::word_count)
            .sum()
    }

    /// Mean confidence over final entries, `0.0` when there are none.
    #[must_use]
    pub fn average_confidence(&self) -> f32 {
        let finals: Vec<f32> = self
            .entries
            .iter()
            .filter(|e| e.is_final)
            .map(|e| e.confidence)
            .collect();
        if finals.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = finals.len() as f32;
        finals.iter().sum::<f32>() / count
    }

    /// `[mm:ss] speaker: text`, one final entry per line.
    #[must_use]
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        for entry in self.final_entries() {
            let total_secs = entry.start_ms / 1000;
            let _ = writeln!(
                out,
                "[{:02}:{:02}] {}: {}",
                total_secs / 60,
                total_secs % 60,
                entry.speaker_label(),
                entry.text
            );
        }
        out
    }

    /// Final entries as a JSON array.
    pub fn export_json(&self) -> Result<String, CoordinatorError> {
        Ok(serde_json::to_string_pretty(&self.final_entries())?)
    }

    pub fn export(&self, format: ExportFormat) -> Result<String, CoordinatorError> {
        match format {
            ExportFormat::Text => Ok(self.export_text()),
            ExportFormat::Json => self.export_json(),
        }
    }
}

/// Transcription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Idle,
    Active,
    Stopped,
}

/// Transcription snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionState {
    pub status: TranscriptionStatus,
    pub language: Option<String>,
    pub word_count: usize,
    pub average_confidence: f32,
    pub final_entries: usize,
    pub interim_entries: usize,
}

impl Default for TranscriptionState {
    fn default() -> Self {
        Self {
            status: TranscriptionStatus::Idle,
            language: None,
            word_count: 0,
            average_confidence: 0.0,
            final_entries: 0,
            interim_entries: 0,
        }
    }
}

#[derive(Debug)]
enum TranscriptionCommand {
    Start {
        language: String,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Entries {
        respond_to: oneshot::Sender<Vec<TranscriptEntry>>,
    },
    Export {
        format: ExportFormat,
        respond_to: oneshot::Sender<Result<String, CoordinatorError>>,
    },
}

/// Handle to a `TranscriptionActor`.
#[derive(Clone, Debug)]
pub struct TranscriptionHandle {
    sender: mpsc::Sender<TranscriptionCommand>,
    remote_tx: mpsc::UnboundedSender<TranscriptEntry>,
    state_rx: watch::Receiver<TranscriptionState>,
    cancel_token: CancellationToken,
}

impl TranscriptionHandle {
    /// Start recognition. Fails with `MediaUnavailable` without a recognizer.
    pub async fn start(&self, language: impl Into<String>) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            TranscriptionCommand::Start {
                language: language.into(),
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Stop recognition. A no-op unless active.
    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(TranscriptionCommand::Stop { respond_to: tx }, rx)
            .await?
    }

    /// All entries in arrival order.
    pub async fn entries(&self) -> Result<Vec<TranscriptEntry>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(TranscriptionCommand::Entries { respond_to: tx }, rx)
            .await
    }

    /// Render the final transcript.
    pub async fn export(&self, format: ExportFormat) -> Result<String, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            TranscriptionCommand::Export {
                format,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Ingest an entry received from another participant.
    pub fn ingest_remote(&self, entry: TranscriptEntry) -> bool {
        self.remote_tx.send(entry).is_ok()
    }

    #[must_use]
    pub fn state(&self) -> TranscriptionState {
        self.state_rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TranscriptionState> {
        self.state_rx.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn request<T>(
        &self,
        command: TranscriptionCommand,
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

/// The `TranscriptionActor`.
pub struct TranscriptionActor {
    session_id: SessionId,
    local_participant: ParticipantId,
    local_display_name: Option<String>,
    speech: Arc<dyn SpeechCapability>,
    backend: Arc<dyn BackendAuthority>,
    sink: Arc<dyn EnvelopeSink>,
    dispatcher: Arc<EventDispatcher>,
    receiver: mpsc::Receiver<TranscriptionCommand>,
    remote_rx: mpsc::UnboundedReceiver<TranscriptEntry>,
    cancel_token: CancellationToken,
    buffer: TranscriptBuffer,
    state: TranscriptionState,
    state_tx: watch::Sender<TranscriptionState>,
    results: Option<mpsc::Receiver<RecognitionResult>>,
    /// Recognizer runs started so far; recognizers number utterances per run.
    run: u32,
}

impl TranscriptionActor {
    /// Spawn a transcription actor.
    ///
    /// Returns a handle and the task join handle.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        session_id: SessionId,
        local_participant: ParticipantId,
        local_display_name: Option<String>,
        speech: Arc<dyn SpeechCapability>,
        backend: Arc<dyn BackendAuthority>,
        sink: Arc<dyn EnvelopeSink>,
        dispatcher: Arc<EventDispatcher>,
        cancel_token: CancellationToken,
    ) -> (TranscriptionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(TRANSCRIPTION_CHANNEL_BUFFER);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TranscriptionState::default());

        let actor = Self {
            session_id,
            local_participant,
            local_display_name,
            speech,
            backend,
            sink,
            dispatcher,
            receiver,
            remote_rx,
            cancel_token: cancel_token.clone(),
            buffer: TranscriptBuffer::new(),
            state: TranscriptionState::default(),
            state_tx,
            results: None,
            run: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = TranscriptionHandle {
            sender,
            remote_tx,
            state_rx,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sc.media.transcription", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!(target: "sc.media.transcription", "TranscriptionActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.release().await;
                    break;
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.release().await;
                            break;
                        }
                    }
                }

                Some(entry) = self.remote_rx.recv() => self.ingest(entry, false).await,

                result = next_result(&mut self.results) => {
                    match result {
                        Some(result) => {
                            let entry = self.local_entry(result);
                            self.ingest(entry, true).await;
                        }
                        None => self.on_recognizer_ended(),
                    }
                }
            }
        }

        debug!(target: "sc.media.transcription", "TranscriptionActor stopped");
    }

    async fn handle_command(&mut self, command: TranscriptionCommand) {
        match command {
            TranscriptionCommand::Start {
                language,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_start(language).await);
            }
            TranscriptionCommand::Stop { respond_to } => {
                self.handle_stop().await;
                let _ = respond_to.send(Ok(()));
            }
            TranscriptionCommand::Entries { respond_to } => {
                let _ = respond_to.send(self.buffer.entries().to_vec());
            }
            TranscriptionCommand::Export { format, respond_to } => {
                let _ = respond_to.send(self.buffer.export(format));
            }
        }
    }

    async fn handle_start(&mut self, language: String) -> Result<(), CoordinatorError> {
        if self.state.status == TranscriptionStatus::Active {
            return Err(CoordinatorError::ForbiddenAction(
                "Transcription is already running".to_string(),
            ));
        }
        if !self.speech.is_available() {
            return Err(CoordinatorError::MediaUnavailable(
                "speech recognition is not available".to_string(),
            ));
        }

        let results = self.speech.start(&language).await?;
        let request = StartTranscriptionRequest {
            language: language.clone(),
        };
        if let Err(e) = self
            .backend
            .start_transcription(&self.session_id, &request)
            .await
        {
            warn!(target: "sc.media.transcription", error = %e, "Backend refused transcription start");
            self.speech.stop().await;
            return Err(e.into());
        }

        self.run += 1;
        self.results = Some(results);
        self.state.status = TranscriptionStatus::Active;
        self.state.language = Some(language);
        self.publish();
        info!(
            target: "sc.media.transcription",
            language = self.state.language.as_deref().unwrap_or_default(),
            "Transcription started"
        );
        Ok(())
    }

    async fn handle_stop(&mut self) {
        if self.state.status != TranscriptionStatus::Active {
            return;
        }
        self.speech.stop().await;
        self.results = None;
        if let Err(e) = self.backend.stop_transcription(&self.session_id).await {
            warn!(target: "sc.media.transcription", error = %e, "Backend transcription stop failed");
        }
        self.state.status = TranscriptionStatus::Stopped;
        self.publish();
        info!(
            target: "sc.media.transcription",
            words = self.state.word_count,
            "Transcription stopped"
        );
    }

    fn local_entry(&self, result: RecognitionResult) -> TranscriptEntry {
        TranscriptEntry {
            id: format!("{}-{}-{}", self.local_participant, self.run, result.utterance_id),
            speaker_id: Some(self.local_participant.clone()),
            speaker_name: self.local_display_name.clone(),
            text: result.text,
            start_ms: result.offset_ms,
            confidence: result.confidence,
            is_final: result.is_final,
        }
    }

    async fn ingest(&mut self, entry: TranscriptEntry, local: bool) {
        let is_final = entry.is_final;
        let broadcast = (local && is_final).then(|| entry.clone());

        let outcome = self.buffer.ingest(entry);
        trace!(target: "sc.media.transcription", ?outcome, local, is_final, "Transcript entry ingested");
        if outcome == IngestOutcome::Ignored {
            return;
        }
        self.refresh_aggregates();
        self.publish();

        if let Some(entry) = broadcast {
            self.share_final(&entry).await;
        }
    }

    /// Broadcast a final local entry and persist it.
    async fn share_final(&self, entry: &TranscriptEntry) {
        match SignalingEnvelope::with_payload(
            EnvelopeKind::Transcription,
            self.session_id.clone(),
            self.local_participant.clone(),
            entry,
        ) {
            Ok(envelope) => {
                if let Err(e) = self.sink.send_envelope(envelope).await {
                    warn!(target: "sc.media.transcription", error = %e, "Transcript broadcast failed");
                }
            }
            Err(e) => {
                warn!(target: "sc.media.transcription", error = %e, "Transcript encode failed");
            }
        }
        if let Err(e) = self
            .backend
            .append_transcript_entry(&self.session_id, entry)
            .await
        {
            warn!(target: "sc.media.transcription", error = %e, "Transcript persist failed");
        }
    }

    fn on_recognizer_ended(&mut self) {
        self.results = None;
        if self.state.status == TranscriptionStatus::Active {
            warn!(target: "sc.media.transcription", "Recognizer ended unexpectedly");
            self.state.status = TranscriptionStatus::Stopped;
            self.publish();
        }
    }

    async fn release(&mut self) {
        if self.state.status == TranscriptionStatus::Active {
            self.speech.stop().await;
            self.results = None;
            self.state.status = TranscriptionStatus::Stopped;
            self.publish();
        }
    }

    fn refresh_aggregates(&mut self) {
        let finals = self.buffer.entries().iter().filter(|e| e.is_final).count();
        self.state.word_count = self.buffer.word_count();
        self.state.average_confidence = self.buffer.average_confidence();
        self.state.final_entries = finals;
        self.state.interim_entries = self.buffer.len() - finals;
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
        self.dispatcher
            .publish(&DispatchEvent::TranscriptChanged(self.state.clone()));
    }
}

async fn next_result(
    results: &mut Option<mpsc::Receiver<RecognitionResult>>,
) -> Option<RecognitionResult> {
    match results {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry(id: &str, text: &str, start_ms: u64, is_final: bool) -> TranscriptEntry {
        TranscriptEntry {
            id: id.to_string(),
            speaker_id: Some(ParticipantId::from("p-1")),
            speaker_name: Some("Dr. Lee".to_string()),
            text: text.to_string(),
            start_ms,
            confidence: if is_final { 0.9 } else { 0.4 },
            is_final,
        }
    }

    #[test]
    fn test_final_replaces_interim_in_place() {
        let mut buffer = TranscriptBuffer::new();

        assert_eq!(buffer.ingest(entry("u1", "hello", 0, false)), IngestOutcome::Appended);
        assert_eq!(buffer.ingest(entry("u2", "second", 2000, true)), IngestOutcome::Appended);
        assert_eq!(
            buffer.ingest(entry("u1", "hello there friend", 0, true)),
            IngestOutcome::Replaced
        );

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.entries()[0].text, "hello there friend");
        assert_eq!(buffer.word_count(), 4);
    }

    #[test]
    fn test_interim_never_counted() {
        let mut buffer = TranscriptBuffer::new();
        buffer.ingest(entry("u1", "one two three", 0, false));
        buffer.ingest(entry("u1", "one two three four", 0, false));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.word_count(), 0);
        assert!(buffer.average_confidence().abs() < f32::EPSILON);
    }

    #[test]
    fn test_late_interim_is_ignored() {
        let mut buffer = TranscriptBuffer::new();
        buffer.ingest(entry("u1", "final words", 0, true));

        assert_eq!(
            buffer.ingest(entry("u1", "final", 0, false)),
            IngestOutcome::Ignored
        );
        assert_eq!(
            buffer.ingest(entry("u1", "final words again", 0, true)),
            IngestOutcome::Ignored
        );
        assert_eq!(buffer.entries()[0].text, "final words");
        assert_eq!(buffer.word_count(), 2);
    }

    #[test]
    fn test_average_confidence_over_finals() {
        let mut buffer = TranscriptBuffer::new();
        let mut a = entry("a", "x", 0, true);
        a.confidence = 0.8;
        let mut b = entry("b", "y", 0, true);
        b.confidence = 0.6;
        buffer.ingest(a);
        buffer.ingest(b);
        buffer.ingest(entry("c", "z", 0, false));

        assert!((buffer.average_confidence() - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_export_text_orders_by_start_time() {
        let mut buffer = TranscriptBuffer::new();
        buffer.ingest(entry("late", "see you next week", 125_000, true));
        buffer.ingest(entry("early", "good morning", 3_000, true));
        buffer.ingest(entry("pending", "uh", 4_000, false));

        let mut anonymous = entry("anon", "hi", 61_000, true);
        anonymous.speaker_name = None;
        anonymous.speaker_id = None;
        buffer.ingest(anonymous);

        assert_eq!(
            buffer.export_text(),
            "[00:03] Dr. Lee: good morning\n[01:01] Unknown: hi\n[02:05] Dr. Lee: see you next week\n"
        );
    }

    #[test]
    fn test_export_json_contains_finals_only() {
        let mut buffer = TranscriptBuffer::new();
        buffer.ingest(entry("u1", "done", 0, true));
        buffer.ingest(entry("u2", "maybe", 10, false));

        let value: serde_json::Value =
            serde_json::from_str(&buffer.export(ExportFormat::Json).unwrap()).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], "u1");
        assert_eq!(items[0]["isFinal"], true);
    }
}
