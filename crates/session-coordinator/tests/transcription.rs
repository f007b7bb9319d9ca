//! Integration tests for transcription: utterance-keyed dedup, broadcast of
//! final local entries and export.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use common::types::{ParticipantId, SessionId};
use sc_test_utils::{recognition, BackendCall, MockBackend, MockSpeech};
use session_coordinator::backend::ExportFormat;
use session_coordinator::dispatcher::EventDispatcher;
use session_coordinator::envelope::{EnvelopeKind, SignalingEnvelope};
use session_coordinator::media::{
    TranscriptEntry, TranscriptionActor, TranscriptionHandle, TranscriptionState,
    TranscriptionStatus,
};
use session_coordinator::transport::EnvelopeSink;
use session_coordinator::CoordinatorError;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CapturingSink {
    sent: Mutex<Vec<SignalingEnvelope>>,
}

#[async_trait::async_trait]
impl EnvelopeSink for CapturingSink {
    async fn send_envelope(&self, envelope: SignalingEnvelope) -> Result<(), CoordinatorError> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

struct Harness {
    transcription: TranscriptionHandle,
    speech: Arc<MockSpeech>,
    backend: Arc<MockBackend>,
    sink: Arc<CapturingSink>,
}

fn spawn_with(speech: Arc<MockSpeech>, backend: Arc<MockBackend>) -> Harness {
    let sink = Arc::new(CapturingSink::default());
    let (transcription, _task) = TranscriptionActor::spawn(
        SessionId::from("s-1"),
        ParticipantId::from("therapist"),
        Some("Dr. Lee".to_string()),
        Arc::clone(&speech) as _,
        Arc::clone(&backend) as _,
        Arc::clone(&sink) as _,
        Arc::new(EventDispatcher::new()),
        CancellationToken::new(),
    );
    Harness {
        transcription,
        speech,
        backend,
        sink,
    }
}

fn spawn() -> Harness {
    spawn_with(MockSpeech::new(), MockBackend::builder().build())
}

async fn wait_for(
    handle: &TranscriptionHandle,
    predicate: impl FnMut(&TranscriptionState) -> bool,
) -> TranscriptionState {
    handle.subscribe().wait_for(predicate).await.unwrap().clone()
}

fn remote_entry(id: &str, text: &str, start_ms: u64, is_final: bool) -> TranscriptEntry {
    TranscriptEntry {
        id: id.to_string(),
        speaker_id: Some(ParticipantId::from("patient")),
        speaker_name: Some("Sam".to_string()),
        text: text.to_string(),
        start_ms,
        confidence: 0.8,
        is_final,
    }
}

#[tokio::test]
async fn test_interim_then_final_keeps_one_entry() {
    let h = spawn();
    h.transcription.start("en-US").await.unwrap();

    assert!(h.speech.emit(recognition("u1", "hello", false, 0)).await);
    assert!(h.speech.emit(recognition("u1", "hello there", false, 0)).await);
    assert!(h.speech.emit(recognition("u1", "hello there friend", true, 0)).await);

    let state = wait_for(&h.transcription, |s| s.final_entries == 1).await;
    assert_eq!(state.interim_entries, 0);
    assert_eq!(state.word_count, 3);

    let entries = h.transcription.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = entries.first().unwrap();
    assert_eq!(entry.id, "therapist-1-u1");
    assert_eq!(entry.text, "hello there friend");
    assert!(entry.is_final);
}

#[tokio::test]
async fn test_only_final_local_entries_are_shared() {
    let h = spawn();
    h.transcription.start("en-US").await.unwrap();

    h.speech.emit(recognition("u1", "first", false, 0)).await;
    h.speech.emit(recognition("u1", "first words", true, 0)).await;
    h.speech.emit(recognition("u2", "second", false, 1500)).await;
    wait_for(&h.transcription, |s| s.final_entries == 1 && s.interim_entries == 1).await;

    let sent = h.sink.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let envelope = sent.first().unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::Transcription);
    let shared: TranscriptEntry = envelope.payload().unwrap();
    assert_eq!(shared.text, "first words");
    assert_eq!(
        h.backend
            .count(|c| matches!(c, BackendCall::AppendTranscriptEntry(_))),
        1
    );
}

#[tokio::test]
async fn test_remote_entries_merge_by_id() {
    let h = spawn();

    assert!(h.transcription.ingest_remote(remote_entry("patient-a", "I feel", 2000, false)));
    assert!(h.transcription.ingest_remote(remote_entry("patient-a", "I feel better", 2000, true)));
    assert!(h.transcription.ingest_remote(remote_entry("patient-a", "I feel", 2000, false)));
    assert!(h.transcription.ingest_remote(remote_entry("patient-a", "I feel better", 2000, true)));

    let state = wait_for(&h.transcription, |s| s.final_entries == 1).await;
    assert_eq!(state.word_count, 3);
    let entries = h.transcription.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries.first().unwrap().text, "I feel better");
    assert!(h.sink.sent.lock().unwrap().is_empty(), "remote entries are not rebroadcast");
}

#[tokio::test]
async fn test_export_orders_by_start_time() {
    let h = spawn();
    h.transcription.start("en-US").await.unwrap();

    h.transcription
        .ingest_remote(remote_entry("patient-b", "later words", 65_000, true));
    h.speech.emit(recognition("u1", "opening remark", true, 5_000)).await;
    wait_for(&h.transcription, |s| s.final_entries == 2).await;

    let text = h.transcription.export(ExportFormat::Text).await.unwrap();
    assert_eq!(text, "[00:05] Dr. Lee: opening remark\n[01:05] Sam: later words\n");

    let json = h.transcription.export(ExportFormat::Json).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_start_twice_is_forbidden_and_stop_is_idempotent() {
    let h = spawn();

    h.transcription.start("en-US").await.unwrap();
    assert!(matches!(
        h.transcription.start("fr-FR").await,
        Err(CoordinatorError::ForbiddenAction(_))
    ));
    assert_eq!(h.speech.started_languages(), vec!["en-US".to_string()]);

    h.transcription.stop().await.unwrap();
    h.transcription.stop().await.unwrap();
    assert_eq!(h.transcription.state().status, TranscriptionStatus::Stopped);
    assert!(!h.speech.is_listening());
    assert_eq!(
        h.backend.count(|c| matches!(c, BackendCall::StopTranscription)),
        1
    );
}

#[tokio::test]
async fn test_restarted_recognizer_may_reuse_utterance_ids() {
    let h = spawn();

    h.transcription.start("en-US").await.unwrap();
    h.speech.emit(recognition("0", "first run words", true, 0)).await;
    wait_for(&h.transcription, |s| s.final_entries == 1).await;
    h.transcription.stop().await.unwrap();

    h.transcription.start("en-US").await.unwrap();
    h.speech.emit(recognition("0", "second run", false, 0)).await;
    h.speech.emit(recognition("0", "second run new sentence here", true, 0)).await;

    let state = wait_for(&h.transcription, |s| s.final_entries == 2).await;
    assert_eq!(state.word_count, 7);
    let texts: Vec<String> = h
        .transcription
        .entries()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.text)
        .collect();
    assert_eq!(texts, vec!["first run words", "second run new sentence here"]);
}

#[tokio::test]
async fn test_unavailable_recognizer() {
    let h = spawn_with(MockSpeech::unavailable(), MockBackend::builder().build());

    let result = h.transcription.start("en-US").await;

    assert!(matches!(result, Err(CoordinatorError::MediaUnavailable(_))));
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_backend_refusal_stops_recognizer() {
    let h = spawn_with(
        MockSpeech::new(),
        MockBackend::builder()
            .reject_transcription("Transcription not permitted")
            .build(),
    );

    let result = h.transcription.start("en-US").await;

    assert!(matches!(result, Err(CoordinatorError::ActionRejected { .. })));
    assert!(!h.speech.is_listening());
    assert_eq!(h.transcription.state().status, TranscriptionStatus::Idle);
}

#[tokio::test]
async fn test_recognizer_ending_stops_transcription() {
    let h = spawn();
    h.transcription.start("en-US").await.unwrap();

    h.speech.end_stream();

    let state = wait_for(&h.transcription, |s| s.status == TranscriptionStatus::Stopped).await;
    assert_eq!(state.language.as_deref(), Some("en-US"));
}
