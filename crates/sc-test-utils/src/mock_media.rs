//! Recorder and speech-recognizer capabilities driven by the test.
//!
//! `start` hands the coordinator a channel; the test feeds it through
//! `emit`. `stop` closes the channel, ending the stream after any chunk
//! already emitted.

use bytes::Bytes;
use session_coordinator::media::{
    CaptureError, RecognitionResult, RecorderCapability, SpeechCapability,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const STREAM_CAPACITY: usize = 64;

/// One recorded recorder call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderCall {
    Start { bitrate_bps: u64 },
    Pause,
    Resume,
    Stop,
}

/// In-memory `RecorderCapability`.
#[derive(Debug)]
pub struct MockRecorder {
    has_stream: AtomicBool,
    chunks: Mutex<Option<mpsc::Sender<Bytes>>>,
    calls: Mutex<Vec<RecorderCall>>,
}

impl MockRecorder {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_stream(true))
    }

    /// Recorder with no capture stream; `start` fails.
    #[must_use]
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::with_stream(false))
    }

    fn with_stream(has_stream: bool) -> Self {
        Self {
            has_stream: AtomicBool::new(has_stream),
            chunks: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Push an encoded chunk to the running recording.
    ///
    /// Returns false when no recording stream is open.
    pub async fn emit(&self, chunk: impl Into<Bytes>) -> bool {
        let sender = self.chunks.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(chunk.into()).await.is_ok(),
            None => false,
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecorderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RecorderCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl RecorderCapability for MockRecorder {
    fn has_capture_stream(&self) -> bool {
        self.has_stream.load(Ordering::SeqCst)
    }

    async fn start(&self, bitrate_bps: u64) -> Result<mpsc::Receiver<Bytes>, CaptureError> {
        self.record(RecorderCall::Start { bitrate_bps });
        if !self.has_capture_stream() {
            return Err(CaptureError::Unavailable);
        }
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        *self.chunks.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn pause(&self) -> Result<(), CaptureError> {
        self.record(RecorderCall::Pause);
        Ok(())
    }

    async fn resume(&self) -> Result<(), CaptureError> {
        self.record(RecorderCall::Resume);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CaptureError> {
        self.record(RecorderCall::Stop);
        self.chunks.lock().unwrap().take();
        Ok(())
    }
}

/// In-memory `SpeechCapability`.
#[derive(Debug)]
pub struct MockSpeech {
    available: AtomicBool,
    results: Mutex<Option<mpsc::Sender<RecognitionResult>>>,
    languages: Mutex<Vec<String>>,
}

impl MockSpeech {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_availability(true))
    }

    /// Recognizer reporting itself unavailable.
    #[must_use]
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::with_availability(false))
    }

    fn with_availability(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            results: Mutex::new(None),
            languages: Mutex::new(Vec::new()),
        }
    }

    /// Push a recognition result. Returns false when not listening.
    pub async fn emit(&self, result: RecognitionResult) -> bool {
        let sender = self.results.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(result).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the recognizer ending on its own.
    pub fn end_stream(&self) {
        self.results.lock().unwrap().take();
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.results.lock().unwrap().is_some()
    }

    /// Languages passed to every `start`.
    #[must_use]
    pub fn started_languages(&self) -> Vec<String> {
        self.languages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SpeechCapability for MockSpeech {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn start(
        &self,
        language: &str,
    ) -> Result<mpsc::Receiver<RecognitionResult>, CaptureError> {
        if !self.is_available() {
            return Err(CaptureError::Unavailable);
        }
        self.languages.lock().unwrap().push(language.to_string());
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        *self.results.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.results.lock().unwrap().take();
    }
}

/// Recognition result helper.
#[must_use]
pub fn recognition(utterance_id: &str, text: &str, is_final: bool, offset_ms: u64) -> RecognitionResult {
    RecognitionResult {
        utterance_id: utterance_id.to_string(),
        text: text.to_string(),
        confidence: 0.9,
        is_final,
        offset_ms,
    }
}
