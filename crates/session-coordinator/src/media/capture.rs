//! Capture capabilities.
//!
//! The recorder produces encoded byte chunks and the speech recognizer
//! produces incremental text results. Both are injected so the coordinator
//! runs without audio/video hardware.

use crate::errors::CoordinatorError;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capture capability failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no capture stream is available")]
    Unavailable,

    #[error("capture device error: {0}")]
    Device(String),
}

impl From<CaptureError> for CoordinatorError {
    fn from(err: CaptureError) -> Self {
        CoordinatorError::MediaUnavailable(err.to_string())
    }
}

/// Media recorder.
///
/// After `stop` the chunk stream returned by `start` delivers any final chunk
/// and then ends.
#[async_trait::async_trait]
pub trait RecorderCapability: Send + Sync {
    fn has_capture_stream(&self) -> bool;

    async fn start(&self, bitrate_bps: u64) -> Result<mpsc::Receiver<Bytes>, CaptureError>;

    async fn pause(&self) -> Result<(), CaptureError>;

    async fn resume(&self) -> Result<(), CaptureError>;

    async fn stop(&self) -> Result<(), CaptureError>;
}

/// One incremental recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Stable per-utterance identifier, unique within one recognizer run.
    pub utterance_id: String,
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    /// Offset from transcription start.
    pub offset_ms: u64,
}

/// Speech recognizer.
#[async_trait::async_trait]
pub trait SpeechCapability: Send + Sync {
    fn is_available(&self) -> bool;

    async fn start(&self, language: &str)
        -> Result<mpsc::Receiver<RecognitionResult>, CaptureError>;

    async fn stop(&self);
}
