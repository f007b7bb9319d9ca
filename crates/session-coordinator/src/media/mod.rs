//! Recording and transcription.
//!
//! The two lifecycles are coordinated but independent: transcription can run
//! without a recording and vice versa. Raw capture and speech recognition are
//! injected capabilities (see [`capture`]).
//!
//! # Modules
//!
//! - [`capture`] - recorder and speech-recognition capability traits
//! - [`recording`] - recording state machine, duration ticker and upload
//! - [`transcription`] - transcript buffer with utterance-keyed dedup

pub mod capture;
pub mod recording;
pub mod transcription;

pub use capture::{CaptureError, RecognitionResult, RecorderCapability, SpeechCapability};
pub use recording::{
    RecordingActor, RecordingHandle, RecordingQuality, RecordingState, RecordingStatus,
    RecordingSummary,
};
pub use transcription::{
    TranscriptBuffer, TranscriptEntry, TranscriptionActor, TranscriptionHandle,
    TranscriptionState, TranscriptionStatus,
};
