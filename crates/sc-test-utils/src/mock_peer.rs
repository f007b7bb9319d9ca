//! Scripted peer connection engine.
//!
//! Records every call in order and answers with canned descriptions. The
//! first remote-description call can be made to fail.

use session_coordinator::envelope::{IceCandidate, SdpType, SessionDescription};
use session_coordinator::negotiation::{PeerConnection, PeerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One recorded peer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

/// In-memory `PeerConnection`.
#[derive(Debug)]
pub struct MockPeer {
    has_media: AtomicBool,
    fail_remote: AtomicBool,
    calls: Mutex<Vec<PeerCall>>,
}

impl MockPeer {
    /// Peer with local media attached.
    #[must_use]
    pub fn with_media() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    /// Peer without local tracks; answers fail with `NoLocalMedia`.
    #[must_use]
    pub fn without_media() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    fn new(has_media: bool) -> Self {
        Self {
            has_media: AtomicBool::new(has_media),
            fail_remote: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_media(&self, has_media: bool) {
        self.has_media.store(has_media, Ordering::SeqCst);
    }

    /// Reject the next remote description.
    pub fn fail_next_remote(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Candidates applied to the engine, in order.
    #[must_use]
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PeerCall::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.calls().contains(&PeerCall::Close)
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl PeerConnection for MockPeer {
    fn has_local_media(&self) -> bool {
        self.has_media.load(Ordering::SeqCst)
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.record(PeerCall::CreateOffer);
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 mock-offer".to_string(),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        if !self.has_local_media() {
            return Err(PeerError::NoLocalMedia);
        }
        self.record(PeerCall::CreateAnswer);
        Ok(SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: "v=0 mock-answer".to_string(),
        })
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(PeerCall::SetLocal(description.sdp_type));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        if self.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(PeerError::InvalidDescription("mock rejection".to_string()));
        }
        self.record(PeerCall::SetRemote(description.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        self.record(PeerCall::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn close(&self) {
        self.record(PeerCall::Close);
    }
}
