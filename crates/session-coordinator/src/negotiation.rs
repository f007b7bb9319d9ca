//! Negotiation orchestrator.
//!
//! Sequences offer/answer/candidate exchange for one peer link. The peer
//! connection itself is an injected [`PeerConnection`]; this module owns only
//! the protocol ordering:
//!
//! ```text
//! idle ─▶ offer-sent ─▶ answer-received ─▶ connected
//! idle ─▶ offer-received ─▶ answer-sent ─▶ connected
//! connected ─renegotiate─▶ offer-sent ─▶ ...
//! ```
//!
//! Remote candidates that arrive before the remote description is applied are
//! buffered and flushed in arrival order right after it is applied. Every step
//! holds the orchestrator lock, so steps never interleave, and a failed step
//! leaves the state it started from.

use crate::envelope::{
    EnvelopeKind, IceCandidate, SdpType, SessionDescription, SignalingEnvelope,
};
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::transport::EnvelopeSink;

use common::types::{ParticipantId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Error reported by the peer connection engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("no local media is ready")]
    NoLocalMedia,

    #[error("invalid description: {0}")]
    InvalidDescription(String),

    #[error("peer engine error: {0}")]
    Engine(String),
}

impl From<PeerError> for CoordinatorError {
    fn from(err: PeerError) -> Self {
        CoordinatorError::Negotiation(err.to_string())
    }
}

/// Peer connection engine (the WebRTC stack).
#[async_trait::async_trait]
pub trait PeerConnection: Send + Sync {
    /// Whether local tracks are attached and an answer can be produced.
    fn has_local_media(&self) -> bool;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, description: &SessionDescription)
        -> Result<(), PeerError>;

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError>;

    async fn close(&self);
}

/// Negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    AnswerReceived,
    OfferReceived,
    AnswerSent,
    Connected,
    Closed,
}

impl NegotiationState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::AnswerReceived => "answer-received",
            NegotiationState::OfferReceived => "offer-received",
            NegotiationState::AnswerSent => "answer-sent",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        }
    }
}

struct NegotiationInner {
    state: NegotiationState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

/// Negotiation orchestrator for one peer link.
pub struct NegotiationOrchestrator {
    session_id: SessionId,
    local_participant: ParticipantId,
    peer: Arc<dyn PeerConnection>,
    sink: Arc<dyn EnvelopeSink>,
    step_timeout: Duration,
    inner: Mutex<NegotiationInner>,
    state_tx: watch::Sender<NegotiationState>,
}

impl NegotiationOrchestrator {
    /// Create an orchestrator in `idle`.
    ///
    /// `step_timeout` bounds offer and answer creation.
    pub fn new(
        session_id: SessionId,
        local_participant: ParticipantId,
        peer: Arc<dyn PeerConnection>,
        sink: Arc<dyn EnvelopeSink>,
        step_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        Self {
            session_id,
            local_participant,
            peer,
            sink,
            step_timeout,
            inner: Mutex::new(NegotiationInner {
                state: NegotiationState::Idle,
                remote_description_set: false,
                pending_candidates: Vec::new(),
            }),
            state_tx,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        *self.state_tx.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    /// Number of remote candidates waiting for the remote description.
    pub async fn buffered_candidates(&self) -> usize {
        self.inner.lock().await.pending_candidates.len()
    }

    /// Create a local offer, apply it and transmit it once.
    #[instrument(skip_all, name = "sc.negotiation.offer", fields(session_id = %self.session_id))]
    pub async fn create_and_send_offer(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner)?;
        if inner.state != NegotiationState::Idle {
            return Err(out_of_sequence("create offer", inner.state));
        }
        let result = self.offer_cycle(&mut inner).await;
        metrics::record_negotiation("offer", outcome(&result));
        result
    }

    /// Start a fresh offer cycle on an established link (track change).
    #[instrument(skip_all, name = "sc.negotiation.renegotiate", fields(session_id = %self.session_id))]
    pub async fn renegotiate(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner)?;
        if inner.state != NegotiationState::Connected {
            return Err(out_of_sequence("renegotiate", inner.state));
        }
        let result = self.offer_cycle(&mut inner).await;
        metrics::record_negotiation("renegotiate", outcome(&result));
        result
    }

    /// Consume a remote offer, answer it and transmit the answer once.
    #[instrument(skip_all, name = "sc.negotiation.answer", fields(session_id = %self.session_id))]
    pub async fn handle_incoming_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner)?;
        let result = self.answer_cycle(&mut inner, &offer).await;
        metrics::record_negotiation("answer", outcome(&result));
        result
    }

    /// Apply the remote answer to our outstanding offer.
    #[instrument(skip_all, name = "sc.negotiation.remote_answer", fields(session_id = %self.session_id))]
    pub async fn handle_incoming_answer(
        &self,
        answer: SessionDescription,
    ) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner)?;
        if inner.state != NegotiationState::OfferSent {
            metrics::record_negotiation("remote-answer", "error");
            return Err(out_of_sequence("apply answer", inner.state));
        }
        if answer.sdp_type != SdpType::Answer {
            metrics::record_negotiation("remote-answer", "error");
            return Err(CoordinatorError::Negotiation(
                "expected an answer description".to_string(),
            ));
        }

        let result = async {
            self.peer.set_remote_description(&answer).await?;
            inner.remote_description_set = true;
            self.flush_candidates(&mut inner).await;
            Ok::<(), CoordinatorError>(())
        }
        .await;

        if result.is_ok() {
            self.set_state(&mut inner, NegotiationState::AnswerReceived);
            debug!(
                target: "sc.negotiation",
                sdp_len = answer.sdp.len(),
                "Remote answer applied"
            );
        }
        metrics::record_negotiation("remote-answer", outcome(&result));
        result
    }

    /// Apply a remote candidate, or buffer it until the remote description is set.
    pub async fn handle_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner)?;

        if !inner.remote_description_set {
            inner.pending_candidates.push(candidate);
            metrics::record_candidate_buffered();
            debug!(
                target: "sc.negotiation",
                buffered = inner.pending_candidates.len(),
                "Candidate buffered until remote description is set"
            );
            return Ok(());
        }

        self.peer.add_ice_candidate(&candidate).await?;
        Ok(())
    }

    /// Forward a locally gathered candidate to the remote side.
    pub async fn on_local_candidate(&self, candidate: IceCandidate) -> Result<(), CoordinatorError> {
        ensure_open(&*self.inner.lock().await)?;
        let envelope = SignalingEnvelope::with_payload(
            EnvelopeKind::IceCandidate,
            self.session_id.clone(),
            self.local_participant.clone(),
            &candidate,
        )?;
        self.sink.send_envelope(envelope).await
    }

    /// Peer reports media flowing.
    pub async fn on_connection_established(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        ensure_open(&inner)?;
        match inner.state {
            NegotiationState::AnswerReceived | NegotiationState::AnswerSent => {
                self.set_state(&mut inner, NegotiationState::Connected);
                info!(target: "sc.negotiation", session_id = %self.session_id, "Peer link connected");
                Ok(())
            }
            NegotiationState::Connected => Ok(()),
            state => Err(out_of_sequence("mark connected", state)),
        }
    }

    /// Route an inbound signaling envelope. Kinds other than offer, answer
    /// and candidate are ignored.
    pub async fn handle_envelope(&self, envelope: &SignalingEnvelope) -> Result<(), CoordinatorError> {
        if envelope.participant_id.as_ref() == Some(&self.local_participant) {
            return Ok(());
        }
        match envelope.kind {
            EnvelopeKind::Offer => {
                let offer = decode_payload::<SessionDescription>(envelope)?;
                self.handle_incoming_offer(offer).await
            }
            EnvelopeKind::Answer => {
                let answer = decode_payload::<SessionDescription>(envelope)?;
                self.handle_incoming_answer(answer).await
            }
            EnvelopeKind::IceCandidate => {
                let candidate = decode_payload::<IceCandidate>(envelope)?;
                self.handle_remote_candidate(candidate).await
            }
            _ => Ok(()),
        }
    }

    /// Close the link. Buffered candidates are dropped and every later
    /// operation fails.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == NegotiationState::Closed {
            return;
        }
        let dropped = inner.pending_candidates.len();
        inner.pending_candidates.clear();
        self.set_state(&mut inner, NegotiationState::Closed);
        self.peer.close().await;
        info!(
            target: "sc.negotiation",
            session_id = %self.session_id,
            dropped_candidates = dropped,
            "Negotiation closed"
        );
    }

    /// Drain inbound envelopes in arrival order until cancelled.
    ///
    /// Errors are logged; a failed step leaves the link in its prior state
    /// and the next envelope is still processed.
    pub fn spawn_inbound_pump(
        self: Arc<Self>,
        mut envelopes: mpsc::UnboundedReceiver<SignalingEnvelope>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    next = envelopes.recv() => {
                        let Some(envelope) = next else { break };
                        if let Err(e) = self.handle_envelope(&envelope).await {
                            warn!(
                                target: "sc.negotiation",
                                kind = envelope.kind.as_str(),
                                error = %e,
                                "Inbound negotiation step failed"
                            );
                        }
                    }
                }
            }
            debug!(target: "sc.negotiation", "Negotiation pump stopped");
        })
    }

    async fn offer_cycle(&self, inner: &mut NegotiationInner) -> Result<(), CoordinatorError> {
        let offer = timeout(self.step_timeout, self.peer.create_offer())
            .await
            .map_err(|_| CoordinatorError::Timeout("offer creation".to_string()))??;
        self.peer.set_local_description(&offer).await?;

        let envelope = SignalingEnvelope::with_payload(
            EnvelopeKind::Offer,
            self.session_id.clone(),
            self.local_participant.clone(),
            &offer,
        )?;
        self.sink.send_envelope(envelope).await?;

        self.set_state(inner, NegotiationState::OfferSent);
        debug!(target: "sc.negotiation", sdp_len = offer.sdp.len(), "Offer sent");
        Ok(())
    }

    async fn answer_cycle(
        &self,
        inner: &mut NegotiationInner,
        offer: &SessionDescription,
    ) -> Result<(), CoordinatorError> {
        match inner.state {
            NegotiationState::Idle | NegotiationState::Connected => {}
            NegotiationState::OfferSent => {
                return Err(CoordinatorError::Negotiation(
                    "offer collision: a local offer is outstanding".to_string(),
                ));
            }
            state => return Err(out_of_sequence("accept offer", state)),
        }
        if offer.sdp_type != SdpType::Offer {
            return Err(CoordinatorError::Negotiation(
                "expected an offer description".to_string(),
            ));
        }
        if !self.peer.has_local_media() {
            return Err(PeerError::NoLocalMedia.into());
        }

        // Candidates stay buffered until the answer is out, so a failed
        // cycle leaves both the state and the buffer as they were.
        let prior = inner.state;
        let result = async {
            self.peer.set_remote_description(offer).await?;
            self.set_state(inner, NegotiationState::OfferReceived);

            let answer = timeout(self.step_timeout, self.peer.create_answer())
                .await
                .map_err(|_| CoordinatorError::Timeout("answer creation".to_string()))??;
            self.peer.set_local_description(&answer).await?;

            let envelope = SignalingEnvelope::with_payload(
                EnvelopeKind::Answer,
                self.session_id.clone(),
                self.local_participant.clone(),
                &answer,
            )?;
            self.sink.send_envelope(envelope).await
        }
        .await;

        match result {
            Ok(()) => {
                inner.remote_description_set = true;
                self.flush_candidates(inner).await;
                self.set_state(inner, NegotiationState::AnswerSent);
                debug!(target: "sc.negotiation", sdp_len = offer.sdp.len(), "Answer sent");
                Ok(())
            }
            Err(e) => {
                self.set_state(inner, prior);
                Err(e)
            }
        }
    }

    /// Apply buffered candidates in arrival order.
    async fn flush_candidates(&self, inner: &mut NegotiationInner) {
        let pending = std::mem::take(&mut inner.pending_candidates);
        if pending.is_empty() {
            return;
        }
        debug!(
            target: "sc.negotiation",
            count = pending.len(),
            "Applying buffered candidates"
        );
        for candidate in &pending {
            if let Err(e) = self.peer.add_ice_candidate(candidate).await {
                warn!(target: "sc.negotiation", error = %e, "Buffered candidate rejected by peer");
            }
        }
    }

    fn set_state(&self, inner: &mut NegotiationInner, state: NegotiationState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }
}

fn ensure_open(inner: &NegotiationInner) -> Result<(), CoordinatorError> {
    if inner.state == NegotiationState::Closed {
        return Err(CoordinatorError::Negotiation(
            "negotiation is closed".to_string(),
        ));
    }
    Ok(())
}

fn out_of_sequence(step: &str, state: NegotiationState) -> CoordinatorError {
    CoordinatorError::Negotiation(format!("cannot {step} in state {}", state.as_str()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    envelope: &SignalingEnvelope,
) -> Result<T, CoordinatorError> {
    envelope
        .payload()
        .map_err(|e| CoordinatorError::Negotiation(format!("malformed {} payload: {e}", envelope.kind.as_str())))
}

fn outcome(result: &Result<(), CoordinatorError>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    enum PeerCall {
        CreateOffer,
        CreateAnswer,
        SetLocal(SdpType),
        SetRemote(SdpType),
        AddCandidate(String),
        Close,
    }

    struct FakePeer {
        media: bool,
        fail_remote: bool,
        calls: StdMutex<Vec<PeerCall>>,
    }

    impl FakePeer {
        fn new(media: bool) -> Self {
            Self {
                media,
                fail_remote: false,
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<PeerCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: PeerCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait::async_trait]
    impl PeerConnection for FakePeer {
        fn has_local_media(&self) -> bool {
            self.media
        }

        async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
            self.record(PeerCall::CreateOffer);
            Ok(SessionDescription {
                sdp_type: SdpType::Offer,
                sdp: "v=0 offer".to_string(),
            })
        }

        async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
            self.record(PeerCall::CreateAnswer);
            Ok(SessionDescription {
                sdp_type: SdpType::Answer,
                sdp: "v=0 answer".to_string(),
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
            if self.fail_remote {
                return Err(PeerError::InvalidDescription("bad sdp".to_string()));
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

    #[derive(Default)]
    struct CapturingSink {
        sent: StdMutex<Vec<SignalingEnvelope>>,
        offline: bool,
    }

    #[async_trait::async_trait]
    impl EnvelopeSink for CapturingSink {
        async fn send_envelope(&self, envelope: SignalingEnvelope) -> Result<(), CoordinatorError> {
            if self.offline {
                return Err(CoordinatorError::NotConnected);
            }
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn orchestrator(
        peer: Arc<FakePeer>,
        sink: Arc<CapturingSink>,
    ) -> NegotiationOrchestrator {
        NegotiationOrchestrator::new(
            SessionId::from("s-1"),
            ParticipantId::from("local"),
            peer,
            sink,
            Duration::from_secs(5),
        )
    }

    fn candidate(id: &str) -> IceCandidate {
        IceCandidate {
            candidate: id.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    fn remote_offer() -> SessionDescription {
        SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 remote".to_string(),
        }
    }

    #[tokio::test]
    async fn test_offer_is_created_and_sent_once() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink::default());
        let neg = orchestrator(Arc::clone(&peer), Arc::clone(&sink));

        neg.create_and_send_offer().await.unwrap();

        assert_eq!(neg.state(), NegotiationState::OfferSent);
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EnvelopeKind::Offer);
        assert_eq!(
            peer.calls(),
            vec![PeerCall::CreateOffer, PeerCall::SetLocal(SdpType::Offer)]
        );
    }

    #[tokio::test]
    async fn test_second_offer_is_out_of_sequence() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink::default());
        let neg = orchestrator(peer, Arc::clone(&sink));

        neg.create_and_send_offer().await.unwrap();
        let result = neg.create_and_send_offer().await;

        assert!(matches!(result, Err(CoordinatorError::Negotiation(_))));
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_idle() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink {
            offline: true,
            ..Default::default()
        });
        let neg = orchestrator(peer, sink);

        let result = neg.create_and_send_offer().await;
        assert_eq!(result, Err(CoordinatorError::NotConnected));
        assert_eq!(neg.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_incoming_offer_without_media_fails() {
        let peer = Arc::new(FakePeer::new(false));
        let sink = Arc::new(CapturingSink::default());
        let neg = orchestrator(Arc::clone(&peer), Arc::clone(&sink));

        let result = neg.handle_incoming_offer(remote_offer()).await;

        assert!(matches!(result, Err(CoordinatorError::Negotiation(_))));
        assert_eq!(neg.state(), NegotiationState::Idle);
        assert!(sink.sent.lock().unwrap().is_empty());
        assert!(peer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_incoming_offer_flushes_buffer_then_answers() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink::default());
        let neg = orchestrator(Arc::clone(&peer), Arc::clone(&sink));

        neg.handle_remote_candidate(candidate("c1")).await.unwrap();
        assert_eq!(neg.buffered_candidates().await, 1);

        neg.handle_incoming_offer(remote_offer()).await.unwrap();

        assert_eq!(neg.state(), NegotiationState::AnswerSent);
        assert_eq!(neg.buffered_candidates().await, 0);
        assert_eq!(
            peer.calls(),
            vec![
                PeerCall::SetRemote(SdpType::Offer),
                PeerCall::CreateAnswer,
                PeerCall::SetLocal(SdpType::Answer),
                PeerCall::AddCandidate("c1".to_string()),
            ]
        );
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EnvelopeKind::Answer);
    }

    #[tokio::test]
    async fn test_failed_answer_keeps_candidates_buffered() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink {
            offline: true,
            ..Default::default()
        });
        let neg = orchestrator(Arc::clone(&peer), sink);

        neg.handle_remote_candidate(candidate("c-before")).await.unwrap();
        let result = neg.handle_incoming_offer(remote_offer()).await;
        assert_eq!(result, Err(CoordinatorError::NotConnected));
        assert_eq!(neg.state(), NegotiationState::Idle);

        neg.handle_remote_candidate(candidate("c-after")).await.unwrap();

        assert_eq!(neg.buffered_candidates().await, 2);
        assert!(!peer
            .calls()
            .iter()
            .any(|call| matches!(call, PeerCall::AddCandidate(_))));
    }

    #[tokio::test]
    async fn test_offer_collision_is_rejected() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink::default());
        let neg = orchestrator(peer, sink);

        neg.create_and_send_offer().await.unwrap();
        let result = neg.handle_incoming_offer(remote_offer()).await;

        assert!(matches!(result, Err(CoordinatorError::Negotiation(_))));
        assert_eq!(neg.state(), NegotiationState::OfferSent);
    }

    #[tokio::test]
    async fn test_answer_without_offer_is_rejected() {
        let neg = orchestrator(
            Arc::new(FakePeer::new(true)),
            Arc::new(CapturingSink::default()),
        );

        let result = neg
            .handle_incoming_answer(SessionDescription {
                sdp_type: SdpType::Answer,
                sdp: "v=0".to_string(),
            })
            .await;

        assert!(matches!(result, Err(CoordinatorError::Negotiation(_))));
        assert_eq!(neg.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_remote_description_keeps_state_and_buffer() {
        let peer = Arc::new(FakePeer {
            fail_remote: true,
            ..FakePeer::new(true)
        });
        let neg = orchestrator(peer, Arc::new(CapturingSink::default()));

        neg.create_and_send_offer().await.unwrap();
        neg.handle_remote_candidate(candidate("c1")).await.unwrap();
        let result = neg
            .handle_incoming_answer(SessionDescription {
                sdp_type: SdpType::Answer,
                sdp: "garbage".to_string(),
            })
            .await;

        assert!(matches!(result, Err(CoordinatorError::Negotiation(_))));
        assert_eq!(neg.state(), NegotiationState::OfferSent);
        assert_eq!(neg.buffered_candidates().await, 1);
    }

    #[tokio::test]
    async fn test_renegotiation_requires_connected() {
        let peer = Arc::new(FakePeer::new(true));
        let sink = Arc::new(CapturingSink::default());
        let neg = orchestrator(peer, Arc::clone(&sink));

        assert!(neg.renegotiate().await.is_err());

        neg.handle_incoming_offer(remote_offer()).await.unwrap();
        neg.on_connection_established().await.unwrap();
        assert_eq!(neg.state(), NegotiationState::Connected);

        neg.renegotiate().await.unwrap();
        assert_eq!(neg.state(), NegotiationState::OfferSent);
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_close_fails_later_operations() {
        let peer = Arc::new(FakePeer::new(true));
        let neg = orchestrator(Arc::clone(&peer), Arc::new(CapturingSink::default()));

        neg.handle_remote_candidate(candidate("c1")).await.unwrap();
        neg.close().await;
        neg.close().await;

        assert_eq!(neg.state(), NegotiationState::Closed);
        assert_eq!(neg.buffered_candidates().await, 0);
        assert_eq!(peer.calls(), vec![PeerCall::Close]);
        assert!(neg.create_and_send_offer().await.is_err());
        assert!(neg.handle_remote_candidate(candidate("c2")).await.is_err());
    }

    #[tokio::test]
    async fn test_envelope_routing_ignores_own_and_unrelated() {
        let peer = Arc::new(FakePeer::new(true));
        let neg = orchestrator(Arc::clone(&peer), Arc::new(CapturingSink::default()));

        let own = SignalingEnvelope::with_payload(
            EnvelopeKind::Offer,
            SessionId::from("s-1"),
            ParticipantId::from("local"),
            &remote_offer(),
        )
        .unwrap();
        neg.handle_envelope(&own).await.unwrap();

        let chat = SignalingEnvelope::new(
            EnvelopeKind::Chat,
            SessionId::from("s-1"),
            Some(ParticipantId::from("remote")),
            None,
        );
        neg.handle_envelope(&chat).await.unwrap();

        assert!(peer.calls().is_empty());
        assert_eq!(neg.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_candidate_payload_is_negotiation_error() {
        let neg = orchestrator(
            Arc::new(FakePeer::new(true)),
            Arc::new(CapturingSink::default()),
        );
        let envelope = SignalingEnvelope::new(
            EnvelopeKind::IceCandidate,
            SessionId::from("s-1"),
            Some(ParticipantId::from("remote")),
            Some(serde_json::json!({"nope": true})),
        );

        let result = neg.handle_envelope(&envelope).await;
        assert!(matches!(result, Err(CoordinatorError::Negotiation(_))));
    }
}
