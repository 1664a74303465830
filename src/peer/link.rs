use crate::error::{EngineError, Error, Result};
use crate::media::MediaTrack;
use crate::peer::data_channel::DataChannel;
use crate::peer::engine::{ChannelInit, NegotiationEngine};
use crate::peer::ice::PendingCandidates;
use crate::peer::state::SignalingState;
use crate::peer::types::{ChannelRole, Endpoint, IceCandidate, SessionDescription};
use tracing::{debug, info};

/// One endpoint's wrapper around the platform negotiation engine.
///
/// Local and Remote use the same type; only `endpoint` differs.
pub struct PeerLink {
    endpoint: Endpoint,
    engine: Box<dyn NegotiationEngine>,
    state: SignalingState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    end_of_candidates: bool,
    pending: PendingCandidates,
}

fn negotiation(endpoint: Endpoint, what: &str, e: EngineError) -> Error {
    Error::Negotiation(format!("{endpoint} failed to {what}: {e}"))
}

impl PeerLink {
    pub fn new(endpoint: Endpoint, engine: Box<dyn NegotiationEngine>) -> Self {
        debug!(%endpoint, "created peer link");
        Self {
            endpoint,
            engine,
            state: SignalingState::New,
            local_description: None,
            remote_description: None,
            remote_candidates: Vec::new(),
            end_of_candidates: false,
            pending: PendingCandidates::default(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SignalingState::Closed
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Remote candidates applied to the engine, in application order.
    pub fn remote_candidates(&self) -> &[IceCandidate] {
        &self.remote_candidates
    }

    pub fn end_of_candidates(&self) -> bool {
        self.end_of_candidates
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed(format!("{} peer link", self.endpoint)))
        } else {
            Ok(())
        }
    }

    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.ensure_open()?;
        if !self.state.can_create_offer() {
            return Err(Error::invalid_state("create an offer", self.state));
        }
        let sdp = self
            .engine
            .create_offer()
            .await
            .map_err(|e| negotiation(self.endpoint, "create offer", e))?;
        debug!(endpoint = %self.endpoint, "created offer");
        Ok(SessionDescription::offer(sdp))
    }

    pub async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.ensure_open()?;
        if !self.state.can_create_answer() {
            return Err(Error::invalid_state("create an answer", self.state));
        }
        let sdp = self
            .engine
            .create_answer()
            .await
            .map_err(|e| negotiation(self.endpoint, "create answer", e))?;
        debug!(endpoint = %self.endpoint, "created answer");
        Ok(SessionDescription::answer(sdp))
    }

    pub async fn set_local_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let next = self.state.after_local(desc.kind).ok_or_else(|| {
            Error::Negotiation(format!(
                "{} cannot set local {:?} in state {:?}",
                self.endpoint, desc.kind, self.state
            ))
        })?;
        self.engine
            .set_local_description(&desc)
            .await
            .map_err(|e| negotiation(self.endpoint, "set local description", e))?;
        info!(endpoint = %self.endpoint, kind = ?desc.kind, "set local description");
        self.state = next;
        self.local_description = Some(desc);
        Ok(())
    }

    /// Sets the counterpart's description, then applies any candidates that
    /// arrived ahead of it.
    pub async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let next = self.state.after_remote(desc.kind).ok_or_else(|| {
            Error::Negotiation(format!(
                "{} cannot set remote {:?} in state {:?}",
                self.endpoint, desc.kind, self.state
            ))
        })?;
        self.engine
            .set_remote_description(&desc)
            .await
            .map_err(|e| negotiation(self.endpoint, "set remote description", e))?;
        info!(endpoint = %self.endpoint, kind = ?desc.kind, "set remote description");
        self.state = next;
        self.remote_description = Some(desc);

        for candidate in self.pending.drain() {
            debug!(endpoint = %self.endpoint, "applying pending candidate");
            self.apply_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Adds a counterpart candidate. `None` is the end-of-candidates marker
    /// and is never an error.
    pub async fn add_ice_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        self.ensure_open()?;
        if self.remote_description.is_none() {
            self.pending.push(candidate);
            return Ok(());
        }
        self.apply_candidate(candidate).await
    }

    async fn apply_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        self.engine
            .add_ice_candidate(candidate.as_ref())
            .await
            .map_err(|e| negotiation(self.endpoint, "add ICE candidate", e))?;
        match candidate {
            Some(c) => {
                debug!(endpoint = %self.endpoint, candidate = %c.candidate, "added ICE candidate");
                self.remote_candidates.push(c);
            }
            None => {
                debug!(endpoint = %self.endpoint, "end of remote candidates");
                self.end_of_candidates = true;
            }
        }
        Ok(())
    }

    pub async fn add_track(&mut self, track: &MediaTrack) -> Result<()> {
        self.ensure_open()?;
        self.engine
            .add_track(track)
            .await
            .map_err(|e| negotiation(self.endpoint, "add track", e))?;
        debug!(endpoint = %self.endpoint, track = %track.id, kind = ?track.kind, "added local track");
        Ok(())
    }

    /// Creates the sender channel of this endpoint.
    pub async fn create_data_channel(&mut self, label: &str, init: ChannelInit) -> Result<DataChannel> {
        self.ensure_open()?;
        let transport = self
            .engine
            .create_data_channel(label, init)
            .await
            .map_err(|e| Error::DataChannel(format!("{} failed to create {label}: {e}", self.endpoint)))?;
        debug!(endpoint = %self.endpoint, %label, ordered = init.ordered, "created data channel");
        Ok(DataChannel::new(self.endpoint, ChannelRole::Sender, transport))
    }

    /// Releases the engine. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.state = SignalingState::Closed;
        self.pending.clear();
        self.engine
            .close()
            .await
            .map_err(|e| negotiation(self.endpoint, "close", e))?;
        info!(endpoint = %self.endpoint, "peer link closed");
        Ok(())
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("remote_candidates", &self.remote_candidates.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candidate, ScriptedFactory};

    async fn pair() -> (ScriptedFactory, PeerLink, PeerLink) {
        let factory = ScriptedFactory::default();
        let local = factory.link(Endpoint::Local).await;
        let remote = factory.link(Endpoint::Remote).await;
        (factory, local, remote)
    }

    #[tokio::test]
    async fn answer_before_remote_offer_is_invalid_state() {
        let (_, _, mut remote) = pair().await;
        let err = remote.create_answer().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }), "{err}");
    }

    #[tokio::test]
    async fn offer_only_before_any_description() {
        let (_, mut local, _) = pair().await;
        let offer = local.create_offer().await.unwrap();
        local.set_local_description(offer).await.unwrap();
        assert_eq!(local.state(), SignalingState::HaveLocalOffer);
        assert!(matches!(
            local.create_offer().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn remote_answer_without_local_offer_is_rejected() {
        let (_, mut local, _) = pair().await;
        let err = local
            .set_remote_description(SessionDescription::answer("v=0 stray"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        assert_eq!(local.state(), SignalingState::New);
    }

    #[tokio::test]
    async fn descriptions_are_set_once() {
        let (_, mut local, _) = pair().await;
        let offer = local.create_offer().await.unwrap();
        local.set_local_description(offer.clone()).await.unwrap();
        assert!(matches!(
            local.set_local_description(offer).await,
            Err(Error::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_negotiation_error() {
        let (_, _, mut remote) = pair().await;
        let err = remote
            .set_remote_description(SessionDescription::offer("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        assert_eq!(remote.state(), SignalingState::New);
        assert!(remote.remote_description().is_none());
    }

    #[tokio::test]
    async fn early_candidates_are_applied_after_remote_description() {
        let (factory, mut local, mut remote) = pair().await;
        remote.add_ice_candidate(Some(candidate(Endpoint::Local, "a"))).await.unwrap();
        remote.add_ice_candidate(Some(candidate(Endpoint::Local, "b"))).await.unwrap();
        remote.add_ice_candidate(None).await.unwrap();
        assert_eq!(remote.pending_candidates(), 3);
        assert!(factory.probe(Endpoint::Remote).added_candidates().is_empty());

        let offer = local.create_offer().await.unwrap();
        remote.set_remote_description(offer).await.unwrap();

        assert_eq!(remote.pending_candidates(), 0);
        assert_eq!(remote.remote_candidates().len(), 2);
        assert!(remote.end_of_candidates());
        assert_eq!(
            factory.probe(Endpoint::Remote).added_candidates(),
            vec![Some("a".to_string()), Some("b".to_string()), None]
        );
    }

    #[tokio::test]
    async fn closed_link_rejects_everything_and_closes_once() {
        let (factory, mut local, _) = pair().await;
        local.close().await.unwrap();
        local.close().await.unwrap();
        assert_eq!(factory.probe(Endpoint::Local).close_calls(), 1);

        assert!(matches!(local.create_offer().await, Err(Error::Closed(_))));
        assert!(matches!(local.add_ice_candidate(None).await, Err(Error::Closed(_))));
        assert!(matches!(
            local.set_remote_description(SessionDescription::offer("v=0")).await,
            Err(Error::Closed(_))
        ));
        assert!(matches!(
            local.create_data_channel("x", ChannelInit::default()).await,
            Err(Error::Closed(_))
        ));
    }
}
