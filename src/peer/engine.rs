//! Platform negotiation capability.
//!
//! A [`NegotiationEngine`] is the per-endpoint object that actually produces
//! and consumes session descriptions. Anything the engine discovers on its own
//! (candidates, remote tracks, offered channels, state changes) is pushed as a
//! [`PeerEvent`] through the [`EventSink`] it was created with; the session
//! controller consumes those from a single inbox.

use crate::error::EngineError;
use crate::media::MediaTrack;
use crate::peer::data_channel::{ChannelTransport, DataChannel};
use crate::peer::types::{
    ChannelRole, ChannelState, ConnectionState, Endpoint, IceCandidate, RemoteTrack,
    SessionDescription,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInit {
    pub ordered: bool,
}

impl Default for ChannelInit {
    fn default() -> Self {
        Self { ordered: true }
    }
}

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<String, EngineError>;
    async fn create_answer(&self) -> Result<String, EngineError>;
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;
    /// `None` marks end of candidates.
    async fn add_ice_candidate(&self, candidate: Option<&IceCandidate>) -> Result<(), EngineError>;
    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError>;
    async fn create_data_channel(
        &self,
        label: &str,
        init: ChannelInit,
    ) -> Result<Arc<dyn ChannelTransport>, EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}

/// Builds one engine per endpoint.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, events: EventSink) -> Result<Box<dyn NegotiationEngine>, EngineError>;
}

/// Something an engine observed without being asked.
pub enum PeerEvent {
    /// `None` signals that gathering completed
    CandidateDiscovered(Option<IceCandidate>),
    TrackAdded(RemoteTrack),
    ChannelOffered(DataChannel),
    ChannelStateChanged {
        role: ChannelRole,
        state: ChannelState,
    },
    MessageReceived {
        role: ChannelRole,
        data: Bytes,
    },
    ConnectionStateChanged(ConnectionState),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::CandidateDiscovered(c) => f.debug_tuple("CandidateDiscovered").field(c).finish(),
            PeerEvent::TrackAdded(t) => f.debug_tuple("TrackAdded").field(t).finish(),
            PeerEvent::ChannelOffered(dc) => f.debug_tuple("ChannelOffered").field(&dc.label()).finish(),
            PeerEvent::ChannelStateChanged { role, state } => f
                .debug_struct("ChannelStateChanged")
                .field("role", role)
                .field("state", state)
                .finish(),
            PeerEvent::MessageReceived { role, data } => f
                .debug_struct("MessageReceived")
                .field("role", role)
                .field("len", &data.len())
                .finish(),
            PeerEvent::ConnectionStateChanged(s) => f.debug_tuple("ConnectionStateChanged").field(s).finish(),
        }
    }
}

/// Everything the session inbox carries.
#[derive(Debug)]
pub(crate) enum Inbound {
    Peer {
        generation: u64,
        endpoint: Endpoint,
        event: PeerEvent,
    },
    SendTick {
        generation: u64,
    },
}

/// Handle an engine uses to report events for one endpoint.
#[derive(Clone)]
pub struct EventSink {
    endpoint: Endpoint,
    generation: u64,
    tx: UnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(endpoint: Endpoint, generation: u64, tx: UnboundedSender<Inbound>) -> Self {
        Self {
            endpoint,
            generation,
            tx,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Queues `event` for the session. Events sent after the session is gone
    /// are dropped.
    pub fn emit(&self, event: PeerEvent) {
        trace!(endpoint = %self.endpoint, ?event, "peer event");
        let _ = self.tx.send(Inbound::Peer {
            generation: self.generation,
            endpoint: self.endpoint,
            event,
        });
    }
}
