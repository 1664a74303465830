pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod link;
pub mod state;
pub mod types;

pub use connection::RtcEngineFactory;
pub use data_channel::{ChannelTransport, DataChannel};
pub use engine::{ChannelInit, EngineFactory, EventSink, NegotiationEngine, PeerEvent};
pub use link::PeerLink;
pub use state::SignalingState;
pub use types::{
    ChannelRole, ChannelState, ConnectionState, Endpoint, IceCandidate, RemoteTrack, SdpType,
    ServerConfig, SessionDescription, TrackKind,
};
