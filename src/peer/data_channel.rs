use crate::error::{EngineError, Error, Result};
use crate::peer::engine::{EventSink, PeerEvent};
use crate::peer::types::{ChannelRole, ChannelState, Endpoint};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// Platform side of a data channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn label(&self) -> String;
    fn ready_state(&self) -> ChannelState;
    async fn send_text(&self, text: String) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}

/// A data channel owned by one endpoint.
#[derive(Clone)]
pub struct DataChannel {
    endpoint: Endpoint,
    role: ChannelRole,
    transport: Arc<dyn ChannelTransport>,
}

impl DataChannel {
    pub fn new(endpoint: Endpoint, role: ChannelRole, transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            endpoint,
            role,
            transport,
        }
    }

    pub fn label(&self) -> String {
        self.transport.label()
    }

    pub fn state(&self) -> ChannelState {
        self.transport.ready_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Sends the counter as decimal text.
    pub async fn send_counter(&self, value: u64) -> Result<()> {
        self.transport
            .send_text(value.to_string())
            .await
            .map_err(|e| {
                Error::DataChannel(format!("{} {} send failed: {e}", self.endpoint, self.label()))
            })
    }

    /// Closes the channel; an already closed channel is left alone.
    pub async fn close(&self) {
        if self.state() == ChannelState::Closed {
            debug!(endpoint = %self.endpoint, role = ?self.role, label = %self.label(), "channel already closed");
            return;
        }
        if let Err(e) = self.transport.close().await {
            warn!(endpoint = %self.endpoint, role = ?self.role, label = %self.label(), "failed to close channel: {e}");
        }
    }
}

/// `webrtc` data channel reporting open/close/message into the session inbox.
pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcChannel {
    /// Hooks the channel callbacks up to `events` and wraps the channel.
    pub fn attach(dc: Arc<RTCDataChannel>, role: ChannelRole, events: EventSink) -> Arc<Self> {
        let label = dc.label().to_string();
        debug!(endpoint = %events.endpoint(), %label, ?role, "attaching data channel");

        dc.on_open(Box::new({
            let events = events.clone();
            let label = label.clone();
            move || {
                debug!(%label, "data channel opened");
                events.emit(PeerEvent::ChannelStateChanged {
                    role,
                    state: ChannelState::Open,
                });
                Box::pin(async {})
            }
        }));

        dc.on_close(Box::new({
            let events = events.clone();
            let label = label.clone();
            move || {
                debug!(%label, "data channel closed");
                events.emit(PeerEvent::ChannelStateChanged {
                    role,
                    state: ChannelState::Closed,
                });
                Box::pin(async {})
            }
        }));

        dc.on_error(Box::new({
            let label = label.clone();
            move |err: webrtc::Error| {
                warn!(%label, "data channel error: {err}");
                Box::pin(async {})
            }
        }));

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            events.emit(PeerEvent::MessageReceived {
                role,
                data: msg.data,
            });
            Box::pin(async {})
        }));

        Arc::new(Self { dc })
    }
}

#[async_trait]
impl ChannelTransport for RtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn ready_state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing | RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.dc.close().await?;
        Ok(())
    }
}

/// Parses a counter value received on a channel.
pub fn parse_counter(data: &Bytes) -> Option<u64> {
    std::str::from_utf8(data).ok()?.trim().parse().ok()
}
