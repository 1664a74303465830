//! Session Controller.
//!
//! Owns both endpoints, the media adapter, the relay and the event inbox.
//! Every operation takes `&mut self`; engines only push into the inbox, so
//! nothing mutates the session behind the caller's back. Engines and the send
//! timer are tagged with the peer generation they were created for, and
//! anything tagged with an older generation is dropped on arrival.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::{Notice, Notifier};
use crate::media::{DeviceCatalog, MediaDevices, MediaSelection, MediaSourceAdapter, MediaStream};
use crate::peer::data_channel::{parse_counter, DataChannel};
use crate::peer::engine::{ChannelInit, EngineFactory, EventSink, Inbound, PeerEvent};
use crate::peer::ice::{analyze_candidates, dump_candidate};
use crate::peer::link::PeerLink;
use crate::peer::types::{
    ChannelRole, ChannelState, ConnectionState, Endpoint, IceCandidate, RemoteTrack,
    SessionDescription,
};
use crate::signaling::{SignalPayload, SignalingRelay};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Ready,
    Negotiating,
    Negotiated,
    Connected,
    NegotiationFailed,
}

/// Everything one endpoint owns while the session is up.
struct PeerEndpoint {
    link: PeerLink,
    sender: Option<DataChannel>,
    receiver: Option<DataChannel>,
    remote_tracks: Vec<RemoteTrack>,
    discovered: Vec<IceCandidate>,
    connection: ConnectionState,
}

impl PeerEndpoint {
    fn new(link: PeerLink) -> Self {
        Self {
            link,
            sender: None,
            receiver: None,
            remote_tracks: Vec::new(),
            discovered: Vec::new(),
            connection: ConnectionState::New,
        }
    }

    async fn close(&mut self) {
        for channel in [self.sender.take(), self.receiver.take()].into_iter().flatten() {
            channel.close().await;
        }
        if let Err(e) = self.link.close().await {
            warn!(endpoint = %self.link.endpoint(), "error closing peer link: {e}");
        }
    }
}

struct Peers {
    local: PeerEndpoint,
    remote: PeerEndpoint,
}

impl Peers {
    fn get(&self, endpoint: Endpoint) -> &PeerEndpoint {
        match endpoint {
            Endpoint::Local => &self.local,
            Endpoint::Remote => &self.remote,
        }
    }

    fn get_mut(&mut self, endpoint: Endpoint) -> &mut PeerEndpoint {
        match endpoint {
            Endpoint::Local => &mut self.local,
            Endpoint::Remote => &mut self.remote,
        }
    }

    /// `(from, counterpart)`
    fn split(&mut self, from: Endpoint) -> (&mut PeerEndpoint, &mut PeerEndpoint) {
        match from {
            Endpoint::Local => (&mut self.local, &mut self.remote),
            Endpoint::Remote => (&mut self.remote, &mut self.local),
        }
    }
}

/// A two-endpoint loopback call.
pub struct Session<D, F> {
    config: SessionConfig,
    factory: F,
    media: MediaSourceAdapter<D>,
    relay: SignalingRelay,
    notifier: Notifier,
    phase: SessionPhase,
    peers: Option<Peers>,
    generation: u64,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    send_task: Option<JoinHandle<()>>,
    counter: u64,
    received: Vec<u64>,
}

impl<D: MediaDevices, F: EngineFactory> Session<D, F> {
    pub fn new(config: SessionConfig, devices: D, factory: F) -> Self {
        let media = MediaSourceAdapter::new(devices, config.stream_constraints());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            config,
            factory,
            media,
            relay: SignalingRelay::new(),
            notifier: Notifier::default(),
            phase: SessionPhase::Idle,
            peers: None,
            generation: 0,
            inbox_tx,
            inbox_rx,
            send_task: None,
            counter: 0,
            received: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn devices(&self) -> &D {
        self.media.devices()
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.media.current()
    }

    pub fn selection(&self) -> Option<&MediaSelection> {
        self.media.selection()
    }

    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    pub fn link(&self, endpoint: Endpoint) -> Option<&PeerLink> {
        self.peers.as_ref().map(|p| &p.get(endpoint).link)
    }

    pub fn channel(&self, endpoint: Endpoint, role: ChannelRole) -> Option<&DataChannel> {
        let peer = self.peers.as_ref()?.get(endpoint);
        match role {
            ChannelRole::Sender => peer.sender.as_ref(),
            ChannelRole::Receiver => peer.receiver.as_ref(),
        }
    }

    pub fn remote_tracks(&self, endpoint: Endpoint) -> &[RemoteTrack] {
        self.peers
            .as_ref()
            .map(|p| p.get(endpoint).remote_tracks.as_slice())
            .unwrap_or_default()
    }

    /// Candidates `endpoint` discovered, in discovery order.
    pub fn discovered_candidates(&self, endpoint: Endpoint) -> &[IceCandidate] {
        self.peers
            .as_ref()
            .map(|p| p.get(endpoint).discovered.as_slice())
            .unwrap_or_default()
    }

    pub fn connection_state(&self, endpoint: Endpoint) -> Option<ConnectionState> {
        self.peers.as_ref().map(|p| p.get(endpoint).connection)
    }

    /// Next counter value to send.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Counter values received on the Remote receiver channel, in order.
    pub fn received(&self) -> &[u64] {
        &self.received
    }

    pub fn is_sending(&self) -> bool {
        self.send_task.is_some()
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.notifier.emit_phase(phase);
        }
    }

    /// Logs and surfaces `err` as a notice, then hands it back.
    fn report(&self, err: Error) -> Error {
        self.notifier.emit_error(err.to_string());
        err
    }

    fn require(&self, operation: &'static str, allowed: &[SessionPhase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(self.report(Error::invalid_state(operation, self.phase)))
        }
    }

    pub async fn enumerate_devices(&mut self) -> Result<DeviceCatalog> {
        match self.media.enumerate().await {
            Ok(catalog) => Ok(catalog),
            Err(e) => Err(self.report(e.into())),
        }
    }

    /// Captures `selection` and builds fresh peer links around it.
    ///
    /// Any previous links are closed first and the previous stream is stopped
    /// before the new one is requested.
    pub async fn start(&mut self, selection: MediaSelection) -> Result<()> {
        self.require("start", &[SessionPhase::Idle, SessionPhase::Ready])?;
        self.teardown_peers().await;
        self.relay.reset();
        self.counter = 0;
        self.received.clear();

        let stream = match self.media.capture(selection).await {
            Ok(stream) => stream,
            Err(e) => {
                self.media.release();
                self.set_phase(SessionPhase::Idle);
                return Err(self.report(e.into()));
            }
        };

        match self.build_peers(&stream).await {
            Ok(peers) => {
                self.peers = Some(peers);
                info!(generation = self.generation, tracks = stream.tracks().len(), "session ready");
                self.set_phase(SessionPhase::Ready);
                Ok(())
            }
            Err(e) => {
                self.media.release();
                self.set_phase(SessionPhase::Idle);
                Err(self.report(e))
            }
        }
    }

    async fn build_peers(&mut self, stream: &MediaStream) -> Result<Peers> {
        self.generation += 1;
        let mut local = self.create_link(Endpoint::Local).await?;
        let mut remote = match self.create_link(Endpoint::Remote).await {
            Ok(link) => link,
            Err(e) => {
                let _ = local.close().await;
                return Err(e);
            }
        };

        let prepared = async {
            let init = ChannelInit {
                ordered: self.config.ordered,
            };
            let sender = local
                .create_data_channel(&self.config.data_channel_label, init)
                .await?;
            for track in stream.tracks() {
                local.add_track(track).await?;
            }
            Ok::<_, Error>(sender)
        }
        .await;

        match prepared {
            Ok(sender) => {
                let mut local = PeerEndpoint::new(local);
                local.sender = Some(sender);
                Ok(Peers {
                    local,
                    remote: PeerEndpoint::new(remote),
                })
            }
            Err(e) => {
                let _ = local.close().await;
                let _ = remote.close().await;
                Err(e)
            }
        }
    }

    async fn create_link(&self, endpoint: Endpoint) -> Result<PeerLink> {
        let sink = EventSink::new(endpoint, self.generation, self.inbox_tx.clone());
        let engine = self
            .factory
            .create(sink)
            .await
            .map_err(|e| Error::Negotiation(format!("cannot create {endpoint} engine: {e}")))?;
        Ok(PeerLink::new(endpoint, engine))
    }

    /// Runs the full offer/answer exchange.
    ///
    /// On failure the session stays in `NegotiationFailed` until `hangup`.
    pub async fn negotiate(&mut self) -> Result<()> {
        self.require("negotiate", &[SessionPhase::Ready])?;
        self.set_phase(SessionPhase::Negotiating);

        let Self {
            peers,
            relay,
            notifier,
            ..
        } = self;
        let result = match peers.as_mut() {
            Some(peers) => exchange(peers, relay, notifier).await,
            None => Err(no_peer_links("negotiate")),
        };
        self.finish_round(result, SessionPhase::Negotiated)
    }

    /// Creates the offer without applying it, so it can be edited first.
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.require("create an offer", &[SessionPhase::Ready])?;
        self.set_phase(SessionPhase::Negotiating);
        let result = match self.peers.as_mut() {
            Some(peers) => peers.local.link.create_offer().await,
            None => Err(no_peer_links("create an offer")),
        };
        let offer = self.finish_round(result, SessionPhase::Negotiating)?;
        self.notifier.emit_description(Endpoint::Local, &offer);
        Ok(offer)
    }

    /// Sets `offer` on Local and relays it to Remote.
    pub async fn apply_offer(&mut self, offer: SessionDescription) -> Result<()> {
        self.require("apply an offer", &[SessionPhase::Negotiating])?;
        let result = self.apply_local(Endpoint::Local, offer).await;
        self.finish_round(result, SessionPhase::Negotiating)
    }

    pub async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.require("create an answer", &[SessionPhase::Negotiating])?;
        let result = match self.peers.as_mut() {
            Some(peers) => peers.remote.link.create_answer().await,
            None => Err(no_peer_links("create an answer")),
        };
        let answer = self.finish_round(result, SessionPhase::Negotiating)?;
        self.notifier.emit_description(Endpoint::Remote, &answer);
        Ok(answer)
    }

    /// Sets `answer` on Remote and relays it to Local, completing the round.
    pub async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()> {
        self.require("apply an answer", &[SessionPhase::Negotiating])?;
        let result = self.apply_local(Endpoint::Remote, answer).await;
        self.finish_round(result, SessionPhase::Negotiated)
    }

    async fn apply_local(&mut self, endpoint: Endpoint, desc: SessionDescription) -> Result<()> {
        let Self { peers, relay, .. } = self;
        let peers = peers
            .as_mut()
            .ok_or_else(|| no_peer_links("apply a description"))?;
        let (from, to) = peers.split(endpoint);
        from.link.set_local_description(desc.clone()).await?;
        relay
            .forward(endpoint, SignalPayload::Description(desc), &mut to.link)
            .await
    }

    /// Moves to `next` on success. A failed precondition leaves the phase
    /// alone; any other failure ends the round in `NegotiationFailed`.
    fn finish_round<T>(&mut self, result: Result<T>, next: SessionPhase) -> Result<T> {
        match result {
            Ok(value) => {
                self.set_phase(next);
                Ok(value)
            }
            Err(e @ Error::InvalidState { .. }) => Err(self.report(e)),
            Err(e) => {
                self.set_phase(SessionPhase::NegotiationFailed);
                Err(self.report(e))
            }
        }
    }

    /// Handles every event already in the inbox. Returns how many were handled.
    pub async fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            self.dispatch(inbound).await;
            handled += 1;
        }
        handled
    }

    /// Handles events as they arrive until `done` holds or `timeout` passes.
    /// Returns the final value of `done`.
    pub async fn run_until<P>(&mut self, timeout: Duration, mut done: P) -> bool
    where
        P: FnMut(&Self) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.process_events().await;
            if done(self) {
                return true;
            }
            match tokio::time::timeout_at(deadline, self.inbox_rx.recv()).await {
                Ok(Some(inbound)) => self.dispatch(inbound).await,
                Ok(None) | Err(_) => return done(self),
            }
        }
    }

    async fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::SendTick { generation } if generation == self.generation => self.on_tick().await,
            Inbound::Peer {
                generation,
                endpoint,
                event,
            } if generation == self.generation => self.on_peer_event(endpoint, event).await,
            stale => trace!(?stale, current = self.generation, "dropping stale event"),
        }
    }

    async fn on_peer_event(&mut self, endpoint: Endpoint, event: PeerEvent) {
        let Some(peers) = self.peers.as_mut() else {
            return;
        };
        match event {
            PeerEvent::CandidateDiscovered(candidate) => {
                dump_candidate(endpoint, candidate.as_ref());
                let (from, to) = peers.split(endpoint);
                match &candidate {
                    Some(c) => from.discovered.push(c.clone()),
                    None => {
                        analyze_candidates(&from.discovered);
                    }
                }
                if let Err(e) = self
                    .relay
                    .forward(endpoint, SignalPayload::Candidate(candidate), &mut to.link)
                    .await
                {
                    self.notifier
                        .emit_error(format!("failed to relay candidate from {endpoint}: {e}"));
                }
            }
            PeerEvent::TrackAdded(track) => {
                self.notifier.emit_remote_track(&track);
                peers.get_mut(endpoint).remote_tracks.push(track);
            }
            PeerEvent::ChannelOffered(channel) => {
                info!(%endpoint, label = %channel.label(), "receive channel offered");
                peers.get_mut(endpoint).receiver = Some(channel);
            }
            PeerEvent::ChannelStateChanged {
                role: ChannelRole::Sender,
                state,
            } => {
                info!(%endpoint, ?state, "send channel state changed");
                if state == ChannelState::Open {
                    self.start_sending();
                } else {
                    self.stop_sending();
                }
            }
            PeerEvent::ChannelStateChanged {
                role: ChannelRole::Receiver,
                state,
            } => {
                info!(%endpoint, ?state, "receive channel state changed");
            }
            PeerEvent::MessageReceived {
                role: ChannelRole::Receiver,
                data,
            } => match parse_counter(&data) {
                Some(value) => {
                    self.received.push(value);
                    self.notifier.emit_received(value);
                }
                None => warn!(%endpoint, len = data.len(), "ignoring non-counter message"),
            },
            PeerEvent::MessageReceived {
                role: ChannelRole::Sender,
                ..
            } => debug!(%endpoint, "ignoring message on send channel"),
            PeerEvent::ConnectionStateChanged(state) => {
                peers.get_mut(endpoint).connection = state;
                match state {
                    ConnectionState::Connected if self.phase == SessionPhase::Negotiated => {
                        self.set_phase(SessionPhase::Connected);
                    }
                    ConnectionState::Failed => {
                        self.notifier
                            .emit_error(format!("{endpoint} peer connection failed"));
                    }
                    _ => {}
                }
            }
        }
    }

    fn start_sending(&mut self) {
        if self.send_task.is_some() {
            return;
        }
        let tx = self.inbox_tx.clone();
        let generation = self.generation;
        let period = self.config.send_interval();
        debug!(?period, "starting send timer");
        self.send_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx.send(Inbound::SendTick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_sending(&mut self) {
        if let Some(task) = self.send_task.take() {
            debug!("stopping send timer");
            task.abort();
        }
    }

    async fn on_tick(&mut self) {
        match self.send_data(self.counter).await {
            Ok(true) => self.counter += 1,
            Ok(false) => trace!("send channel not open, skipping tick"),
            Err(_) => {}
        }
    }

    /// Sends `value` on the Local sender channel.
    ///
    /// Returns `Ok(false)` without sending when the channel is not open.
    pub async fn send_data(&mut self, value: u64) -> Result<bool> {
        let Some(sender) = self.channel(Endpoint::Local, ChannelRole::Sender) else {
            return Ok(false);
        };
        if !sender.is_open() {
            return Ok(false);
        }
        match sender.send_counter(value).await {
            Ok(()) => {
                self.notifier.emit_sent(value);
                Ok(true)
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// Tears everything down and returns to `Idle`. Safe to call at any time,
    /// any number of times.
    pub async fn hangup(&mut self) {
        if self.phase != SessionPhase::Idle || self.peers.is_some() {
            info!("hanging up");
        }
        self.teardown_peers().await;
        self.media.release();
        self.relay.reset();
        self.counter = 0;
        self.received.clear();
        self.set_phase(SessionPhase::Idle);
    }

    async fn teardown_peers(&mut self) {
        self.stop_sending();
        if let Some(mut peers) = self.peers.take() {
            peers.local.close().await;
            peers.remote.close().await;
        }
        self.generation += 1;
        let mut dropped = 0;
        while self.inbox_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded queued events");
        }
    }
}

fn no_peer_links(operation: &'static str) -> Error {
    Error::InvalidState {
        operation,
        state: "no peer links exist".to_string(),
    }
}

/// offer, set local, relay, answer, set local, relay
async fn exchange(peers: &mut Peers, relay: &mut SignalingRelay, notifier: &Notifier) -> Result<()> {
    let offer = peers.local.link.create_offer().await?;
    notifier.emit_description(Endpoint::Local, &offer);
    peers.local.link.set_local_description(offer.clone()).await?;
    relay
        .forward(Endpoint::Local, SignalPayload::Description(offer), &mut peers.remote.link)
        .await?;

    let answer = peers.remote.link.create_answer().await?;
    notifier.emit_description(Endpoint::Remote, &answer);
    peers.remote.link.set_local_description(answer.clone()).await?;
    relay
        .forward(Endpoint::Remote, SignalPayload::Description(answer), &mut peers.local.link)
        .await
}

impl<D, F> Drop for Session<D, F> {
    fn drop(&mut self) {
        if let Some(task) = self.send_task.take() {
            task.abort();
        }
    }
}
