//! Scripted platform doubles for unit tests.

use crate::error::{CaptureError, EngineError};
use crate::media::{DeviceDescriptor, MediaDevices, MediaStream, StreamConstraints, SyntheticDevices};
use crate::peer::data_channel::{ChannelTransport, DataChannel};
use crate::peer::engine::{ChannelInit, EngineFactory, EventSink, NegotiationEngine, PeerEvent};
use crate::peer::link::PeerLink;
use crate::peer::types::{ChannelRole, ChannelState, Endpoint, IceCandidate, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) fn candidate(endpoint: Endpoint, text: &str) -> IceCandidate {
    IceCandidate {
        candidate: text.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        endpoint,
    }
}

#[derive(Debug, Default)]
struct Script {
    local_candidates: Vec<String>,
    remote_candidates: Vec<String>,
    reject_remote_description: Option<Endpoint>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<Script>,
    probes: Mutex<Vec<(Endpoint, Arc<Probe>)>>,
}

impl Inner {
    fn latest(&self, endpoint: Endpoint) -> Option<Arc<Probe>> {
        let probes = self.probes.lock().unwrap();
        probes
            .iter()
            .rev()
            .find(|(e, _)| *e == endpoint)
            .map(|(_, p)| p.clone())
    }
}

/// Engine factory whose engines follow a script and record what they are asked.
#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    inner: Arc<Inner>,
}

impl ScriptedFactory {
    /// Candidates each engine reports after its local description is set.
    pub fn with_candidates(self, endpoint: Endpoint, candidates: &[&str]) -> Self {
        {
            let mut script = self.inner.script.lock().unwrap();
            let list = match endpoint {
                Endpoint::Local => &mut script.local_candidates,
                Endpoint::Remote => &mut script.remote_candidates,
            };
            *list = candidates.iter().map(|c| c.to_string()).collect();
        }
        self
    }

    /// Makes the engine of `endpoint` reject every remote description.
    pub fn reject_remote_description(&self, endpoint: Option<Endpoint>) {
        self.inner.script.lock().unwrap().reject_remote_description = endpoint;
    }

    /// A standalone link whose events go nowhere.
    pub async fn link(&self, endpoint: Endpoint) -> PeerLink {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = self.create(EventSink::new(endpoint, 0, tx)).await.unwrap();
        PeerLink::new(endpoint, engine)
    }

    /// Probe of the most recently created engine for `endpoint`.
    pub fn probe(&self, endpoint: Endpoint) -> Arc<Probe> {
        self.inner.latest(endpoint).expect("no engine created for endpoint")
    }

    /// Probes of every engine created for `endpoint`, oldest first.
    pub fn probes(&self, endpoint: Endpoint) -> Vec<Arc<Probe>> {
        let probes = self.inner.probes.lock().unwrap();
        probes
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Opens the Local sender and surfaces the matching receiver on Remote.
    pub fn open_channels(&self) {
        let local = self.probe(Endpoint::Local);
        let sender = local.sender().expect("local engine has no data channel");
        sender.set_state(ChannelState::Open);
        local.emit(PeerEvent::ChannelStateChanged {
            role: ChannelRole::Sender,
            state: ChannelState::Open,
        });

        let remote = self.probe(Endpoint::Remote);
        let receiver = Arc::new(ScriptedChannel::new(
            sender.label.clone(),
            Endpoint::Remote,
            self.inner.clone(),
        ));
        receiver.set_state(ChannelState::Open);
        remote.emit(PeerEvent::ChannelOffered(DataChannel::new(
            Endpoint::Remote,
            ChannelRole::Receiver,
            receiver,
        )));
        remote.emit(PeerEvent::ChannelStateChanged {
            role: ChannelRole::Receiver,
            state: ChannelState::Open,
        });
    }

    pub fn close_sender(&self) {
        let local = self.probe(Endpoint::Local);
        if let Some(sender) = local.sender() {
            sender.set_state(ChannelState::Closed);
        }
        local.emit(PeerEvent::ChannelStateChanged {
            role: ChannelRole::Sender,
            state: ChannelState::Closed,
        });
    }

    pub fn emit(&self, endpoint: Endpoint, event: PeerEvent) {
        self.probe(endpoint).emit(event);
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn create(&self, events: EventSink) -> Result<Box<dyn NegotiationEngine>, EngineError> {
        let endpoint = events.endpoint();
        let probe = Arc::new(Probe {
            sink: events,
            added: Mutex::default(),
            tracks: Mutex::default(),
            closes: AtomicUsize::new(0),
            sender: Mutex::default(),
        });
        self.inner
            .probes
            .lock()
            .unwrap()
            .push((endpoint, probe.clone()));
        Ok(Box::new(ScriptedEngine {
            endpoint,
            probe,
            inner: self.inner.clone(),
        }))
    }
}

/// What one scripted engine was asked to do.
pub(crate) struct Probe {
    sink: EventSink,
    added: Mutex<Vec<Option<String>>>,
    tracks: Mutex<Vec<String>>,
    closes: AtomicUsize,
    sender: Mutex<Option<Arc<ScriptedChannel>>>,
}

impl Probe {
    pub fn added_candidates(&self) -> Vec<Option<String>> {
        self.added.lock().unwrap().clone()
    }

    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sender(&self) -> Option<Arc<ScriptedChannel>> {
        self.sender.lock().unwrap().clone()
    }

    /// Emits through this engine's own sink, whatever its generation.
    pub fn emit(&self, event: PeerEvent) {
        self.sink.emit(event);
    }
}

struct ScriptedEngine {
    endpoint: Endpoint,
    probe: Arc<Probe>,
    inner: Arc<Inner>,
}

fn check_sdp(desc: &SessionDescription) -> Result<(), EngineError> {
    if desc.sdp.starts_with("v=0") {
        Ok(())
    } else {
        Err(EngineError(format!("cannot parse sdp: {:?}", desc.sdp)))
    }
}

#[async_trait]
impl NegotiationEngine for ScriptedEngine {
    async fn create_offer(&self) -> Result<String, EngineError> {
        Ok(format!("v=0 offer from {}", self.endpoint))
    }

    async fn create_answer(&self) -> Result<String, EngineError> {
        Ok(format!("v=0 answer from {}", self.endpoint))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        check_sdp(desc)?;
        let candidates = {
            let script = self.inner.script.lock().unwrap();
            match self.endpoint {
                Endpoint::Local => script.local_candidates.clone(),
                Endpoint::Remote => script.remote_candidates.clone(),
            }
        };
        for text in candidates {
            self.probe
                .emit(PeerEvent::CandidateDiscovered(Some(candidate(self.endpoint, &text))));
        }
        self.probe.emit(PeerEvent::CandidateDiscovered(None));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        check_sdp(desc)?;
        if self.inner.script.lock().unwrap().reject_remote_description == Some(self.endpoint) {
            return Err(EngineError("remote description rejected".into()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Option<&IceCandidate>) -> Result<(), EngineError> {
        self.probe
            .added
            .lock()
            .unwrap()
            .push(candidate.map(|c| c.candidate.clone()));
        Ok(())
    }

    async fn add_track(&self, track: &crate::media::MediaTrack) -> Result<(), EngineError> {
        self.probe.tracks.lock().unwrap().push(track.id.clone());
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _init: ChannelInit,
    ) -> Result<Arc<dyn ChannelTransport>, EngineError> {
        let channel = Arc::new(ScriptedChannel::new(
            label.to_string(),
            self.endpoint,
            self.inner.clone(),
        ));
        *self.probe.sender.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory channel; text sent on it arrives at the counterpart's receiver.
pub(crate) struct ScriptedChannel {
    label: String,
    endpoint: Endpoint,
    state: Mutex<ChannelState>,
    sent: Mutex<Vec<String>>,
    inner: Arc<Inner>,
}

impl ScriptedChannel {
    fn new(label: String, endpoint: Endpoint, inner: Arc<Inner>) -> Self {
        Self {
            label,
            endpoint,
            state: Mutex::new(ChannelState::Connecting),
            sent: Mutex::default(),
            inner,
        }
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelTransport for ScriptedChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        if self.ready_state() != ChannelState::Open {
            return Err(EngineError("channel is not open".into()));
        }
        self.sent.lock().unwrap().push(text.clone());
        if let Some(peer) = self.inner.latest(self.endpoint.counterpart()) {
            peer.emit(PeerEvent::MessageReceived {
                role: ChannelRole::Receiver,
                data: Bytes::from(text),
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.set_state(ChannelState::Closed);
        Ok(())
    }
}

/// Synthetic devices that remember, for every capture request, how many of the
/// streams they handed out earlier were still live.
pub(crate) struct ProbeDevices {
    devices: SyntheticDevices,
    issued: Mutex<Vec<MediaStream>>,
    live_at_request: Mutex<Vec<usize>>,
}

impl ProbeDevices {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices: SyntheticDevices::new(devices),
            issued: Mutex::default(),
            live_at_request: Mutex::default(),
        }
    }

    pub fn live_at_request(&self) -> Vec<usize> {
        self.live_at_request.lock().unwrap().clone()
    }

    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for ProbeDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        self.devices.enumerate_devices().await
    }

    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, CaptureError> {
        let live = self
            .issued
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_live())
            .count();
        self.live_at_request.lock().unwrap().push(live);
        let stream = self.devices.get_user_media(constraints).await?;
        self.issued.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}
