//! Media Source Adapter: device enumeration and local capture.

pub mod constraints;
pub mod synthetic;

pub use constraints::{StreamConstraints, TrackConstraints};
pub use synthetic::SyntheticDevices;

use crate::error::CaptureError;
use crate::peer::types::TrackKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
    AudioOutput,
    #[serde(other)]
    Unknown,
}

/// One entry of the platform's device list
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub label: String,
}

/// Device pick for one capture request; `None` means platform default.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSelection {
    pub audio: Option<String>,
    pub video: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOption {
    pub device_id: String,
    pub label: String,
}

/// Enumerated input devices, ready to be shown as option lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCatalog {
    pub audio: Vec<DeviceOption>,
    pub video: Vec<DeviceOption>,
}

impl DeviceCatalog {
    /// Unlabelled devices are named `Audio N` / `Video N`.
    pub fn from_devices(devices: &[DeviceDescriptor]) -> Self {
        let mut catalog = DeviceCatalog::default();
        for device in devices {
            let (list, prefix) = match device.kind {
                DeviceKind::AudioInput => (&mut catalog.audio, "Audio"),
                DeviceKind::VideoInput => (&mut catalog.video, "Video"),
                _ => {
                    debug!(?device, "skipping device of unknown kind");
                    continue;
                }
            };
            let label = if device.label.is_empty() {
                format!("{prefix} {}", list.len() + 1)
            } else {
                device.label.clone()
            };
            list.push(DeviceOption {
                device_id: device.device_id.clone(),
                label,
            });
        }
        catalog
    }
}

/// Captured track. Clones share the ended flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    pub label: String,
    pub device_id: String,
    ended: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        kind: TrackKind,
        device: &DeviceDescriptor,
    ) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            label: device.label.clone(),
            device_id: device.device_id.clone(),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id, label = %self.label, "track stopped");
        }
    }

    pub fn is_live(&self) -> bool {
        !self.ended.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video)
    }

    pub fn stop(&self) {
        self.tracks.iter().for_each(MediaTrack::stop);
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }
}

/// Platform media capability.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;
    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, CaptureError>;
}

/// Owns the current capture of one endpoint.
pub struct MediaSourceAdapter<D> {
    devices: D,
    base: StreamConstraints,
    known: Vec<DeviceDescriptor>,
    current: Option<MediaStream>,
    selection: Option<MediaSelection>,
}

impl<D: MediaDevices> MediaSourceAdapter<D> {
    pub fn new(devices: D, base: StreamConstraints) -> Self {
        Self {
            devices,
            base,
            known: Vec::new(),
            current: None,
            selection: None,
        }
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub async fn enumerate(&mut self) -> Result<DeviceCatalog, CaptureError> {
        let devices = self.devices.enumerate_devices().await?;
        let catalog = DeviceCatalog::from_devices(&devices);
        info!(
            audio = catalog.audio.len(),
            video = catalog.video.len(),
            "enumerated devices"
        );
        self.known = devices;
        Ok(catalog)
    }

    /// Stops the held stream, then requests a new one for `selection`.
    pub async fn capture(&mut self, selection: MediaSelection) -> Result<MediaStream, CaptureError> {
        self.release();

        let constraints = self.constraints_for(&selection)?;
        info!(audio = ?selection.audio, video = ?selection.video, "requested local stream");
        let stream = self.devices.get_user_media(&constraints).await.map_err(|e| {
            warn!("capture failed: {e}");
            e
        })?;

        for track in stream.video_tracks() {
            info!(label = %track.label, "using video device");
        }
        for track in stream.audio_tracks() {
            info!(label = %track.label, "using audio device");
        }

        self.current = Some(stream.clone());
        self.selection = Some(selection);
        Ok(stream)
    }

    /// Stops and forgets the current stream, if any.
    pub fn release(&mut self) {
        if let Some(stream) = self.current.take() {
            debug!(stream = %stream.id, "releasing local stream");
            stream.stop();
        }
        self.selection = None;
    }

    pub fn current(&self) -> Option<&MediaStream> {
        self.current.as_ref()
    }

    pub fn selection(&self) -> Option<&MediaSelection> {
        self.selection.as_ref()
    }

    fn constraints_for(&self, selection: &MediaSelection) -> Result<StreamConstraints, CaptureError> {
        let mut constraints = self.base.clone();
        if let Some(id) = &selection.audio {
            self.check_known(id, DeviceKind::AudioInput)?;
            constraints.audio = constraints.audio.with_source(id);
        }
        if let Some(id) = &selection.video {
            self.check_known(id, DeviceKind::VideoInput)?;
            constraints.video = constraints.video.with_source(id);
        }
        Ok(constraints)
    }

    fn check_known(&self, id: &str, kind: DeviceKind) -> Result<(), CaptureError> {
        if self
            .known
            .iter()
            .any(|d| d.device_id == id && d.kind == kind)
        {
            Ok(())
        } else {
            Err(CaptureError::new(format!(
                "device {id} was not found among enumerated {kind:?} devices"
            )))
        }
    }
}
