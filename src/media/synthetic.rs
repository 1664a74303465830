use super::{
    DeviceDescriptor, DeviceKind, MediaDevices, MediaStream, MediaTrack, StreamConstraints,
    TrackConstraints,
};
use crate::error::CaptureError;
use crate::peer::types::TrackKind;
use crate::utils::random_id;
use async_trait::async_trait;
use tracing::debug;

/// Device platform backed by a configured device list.
///
/// Used for headless runs where no capture hardware is reachable; tracks carry
/// the device identity but produce no samples.
#[derive(Debug, Clone, Default)]
pub struct SyntheticDevices {
    devices: Vec<DeviceDescriptor>,
    denied: Option<String>,
}

impl SyntheticDevices {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            denied: None,
        }
    }

    /// Every capture request fails with `reason`, as when the user refuses access.
    pub fn deny_access(mut self, reason: impl Into<String>) -> Self {
        self.denied = Some(reason.into());
        self
    }

    fn pick(
        &self,
        kind: DeviceKind,
        constraints: &TrackConstraints,
    ) -> Result<Option<&DeviceDescriptor>, CaptureError> {
        if !constraints.is_enabled() {
            return Ok(None);
        }
        let mut of_kind = self.devices.iter().filter(|d| d.kind == kind);
        let found = match constraints.source_id() {
            Some(id) => of_kind.find(|d| d.device_id == id),
            None => of_kind.next(),
        };
        match found {
            Some(device) => Ok(Some(device)),
            None => Err(CaptureError::new(format!(
                "no {kind:?} device satisfies {constraints:?}"
            ))),
        }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        Ok(self.devices.clone())
    }

    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, CaptureError> {
        if let Some(reason) = &self.denied {
            return Err(CaptureError::new(reason.clone()));
        }
        if !constraints.audio.is_enabled() && !constraints.video.is_enabled() {
            return Err(CaptureError::new("at least one of audio or video must be requested"));
        }

        let stream_id = random_id();
        let mut tracks = Vec::new();
        if let Some(device) = self.pick(DeviceKind::AudioInput, &constraints.audio)? {
            tracks.push(MediaTrack::new(
                format!("{stream_id}-audio"),
                stream_id.clone(),
                TrackKind::Audio,
                device,
            ));
        }
        if let Some(device) = self.pick(DeviceKind::VideoInput, &constraints.video)? {
            tracks.push(MediaTrack::new(
                format!("{stream_id}-video"),
                stream_id.clone(),
                TrackKind::Video,
                device,
            ));
        }
        debug!(stream = %stream_id, tracks = tracks.len(), "synthetic stream created");
        Ok(MediaStream::new(stream_id, tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> SyntheticDevices {
        SyntheticDevices::new(vec![
            DeviceDescriptor {
                device_id: "mic".into(),
                kind: DeviceKind::AudioInput,
                label: "Mic".into(),
            },
            DeviceDescriptor {
                device_id: "cam".into(),
                kind: DeviceKind::VideoInput,
                label: "Cam".into(),
            },
        ])
    }

    #[tokio::test]
    async fn default_constraints_capture_first_device_of_each_kind() {
        let stream = devices()
            .get_user_media(&StreamConstraints::default())
            .await
            .unwrap();
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().next().unwrap().label, "Cam");
    }

    #[tokio::test]
    async fn denied_access_and_missing_kind_fail() {
        let err = devices()
            .deny_access("permission denied")
            .get_user_media(&StreamConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "permission denied");

        let audio_only = SyntheticDevices::new(vec![DeviceDescriptor {
            device_id: "mic".into(),
            kind: DeviceKind::AudioInput,
            label: String::new(),
        }]);
        assert!(audio_only
            .get_user_media(&StreamConstraints::default())
            .await
            .is_err());
    }
}
