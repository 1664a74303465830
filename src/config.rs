use crate::error::{Error, Result};
use crate::media::{DeviceDescriptor, DeviceKind, StreamConstraints, TrackConstraints};
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Logging is on by default only in debug builds; RUST_LOG still overrides.

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_CHANNEL_LABEL: &str = "sendDataChannel";
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Session settings, loadable from a JSON file. Missing fields take defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Empty means host candidates only, which is enough for a loopback call.
    pub ice_servers: Vec<ServerConfig>,
    pub include_loopback_candidates: bool,
    pub data_channel_label: String,
    pub ordered: bool,
    pub send_interval_ms: u64,
    /// Constraint strings, see [`TrackConstraints::parse`].
    pub audio_constraints: String,
    pub video_constraints: String,
    /// Devices exposed by the synthetic platform.
    pub devices: Vec<DeviceDescriptor>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback_candidates: true,
            data_channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            ordered: true,
            send_interval_ms: DEFAULT_SEND_INTERVAL.as_millis() as u64,
            audio_constraints: "true".to_string(),
            video_constraints: "true".to_string(),
            devices: vec![
                DeviceDescriptor {
                    device_id: "default-audio".to_string(),
                    kind: DeviceKind::AudioInput,
                    label: String::new(),
                },
                DeviceDescriptor {
                    device_id: "default-video".to_string(),
                    kind: DeviceKind::VideoInput,
                    label: String::new(),
                },
            ],
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: SessionConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!("ICE server {} has an empty URL", server.id)));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        if self.data_channel_label.is_empty() {
            return Err(Error::Config("data channel label cannot be empty".into()));
        }
        if self.send_interval_ms == 0 {
            return Err(Error::Config("send interval must be positive".into()));
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn stream_constraints(&self) -> StreamConstraints {
        StreamConstraints {
            audio: TrackConstraints::parse(&self.audio_constraints),
            video: TrackConstraints::parse(&self.video_constraints),
        }
    }
}
