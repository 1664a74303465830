use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

/// Constraints for one track kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TrackConstraints {
    /// Plain `true`/`false`
    Enabled(bool),
    Detailed {
        mandatory: BTreeMap<String, String>,
        optional: Vec<BTreeMap<String, String>>,
    },
}

impl Default for TrackConstraints {
    fn default() -> Self {
        TrackConstraints::Enabled(true)
    }
}

impl TrackConstraints {
    /// Parses a constraint string such as
    /// `"minWidth=1280,optional:maxFrameRate=30"`.
    ///
    /// Empty or `true` enables the track, `false` disables it. Entries may be
    /// prefixed with `mandatory:` or `optional:`; without a prefix they are
    /// mandatory unless the key starts with `goog`. Malformed entries are
    /// logged and skipped.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() || spec.eq_ignore_ascii_case("true") {
            return TrackConstraints::Enabled(true);
        }
        if spec.eq_ignore_ascii_case("false") {
            return TrackConstraints::Enabled(false);
        }

        let mut mandatory = BTreeMap::new();
        let mut optional = Vec::new();
        for entry in spec.split(',') {
            let tokens: Vec<&str> = entry.split(':').collect();
            let is_mandatory = match tokens.as_slice() {
                [prefix, _] => *prefix == "mandatory",
                _ => !tokens[0].starts_with("goog"),
            };
            let pair = tokens[tokens.len() - 1];
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() && !value.contains('=') => {
                    if is_mandatory {
                        mandatory.insert(key.to_string(), value.to_string());
                    } else {
                        optional.push(BTreeMap::from([(key.to_string(), value.to_string())]));
                    }
                }
                _ => error!("ignoring malformed constraint: {entry}"),
            }
        }
        TrackConstraints::Detailed {
            mandatory,
            optional,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, TrackConstraints::Enabled(false))
    }

    /// Adds an optional `sourceId` pinning the track to one device.
    pub fn with_source(self, device_id: &str) -> Self {
        let source = BTreeMap::from([("sourceId".to_string(), device_id.to_string())]);
        match self {
            TrackConstraints::Enabled(_) => TrackConstraints::Detailed {
                mandatory: BTreeMap::new(),
                optional: vec![source],
            },
            TrackConstraints::Detailed {
                mandatory,
                mut optional,
            } => {
                optional.push(source);
                TrackConstraints::Detailed {
                    mandatory,
                    optional,
                }
            }
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        match self {
            TrackConstraints::Enabled(_) => None,
            TrackConstraints::Detailed { optional, .. } => optional
                .iter()
                .find_map(|entry| entry.get("sourceId"))
                .map(String::as_str),
        }
    }
}

/// What a capture request asks the platform for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamConstraints {
    pub audio: TrackConstraints,
    pub video: TrackConstraints,
}
