//! In-process signaling between the two peer links.
//!
//! The relay hands descriptions and candidates straight to the counterpart
//! link, in the order they are given, and keeps a transcript of what it
//! carried in the JSON form a network signaling channel would use.

use crate::error::{Error, Result};
use crate::peer::link::PeerLink;
use crate::peer::types::{Endpoint, IceCandidate, SdpType, SessionDescription};
use crate::utils::random_id;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// What can travel over the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    Description(SessionDescription),
    /// `None` marks end of candidates
    Candidate(Option<IceCandidate>),
}

/// Wire form of a relayed payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
    },
    EndOfCandidates,
}

impl From<&SignalPayload> for SignalMessage {
    fn from(payload: &SignalPayload) -> Self {
        match payload {
            SignalPayload::Description(d) => match d.kind {
                SdpType::Offer => SignalMessage::Offer { sdp: d.sdp.clone() },
                SdpType::Answer => SignalMessage::Answer { sdp: d.sdp.clone() },
            },
            SignalPayload::Candidate(Some(c)) => SignalMessage::Candidate {
                candidate: c.candidate.clone(),
                sdp_mid: c.sdp_mid.clone(),
                sdp_mline_index: c.sdp_mline_index,
            },
            SignalPayload::Candidate(None) => SignalMessage::EndOfCandidates,
        }
    }
}

impl SignalMessage {
    pub fn to_json(&self) -> String {
        // a plain enum of strings cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Negotiation(format!("malformed signaling message: {e}")))
    }

    /// Rebuilds the payload as sent by `from`.
    pub fn into_payload(self, from: Endpoint) -> SignalPayload {
        match self {
            SignalMessage::Offer { sdp } => SignalPayload::Description(SessionDescription::offer(sdp)),
            SignalMessage::Answer { sdp } => SignalPayload::Description(SessionDescription::answer(sdp)),
            SignalMessage::Candidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => SignalPayload::Candidate(Some(IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
                endpoint: from,
            })),
            SignalMessage::EndOfCandidates => SignalPayload::Candidate(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    pub from: Endpoint,
    /// Per-source sequence number, starting at 0
    pub seq: u64,
    pub message: SignalMessage,
}

/// Ordered, lossless hand-off of signaling payloads between the two links.
#[derive(Debug, Default)]
pub struct SignalingRelay {
    next_seq: [u64; 2],
    transcript: Vec<RelayRecord>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` from `from` to its counterpart link `to`.
    ///
    /// The payload travels in its wire form: `to` receives what the JSON
    /// message decodes to, not the original value.
    pub async fn forward(
        &mut self,
        from: Endpoint,
        payload: SignalPayload,
        to: &mut PeerLink,
    ) -> Result<()> {
        if to.endpoint() != from.counterpart() {
            return Err(Error::InvalidState {
                operation: "relay",
                state: format!("{from} cannot signal itself"),
            });
        }

        let wire = SignalMessage::from(&payload).to_json();
        let message = SignalMessage::from_json(&wire)?;

        let slot = &mut self.next_seq[from as usize];
        let seq = *slot;
        *slot += 1;
        debug!(%from, seq, message = %wire, "relaying");
        self.transcript.push(RelayRecord {
            from,
            seq,
            message: message.clone(),
        });

        match message.into_payload(from) {
            SignalPayload::Description(desc) => to.set_remote_description(desc).await,
            SignalPayload::Candidate(candidate) => to.add_ice_candidate(candidate).await,
        }
    }

    pub fn transcript(&self) -> &[RelayRecord] {
        &self.transcript
    }

    pub fn sent_by(&self, from: Endpoint) -> impl Iterator<Item = &RelayRecord> {
        self.transcript.iter().filter(move |r| r.from == from)
    }

    pub fn reset(&mut self) {
        self.next_seq = [0; 2];
        self.transcript.clear();
    }
}

/// Description plus metadata, for carrying it outside the process
/// (copy/paste, QR code).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DescriptionEnvelope {
    pub sdp: SessionDescription,
    pub id: String,
    pub ts: i64,
}

impl DescriptionEnvelope {
    pub fn new(sdp: SessionDescription) -> Self {
        Self {
            sdp,
            id: random_id(),
            ts: chrono::Utc::now().timestamp(),
        }
    }
}

/// JSON, gzip, base64.
pub fn encode_envelope(envelope: &DescriptionEnvelope) -> Result<String> {
    let json = serde_json::to_vec(envelope)
        .map_err(|e| Error::Negotiation(format!("cannot serialize description: {e}")))?;
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)
        .and_then(|_| gz.finish())
        .map(|compressed| general_purpose::STANDARD.encode(compressed))
        .map_err(|e| Error::Negotiation(format!("cannot compress description: {e}")))
}

pub fn decode_envelope(encoded: &str) -> Result<DescriptionEnvelope> {
    let compressed = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Negotiation(format!("description is not base64: {e}")))?;
    let mut json = Vec::new();
    GzDecoder::new(&compressed[..])
        .read_to_end(&mut json)
        .map_err(|e| Error::Negotiation(format!("description is not gzip: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::Negotiation(format!("description is not valid JSON: {e}")))
}
