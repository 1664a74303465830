use crate::peer::types::SdpType;
use serde::Serialize;

/// Signaling state of a single peer link
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

impl SignalingState {
    /// State after setting a local description of `kind`, or `None` if the
    /// current state does not allow it.
    pub fn after_local(self, kind: SdpType) -> Option<SignalingState> {
        match (self, kind) {
            (SignalingState::New, SdpType::Offer) => Some(SignalingState::HaveLocalOffer),
            (SignalingState::HaveRemoteOffer, SdpType::Answer) => Some(SignalingState::Stable),
            _ => None,
        }
    }

    /// State after setting a remote description of `kind`.
    pub fn after_remote(self, kind: SdpType) -> Option<SignalingState> {
        match (self, kind) {
            (SignalingState::New, SdpType::Offer) => Some(SignalingState::HaveRemoteOffer),
            (SignalingState::HaveLocalOffer, SdpType::Answer) => Some(SignalingState::Stable),
            _ => None,
        }
    }

    pub fn can_create_offer(self) -> bool {
        self == SignalingState::New
    }

    pub fn can_create_answer(self) -> bool {
        self == SignalingState::HaveRemoteOffer
    }
}
