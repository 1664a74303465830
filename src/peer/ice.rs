use crate::peer::types::{Endpoint, IceCandidate};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

/// Remote candidates that arrived before the remote description.
///
/// `None` entries are end-of-candidates markers and keep their position.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<Option<IceCandidate>>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: Option<IceCandidate>) {
        debug!(
            pending = self.queue.len() + 1,
            "remote description not set yet, queuing candidate"
        );
        self.queue.push_back(candidate);
    }

    /// Takes every queued entry in arrival order.
    pub fn drain(&mut self) -> Vec<Option<IceCandidate>> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Trickle dump of a freshly discovered candidate.
pub fn dump_candidate(endpoint: Endpoint, candidate: Option<&IceCandidate>) {
    match candidate {
        Some(c) => debug!(
            %endpoint,
            candidate = %c.candidate,
            sdp_mid = ?c.sdp_mid,
            sdp_mline_index = ?c.sdp_mline_index,
            "trickle candidate"
        ),
        None => debug!(%endpoint, "candidate gathering completed (null candidate)"),
    }
}

/// Logs how many host/srflx/relay candidates were seen.
pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();
    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => stats.host += 1,
            Some("srflx") | Some("prflx") => stats.srflx += 1,
            Some("relay") => stats.relay += 1,
            _ => stats.other += 1,
        }
    }

    info!(
        host = stats.host,
        srflx = stats.srflx,
        relay = stats.relay,
        "candidate analysis"
    );
    if stats.relay == 0 && !candidates.is_empty() {
        warn!("no TURN relay candidates found, connection through NAT may fail");
    }
    stats
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

pub fn from_rtc(endpoint: Endpoint, cand: &RTCIceCandidate) -> Option<IceCandidate> {
    match cand.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            endpoint,
        }),
        Err(e) => {
            warn!(%endpoint, "failed to serialize candidate: {e}");
            None
        }
    }
}

pub fn to_rtc(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}
