use crate::peer::types::{IceCandidate, ParticipantId};
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Upper bound on candidates held for a peer whose offer has not been applied yet
pub const MAX_PENDING_CANDIDATES: usize = 128;

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

/// Remote candidates received before the remote description was applied
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, peer: &ParticipantId, candidate: IceCandidate) {
        if self.queue.len() >= MAX_PENDING_CANDIDATES {
            warn!("Pending candidate queue for {peer} is full, dropping candidate");
            return;
        }
        debug!(
            "Remote description for {peer} not set yet, queuing candidate ({} pending)",
            self.queue.len() + 1
        );
        self.queue.push(candidate);
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.1 9 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn drains_in_arrival_order() {
        let peer = ParticipantId::from("p");
        let mut pending = PendingCandidates::default();
        pending.push(&peer, cand(1));
        pending.push(&peer, cand(2));
        let drained = pending.drain();
        assert_eq!(drained, vec![cand(1), cand(2)]);
        assert!(pending.is_empty());
    }

    #[test]
    fn queue_is_bounded() {
        let peer = ParticipantId::from("p");
        let mut pending = PendingCandidates::default();
        for n in 0..MAX_PENDING_CANDIDATES + 5 {
            pending.push(&peer, cand(n));
        }
        assert_eq!(pending.len(), MAX_PENDING_CANDIDATES);
    }

    #[test]
    fn converts_to_webrtc_init() {
        let init: RTCIceCandidateInit = cand(7).into();
        assert_eq!(init.sdp_mline_index, Some(0));
        let back: IceCandidate = init.into();
        assert_eq!(back, cand(7));
    }
}
