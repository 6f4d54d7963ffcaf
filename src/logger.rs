use crate::peer::types::{IceCandidate, ParticipantId};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global subscriber. Safe to call more than once.
pub fn init() {
    if !crate::config::LOGGING_ENABLED {
        return;
    }
    #[cfg(debug_assertions)]
    {
        if !crate::config::dev::ENABLE_LOGGING {
            return;
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}

/// Trickle-ICE candidate as it appears
pub fn log_candidate(label: &str, peer: &ParticipantId, cand: &IceCandidate) {
    tracing::debug!(
        "Trickle {label} peer={peer}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index
    );
}

/// Counts of gathered candidates by type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn candidate_summary(peer: &ParticipantId, candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "Candidate analysis for {peer}: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        warn!("No TURN relay candidates for {peer}; connection through NAT may fail");
    }
    summary
}

/// getStats snapshot of the nominated pair
pub async fn log_selected_pair(pc: &RTCPeerConnection, peer: &ParticipantId, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    "STATS {moment} peer={peer}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn summarises_candidate_types() {
        let peer = ParticipantId::from("peer");
        let summary = candidate_summary(
            &peer,
            &[
                cand("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host"),
                cand("candidate:2 1 udp 1694498815 1.2.3.4 5001 typ srflx raddr 10.0.0.2 rport 5000"),
                cand("candidate:3 1 udp 16777215 5.6.7.8 5002 typ relay raddr 1.2.3.4 rport 5001"),
                cand("candidate:4 1 udp 2130706431 10.0.0.3 5003 typ host"),
            ],
        );
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }

    #[test]
    fn init_twice_does_not_panic() {
        init();
        init();
    }
}
