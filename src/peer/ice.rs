use crate::error::{CallError, Result};
use crate::peer::types::IceCandidate;
use log::{info, warn};
use std::collections::VecDeque;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Сколько кандидатов держим до установки remote description
pub const MAX_PENDING_CANDIDATES: usize = 64;

/// Кандидаты, полученные до установки remote description.
///
/// Порядок сохраняется: `drain` отдаёт их ровно в порядке `push`.
/// Сверх `MAX_PENDING_CANDIDATES` новые кандидаты отбрасываются.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    /// `false`, если очередь полна и кандидат отброшен
    pub fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.pending.len() >= MAX_PENDING_CANDIDATES {
            warn!(
                "Pending candidate queue is full ({MAX_PENDING_CANDIDATES}), dropping {}",
                candidate.candidate
            );
            return false;
        }
        self.pending.push_back(candidate);
        true
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Проверка полей до постановки в очередь
pub fn validate_candidate(candidate: &IceCandidate) -> Result<()> {
    if candidate.candidate.trim().is_empty() {
        return Err(CallError::InvalidCandidate("empty candidate string".into()));
    }
    Ok(())
}

pub fn to_init(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: Some(candidate.sdp_mid.clone()),
        sdp_mline_index: Some(candidate.sdp_mline_index),
        username_fragment: None,
    }
}

pub fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid.unwrap_or_default(),
        sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            stats.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            stats.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            stats.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host, stats.srflx, stats.relay
    );

    if stats.relay == 0 {
        warn!("No TURN relay candidates found, connection through NAT may fail");
    }
    stats
}
