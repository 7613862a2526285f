use crate::error::CallError;
use crate::peer::state::CallState;
use crate::peer::types::{IceCandidate, MediaKind, MediaTrackRef, SessionDescription};
use log::{error, info};

/// Высокоуровневые события звонка (UI, телеметрия).
///
/// Вызывается из задачи координатора; реализация не должна блокировать.
pub trait SessionListener: Send + Sync {
    fn on_local_offer_ready(&self, offer: &SessionDescription);
    fn on_local_answer_ready(&self, answer: &SessionDescription);
    fn on_local_candidate_ready(&self, candidate: &IceCandidate);
    fn on_remote_track_added(&self, track: &MediaTrackRef);

    fn on_negotiation_failed(&self, _error: &CallError) {}

    fn on_state_changed(&self, _state: CallState) {}
}

/// Модуль захвата и отрисовки медиа
pub trait MediaSink: Send + Sync {
    fn attach_local_track(&self, track: &MediaTrackRef);
    fn attach_remote_track(&self, kind: MediaKind, track: &MediaTrackRef);
}

/// Слушатель, который просто пишет всё в лог
#[derive(Debug, Default)]
pub struct LogListener;

impl SessionListener for LogListener {
    fn on_local_offer_ready(&self, offer: &SessionDescription) {
        info!("Local offer ready ({} bytes)", offer.sdp.len());
    }

    fn on_local_answer_ready(&self, answer: &SessionDescription) {
        info!("Local answer ready ({} bytes)", answer.sdp.len());
    }

    fn on_local_candidate_ready(&self, candidate: &IceCandidate) {
        info!("Local candidate ready: {}", candidate.candidate);
    }

    fn on_remote_track_added(&self, track: &MediaTrackRef) {
        info!("Remote {} track {} attached", track.kind, track.id);
    }

    fn on_negotiation_failed(&self, error: &CallError) {
        error!("Negotiation failed, close the call to retry: {error}");
    }

    fn on_state_changed(&self, state: CallState) {
        info!("Call state: {state}");
    }
}
