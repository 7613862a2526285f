use crate::peer::engine::EngineHandle;
use crate::peer::ice::CandidateQueue;
use crate::peer::types::{IceCandidate, SessionDescription};
use std::fmt;

/// ========== STATE MACHINE ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Сессии нет
    Idle,
    /// Сессия создана, идёт создание соединения или первого описания
    Connecting,
    /// Caller: offer установлен локально и отправлен
    OfferSent,
    /// Callee: answer создан, идёт установка local description
    AnswerPending,
    /// Оба описания на месте, идёт обмен кандидатами
    Negotiating,
    /// Пришёл первый удалённый трек
    Active,
    Closing,
    Closed,
}

impl CallState {
    /// Можно ли начать новую сессию из этого состояния
    pub fn is_vacant(&self) -> bool {
        matches!(self, CallState::Idle | CallState::Closed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// Единственная сессия звонка, принадлежит координатору
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub remote_peer_id: String,
    pub role: Role,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub handle: Option<EngineHandle>,
    pub state: CallState,
    /// set_remote_description уже запрошен (повторный answer игнорируется)
    pub remote_requested: bool,
    pub pending_remote: CandidateQueue,
    /// Локальные кандидаты, пойманные до отправки local description
    pub pending_local: Vec<IceCandidate>,
}

impl Session {
    pub fn new(id: u64, remote_peer_id: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            remote_peer_id: remote_peer_id.into(),
            role,
            local_description: None,
            remote_description: None,
            handle: None,
            state: CallState::Connecting,
            remote_requested: false,
            pending_remote: CandidateQueue::default(),
            pending_local: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, CallState::Closing | CallState::Closed)
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }
}

/// Снимок сессии для вызывающего кода и тестов
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: CallState,
    /// id, выданный relay в ответ на `start`
    pub local_id: Option<String>,
    pub remote_peer_id: Option<String>,
    pub role: Option<Role>,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub pending_candidates: usize,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            state: CallState::Idle,
            local_id: None,
            remote_peer_id: None,
            role: None,
            local_description: None,
            remote_description: None,
            pending_candidates: 0,
        }
    }
}

impl From<&Session> for SessionSnapshot {
    fn from(s: &Session) -> Self {
        Self {
            state: s.state,
            local_id: None,
            remote_peer_id: Some(s.remote_peer_id.clone()),
            role: Some(s.role),
            local_description: s.local_description.clone(),
            remote_description: s.remote_description.clone(),
            pending_candidates: s.pending_remote.len(),
        }
    }
}
