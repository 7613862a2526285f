use thiserror::Error;

/// Ошибки сигналинга и согласования звонка
#[derive(Debug, Error)]
pub enum CallError {
    #[error("signaling channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("signaling channel is closed")]
    ChannelClosed,

    #[error("a session is already active")]
    SessionAlreadyActive,

    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("unknown signaling action: {0}")]
    UnknownAction(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session coordinator has stopped")]
    CoordinatorStopped,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallError {
    /// Ошибки, после которых текущая сессия продолжает жить
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            CallError::MalformedMessage(_)
                | CallError::UnknownAction(_)
                | CallError::InvalidCandidate(_)
                | CallError::ChannelClosed
                | CallError::ChannelUnavailable(_)
        )
    }
}

impl From<webrtc::Error> for CallError {
    fn from(e: webrtc::Error) -> Self {
        CallError::NegotiationFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
