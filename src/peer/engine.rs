use crate::error::Result;
use crate::peer::types::{
    IceCandidate, MediaConstraints, MediaTrackRef, ServerConfig, SessionDescription,
};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Непрозрачный идентификатор соединения внутри движка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc#{}", self.0)
    }
}

/// Состояние транспорта, как его видит движок
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Уведомления движка. Приходят из контекста движка, в любом потоке.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    LocalTrackAdded(MediaTrackRef),
    RemoteTrackAdded(MediaTrackRef),
    ConnectionStateChanged(TransportState),
}

pub type EngineEvents = mpsc::UnboundedSender<(EngineHandle, EngineEvent)>;

/// Возможности нативного движка согласования.
///
/// `create_offer`, `create_answer`, `set_local_description` и
/// `set_remote_description` асинхронны: следующий шаг нельзя вызывать, пока
/// не завершился предыдущий.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Возвращает уже открытый handle, если соединение существует.
    async fn create_connection(
        &self,
        ice_servers: &[ServerConfig],
        events: EngineEvents,
    ) -> Result<EngineHandle>;

    async fn create_offer(
        &self,
        handle: EngineHandle,
        constraints: MediaConstraints,
    ) -> Result<SessionDescription>;

    async fn set_local_description(
        &self,
        handle: EngineHandle,
        description: SessionDescription,
    ) -> Result<()>;

    async fn set_remote_description(
        &self,
        handle: EngineHandle,
        description: SessionDescription,
    ) -> Result<()>;

    async fn create_answer(
        &self,
        handle: EngineHandle,
        constraints: MediaConstraints,
    ) -> Result<SessionDescription>;

    /// `InvalidCandidate`, если remote description ещё не установлен.
    async fn add_remote_candidate(&self, handle: EngineHandle, candidate: &IceCandidate)
        -> Result<()>;

    async fn local_candidates(&self, handle: EngineHandle) -> Vec<IceCandidate>;

    /// Освобождает ресурсы движка; повторный вызов ничего не делает.
    async fn close(&self, handle: EngineHandle);
}
