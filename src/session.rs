use crate::channel::{ChannelEvent, SignalingChannel};
use crate::config::DEFAULT_ICE_SERVERS;
use crate::error::{CallError, Result};
use crate::listener::{LogListener, MediaSink, SessionListener};
use crate::logger::dump_description;
use crate::peer::engine::{EngineEvent, EngineHandle, NegotiationEngine, TransportState};
use crate::peer::ice::{analyze_candidates, validate_candidate};
use crate::peer::state::{CallState, Role, Session, SessionSnapshot};
use crate::peer::types::{IceCandidate, MediaConstraints, SdpType, ServerConfig, SessionDescription};
use crate::signaling::{peek_action, SignalingMessage};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Команды в очередь координатора
enum Command {
    StartCall {
        remote_peer_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Inbound(SignalingMessage),
    ChannelOpened,
    ChannelClosed,
    Close {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Completion {
        session_id: u64,
        step: Step,
    },
}

/// Завершение асинхронной операции движка
enum Step {
    OfferCreated(Result<SessionDescription>),
    AnswerCreated(Result<SessionDescription>),
    LocalDescriptionSet(SessionDescription, Result<()>),
    RemoteDescriptionSet(SessionDescription, Result<()>),
}

/// Координатор единственной сессии звонка.
///
/// Всё состояние сессии живёт в одной задаче tokio; публичные методы и
/// колбэки движка только кладут команды в её очередь. Клонируется дёшево.
#[derive(Clone)]
pub struct SessionCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CallState>,
}

pub struct CoordinatorBuilder {
    engine: Arc<dyn NegotiationEngine>,
    channel: Arc<dyn SignalingChannel>,
    listener: Arc<dyn SessionListener>,
    media: Option<Arc<dyn MediaSink>>,
    ice_servers: Vec<ServerConfig>,
    constraints: MediaConstraints,
}

impl CoordinatorBuilder {
    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaSink>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Запускает задачу координатора. Нужен работающий runtime tokio.
    pub fn spawn(self) -> SessionCoordinator {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CallState::Idle);

        let actor = Actor {
            engine: self.engine,
            channel: self.channel,
            listener: self.listener,
            media: self.media,
            ice_servers: self.ice_servers,
            constraints: self.constraints,
            session: None,
            next_session_id: 0,
            local_id: None,
            commands: cmd_tx.downgrade(),
            engine_events: engine_tx,
            state: state_tx,
        };
        tokio::spawn(actor.run(cmd_rx, engine_rx));

        SessionCoordinator {
            commands: cmd_tx,
            state: state_rx,
        }
    }
}

impl SessionCoordinator {
    pub fn builder(
        engine: Arc<dyn NegotiationEngine>,
        channel: Arc<dyn SignalingChannel>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            engine,
            channel,
            listener: Arc::new(LogListener),
            media: None,
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            constraints: MediaConstraints::default(),
        }
    }

    /// Caller: начинает звонок. `SessionAlreadyActive`, если сессия уже идёт.
    pub async fn start_call(&self, remote_peer_id: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartCall {
            remote_peer_id: remote_peer_id.into(),
            reply,
        })?;
        rx.await.map_err(|_| CallError::CoordinatorStopped)?
    }

    pub fn handle_message(&self, message: SignalingMessage) -> Result<()> {
        self.send(Command::Inbound(message))
    }

    /// Разбирает сырое сообщение relay. Ошибки разбора не трогают сессию.
    pub fn handle_raw(&self, raw: &str) -> Result<()> {
        match SignalingMessage::decode(raw) {
            Ok(message) => self.handle_message(message),
            Err(CallError::UnknownAction(action)) => {
                warn!("WebSocket unknown action {action}, ignoring");
                Err(CallError::UnknownAction(action))
            }
            Err(e) => {
                warn!(
                    "Dropping inbound {} message: {e}",
                    peek_action(raw).as_deref().unwrap_or("<no action>")
                );
                Err(e)
            }
        }
    }

    pub fn on_channel_event(&self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Opened => self.send(Command::ChannelOpened),
            ChannelEvent::Message(raw) => match self.handle_raw(&raw) {
                Err(e) if e.is_local() => {
                    debug!("Inbound message dropped: {e}");
                    Ok(())
                }
                other => other,
            },
            ChannelEvent::Closed => self.send(Command::ChannelClosed),
        }
    }

    /// Закрывает текущую сессию в любом состоянии
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { reply })?;
        rx.await.map_err(|_| CallError::CoordinatorStopped)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| CallError::CoordinatorStopped)
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CallError::CoordinatorStopped)
    }
}

struct Actor {
    engine: Arc<dyn NegotiationEngine>,
    channel: Arc<dyn SignalingChannel>,
    listener: Arc<dyn SessionListener>,
    media: Option<Arc<dyn MediaSink>>,
    ice_servers: Vec<ServerConfig>,
    constraints: MediaConstraints,
    session: Option<Session>,
    next_session_id: u64,
    local_id: Option<String>,
    commands: mpsc::WeakUnboundedSender<Command>,
    engine_events: mpsc::UnboundedSender<(EngineHandle, EngineEvent)>,
    state: watch::Sender<CallState>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut engine_events: mpsc::UnboundedReceiver<(EngineHandle, EngineEvent)>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some((handle, event)) = engine_events.recv() => {
                    self.handle_engine_event(handle, event).await
                }
            }
        }
        debug!("Session coordinator stopping");
        self.close_session("coordinator stopped").await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartCall {
                remote_peer_id,
                reply,
            } => {
                let result = self.start_call(remote_peer_id).await;
                let _ = reply.send(result);
            }
            Command::Inbound(message) => self.handle_inbound(message).await,
            Command::ChannelOpened => {
                info!("Signaling channel open, announcing ourselves");
                self.send(SignalingMessage::Start { id: None }).await;
            }
            Command::ChannelClosed => self.close_session("signaling channel closed").await,
            Command::Close { reply } => {
                self.close_session("closed by caller").await;
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let mut snapshot = self
                    .session
                    .as_ref()
                    .map(SessionSnapshot::from)
                    .unwrap_or_else(SessionSnapshot::idle);
                snapshot.local_id = self.local_id.clone();
                let _ = reply.send(snapshot);
            }
            Command::Completion { session_id, step } => {
                self.handle_completion(session_id, step).await
            }
        }
    }

    /// ========  SESSION LIFECYCLE  =========

    fn occupied(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| !s.state.is_vacant())
            .unwrap_or(false)
    }

    fn new_session(&mut self, remote_peer_id: String, role: Role) -> u64 {
        self.next_session_id += 1;
        let id = self.next_session_id;
        info!("Session {id}: {role:?} with {remote_peer_id}");
        self.session = Some(Session::new(id, remote_peer_id, role));
        self.publish(CallState::Connecting);
        id
    }

    /// Живая сессия с этим id (не закрытая и не заменённая)
    fn live(&mut self, session_id: u64) -> Option<&mut Session> {
        self.session
            .as_mut()
            .filter(|s| s.id == session_id && !s.is_closed())
    }

    fn set_state(&mut self, state: CallState) {
        if let Some(s) = self.session.as_mut() {
            if s.state == state {
                return;
            }
            info!("Session {}: {} -> {}", s.id, s.state, state);
            s.state = state;
        }
        self.publish(state);
    }

    fn publish(&self, state: CallState) {
        self.state.send_replace(state);
        self.listener.on_state_changed(state);
    }

    async fn open_connection(&mut self) -> Result<EngineHandle> {
        let handle = self
            .engine
            .create_connection(&self.ice_servers, self.engine_events.clone())
            .await?;
        if let Some(s) = self.session.as_mut() {
            s.handle = Some(handle);
        }
        Ok(handle)
    }

    async fn close_session(&mut self, reason: &str) {
        let handle = match self.session.as_ref() {
            Some(s) if !s.is_closed() => s.handle,
            _ => return,
        };
        info!("Closing session: {reason}");
        self.set_state(CallState::Closing);
        if let Some(handle) = handle {
            self.engine.close(handle).await;
        }
        if let Some(s) = self.session.as_mut() {
            let dropped = s.pending_remote.len();
            if dropped > 0 {
                debug!("Discarding {dropped} buffered remote candidates");
            }
            s.pending_remote.clear();
            s.pending_local.clear();
        }
        self.set_state(CallState::Closed);
    }

    fn report_failure(&self, error: &CallError) {
        error!("Negotiation step failed: {error}");
        self.listener.on_negotiation_failed(error);
    }

    async fn send(&self, message: SignalingMessage) {
        if let Err(e) = self.channel.send(&message).await {
            warn!("Failed to relay {}: {e}", message.action());
        }
    }

    /// Запускает шаг движка отдельной задачей; результат вернётся командой
    fn spawn_step<F>(&self, session_id: u64, step: F)
    where
        F: Future<Output = Step> + Send + 'static,
    {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let step = step.await;
            let _ = commands.send(Command::Completion { session_id, step });
        });
    }

    fn spawn_set_local(&self, session_id: u64, handle: EngineHandle, desc: SessionDescription) {
        let engine = self.engine.clone();
        self.spawn_step(session_id, async move {
            let result = engine.set_local_description(handle, desc.clone()).await;
            Step::LocalDescriptionSet(desc, result)
        });
    }

    fn spawn_set_remote(&self, session_id: u64, handle: EngineHandle, desc: SessionDescription) {
        let engine = self.engine.clone();
        self.spawn_step(session_id, async move {
            let result = engine.set_remote_description(handle, desc.clone()).await;
            Step::RemoteDescriptionSet(desc, result)
        });
    }

    /// ========  CALLER  =========

    async fn start_call(&mut self, remote_peer_id: String) -> Result<()> {
        if self.occupied() {
            warn!("startCall({remote_peer_id}) rejected: session already active");
            return Err(CallError::SessionAlreadyActive);
        }
        if remote_peer_id.trim().is_empty() {
            return Err(CallError::InvalidConfig("remote peer id cannot be empty".into()));
        }

        let session_id = self.new_session(remote_peer_id, Role::Caller);
        let handle = match self.open_connection().await {
            Ok(handle) => handle,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };

        let engine = self.engine.clone();
        let constraints = self.constraints;
        self.spawn_step(session_id, async move {
            Step::OfferCreated(engine.create_offer(handle, constraints).await)
        });
        Ok(())
    }

    /// ========  INBOUND SIGNALING  =========

    async fn handle_inbound(&mut self, message: SignalingMessage) {
        debug!(
            "Handling inbound {} from {}",
            message.action(),
            message.remote_id().unwrap_or("relay")
        );
        match message {
            SignalingMessage::Start { id } => {
                info!("Local ID = {}", id.as_deref().unwrap_or("<none>"));
                self.local_id = id;
            }
            SignalingMessage::Offer {
                remote_id,
                description,
            } => self.on_remote_offer(remote_id, description).await,
            SignalingMessage::Answer {
                remote_id,
                description,
            } => self.on_remote_answer(remote_id, description),
            SignalingMessage::IceCandidate {
                remote_id,
                candidate,
            } => self.on_remote_candidate(remote_id, candidate).await,
        }
    }

    async fn on_remote_offer(&mut self, remote_id: String, offer: SessionDescription) {
        if let Some(s) = self.session.as_ref().filter(|s| !s.state.is_vacant()) {
            if s.role == Role::Callee && s.remote_peer_id == remote_id {
                debug!("Duplicate offer from {remote_id} ignored");
            } else {
                warn!(
                    "Offer from {remote_id} rejected: {}",
                    CallError::SessionAlreadyActive
                );
            }
            return;
        }

        dump_description("Remote offer", &offer);
        let session_id = self.new_session(remote_id, Role::Callee);
        let handle = match self.open_connection().await {
            Ok(handle) => handle,
            Err(e) => {
                self.report_failure(&e);
                return;
            }
        };
        if let Some(s) = self.session.as_mut() {
            s.remote_requested = true;
        }
        self.spawn_set_remote(session_id, handle, offer);
    }

    fn on_remote_answer(&mut self, remote_id: String, answer: SessionDescription) {
        let Some(s) = self.session.as_mut().filter(|s| !s.is_closed()) else {
            warn!("Answer from {remote_id} without an active session, dropping");
            return;
        };
        if s.remote_peer_id != remote_id || s.role != Role::Caller {
            warn!("Unexpected answer from {remote_id}, dropping");
            return;
        }
        if s.remote_requested {
            debug!("Duplicate answer from {remote_id} ignored");
            return;
        }
        let (Some(handle), CallState::OfferSent) = (s.handle, s.state) else {
            warn!("Answer from {remote_id} arrived in state {}, dropping", s.state);
            return;
        };
        s.remote_requested = true;
        let session_id = s.id;
        dump_description("Remote answer", &answer);
        self.spawn_set_remote(session_id, handle, answer);
    }

    async fn on_remote_candidate(&mut self, remote_id: String, candidate: IceCandidate) {
        if let Err(e) = validate_candidate(&candidate) {
            warn!("Dropping candidate from {remote_id}: {e}");
            return;
        }
        let Some(s) = self.session.as_mut().filter(|s| !s.is_closed()) else {
            warn!("Dropping candidate from {remote_id}: no active session");
            return;
        };
        if s.remote_peer_id != remote_id {
            warn!("Dropping candidate from {remote_id}: session is with {}", s.remote_peer_id);
            return;
        }
        match s.handle.filter(|_| s.has_remote_description()) {
            Some(handle) => self.apply_candidate(handle, &candidate).await,
            None => {
                debug!("Remote description not set yet, queuing candidate");
                s.pending_remote.push(candidate);
            }
        }
    }

    async fn apply_candidate(&self, handle: EngineHandle, candidate: &IceCandidate) {
        if let Err(e) = self.engine.add_remote_candidate(handle, candidate).await {
            warn!("Failed to add remote candidate, session continues: {e}");
        }
    }

    /// Применяет отложенные кандидаты строго в порядке поступления
    async fn flush_pending_candidates(&mut self, handle: EngineHandle) {
        let pending = match self.session.as_mut() {
            Some(s) => s.pending_remote.drain(),
            None => return,
        };
        if !pending.is_empty() {
            debug!("Applying {} pending candidates", pending.len());
        }
        for candidate in pending {
            self.apply_candidate(handle, &candidate).await;
        }
    }

    /// ========  ENGINE COMPLETIONS  =========

    async fn handle_completion(&mut self, session_id: u64, step: Step) {
        let Some(handle) = self.live(session_id).and_then(|s| s.handle) else {
            debug!("Dropping late completion for session {session_id}");
            return;
        };

        match step {
            Step::OfferCreated(Ok(offer)) => self.spawn_set_local(session_id, handle, offer),
            Step::AnswerCreated(Ok(answer)) => {
                self.set_state(CallState::AnswerPending);
                self.spawn_set_local(session_id, handle, answer);
            }
            Step::LocalDescriptionSet(desc, Ok(())) => self.on_local_description_set(desc).await,
            Step::RemoteDescriptionSet(desc, Ok(())) => {
                self.on_remote_description_set(session_id, handle, desc)
                    .await
            }
            Step::OfferCreated(Err(e))
            | Step::AnswerCreated(Err(e))
            | Step::LocalDescriptionSet(_, Err(e))
            | Step::RemoteDescriptionSet(_, Err(e)) => self.report_failure(&e),
        }
    }

    async fn on_local_description_set(&mut self, desc: SessionDescription) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        s.local_description = Some(desc.clone());
        let remote_id = s.remote_peer_id.clone();
        let early: Vec<IceCandidate> = s.pending_local.drain(..).collect();

        match desc.sdp_type {
            SdpType::Offer => {
                self.set_state(CallState::OfferSent);
                self.listener.on_local_offer_ready(&desc);
                self.send(SignalingMessage::Offer {
                    remote_id: remote_id.clone(),
                    description: desc,
                })
                .await;
            }
            _ => {
                self.listener.on_local_answer_ready(&desc);
                self.send(SignalingMessage::Answer {
                    remote_id: remote_id.clone(),
                    description: desc,
                })
                .await;
                if self.session.as_ref().map(|s| s.state) == Some(CallState::AnswerPending) {
                    self.set_state(CallState::Negotiating);
                }
            }
        }

        for candidate in early {
            self.relay_local_candidate(&remote_id, candidate).await;
        }
    }

    async fn on_remote_description_set(
        &mut self,
        session_id: u64,
        handle: EngineHandle,
        desc: SessionDescription,
    ) {
        let role = match self.session.as_mut() {
            Some(s) => {
                s.remote_description = Some(desc);
                s.role
            }
            None => return,
        };
        self.flush_pending_candidates(handle).await;

        match role {
            Role::Caller => {
                if self.session.as_ref().map(|s| s.state) == Some(CallState::OfferSent) {
                    self.set_state(CallState::Negotiating);
                }
            }
            Role::Callee => {
                let engine = self.engine.clone();
                let constraints = self.constraints;
                self.spawn_step(session_id, async move {
                    Step::AnswerCreated(engine.create_answer(handle, constraints).await)
                });
            }
        }
    }

    /// ========  ENGINE EVENTS  =========

    async fn handle_engine_event(&mut self, handle: EngineHandle, event: EngineEvent) {
        let Some(s) = self
            .session
            .as_mut()
            .filter(|s| s.handle == Some(handle) && !s.is_closed())
        else {
            debug!("Ignoring {event:?} from stale {handle}");
            return;
        };

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                if s.local_description.is_none() {
                    // offer/answer ещё не ушёл; кандидат отправим следом за ним
                    s.pending_local.push(candidate);
                    return;
                }
                let remote_id = s.remote_peer_id.clone();
                self.relay_local_candidate(&remote_id, candidate).await;
            }
            EngineEvent::GatheringComplete => {
                let local = self.engine.local_candidates(handle).await;
                info!("ICE gathering complete with {} local candidates", local.len());
                analyze_candidates(&local);
            }
            EngineEvent::LocalTrackAdded(track) => {
                debug!("Local {} track {} ready", track.kind, track.id);
                if let Some(media) = &self.media {
                    media.attach_local_track(&track);
                }
            }
            EngineEvent::RemoteTrackAdded(track) => {
                let state = s.state;
                self.listener.on_remote_track_added(&track);
                if let Some(media) = &self.media {
                    media.attach_remote_track(track.kind, &track);
                }
                if matches!(state, CallState::AnswerPending | CallState::Negotiating) {
                    self.set_state(CallState::Active);
                }
            }
            EngineEvent::ConnectionStateChanged(state) => match state {
                TransportState::Failed => {
                    warn!("Transport failed on {handle}; close the call to start over")
                }
                other => debug!("Transport state on {handle}: {other:?}"),
            },
        }
    }

    async fn relay_local_candidate(&self, remote_id: &str, candidate: IceCandidate) {
        self.listener.on_local_candidate_ready(&candidate);
        self.send(SignalingMessage::IceCandidate {
            remote_id: remote_id.to_owned(),
            candidate,
        })
        .await;
    }
}
