#![allow(dead_code)]

use async_trait::async_trait;
use ssc_call::peer::{
    CallState, EngineEvent, EngineEvents, EngineHandle, IceCandidate, MediaConstraints, MediaKind,
    MediaTrackRef, NegotiationEngine, ServerConfig, SessionDescription,
};
use ssc_call::{CallError, MediaSink, Result, SessionCoordinator, SessionListener, SignalingChannel, SignalingMessage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FAKE_OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
pub const FAKE_ANSWER: &str = "v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// Движок без сети: пишет вызовы и позволяет придержать завершения
#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    applied: Mutex<Vec<IceCandidate>>,
    events: Mutex<Option<(EngineHandle, EngineEvents)>>,
    open: Mutex<Option<EngineHandle>>,
    remote_set: AtomicBool,
    next_handle: AtomicU64,
    pub fail_offer: AtomicBool,
    /// Пока гард взят, set_remote_description не завершается
    pub remote_gate: tokio::sync::Mutex<()>,
    /// Пока гард взят, set_local_description не завершается
    pub local_gate: tokio::sync::Mutex<()>,
}

impl FakeEngine {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn applied(&self) -> Vec<IceCandidate> {
        self.applied.lock().unwrap().clone()
    }

    pub fn current_handle(&self) -> Option<EngineHandle> {
        self.events.lock().unwrap().as_ref().map(|(h, _)| *h)
    }

    /// Уведомление от имени последнего созданного соединения
    pub fn emit(&self, event: EngineEvent) {
        let guard = self.events.lock().unwrap();
        let (handle, tx) = guard.as_ref().expect("no connection created yet");
        tx.send((*handle, event)).unwrap();
    }

    pub fn emit_for(&self, handle: EngineHandle, event: EngineEvent) {
        let guard = self.events.lock().unwrap();
        let (_, tx) = guard.as_ref().expect("no connection created yet");
        tx.send((handle, event)).unwrap();
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn create_connection(
        &self,
        _ice_servers: &[ServerConfig],
        events: EngineEvents,
    ) -> Result<EngineHandle> {
        self.record("create_connection");
        let mut open = self.open.lock().unwrap();
        if let Some(handle) = *open {
            return Ok(handle);
        }
        let handle = EngineHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        *open = Some(handle);
        *self.events.lock().unwrap() = Some((handle, events));
        Ok(handle)
    }

    async fn create_offer(
        &self,
        _handle: EngineHandle,
        _constraints: MediaConstraints,
    ) -> Result<SessionDescription> {
        self.record("create_offer");
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationFailed("offer refused".into()));
        }
        Ok(SessionDescription::offer(FAKE_OFFER))
    }

    async fn set_local_description(
        &self,
        _handle: EngineHandle,
        description: SessionDescription,
    ) -> Result<()> {
        let _gate = self.local_gate.lock().await;
        self.record(format!("set_local:{}", description.sdp_type));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        _handle: EngineHandle,
        description: SessionDescription,
    ) -> Result<()> {
        self.record(format!("set_remote:{}", description.sdp_type));
        let _gate = self.remote_gate.lock().await;
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_answer(
        &self,
        _handle: EngineHandle,
        _constraints: MediaConstraints,
    ) -> Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription::answer(FAKE_ANSWER))
    }

    async fn add_remote_candidate(&self, _handle: EngineHandle, candidate: &IceCandidate) -> Result<()> {
        self.record("add_remote_candidate");
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(CallError::InvalidCandidate("remote description is not set yet".into()));
        }
        self.applied.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn local_candidates(&self, _handle: EngineHandle) -> Vec<IceCandidate> {
        Vec::new()
    }

    async fn close(&self, handle: EngineHandle) {
        let mut open = self.open.lock().unwrap();
        if *open == Some(handle) {
            self.record("close");
            *open = None;
            self.remote_set.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SignalingMessage>>,
    pub closed: AtomicBool,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    async fn send(&self, message: &SignalingMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::ChannelClosed);
        }
        // Проверяем, что сообщение кодируется в формат relay
        message.encode()?;
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Heard {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    Track(MediaTrackRef),
    Failed(String),
    State(CallState),
}

#[derive(Default)]
pub struct RecordingListener {
    heard: Mutex<Vec<Heard>>,
}

impl RecordingListener {
    pub fn heard(&self) -> Vec<Heard> {
        self.heard.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<CallState> {
        self.heard()
            .into_iter()
            .filter_map(|h| match h {
                Heard::State(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.heard()
            .iter()
            .filter(|h| matches!(h, Heard::Failed(_)))
            .count()
    }

    fn push(&self, h: Heard) {
        self.heard.lock().unwrap().push(h);
    }
}

impl SessionListener for RecordingListener {
    fn on_local_offer_ready(&self, offer: &SessionDescription) {
        self.push(Heard::Offer(offer.clone()));
    }

    fn on_local_answer_ready(&self, answer: &SessionDescription) {
        self.push(Heard::Answer(answer.clone()));
    }

    fn on_local_candidate_ready(&self, candidate: &IceCandidate) {
        self.push(Heard::Candidate(candidate.clone()));
    }

    fn on_remote_track_added(&self, track: &MediaTrackRef) {
        self.push(Heard::Track(track.clone()));
    }

    fn on_negotiation_failed(&self, error: &CallError) {
        self.push(Heard::Failed(error.to_string()));
    }

    fn on_state_changed(&self, state: CallState) {
        self.push(Heard::State(state));
    }
}

#[derive(Default)]
pub struct RecordingMedia {
    pub local: Mutex<Vec<MediaTrackRef>>,
    pub remote: Mutex<Vec<(MediaKind, MediaTrackRef)>>,
}

impl MediaSink for RecordingMedia {
    fn attach_local_track(&self, track: &MediaTrackRef) {
        self.local.lock().unwrap().push(track.clone());
    }

    fn attach_remote_track(&self, kind: MediaKind, track: &MediaTrackRef) {
        self.remote.lock().unwrap().push((kind, track.clone()));
    }
}

pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub engine: Arc<FakeEngine>,
    pub channel: Arc<RecordingChannel>,
    pub listener: Arc<RecordingListener>,
    pub media: Arc<RecordingMedia>,
}

pub fn harness() -> Harness {
    let engine = Arc::new(FakeEngine::default());
    let channel = Arc::new(RecordingChannel::default());
    let listener = Arc::new(RecordingListener::default());
    let media = Arc::new(RecordingMedia::default());
    let coordinator = SessionCoordinator::builder(engine.clone(), channel.clone())
        .listener(listener.clone())
        .media(media.clone())
        .spawn();
    Harness {
        coordinator,
        engine,
        channel,
        listener,
        media,
    }
}

pub async fn wait_for_state(coordinator: &SessionCoordinator, target: CallState) {
    let mut rx = coordinator.subscribe();
    let reached = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(
        reached,
        "timed out waiting for {target}, state is {}",
        coordinator.state()
    );
}

pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting until {what}");
}

/// Дожидается, пока координатор разберёт всё, что уже стоит в очереди
pub async fn settle(coordinator: &SessionCoordinator) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.snapshot().await.unwrap();
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate::new(
        "0",
        0,
        format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5{n:04} typ host"),
    )
}

pub fn candidate_json(remote: &str, c: &IceCandidate) -> String {
    SignalingMessage::IceCandidate {
        remote_id: remote.into(),
        candidate: c.clone(),
    }
    .encode()
    .unwrap()
}

pub fn answer_json(remote: &str) -> String {
    format!(
        r#"{{"action":"answer","data":{{"remoteId":"{remote}","answer":{{"sdp":"v=0\r\ns=-\r\n","type":"answer"}}}}}}"#
    )
}

pub fn offer_json(remote: &str) -> String {
    format!(
        r#"{{"action":"offer","data":{{"remoteId":"{remote}","offer":{{"sdp":"v=0\r\ns=-\r\n","type":"offer"}}}}}}"#
    )
}
