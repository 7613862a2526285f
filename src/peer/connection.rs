use crate::error::{CallError, Result};
use crate::logger::{dump_candidate, dump_description};
use crate::peer::engine::{EngineEvent, EngineEvents, EngineHandle, NegotiationEngine, TransportState};
use crate::peer::ice::{from_init, to_init};
use crate::peer::types::{
    IceCandidate, MediaConstraints, MediaKind, MediaTrackRef, SdpType, ServerConfig,
    SessionDescription,
};
use crate::utils::{add_ice_url_scheme, random_id};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Открытое соединение и то, что движок о нём помнит
struct OpenPeer {
    handle: EngineHandle,
    pc: Arc<RTCPeerConnection>,
    local_candidates: Arc<Mutex<Vec<IceCandidate>>>,
}

/// Движок согласования поверх `webrtc`.
///
/// Держит не больше одного peer connection: повторный `create_connection`
/// возвращает уже открытый handle.
pub struct WebRtcEngine {
    peer: tokio::sync::Mutex<Option<OpenPeer>>,
    next_handle: AtomicU64,
}

impl Default for WebRtcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WebRtcEngine {
    pub fn new() -> Self {
        Self {
            peer: tokio::sync::Mutex::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    async fn pc(&self, handle: EngineHandle) -> Result<Arc<RTCPeerConnection>> {
        match self.peer.lock().await.as_ref() {
            Some(open) if open.handle == handle => Ok(open.pc.clone()),
            _ => Err(CallError::NegotiationFailed(format!(
                "no peer connection for {handle}"
            ))),
        }
    }

    async fn new_peer(
        &self,
        handle: EngineHandle,
        ice_servers: &[ServerConfig],
        events: EngineEvents,
    ) -> Result<OpenPeer> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
        let local_candidates = Arc::new(Mutex::new(Vec::new()));

        // Trickle: каждый локальный кандидат сразу отдаём наружу
        let collected = local_candidates.clone();
        let ev = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = from_init(init);
                        dump_candidate("LOCAL", &candidate);
                        if let Ok(mut list) = collected.lock() {
                            list.push(candidate.clone());
                        }
                        let _ = ev.send((handle, EngineEvent::LocalCandidate(candidate)));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                None => {
                    // cand == None означает конец сбора
                    debug!("ICE candidate gathering completed (null candidate received)");
                    let _ = ev.send((handle, EngineEvent::GatheringComplete));
                }
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {st:?}");
            let state = match st {
                RTCPeerConnectionState::New => Some(TransportState::New),
                RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
                RTCPeerConnectionState::Connected => Some(TransportState::Connected),
                RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
                RTCPeerConnectionState::Failed => Some(TransportState::Failed),
                RTCPeerConnectionState::Closed => Some(TransportState::Closed),
                _ => None,
            };
            if let Some(state) = state {
                let _ = ev.send((handle, EngineEvent::ConnectionStateChanged(state)));
            }
            Box::pin(async {})
        }));

        let ev = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                _ => None,
            };
            match kind {
                Some(kind) => {
                    info!("Remote {kind} track added: {}", track.id());
                    let track_ref = MediaTrackRef::new(track.id(), kind).with_inner(track);
                    let _ = ev.send((handle, EngineEvent::RemoteTrackAdded(track_ref)));
                }
                None => warn!("Ignoring remote track of unsupported kind {:?}", track.kind()),
            }
            Box::pin(async {})
        }));

        // Локальные треки; сэмплы в них пишет модуль захвата
        let stream_id = format!("ssc-{}", random_id());
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let track = Arc::new(TrackLocalStaticSample::new(
                local_codec(kind),
                format!("{stream_id}-{kind}"),
                stream_id.clone(),
            ));
            pc.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            let track_ref = MediaTrackRef::new(track.id(), kind).with_inner(track);
            let _ = events.send((handle, EngineEvent::LocalTrackAdded(track_ref)));
        }

        info!("Peer connection {handle} created");
        Ok(OpenPeer {
            handle,
            pc,
            local_candidates,
        })
    }

    /// Добавляет recvonly трансиверы для запрошенных видов медиа, которых ещё нет
    async fn ensure_receivers(pc: &RTCPeerConnection, constraints: MediaConstraints) -> Result<()> {
        let transceivers = pc.get_transceivers().await;
        let wanted = [
            (RTPCodecType::Audio, constraints.offer_to_receive_audio),
            (RTPCodecType::Video, constraints.offer_to_receive_video),
        ];
        for (kind, requested) in wanted {
            if !requested || transceivers.iter().any(|t| t.kind() == kind) {
                continue;
            }
            debug!("Adding recvonly transceiver for {kind:?}");
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_connection(
        &self,
        ice_servers: &[ServerConfig],
        events: EngineEvents,
    ) -> Result<EngineHandle> {
        let mut guard = self.peer.lock().await;
        if let Some(open) = guard.as_ref() {
            debug!("Reusing open peer connection {}", open.handle);
            return Ok(open.handle);
        }

        let handle = EngineHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let open = self.new_peer(handle, ice_servers, events).await?;
        *guard = Some(open);
        Ok(handle)
    }

    async fn create_offer(
        &self,
        handle: EngineHandle,
        constraints: MediaConstraints,
    ) -> Result<SessionDescription> {
        let pc = self.pc(handle).await?;
        Self::ensure_receivers(&pc, constraints).await?;
        let offer = pc.create_offer(None).await?;
        let desc = from_rtc(&offer)?;
        dump_description("Local offer created", &desc);
        Ok(desc)
    }

    async fn set_local_description(
        &self,
        handle: EngineHandle,
        description: SessionDescription,
    ) -> Result<()> {
        let pc = self.pc(handle).await?;
        pc.set_local_description(to_rtc(&description)?).await?;
        debug!("Local description ({}) set", description.sdp_type);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        handle: EngineHandle,
        description: SessionDescription,
    ) -> Result<()> {
        let pc = self.pc(handle).await?;
        pc.set_remote_description(to_rtc(&description)?).await?;
        debug!("Remote description ({}) set", description.sdp_type);
        Ok(())
    }

    async fn create_answer(
        &self,
        handle: EngineHandle,
        constraints: MediaConstraints,
    ) -> Result<SessionDescription> {
        let pc = self.pc(handle).await?;
        Self::ensure_receivers(&pc, constraints).await?;
        let answer = pc.create_answer(None).await?;
        let desc = from_rtc(&answer)?;
        dump_description("Local answer created", &desc);
        Ok(desc)
    }

    async fn add_remote_candidate(&self, handle: EngineHandle, candidate: &IceCandidate) -> Result<()> {
        let pc = self.pc(handle).await?;
        if pc.remote_description().await.is_none() {
            return Err(CallError::InvalidCandidate(
                "remote description is not set yet".into(),
            ));
        }
        pc.add_ice_candidate(to_init(candidate))
            .await
            .map_err(|e| CallError::InvalidCandidate(e.to_string()))?;
        dump_candidate("REMOTE", candidate);
        Ok(())
    }

    async fn local_candidates(&self, handle: EngineHandle) -> Vec<IceCandidate> {
        match self.peer.lock().await.as_ref() {
            Some(open) if open.handle == handle => open
                .local_candidates
                .lock()
                .map(|l| l.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    async fn close(&self, handle: EngineHandle) {
        let open = {
            let mut guard = self.peer.lock().await;
            match guard.as_ref() {
                Some(open) if open.handle == handle => guard.take(),
                _ => None,
            }
        };
        if let Some(open) = open {
            if let Err(e) = open.pc.close().await {
                warn!("Failed to close peer connection {handle}: {e}");
            }
            info!("Peer connection {handle} closed");
        }
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn local_codec(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = desc.sdp.clone();
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpType::Rollback => {
            return Err(CallError::NegotiationFailed(
                "rollback descriptions are not supported".into(),
            ))
        }
    };
    Ok(rtc)
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(CallError::NegotiationFailed(format!(
                "engine returned unexpected sdp type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    })
}
