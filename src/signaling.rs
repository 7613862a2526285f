use crate::error::{CallError, Result};
use crate::peer::types::{IceCandidate, SdpType, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Сообщение сигналинга, как его видит координатор
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// Регистрация на relay; сервер отвечает с назначенным id
    Start { id: Option<String> },
    Offer {
        remote_id: String,
        description: SessionDescription,
    },
    Answer {
        remote_id: String,
        description: SessionDescription,
    },
    IceCandidate {
        remote_id: String,
        candidate: IceCandidate,
    },
}

impl SignalingMessage {
    pub fn action(&self) -> &'static str {
        match self {
            SignalingMessage::Start { .. } => "start",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "iceCandidate",
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::Start { .. } => None,
            SignalingMessage::Offer { remote_id, .. }
            | SignalingMessage::Answer { remote_id, .. }
            | SignalingMessage::IceCandidate { remote_id, .. } => Some(remote_id),
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(&WireMessage::from(self))
            .map_err(|e| CallError::MalformedMessage(e.to_string()))
    }

    /// Неизвестный `action` даёт `UnknownAction`, всё остальное
    /// неразборчивое даёт `MalformedMessage`.
    pub fn decode(raw: &str) -> Result<Self> {
        let wire: WireMessage =
            serde_json::from_str(raw).map_err(|e| CallError::MalformedMessage(e.to_string()))?;
        wire.try_into()
    }
}

/// ========  WIRE FORMAT  =========

#[derive(Serialize, Deserialize, Debug)]
struct WireMessage {
    action: String,
    #[serde(default)]
    data: WireData,
    /// Некоторые relay кладут id для `start` на верхний уровень
    #[serde(default, skip_serializing)]
    id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct WireData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offer: Option<WireDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<WireDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireDescription {
    sdp: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    sdp_type: Option<SdpType>,
}

impl From<&SignalingMessage> for WireMessage {
    fn from(msg: &SignalingMessage) -> Self {
        let mut data = WireData::default();
        match msg {
            SignalingMessage::Start { id } => data.id = id.clone(),
            SignalingMessage::Offer {
                remote_id,
                description,
            } => {
                data.remote_id = Some(remote_id.clone());
                data.offer = Some(description.into());
            }
            SignalingMessage::Answer {
                remote_id,
                description,
            } => {
                data.remote_id = Some(remote_id.clone());
                data.answer = Some(description.into());
            }
            SignalingMessage::IceCandidate {
                remote_id,
                candidate,
            } => {
                data.remote_id = Some(remote_id.clone());
                data.candidate = Some(candidate.clone());
            }
        }
        WireMessage {
            action: msg.action().to_owned(),
            data,
            id: None,
        }
    }
}

impl From<&SessionDescription> for WireDescription {
    fn from(d: &SessionDescription) -> Self {
        // тип всегда берём из описания движка, и для offer, и для answer
        WireDescription {
            sdp: d.sdp.clone(),
            sdp_type: Some(d.sdp_type),
        }
    }
}

impl TryFrom<WireMessage> for SignalingMessage {
    type Error = CallError;

    fn try_from(wire: WireMessage) -> Result<Self> {
        let WireMessage { action, data, id } = wire;
        match action.as_str() {
            "start" => Ok(SignalingMessage::Start { id: data.id.or(id) }),
            "offer" => Ok(SignalingMessage::Offer {
                remote_id: require_remote(&action, data.remote_id)?,
                description: description(&action, data.offer, SdpType::Offer)?,
            }),
            "answer" => Ok(SignalingMessage::Answer {
                remote_id: require_remote(&action, data.remote_id)?,
                description: description(&action, data.answer, SdpType::Answer)?,
            }),
            "iceCandidate" => Ok(SignalingMessage::IceCandidate {
                remote_id: require_remote(&action, data.remote_id)?,
                candidate: data.candidate.ok_or_else(|| {
                    CallError::MalformedMessage("iceCandidate without candidate".into())
                })?,
            }),
            other => Err(CallError::UnknownAction(other.to_owned())),
        }
    }
}

fn require_remote(action: &str, remote_id: Option<String>) -> Result<String> {
    remote_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CallError::MalformedMessage(format!("{action} without remoteId")))
}

fn description(
    action: &str,
    wire: Option<WireDescription>,
    expected: SdpType,
) -> Result<SessionDescription> {
    let wire =
        wire.ok_or_else(|| CallError::MalformedMessage(format!("{action} without {expected}")))?;
    match wire.sdp_type {
        Some(t) if t != expected => Err(CallError::MalformedMessage(format!(
            "{action} carries a description of type {t}"
        ))),
        _ => Ok(SessionDescription {
            sdp_type: expected,
            sdp: wire.sdp,
        }),
    }
}

/// Возвращает `action` сырого сообщения, если он вообще есть
pub fn peek_action(raw: &str) -> Option<String> {
    serde_json::from_str::<Value>(raw)
        .ok()?
        .get("action")?
        .as_str()
        .map(str::to_owned)
}
