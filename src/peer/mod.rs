pub mod connection;
pub mod engine;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::WebRtcEngine;
pub use engine::{EngineEvent, EngineEvents, EngineHandle, NegotiationEngine, TransportState};
pub use ice::CandidateQueue;
pub use state::{CallState, Role, SessionSnapshot};
pub use types::{
    IceCandidate, MediaConstraints, MediaKind, MediaTrackRef, SdpType, ServerConfig,
    SessionDescription,
};
