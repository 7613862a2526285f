pub mod channel;
pub mod config;
pub mod error;
pub mod listener;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use channel::{ChannelEvent, SignalingChannel, WsChannel};
pub use config::Config;
pub use error::{CallError, Result};
pub use listener::{LogListener, MediaSink, SessionListener};
pub use peer::{CallState, IceCandidate, SessionDescription, WebRtcEngine};
pub use session::SessionCoordinator;
pub use signaling::SignalingMessage;

use log::{error, info, warn};
use std::sync::Arc;

/// Подключается к relay и держит один звонок до Ctrl-C или закрытия канала
pub async fn run() -> Result<()> {
    logger::init_from_env();
    let config = Config::load()?;

    let (channel, mut events) =
        WsChannel::connect(&config.signaling_url, config.accept_invalid_certs).await?;
    let coordinator = SessionCoordinator::builder(Arc::new(WebRtcEngine::new()), channel.clone())
        .ice_servers(config.ice_servers.clone())
        .spawn();

    let pump = coordinator.clone();
    let remote_peer = config.remote_peer.clone();
    let mut relay = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let opened = event == ChannelEvent::Opened;
            let closed = event == ChannelEvent::Closed;
            if let Err(e) = pump.on_channel_event(event) {
                warn!("Channel event not handled: {e}");
            }
            if opened {
                if let Some(peer) = &remote_peer {
                    info!("Calling {peer}");
                    if let Err(e) = pump.start_call(peer.clone()).await {
                        error!("Failed to start call to {peer}: {e}");
                    }
                }
            }
            if closed {
                break;
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, hanging up"),
        _ = &mut relay => info!("Signaling channel closed"),
    }

    coordinator.close().await?;
    channel.disconnect().await;
    relay.abort();
    Ok(())
}
