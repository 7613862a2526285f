use crate::error::{CallError, Result};
use crate::signaling::SignalingMessage;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

/// Событие канала сигналинга
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    /// Сырой текст одного сообщения
    Message(String),
    Closed,
}

/// Двунаправленный канал до relay.
///
/// Переподключения здесь нет: это забота вызывающего кода.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// `ChannelClosed`, если соединение уже закрыто
    async fn send(&self, message: &SignalingMessage) -> Result<()>;

    async fn disconnect(&self);
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// WebSocket канал поверх tokio-tungstenite
pub struct WsChannel {
    sink: Mutex<Option<WsSink>>,
}

impl WsChannel {
    /// Подключается к relay. Первым событием всегда приходит `Opened`.
    ///
    /// `accept_invalid_certs` отключает проверку сертификата `wss://` relay
    /// (самоподписанные сертификаты на тестовых стендах).
    pub async fn connect(
        url: &str,
        accept_invalid_certs: bool,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ChannelEvent>)> {
        info!("Connecting to signaling relay {url}");
        let connector = if accept_invalid_certs {
            warn!("TLS certificate verification is disabled for {url}");
            Some(insecure_connector()?)
        } else {
            None
        };
        let (ws, response) = connect_async_tls_with_config(url, None, false, connector)
            .await
            .map_err(|e| CallError::ChannelUnavailable(format!("{url}: {e}")))?;
        debug!("Relay handshake completed with status {}", response.status());

        let (sink, stream) = ws.split();
        let channel = Arc::new(Self {
            sink: Mutex::new(Some(sink)),
        });

        let (tx, rx) = mpsc::channel(64);
        let _ = tx.send(ChannelEvent::Opened).await;
        tokio::spawn(read_loop(stream, tx, channel.clone()));

        Ok((channel, rx))
    }

    pub async fn is_open(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(CallError::ChannelClosed)?;
        trace!("--> {text}");
        if let Err(e) = sink.send(Message::text(text)).await {
            warn!("Relay send failed: {e}");
            *guard = None;
            return Err(CallError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for WsChannel {
    async fn send(&self, message: &SignalingMessage) -> Result<()> {
        debug!("Sending {} to relay", message.action());
        self.send_text(message.encode()?).await
    }

    async fn disconnect(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.close().await;
            info!("Disconnected from signaling relay");
        }
    }
}

fn insecure_connector() -> Result<Connector> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| CallError::ChannelUnavailable(format!("tls setup failed: {e}")))?;
    Ok(Connector::NativeTls(tls))
}

async fn read_loop(mut stream: WsStream, tx: mpsc::Sender<ChannelEvent>, channel: Arc<WsChannel>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                trace!("<-- {}", text.as_str());
                if tx.send(ChannelEvent::Message(text.as_str().to_owned())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                info!("Relay closed the connection: {frame:?}");
                break;
            }
            Ok(Message::Binary(_)) => debug!("Ignoring binary frame from relay"),
            Ok(_) => {}
            Err(e) => {
                warn!("Relay read error: {e}");
                break;
            }
        }
    }
    *channel.sink.lock().await = None;
    let _ = tx.send(ChannelEvent::Closed).await;
}
