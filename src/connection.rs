// connection.rs — Owns the single persistent WebSocket channel to the backend.
//
// The manager spawns one connection task per acquire(). The task connects,
// pumps outbound events, logs inbound server chatter, and reconnects with a
// bounded number of attempts. Past the bound it parks in a terminal Failed
// state until release() + acquire().

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::settings::ConnectionSettings;
use crate::types::ConnectionError;

/// Connection lifecycle, observable through [`ConnectionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// One live bidirectional text channel.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;
    /// Next inbound text frame. `None` means the peer closed the channel.
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;
    async fn close(&mut self);
}

/// Dials the backend. Production uses [`WsConnector`]; tests inject mocks.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, ConnectionError>;
}

// ─── WebSocket transport ───────────────────────────────────────────────────────

pub struct WsConnector;

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, ConnectionError> {
        Url::parse(endpoint)
            .map_err(|e| ConnectionError::Transport(format!("bad endpoint URL: {e}")))?;
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| ConnectionError::Transport(format!("WebSocket connect: {e}")))?;
        Ok(Box::new(WsTransport { ws }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                // Binary, ping and pong frames are not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(ConnectionError::Transport(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ─── Manager ───────────────────────────────────────────────────────────────────

struct Channel {
    outbound_tx: mpsc::Sender<String>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Process-wide handle to the backend channel. At most one live channel
/// exists at a time: acquire() on an already-acquired manager is a no-op
/// that reuses the existing channel.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    channel: Mutex<Option<Channel>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);
        Self {
            connector,
            settings,
            channel: Mutex::new(None),
            state_tx,
        }
    }

    /// Ensure a connection task exists. Idempotent: concurrent callers all
    /// land on the same channel and only the first spawns the task.
    pub async fn acquire(&self) {
        let mut guard = self.channel.lock().await;
        if guard.is_some() {
            return;
        }

        log::info!(
            "[socket] initializing connection to {}",
            self.settings.endpoint
        );
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            self.settings.clone(),
            Arc::clone(&self.state_tx),
            outbound_rx,
            shutdown_rx,
        ));
        *guard = Some(Channel {
            outbound_tx,
            shutdown_tx,
            task,
        });
    }

    /// Tear the channel down. Safe to call when none exists. Resets a
    /// terminal Failed state so a later acquire() starts fresh.
    pub async fn release(&self) {
        let channel = self.channel.lock().await.take();
        if let Some(ch) = channel {
            let _ = ch.shutdown_tx.try_send(());
            let _ = ch.task.await;
            log::info!("[socket] connection closed");
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// The configured bound for [`Self::wait_until_connected`] callers.
    pub fn connect_timeout(&self) -> Duration {
        self.settings.connect_timeout()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes (connect, disconnect, reconnect,
    /// terminal failure).
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the channel is connected, up to `timeout`. Resolves
    /// `false` (rather than erroring) on timeout or terminal failure so
    /// callers can proceed in a degraded mode.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let wait = async move {
            loop {
                match *rx.borrow_and_update() {
                    ConnectionState::Connected => return true,
                    ConnectionState::Failed => return false,
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Fire-and-forget send of a named event. Fails immediately when the
    /// channel is not connected — no queuing, no retry.
    pub async fn send(&self, event: &str, data: serde_json::Value) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Failed => return Err(ConnectionError::Failed),
            _ => return Err(ConnectionError::NotConnected),
        }

        let guard = self.channel.lock().await;
        let ch = guard.as_ref().ok_or(ConnectionError::NotConnected)?;
        let text = serde_json::json!({ "event": event, "data": data }).to_string();
        ch.outbound_tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Busy,
            TrySendError::Closed(_) => ConnectionError::NotConnected,
        })
    }
}

/// The connection task: connect, pump, reconnect up to the attempt bound.
async fn run_connection(
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut attempts: u32 = 0;
    let mut ever_connected = false;

    loop {
        state_tx.send_replace(if attempts == 0 && !ever_connected {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let connected = tokio::select! {
            res = connector.connect(&settings.endpoint) => res,
            _ = shutdown_rx.recv() => {
                state_tx.send_replace(ConnectionState::Disconnected);
                return;
            }
        };

        match connected {
            Ok(mut transport) => {
                log::info!("[socket] connected to {}", settings.endpoint);
                attempts = 0;
                ever_connected = true;
                state_tx.send_replace(ConnectionState::Connected);

                let reason = loop {
                    tokio::select! {
                        maybe = outbound_rx.recv() => match maybe {
                            Some(text) => {
                                if let Err(e) = transport.send(text).await {
                                    break format!("send failed: {e}");
                                }
                            }
                            // Manager was dropped entirely.
                            None => {
                                transport.close().await;
                                state_tx.send_replace(ConnectionState::Disconnected);
                                return;
                            }
                        },
                        incoming = transport.recv() => match incoming {
                            Some(Ok(text)) => log::debug!("[socket] server event: {text}"),
                            Some(Err(e)) => break format!("receive failed: {e}"),
                            None => break "closed by server".to_string(),
                        },
                        _ = shutdown_rx.recv() => {
                            transport.close().await;
                            state_tx.send_replace(ConnectionState::Disconnected);
                            return;
                        }
                    }
                };

                log::warn!("[socket] disconnected: {reason}");
                // Anything that slipped into the queue during the drop is
                // stale; the wire contract is drop-and-continue.
                while outbound_rx.try_recv().is_ok() {}
            }
            Err(e) => {
                attempts += 1;
                log::warn!(
                    "[socket] connection attempt {attempts}/{} failed: {e}",
                    settings.reconnect_attempts
                );
                if attempts >= settings.reconnect_attempts {
                    log::error!(
                        "[socket] giving up after {} attempts",
                        settings.reconnect_attempts
                    );
                    state_tx.send_replace(ConnectionState::Failed);
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(settings.reconnect_delay()) => {}
                    _ = shutdown_rx.recv() => {
                        state_tx.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        }
    }
}
