//! Integration tests for the connection manager using mock transports.
//! Fully deterministic — no backend, no network.
//!
//! Run: cargo test --test connection_tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medialink::settings::ConnectionSettings;
use medialink::{ConnectionError, ConnectionManager, ConnectionState, Connector, Transport};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Mock implementations
// ---------------------------------------------------------------------------

/// Transport that stays open forever and records outbound frames.
struct MockTransport {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sent
            .send(text)
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        // A healthy, silent server: the channel stays open.
        std::future::pending().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector that counts attempts and either connects or refuses.
struct MockConnector {
    attempts: AtomicUsize,
    accept: bool,
    /// Simulated dial latency.
    delay: Duration,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl MockConnector {
    fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<String>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let connector = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            accept: true,
            delay: Duration::from_millis(10),
            sent: tx,
            closed: Arc::clone(&closed),
        });
        (connector, rx, closed)
    }

    fn refusing() -> Arc<Self> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            accept: false,
            delay: Duration::from_millis(1),
            sent: tx,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn Transport>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.accept {
            Ok(Box::new(MockTransport {
                sent: self.sent.clone(),
                closed: Arc::clone(&self.closed),
            }))
        } else {
            Err(ConnectionError::Transport("connection refused".into()))
        }
    }
}

fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        endpoint: "ws://mock.test/stream".into(),
        reconnect_attempts: 3,
        reconnect_delay_ms: 1,
        connect_timeout_ms: 500,
    }
}

async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
    let mut rx = manager.subscribe();
    tokio::time::timeout(Duration::from_secs(2), async move {
        loop {
            if *rx.borrow_and_update() == target {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {target:?}"));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Concurrent acquires before the dial completes still produce exactly one
/// transport-level connection attempt.
#[tokio::test]
async fn concurrent_acquires_share_one_connection() {
    let (connector, _rx, _closed) = MockConnector::accepting();
    let manager = Arc::new(ConnectionManager::new(
        Arc::clone(&connector) as Arc<dyn Connector>,
        fast_settings(),
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let m = Arc::clone(&manager);
        handles.push(tokio::spawn(async move { m.acquire().await }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(manager.wait_until_connected(Duration::from_secs(1)).await);
    assert_eq!(connector.attempts(), 1);

    // A later acquire reuses the live channel.
    manager.acquire().await;
    assert_eq!(connector.attempts(), 1);
}

/// A refused backend is retried exactly `reconnect_attempts` times, then
/// the manager parks in Failed and stops dialing.
#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let connector = MockConnector::refusing();
    let manager = ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_settings());

    manager.acquire().await;
    wait_for_state(&manager, ConnectionState::Failed).await;

    assert_eq!(connector.attempts(), 3);

    // No background dialing continues past the terminal state.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), 3);

    let err = manager
        .send("stream_audio", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Failed));
}

/// release() resets the terminal state; a fresh acquire dials again.
#[tokio::test]
async fn release_then_acquire_retries_after_failure() {
    let connector = MockConnector::refusing();
    let manager = ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_settings());

    manager.acquire().await;
    wait_for_state(&manager, ConnectionState::Failed).await;
    assert_eq!(connector.attempts(), 3);

    manager.release().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    manager.acquire().await;
    wait_for_state(&manager, ConnectionState::Failed).await;
    assert_eq!(connector.attempts(), 6);
}

/// wait_until_connected resolves false on timeout instead of erroring.
#[tokio::test]
async fn wait_until_connected_times_out_quietly() {
    let connector = MockConnector::refusing();
    let manager = ConnectionManager::new(connector as Arc<dyn Connector>, fast_settings());

    assert!(!manager.wait_until_connected(Duration::from_millis(20)).await);
}

/// Sends while connected produce the `{event, data}` envelope on the wire.
#[tokio::test]
async fn send_writes_named_event_envelope() {
    let (connector, mut rx, _closed) = MockConnector::accepting();
    let manager = ConnectionManager::new(connector as Arc<dyn Connector>, fast_settings());

    manager.acquire().await;
    assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

    manager
        .send("stream_video", serde_json::json!({ "frame": "abcd", "timestamp": 99 }))
        .await
        .unwrap();

    let text = rx.recv().await.expect("frame should arrive");
    let wire: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(wire["event"], "stream_video");
    assert_eq!(wire["data"]["frame"], "abcd");
    assert_eq!(wire["data"]["timestamp"], 99);
}

/// Multiple sends arrive in emission order.
#[tokio::test]
async fn sends_arrive_in_order() {
    let (connector, mut rx, _closed) = MockConnector::accepting();
    let manager = ConnectionManager::new(connector as Arc<dyn Connector>, fast_settings());

    manager.acquire().await;
    assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

    for i in 0..3 {
        manager
            .send("stream_audio", serde_json::json!({ "seq": i }))
            .await
            .unwrap();
    }
    for i in 0..3 {
        let wire: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(wire["data"]["seq"], i);
    }
}

/// release() closes the transport and returns the manager to Disconnected;
/// sends fail fast afterwards.
#[tokio::test]
async fn release_closes_the_transport() {
    let (connector, _rx, closed) = MockConnector::accepting();
    let manager = ConnectionManager::new(connector as Arc<dyn Connector>, fast_settings());

    manager.acquire().await;
    assert!(manager.wait_until_connected(Duration::from_secs(1)).await);

    manager.release().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(closed.load(Ordering::SeqCst));

    let err = manager
        .send("stream_audio", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::NotConnected));
}
