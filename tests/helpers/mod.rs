#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use iomt_overlay::middleware::cipher;
use iomt_overlay::middleware::transport::{InboundMessage, Transport, TransportListener};
use iomt_overlay::{ChannelConfig, ChannelRole, TransportError};
use parking_lot::Mutex;
use rumqttc::QoS;
use tokio::sync::watch;

pub const TEST_PASSPHRASE: &str = "0123456789abcdef-overlay";

// ==========================================
// CONFIG
// ==========================================

/// Role defaults with millisecond intervals so retries and periodic tasks run quickly
pub fn fast_config(role: ChannelRole) -> ChannelConfig {
    let mut config = ChannelConfig::from_options(role, &HashMap::new()).unwrap();
    config.retry_interval = Duration::from_millis(20);
    config.report_interval = Duration::from_millis(40);
    config
}

pub fn encrypted_config(role: ChannelRole) -> ChannelConfig {
    let mut config = fast_config(role);
    config.aes_key = Some(cipher::derive_key(TEST_PASSPHRASE).unwrap());
    config
}

pub fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Polls `condition` every few milliseconds, panics after `timeout`
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within {:?}", timeout);
}

pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut).await.expect("timed out")
}

// ==========================================
// MOCK TRANSPORT
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

/// In-memory broker session: records every request and lets tests inject
/// inbound traffic, publish failures and slow connects.
pub struct MockTransport {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    connected: AtomicBool,
    fail_next_publish: AtomicBool,
    refused_connects: AtomicUsize,
    gate: watch::Sender<bool>,
    listener: Mutex<Option<Weak<dyn TransportListener>>>,
    brokers: Mutex<Vec<String>>,
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    unsubscriptions: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            fail_next_publish: AtomicBool::new(false),
            refused_connects: AtomicUsize::new(0),
            gate,
            listener: Mutex::new(None),
            brokers: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn broker_overrides(&self) -> Vec<String> {
        self.brokers.lock().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published.lock().iter().filter(|p| p.topic == topic).cloned().collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().clone()
    }

    /// Next publish reports a lost session
    pub fn fail_next_publish(&self) {
        self.fail_next_publish.store(true, Ordering::SeqCst);
    }

    /// The next `count` connect attempts are refused
    pub fn refuse_connects(&self, count: usize) {
        self.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Connect attempts block until `release_connects`
    pub fn hold_connects(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_connects(&self) {
        self.gate.send_replace(true);
    }

    /// Delivers a message as if it came from the broker
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>, duplicate: bool) {
        if let Some(listener) = self.listener() {
            listener
                .message_arrived(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.into(),
                    duplicate,
                })
                .await;
        }
    }

    /// Simulates the broker dropping the session; returns once the listener is done reconnecting
    pub async fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener() {
            listener
                .connection_lost(Some(TransportError::ConnectionLost("broker went away".to_string())))
                .await;
        }
    }

    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.lock().as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn set_listener(&self, listener: Weak<dyn TransportListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn set_broker(&self, uri: &str) -> Result<(), TransportError> {
        self.brokers.lock().push(uri.to_string());
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let refused = self
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connection("connection refused".to_string()));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _timeout: Duration) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), TransportError> {
        if self.fail_next_publish.swap(false, Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::ConnectionLost("socket closed".to_string()));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.lock().push((topic.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.unsubscriptions.lock().push(topic.to_string());
        Ok(())
    }
}
