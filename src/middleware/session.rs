//! Session: connection state machine shared by both channel roles
//!
//! DISCONNECTED -> CONNECTING -> CONNECTED, back to DISCONNECTED on loss or
//! explicit disconnect. CONNECTING retries forever, sleeping `retry_interval`
//! before every attempt except the very first one of the process.
//! Concurrent callers of `connect` are serialized; whoever gets the lock
//! second finds the session already CONNECTED and returns.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::error::TransportError;
use crate::middleware::transport::{Transport, TransportListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct Session {
    label: &'static str,
    client_id: String,
    transport: Arc<dyn Transport>,
    retry_interval: Duration,
    state: watch::Sender<ConnectionState>,
    connect_lock: Mutex<()>,
    // Flips on the first attempt; the transport handle exists from then on
    opened: AtomicBool,
}

impl Session {
    pub fn new(label: &'static str, client_id: impl Into<String>, transport: Arc<dyn Transport>, retry_interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            label,
            client_id: client_id.into(),
            transport,
            retry_interval,
            state,
            connect_lock: Mutex::new(()),
            opened: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True once the first connection attempt has started
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub async fn wait_connected(&self) {
        let mut rx = self.watch();
        // Sender lives as long as self, so this only returns once connected
        let _ = rx.wait_for(|state| *state == ConnectionState::Connected).await;
    }

    /// Retries until the transport connects and `on_session` succeeds.
    /// `on_session` runs after every successful transport connect (e.g. to resubscribe);
    /// an error there counts as a failed attempt.
    pub async fn connect<F, Fut>(&self, listener: &Weak<dyn TransportListener>, mut on_session: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let _guard = self.connect_lock.lock().await;

        while !self.is_connected() {
            self.state.send_replace(ConnectionState::Connecting);

            if self.opened.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(self.retry_interval).await;
            } else {
                self.transport.set_listener(listener.clone());
            }

            tracing::info!("[{}] Connecting to broker as {}...", self.label, self.client_id);
            let attempt = match self.transport.connect().await {
                Ok(()) => on_session().await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(()) => {
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::info!("[{}] Connected to broker", self.label);
                }
                Err(e) => {
                    tracing::error!("[{}] Failed to connect to MQTT broker: {}", self.label, e);
                    tracing::info!("[{}] Retry in {} seconds...", self.label, self.retry_interval.as_secs_f64());
                }
            }
        }
    }

    /// Graceful teardown; failures are logged only
    pub async fn disconnect(&self, timeout: Duration) {
        if self.is_connected() {
            tracing::info!("[{}] Disconnecting from broker...", self.label);
            if let Err(e) = self.transport.disconnect(timeout).await {
                tracing::error!("[{}] Failed to disconnect from MQTT broker: {}", self.label, e);
            }
            self.mark_disconnected();
        }
    }
}
