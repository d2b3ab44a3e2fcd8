//! Gateway Channel: the dongle's connection to the broker
//!
//! - Persistent session (subscriptions survive reconnects)
//! - Optional AES-GCM payload encryption, skippable per publish
//! - Heartbeat task publishing the local GatewayInfo to the Status topic
//! - Exactly one inbound handler at a time

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::QoS;
use tokio::sync::watch;

use crate::config::ChannelConfig;
use crate::error::{ConfigError, TransportError};
use crate::middleware::cipher;
use crate::middleware::periodic::PeriodicTask;
use crate::middleware::session::{ConnectionState, Session};
use crate::middleware::topics;
use crate::middleware::transport::{InboundMessage, MqttTransport, SessionOptions, Transport, TransportListener};
use crate::middleware::types::{DeviceInfo, GatewayInfo};
use crate::utils::utils_time::now_ms;

pub const MAX_IN_FLIGHT: u16 = 1000;
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

// ==========================================
// HANDLER & OPTIONS
// ==========================================

/// Application callback for inbound messages (payload already decrypted)
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, topic: &str, payload: Bytes);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, Bytes) + Send + Sync,
{
    fn handle_message(&self, topic: &str, payload: Bytes) {
        self(topic, payload)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Send in the clear even when encryption is configured
    pub disable_aes: bool,
    /// Overrides the configured QoS
    pub qos: Option<QoS>,
}

impl PublishOptions {
    pub fn plain() -> Self {
        Self { disable_aes: true, qos: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub qos: Option<QoS>,
}

// ==========================================
// GATEWAY CHANNEL
// ==========================================

pub struct GatewayChannel {
    gateway_id: String,
    config: ChannelConfig,
    status_topic: String,
    session: Session,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    info: Mutex<GatewayInfo>,
    heartbeat: Mutex<Option<PeriodicTask>>,
    closed: AtomicBool,
    me: Weak<GatewayChannel>,
}

impl GatewayChannel {
    /// Builds a channel backed by an MQTT session with client id = gateway id
    pub fn new(gateway_id: &str, config: ChannelConfig) -> Result<Arc<Self>, ConfigError> {
        let session = SessionOptions::from_config(&config, gateway_id, false).with_max_inflight(MAX_IN_FLIGHT);
        let transport: Arc<dyn Transport> = Arc::new(MqttTransport::new(session));
        Self::with_transport(gateway_id, config, transport)
    }

    pub fn with_transport(gateway_id: &str, config: ChannelConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        if gateway_id.contains('/') || gateway_id.contains('#') || gateway_id.contains('+') {
            return Err(ConfigError::invalid("gateway_id", "must not contain '/', '#' or '+'"));
        }
        let status_topic = topics::status_topic(&config.project_name, gateway_id)
            .ok_or_else(|| ConfigError::invalid("gateway_id", "must not be empty"))?;

        tracing::info!(
            "[GatewayChannel] Initialized {} (project {}, encryption {})",
            gateway_id,
            config.project_name,
            if config.encryption_enabled() { "on" } else { "off" }
        );

        Ok(Arc::new_cyclic(|me| Self {
            gateway_id: gateway_id.to_string(),
            status_topic,
            session: Session::new("GatewayChannel", gateway_id, transport, config.retry_interval),
            config,
            handler: Mutex::new(None),
            info: Mutex::new(GatewayInfo::new(gateway_id)),
            heartbeat: Mutex::new(None),
            closed: AtomicBool::new(false),
            me: me.clone(),
        }))
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    // --- CONNECTION ---

    /// Blocks until connected, retrying forever. No-op when already connected.
    /// `address` overrides the primary broker for this and later attempts.
    /// Every other session setting comes from the `ChannelConfig` given at construction.
    pub async fn connect(&self, address: Option<&str>) {
        if let Some(address) = address {
            if let Err(e) = self.session.transport().set_broker(address) {
                tracing::warn!("[GatewayChannel] Ignoring broker override {}: {}", address, e);
            }
        }

        let listener: Weak<dyn TransportListener> = self.me.clone();
        self.session.connect(&listener, || async { Ok(()) }).await;
        self.start_heartbeat();
    }

    pub async fn on_connection_lost(&self, cause: Option<TransportError>) {
        self.session.mark_disconnected();
        match cause {
            Some(cause) => tracing::info!("[GatewayChannel] Broker connection lost ({})! Trying to reconnect...", cause),
            None => tracing::info!("[GatewayChannel] Broker connection lost! Trying to reconnect..."),
        }
        self.connect(None).await;
    }

    pub async fn disconnect(&self) {
        self.session.disconnect(DISCONNECT_TIMEOUT).await;
    }

    /// Disconnects and stops the heartbeat for good
    pub async fn close(&self) {
        self.disconnect().await;
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.heartbeat.lock().as_ref() {
            task.stop();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub async fn wait_connected(&self) {
        self.session.wait_connected().await
    }

    // --- PUBLISH ---

    /// Fire-and-forget publish. Connection-loss errors start a reconnect cycle
    /// on the caller's task before returning; other failures are logged.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>, options: &PublishOptions) {
        if !self.session.is_opened() {
            return;
        }

        let payload = payload.into();
        tracing::debug!("[GatewayChannel] Publishing {} bytes to {}", payload.len(), topic);

        let body = match (&self.config.aes_key, options.disable_aes) {
            (Some(key), false) => match cipher::encrypt(key, &payload) {
                Ok(sealed) => Bytes::from(sealed),
                Err(e) => {
                    tracing::error!("[GatewayChannel] Failed to encrypt message: {}", e);
                    return;
                }
            },
            _ => payload,
        };

        let qos = options.qos.unwrap_or(self.config.qos);
        match self.session.transport().publish(topic, body, qos).await {
            Ok(()) => {}
            Err(e) if e.is_connection_loss() => {
                tracing::error!("[GatewayChannel] Failed to publish message to broker - connection lost!");
                self.on_connection_lost(None).await;
            }
            Err(e) => tracing::error!("[GatewayChannel] Failed to publish message to broker: {}", e),
        }
    }

    /// Publishes to this gateway's data topic for `device_id`
    pub async fn publish_device(&self, device_id: &str, payload: impl Into<Bytes>, options: &PublishOptions) {
        match topics::data_topic(&self.config.project_name, &self.gateway_id, device_id) {
            Some(topic) => self.publish(&topic, payload, options).await,
            None => tracing::warn!("[GatewayChannel] Cannot publish for empty device id"),
        }
    }

    // --- SUBSCRIBE ---

    /// Subscribes to `topic`. A given handler replaces the current one; `None` keeps it.
    pub async fn subscribe(
        &self,
        topic: &str,
        options: &SubscribeOptions,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<(), TransportError> {
        if let Some(handler) = handler {
            *self.handler.lock() = Some(handler);
        }

        tracing::info!("[GatewayChannel] Subscribing to {}...", topic);
        let qos = options.qos.unwrap_or(self.config.qos);
        self.session.transport().subscribe(topic, qos).await.inspect_err(|e| {
            tracing::error!("[GatewayChannel] Failed to subscribe to {}: {}", topic, e);
        })
    }

    /// Clears the handler and unsubscribes from `topic`
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        *self.handler.lock() = None;

        tracing::info!("[GatewayChannel] Un-subscribing from {}...", topic);
        self.session.transport().unsubscribe(topic).await.inspect_err(|e| {
            tracing::error!("[GatewayChannel] Failed to un-subscribe from {}: {}", topic, e);
        })
    }

    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.lock() = Some(handler);
    }

    // --- DEVICES ---

    /// Picked up by the next heartbeat, no immediate publish
    pub fn add_device(&self, device: DeviceInfo) {
        self.info.lock().add_device(device);
    }

    pub fn remove_device(&self, device_id: &str) {
        self.info.lock().remove_device(device_id);
    }

    pub fn info(&self) -> GatewayInfo {
        self.info.lock().clone()
    }

    // --- HEARTBEAT ---

    fn start_heartbeat(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.heartbeat.lock();
        if slot.is_some() {
            return;
        }

        let me = self.me.clone();
        *slot = Some(PeriodicTask::spawn("Heartbeat", self.config.report_interval, move || {
            let me = me.clone();
            async move {
                match me.upgrade() {
                    Some(channel) => {
                        channel.send_heartbeat().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        }));
    }

    /// Publishes the local GatewayInfo in the clear, only while connected
    pub async fn send_heartbeat(&self) {
        let message = {
            let mut info = self.info.lock();
            info.stamp(now_ms());
            info.to_json()
        };
        let message = match message {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!("[Heartbeat] Failed to serialize gateway info: {}", e);
                return;
            }
        };

        if self.is_connected() {
            tracing::debug!("[Heartbeat] Pinging Map Manager...");
            self.publish(&self.status_topic, message, &PublishOptions::plain()).await;
        }
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.lock().as_ref().is_some_and(PeriodicTask::is_running)
    }
}

// ==========================================
// TRANSPORT EVENTS
// ==========================================

#[async_trait]
impl TransportListener for GatewayChannel {
    async fn message_arrived(&self, message: InboundMessage) {
        if message.duplicate {
            tracing::debug!("[GatewayChannel] Dropping duplicate delivery on {}", message.topic);
            return;
        }

        let Some(handler) = self.handler.lock().clone() else {
            return;
        };

        let payload = match &self.config.aes_key {
            Some(key) => match cipher::decrypt(key, &message.payload) {
                Ok(plain) => Bytes::from(plain),
                Err(e) => {
                    tracing::warn!("[GatewayChannel] Dropping message on {}: {}", message.topic, e);
                    return;
                }
            },
            None => message.payload,
        };

        handler.handle_message(&message.topic, payload);
    }

    async fn connection_lost(&self, cause: Option<TransportError>) {
        self.on_connection_lost(cause).await;
    }
}
