//! Presence Registry (Map Manager): tracks which gateways are alive
//!
//! - Clean session: both base subscriptions are reissued on every (re)connect
//! - Status heartbeats upsert the gateway table keyed by gateway id
//! - Reporter task publishes the gateways seen within `online_timeout`
//!
//! Entries are never removed from the table, stale ones are only left out
//! of the report until they heartbeat again.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use rumqttc::QoS;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::{ConfigError, TransportError};
use crate::middleware::periodic::PeriodicTask;
use crate::middleware::session::{ConnectionState, Session};
use crate::middleware::topics;
use crate::middleware::transport::{InboundMessage, MqttTransport, SessionOptions, Transport, TransportListener};
use crate::middleware::types::GatewayInfo;
use crate::utils::utils_time::now_ms;

pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const REPORT_QOS: QoS = QoS::AtLeastOnce;

pub struct PresenceRegistry {
    config: ChannelConfig,
    client_base_topic: String,
    status_base_topic: String,
    online_topic: String,
    session: Session,
    gateways: DashMap<String, GatewayInfo>,
    reporter: Mutex<Option<PeriodicTask>>,
    closing: AtomicBool,
    me: Weak<PresenceRegistry>,
}

impl PresenceRegistry {
    /// Builds a registry with a random `MapManager-<uuid>` identity on a clean MQTT session
    pub fn new(config: ChannelConfig) -> Result<Arc<Self>, ConfigError> {
        let client_id = format!("MapManager-{}", Uuid::new_v4());
        let session = SessionOptions::from_config(&config, client_id.clone(), true);
        let transport: Arc<dyn Transport> = Arc::new(MqttTransport::new(session));
        Self::with_transport(&client_id, config, transport)
    }

    pub fn with_transport(client_id: &str, config: ChannelConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let project = config.project_name.as_str();
        let missing = || ConfigError::invalid("project_name", "must not be empty");
        let client_base_topic = topics::client_base_topic(project).ok_or_else(missing)?;
        let status_base_topic = topics::status_base_topic(project).ok_or_else(missing)?;
        let online_topic = topics::online_topic(project).ok_or_else(missing)?;

        tracing::info!("[PresenceRegistry] Initialized {} (project {})", client_id, project);

        Ok(Arc::new_cyclic(|me| Self {
            client_base_topic,
            status_base_topic,
            online_topic,
            session: Session::new("PresenceRegistry", client_id, transport, config.retry_interval),
            config,
            gateways: DashMap::new(),
            reporter: Mutex::new(None),
            closing: AtomicBool::new(false),
            me: me.clone(),
        }))
    }

    pub fn client_id(&self) -> &str {
        self.session.client_id()
    }

    pub fn online_topic(&self) -> &str {
        &self.online_topic
    }

    // --- CONNECTION ---

    /// Blocks until connected and subscribed, retrying forever
    pub async fn connect(&self) {
        let listener: Weak<dyn TransportListener> = self.me.clone();
        self.session.connect(&listener, || self.subscribe_all()).await;
        tracing::info!("[PresenceRegistry] Map Manager is ready!");
        self.start_reporter();
    }

    // Clean session: nothing survives a reconnect, so this runs every time
    async fn subscribe_all(&self) -> Result<(), TransportError> {
        let transport = self.session.transport();
        for topic in [&self.client_base_topic, &self.status_base_topic] {
            tracing::info!("[PresenceRegistry] Subscribing to {} ...", topic);
            transport.subscribe(topic, self.config.qos).await?;
        }
        Ok(())
    }

    pub async fn on_connection_lost(&self, cause: Option<TransportError>) {
        self.session.mark_disconnected();
        match cause {
            Some(cause) => tracing::info!("[PresenceRegistry] Broker connection lost ({})! Trying to reconnect ...", cause),
            None => tracing::info!("[PresenceRegistry] Broker connection lost! Trying to reconnect ..."),
        }
        self.connect().await;
    }

    pub async fn disconnect(&self) {
        self.session.disconnect(DISCONNECT_TIMEOUT).await;
    }

    /// Stops the reporter after its current sleep. The session is left as is.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.reporter.lock().as_ref() {
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

    // --- INBOUND ---

    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic.starts_with(topics::base_prefix(&self.status_base_topic)) {
            if let Err(e) = self.record_heartbeat(payload, now_ms()) {
                tracing::error!("[PresenceRegistry] Failed to process status from {}: {}", topic, e);
            }
        } else if topic.starts_with(topics::base_prefix(&self.client_base_topic)) {
            tracing::debug!("[PresenceRegistry] Client announcement on {} ({} bytes)", topic, payload.len());
        }
    }

    /// Upserts the heartbeat, replacing the stored snapshot wholesale.
    /// `lastUpdated` in the payload is ignored in favour of `received_at`.
    pub fn record_heartbeat(&self, payload: &[u8], received_at: u64) -> Result<(), serde_json::Error> {
        let mut info = GatewayInfo::from_json(payload)?;
        info.stamp(received_at);
        tracing::debug!("[PresenceRegistry] Heartbeat from {} ({} devices)", info.gateway_id(), info.devices().len());
        self.gateways.insert(info.gateway_id().to_string(), info);
        Ok(())
    }

    // --- QUERIES ---

    pub fn gateway(&self, gateway_id: &str) -> Option<GatewayInfo> {
        self.gateways.get(gateway_id).map(|entry| entry.value().clone())
    }

    /// Every gateway ever seen, stale or not
    pub fn gateways(&self) -> Vec<GatewayInfo> {
        self.gateways.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn online_at(&self, now: u64) -> Vec<GatewayInfo> {
        let timeout = self.config.online_timeout.as_millis() as u64;
        self.gateways
            .iter()
            .filter(|entry| now.saturating_sub(entry.value().last_seen()) < timeout)
            .map(|entry| entry.value().clone())
            .collect()
    }

    // --- REPORTER ---

    fn start_reporter(&self) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.reporter.lock();
        if slot.is_some() {
            return;
        }

        let me = self.me.clone();
        *slot = Some(PeriodicTask::spawn("Reporter", self.config.report_interval, move || {
            let me = me.clone();
            async move {
                match me.upgrade() {
                    Some(registry) => {
                        registry.report().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        }));
    }

    /// Publishes the current online set, only while connected
    pub async fn report(&self) {
        let online = self.online_at(now_ms());
        if !self.is_connected() {
            return;
        }

        let message = match serde_json::to_vec(&online) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                tracing::error!("[PresenceRegistry] Failed to report online devices: {}", e);
                return;
            }
        };

        tracing::debug!("[PresenceRegistry] Reporting {} online gateways", online.len());
        if let Err(e) = self.session.transport().publish(&self.online_topic, message, REPORT_QOS).await {
            tracing::error!("[PresenceRegistry] Failed to report online devices: {}", e);
        }
    }

    pub fn reporter_running(&self) -> bool {
        self.reporter.lock().as_ref().is_some_and(PeriodicTask::is_running)
    }
}

// ==========================================
// TRANSPORT EVENTS
// ==========================================

#[async_trait]
impl TransportListener for PresenceRegistry {
    async fn message_arrived(&self, message: InboundMessage) {
        self.on_message(&message.topic, &message.payload);
    }

    async fn connection_lost(&self, cause: Option<TransportError>) {
        self.on_connection_lost(cause).await;
    }
}
