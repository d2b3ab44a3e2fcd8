//! MqttTransport: rumqttc session with fail-over brokers
//!
//! Lifecycle:
//! - First `connect` creates the client handle (AsyncClient + EventLoop).
//!   Later calls reuse it.
//! - Each `connect` walks the broker list in order, waiting up to
//!   `connection_timeout` for CONNACK on each.
//! - Once connected, a driver task owns the event loop: it forwards inbound
//!   publishes to the listener and reports the loss of the session.
//! - `disconnect` returns once DISCONNECT is on the wire and the driver has
//!   dropped the socket, so the next `connect` dials a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::config::{BrokerAddress, ChannelConfig, Credentials};
use crate::error::TransportError;
use crate::middleware::transport::tls::TlsMaterial;
use crate::middleware::transport::{InboundMessage, Transport, TransportListener};

const REQUEST_CHANNEL_CAPACITY: usize = 1000;

// ==========================================
// SESSION OPTIONS
// ==========================================

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    /// false keeps subscriptions and in-flight messages on the broker across reconnects
    pub clean_session: bool,
    pub brokers: Vec<BrokerAddress>,
    pub connection_timeout: Duration,
    pub keep_alive: Duration,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsMaterial>,
    pub max_inflight: Option<u16>,
}

impl SessionOptions {
    pub fn from_config(config: &ChannelConfig, client_id: impl Into<String>, clean_session: bool) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session,
            brokers: config.broker_list(),
            connection_timeout: config.connection_timeout,
            keep_alive: config.alive_interval,
            credentials: config.credentials.clone(),
            tls: config.tls.clone(),
            max_inflight: None,
        }
    }

    pub fn with_max_inflight(mut self, max_inflight: u16) -> Self {
        self.max_inflight = Some(max_inflight);
        self
    }

    fn mqtt_options(&self, broker: &BrokerAddress) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), broker.host.clone(), broker.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        if let Some(max) = self.max_inflight {
            options.set_inflight(max);
        }
        if let Some(creds) = &self.credentials {
            options.set_credentials(creds.username.clone(), creds.password.clone());
        }
        if broker.uses_tls() {
            if let Some(tls) = &self.tls {
                options.set_transport(rumqttc::Transport::tls_with_config(tls.to_configuration()));
            }
        }
        options
    }
}

// ==========================================
// TRANSPORT
// ==========================================

type ListenerSlot = Arc<RwLock<Option<Weak<dyn TransportListener>>>>;

pub struct MqttTransport {
    session: SessionOptions,
    brokers: Mutex<Vec<BrokerAddress>>,
    client: Mutex<Option<AsyncClient>>,
    eventloop: Arc<AsyncMutex<Option<EventLoop>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    listener: ListenerSlot,
    connected: Arc<AtomicBool>,
    // Set by disconnect() so the driver does not report a loss
    closing: Arc<AtomicBool>,
}

impl MqttTransport {
    pub fn new(session: SessionOptions) -> Self {
        let brokers = session.brokers.clone();
        Self {
            session,
            brokers: Mutex::new(brokers),
            client: Mutex::new(None),
            eventloop: Arc::new(AsyncMutex::new(None)),
            driver: Mutex::new(None),
            listener: Arc::new(RwLock::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.session.client_id
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.client.lock().clone().ok_or(TransportError::NotConnected)
    }

    fn spawn_driver(&self) -> JoinHandle<()> {
        let eventloop = self.eventloop.clone();
        let listener = self.listener.clone();
        let connected = self.connected.clone();
        let closing = self.closing.clone();

        tokio::spawn(async move {
            let mut guard = eventloop.lock_owned().await;
            let cause = loop {
                let Some(el) = guard.as_mut() else {
                    break None;
                };
                match el.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(sink) = upgrade(&listener) {
                            sink.message_arrived(InboundMessage {
                                topic: publish.topic.clone(),
                                payload: publish.payload.clone(),
                                duplicate: publish.dup,
                            })
                            .await;
                        }
                    }
                    // DISCONNECT is flushed before this event is yielded
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        el.clean();
                        break None;
                    }
                    Ok(_) => {}
                    Err(e) => break Some(e),
                }
            };

            connected.store(false, Ordering::SeqCst);
            // Release the event loop before the listener tries to reconnect
            drop(guard);

            if closing.load(Ordering::SeqCst) {
                tracing::debug!("[MqttTransport] Session closed");
                return;
            }

            let cause = cause.map(|e| TransportError::ConnectionLost(e.to_string()));
            tracing::warn!("[MqttTransport] Session lost: {:?}", cause);
            if let Some(sink) = upgrade(&listener) {
                sink.connection_lost(cause).await;
            }
        })
    }
}

fn upgrade(slot: &ListenerSlot) -> Option<Arc<dyn TransportListener>> {
    slot.read().as_ref().and_then(Weak::upgrade)
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn set_listener(&self, listener: Weak<dyn TransportListener>) {
        *self.listener.write() = Some(listener);
    }

    fn set_broker(&self, uri: &str) -> Result<(), TransportError> {
        let address = BrokerAddress::parse(uri).map_err(|e| TransportError::Client(e.to_string()))?;
        if address.uses_tls() && self.session.tls.is_none() {
            return Err(TransportError::Client(format!("{} requires TLS material", address)));
        }
        let mut brokers = self.brokers.lock();
        brokers.retain(|b| b != &address);
        brokers.insert(0, address);
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let brokers = self.brokers.lock().clone();
        let first = brokers
            .first()
            .cloned()
            .ok_or_else(|| TransportError::Connection("no broker configured".to_string()))?;

        let mut guard = self.eventloop.lock().await;
        if guard.is_none() {
            let (client, eventloop) = AsyncClient::new(self.session.mqtt_options(&first), REQUEST_CHANNEL_CAPACITY);
            *self.client.lock() = Some(client);
            *guard = Some(eventloop);
        }
        let Some(eventloop) = guard.as_mut() else {
            return Err(TransportError::Connection("event loop unavailable".to_string()));
        };
        // Drops a socket left behind by a driver that was aborted mid-session
        eventloop.clean();

        self.closing.store(false, Ordering::SeqCst);
        let mut last_error = TransportError::Connection("no broker tried".to_string());
        for broker in &brokers {
            eventloop.mqtt_options = self.session.mqtt_options(broker);
            tracing::debug!("[MqttTransport] Trying {} as {}", broker, self.session.client_id);

            match tokio::time::timeout(self.session.connection_timeout, await_connack(eventloop)).await {
                Ok(Ok(())) => {
                    tracing::info!("[MqttTransport] Connected to {}", broker);
                    self.connected.store(true, Ordering::SeqCst);
                    drop(guard);
                    *self.driver.lock() = Some(self.spawn_driver());
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::warn!("[MqttTransport] {} refused the session: {}", broker, e);
                    last_error = TransportError::Connection(e.to_string());
                }
                Err(_) => {
                    tracing::warn!("[MqttTransport] {} did not answer within {:?}", broker, self.session.connection_timeout);
                    last_error = TransportError::Timeout;
                }
            }
        }
        Err(last_error)
    }

    async fn disconnect(&self, timeout: Duration) -> Result<(), TransportError> {
        let client = self.client()?;
        self.closing.store(true, Ordering::SeqCst);
        let mut driver = self.driver.lock().take();

        let result = tokio::time::timeout(timeout, async {
            client.disconnect().await.map_err(|e| TransportError::Client(e.to_string()))?;
            if let Some(handle) = driver.as_mut() {
                handle.await.map_err(|e| TransportError::Client(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .unwrap_or(Err(TransportError::Timeout));

        if result.is_err() {
            if let Some(handle) = driver {
                tracing::warn!("[MqttTransport] Driver did not stop in time, aborting it");
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        result
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), TransportError> {
        let client = self.client()?;
        client
            .try_publish(topic, qos, false, payload.to_vec())
            .map_err(|e| self.request_error(e))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.client()?;
        client.try_subscribe(topic, qos).map_err(|e| self.request_error(e))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let client = self.client()?;
        client.try_unsubscribe(topic).map_err(|e| self.request_error(e))
    }
}

impl MqttTransport {
    // A request rejected while the driver is down means the session is gone
    fn request_error(&self, e: rumqttc::ClientError) -> TransportError {
        if self.connected.load(Ordering::SeqCst) {
            TransportError::Client(e.to_string())
        } else {
            TransportError::ConnectionLost(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::config::ChannelRole;

    fn session() -> SessionOptions {
        let config = ChannelConfig::from_options(ChannelRole::Gateway, &HashMap::new()).unwrap();
        SessionOptions::from_config(&config, "gw-test", false)
    }

    #[tokio::test]
    async fn requests_fail_before_connect() {
        let transport = MqttTransport::new(session());
        let err = transport.publish("t", Bytes::from("x"), QoS::AtLeastOnce).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert!(transport.subscribe("t", QoS::AtMostOnce).await.is_err());
    }

    #[test]
    fn set_broker_moves_address_to_front() {
        let transport = MqttTransport::new(session());
        transport.set_broker("tcp://other:1884").unwrap();
        let brokers = transport.brokers.lock().clone();
        assert_eq!(brokers[0].to_string(), "tcp://other:1884");
        assert!(transport.set_broker("not a uri").is_err());
        assert!(transport.set_broker("ssl://secure:8883").is_err());
    }
}
