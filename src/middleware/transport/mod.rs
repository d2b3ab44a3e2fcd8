//! Transport: the broker collaborator seen by the channels
//!
//! The channels only need blocking-style connect/disconnect, publish /
//! subscribe / unsubscribe with a QoS, duplicate flags on inbound messages
//! and a connection-lost notification. `MqttTransport` provides them on
//! top of rumqttc; tests plug in an in-memory implementation.

pub mod mqtt;
pub mod tls;

use std::sync::Weak;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;

use crate::error::TransportError;

pub use mqtt::{MqttTransport, SessionOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Set by the broker when this is a redelivery
    pub duplicate: bool,
}

/// Receives events on the transport's own delivery task
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn message_arrived(&self, message: InboundMessage);

    /// Called once per lost session. Not called after an explicit disconnect.
    async fn connection_lost(&self, cause: Option<TransportError>);
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Registers the event sink. Held weakly so the owner can be dropped.
    fn set_listener(&self, listener: Weak<dyn TransportListener>);

    /// Overrides the primary broker address for subsequent attempts
    fn set_broker(&self, uri: &str) -> Result<(), TransportError>;

    /// Establishes a session and waits for the broker's acknowledgment
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self, timeout: Duration) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
}
