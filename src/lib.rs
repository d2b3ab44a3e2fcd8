pub mod config;
pub mod error;
pub mod middleware;
pub mod utils;

pub use config::{BrokerAddress, ChannelConfig, ChannelRole};
pub use error::{CipherError, ConfigError, TransportError};
pub use middleware::gateway::{GatewayChannel, MessageHandler, PublishOptions, SubscribeOptions};
pub use middleware::registry::PresenceRegistry;
pub use middleware::session::ConnectionState;
pub use middleware::types::{DeviceInfo, GatewayInfo};
