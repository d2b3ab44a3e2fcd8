mod gateway_channel;
pub use gateway_channel::{
    GatewayChannel, MessageHandler, PublishOptions, SubscribeOptions, DISCONNECT_TIMEOUT, MAX_IN_FLIGHT,
};
