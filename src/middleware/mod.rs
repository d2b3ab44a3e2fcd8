//! Overlay middleware: the gateway-side channel, the presence registry
//! and the pieces they share (topics, payload cipher, session, transport).

pub mod cipher;
pub mod gateway;
pub mod periodic;
pub mod registry;
pub mod session;
pub mod topics;
pub mod transport;
pub mod types;
