//! IRC protocol layer: wire codec, sessions, handshakes and the connection manager.

pub mod cap;
pub mod codec;
pub mod commands;
pub mod connection;
pub mod manager;
pub mod message;
pub mod network;
pub mod registration;
pub mod sasl;
