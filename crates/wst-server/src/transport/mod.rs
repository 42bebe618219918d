//! Client-facing transports that produce frame channels.

pub mod websocket;
