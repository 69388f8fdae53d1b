//! WebSocket transport and wire protocol

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;
