//! Opaque duplex connection handle
//!
//! The transport side owns the receiving half of a bounded outbound queue and
//! a writer task; everything else holds a cheap clonable [`Connection`].

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound frame for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue is full")]
    Full,

    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    shutdown: Arc<Notify>,
}

impl Connection {
    /// New connection plus the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: Uuid::new_v4(),
            tx,
            shutdown: Arc::new(Notify::new()),
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Non-blocking write; the queue bound is the only back-pressure
    pub fn send_text(&self, payload: String) -> Result<(), SendError> {
        self.tx.try_send(Outbound::Text(payload)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask both halves of the transport to stop
    pub fn close(&self) {
        let _ = self.tx.try_send(Outbound::Close);
        self.shutdown.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}
