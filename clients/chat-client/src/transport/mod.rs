//! Frame transports.
//!
//! A transport only moves JSON text frames. The session owns the protocol:
//! when `inbound` ends the connection is considered lost.

mod memory;
mod websocket;

pub use memory::{InMemoryTransport, ServerLink};
pub use websocket::WebSocketTransport;

use crate::error::ClientError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Client half of an open connection.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<TransportLink, ClientError>;
}
