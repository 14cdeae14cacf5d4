//! # Peer Transports
//!
//! Protocol runs talk to Peer B and the TTP through two small seams:
//!
//! - [`PeerChannel`]: one JSON request, one JSON reply. The engine holds one
//!   for Peer B and one for the TTP.
//! - [`NotificationSource`]: a stream of pub/sub frames from the TTP's
//!   notification service. Informational only; the engine never advances a
//!   protocol run because of a notification.
//!
//! Concrete implementations live in [`http`] (reqwest) and [`pubsub`]
//! (tokio-tungstenite). Tests plug in in-memory mocks.

pub mod http;
pub mod pubsub;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use http::{HttpPeerChannel, SecretSharingClient, SigningServiceClient};
pub use pubsub::{publish, Notification, PubSubClient, PubSubFrame, PubSubRequest};

/// Transport failures. Passed through the protocol layer unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("{endpoint} answered HTTP {status}: {body}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid payload from {endpoint}: {reason}")]
    InvalidPayload { endpoint: String, reason: String },

    #[error("channel to {0} is closed")]
    Closed(String),
}

/// A request/response channel to one counterpart.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Human-readable endpoint name for logs and errors.
    fn endpoint(&self) -> &str;

    /// Send `request` and wait for the counterpart's reply.
    async fn exchange(&self, request: Value) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: PeerChannel + ?Sized> PeerChannel for Arc<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    async fn exchange(&self, request: Value) -> Result<Value, TransportError> {
        (**self).exchange(request).await
    }
}

/// Something that fans out asynchronous notifications.
pub trait NotificationSource: Send + Sync {
    /// A new receiver that sees every notification from now on.
    fn subscribe(&self) -> broadcast::Receiver<Notification>;
}
