//! Session channel abstraction
//!
//! A session carries opaque byte payloads to every other participant. The
//! coordinator only depends on this trait, so any transport can back it.

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each inbound fan-out buffer
pub const INBOUND_CAPACITY: usize = 64;

/// Errors that can occur when sending on a session channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Session channel closed")]
    Closed,

    #[error("Not in a session")]
    NotInSession,

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Broadcast/receive channel bound to one group session
pub trait SessionChannel: Send + Sync + 'static {
    /// Send `payload` to all other participants
    fn send(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<(), ChannelError>>;

    /// A new receiver that observes every inbound payload from now on
    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>>;
}
