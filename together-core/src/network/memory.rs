//! In-process session transport
//!
//! Every channel joined to the same [`MemoryHub`] receives what the others
//! send. Useful for embedding the coordinator behind a transport that lives
//! outside Rust, and for tests.

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::channel::{ChannelError, SessionChannel, INBOUND_CAPACITY};

#[derive(Default)]
struct HubInner {
    next_id: u64,
    members: HashMap<u64, broadcast::Sender<Vec<u8>>>,
}

/// A shared in-memory session
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant
    pub fn join(&self) -> MemoryChannel {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.members.insert(id, inbound.clone());
        debug!("Participant {} joined memory session", id);

        MemoryChannel {
            id,
            hub: self.clone(),
            inbound,
        }
    }

    /// Number of participants currently joined
    pub fn participant_count(&self) -> usize {
        self.inner.lock().members.len()
    }
}

/// One participant's end of a [`MemoryHub`]
pub struct MemoryChannel {
    id: u64,
    hub: MemoryHub,
    inbound: broadcast::Sender<Vec<u8>>,
}

impl MemoryChannel {
    /// Leave the session. Later sends fail with [`ChannelError::Closed`].
    pub fn leave(&self) {
        if self.hub.inner.lock().members.remove(&self.id).is_some() {
            debug!("Participant {} left memory session", self.id);
        }
    }
}

impl SessionChannel for MemoryChannel {
    fn send(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<(), ChannelError>> {
        let inner = self.hub.inner.lock();
        if !inner.members.contains_key(&self.id) {
            return future::ready(Err(ChannelError::Closed)).boxed();
        }

        for (_, member) in inner.members.iter().filter(|(id, _)| **id != self.id) {
            // A participant with no active listeners simply misses the payload
            let _ = member.send(payload.clone());
        }
        future::ready(Ok(())).boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inbound.subscribe()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.leave();
    }
}
