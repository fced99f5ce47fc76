//! Network event and state change handlers

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorHandle;
use crate::network::NetworkEvent;
use crate::sync::SyncSnapshot;

use super::types::{SessionCallback, SyncStatus};

pub(crate) type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// Handle a network event
pub(crate) fn handle_network_event(
    event: NetworkEvent,
    callback: &SharedCallback,
    coordinator: &CoordinatorHandle,
) {
    match event {
        NetworkEvent::Ready { peer_id } => {
            info!("Network ready with peer ID: {}", peer_id);
        }

        NetworkEvent::PeerSubscribed { peer_id } => {
            // Late participants missed our earlier file announcement
            let _ = coordinator.peer_joined();
            if let Some(cb) = callback.read().as_ref() {
                cb.on_participant_joined(peer_id);
            }
        }

        NetworkEvent::PeerUnsubscribed { peer_id } => {
            if let Some(cb) = callback.read().as_ref() {
                cb.on_participant_left(peer_id);
            }
        }

        NetworkEvent::Error(e) => {
            warn!("Network error: {}", e);
            let _ = coordinator.report_session_failure(e.clone());
            if let Some(cb) = callback.read().as_ref() {
                cb.on_error(e);
            }
        }
    }
}

/// Pump network events until the network task ends
pub(crate) async fn run_network_events(
    mut events: mpsc::UnboundedReceiver<NetworkEvent>,
    callback: SharedCallback,
    coordinator: CoordinatorHandle,
) {
    while let Some(event) = events.recv().await {
        handle_network_event(event, &callback, &coordinator);
    }
    debug!("Network event stream ended");
}

/// Relay coordinator state changes to the native callback
pub(crate) async fn forward_state_changes(
    mut updates: watch::Receiver<SyncSnapshot>,
    callback: SharedCallback,
) {
    let mut last_notice = None;

    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();

        let Some(cb) = callback.read().clone() else {
            continue;
        };

        let notice = snapshot.notice.as_ref().map(|n| n.to_string());
        if notice != last_notice {
            cb.on_notice(notice.clone());
            last_notice = notice;
        }
        cb.on_state_changed(SyncStatus::from(&snapshot));
    }
    debug!("State forwarding ended");
}
