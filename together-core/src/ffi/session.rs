//! Session implementation for FFI

use parking_lot::RwLock;
use std::sync::{Arc, Once};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::coordinator::{CoordinatorConfig, CoordinatorHandle, SyncCoordinator};
use crate::network::{NetworkHandle, NetworkManager, SessionCode};
use crate::player::IsoBmffProbe;
use crate::sync::SessionRole;

use super::handlers::{forward_state_changes, run_network_events, SharedCallback};
use super::types::*;

static TRACING_INIT: Once = Once::new();

const DEFAULT_LOG_FILTER: &str = "together_core=debug,libp2p_mdns=info,libp2p_gossipsub=info";

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    coordinator: CoordinatorHandle,
    callback: SharedCallback,
    network_handle: RwLock<Option<NetworkHandle>>,
    session_code: RwLock<Option<SessionCode>>,
}

#[uniffi::export]
impl Session {
    /// Create a new session driving the given native player
    #[uniffi::constructor]
    pub fn new(player: Box<dyn PlayerBridge>) -> Result<Arc<Self>, CoreError> {
        TRACING_INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
            let _ = tracing_subscriber::fmt()
                .with_ansi(false) // Xcode console
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing together-core session");

        let runtime = Runtime::new().map_err(|e| CoreError::Internal(e.to_string()))?;

        let coordinator = {
            let _guard = runtime.enter();
            SyncCoordinator::spawn(
                Arc::new(NativePlayer(player)),
                Arc::new(IsoBmffProbe),
                CoordinatorConfig::default(),
            )
        };

        let callback: SharedCallback = Arc::new(RwLock::new(None));
        runtime.spawn(forward_state_changes(
            coordinator.subscribe(),
            Arc::clone(&callback),
        ));

        Ok(Arc::new(Self {
            runtime,
            coordinator,
            callback,
            network_handle: RwLock::new(None),
            session_code: RwLock::new(None),
        }))
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Start sharing; returns the code others enter to join
    pub fn start_sharing(&self) -> Result<String, CoreError> {
        let code = SessionCode::random();
        self.open_session(code.clone(), SessionRole::Hosting)?;
        Ok(code.to_string())
    }

    /// Join the session identified by `code`
    pub fn join_session(&self, code: String) -> Result<(), CoreError> {
        let code = SessionCode::parse(&code)
            .map_err(|e| CoreError::InvalidSessionCode(e.0))?;
        self.open_session(code, SessionRole::Joined)
    }

    /// Fingerprint and load a picked file, then tell the other participants
    pub fn select_local_file(&self, path: String) -> Result<FileInfo, CoreError> {
        let file = self
            .runtime
            .block_on(self.coordinator.select_local_file(path))?;
        Ok(FileInfo::from(&file))
    }

    pub fn toggle_play_pause(&self) -> Result<(), CoreError> {
        Ok(self.coordinator.toggle_play_pause()?)
    }

    /// Dismiss the current notice
    pub fn acknowledge_notice(&self) -> Result<(), CoreError> {
        Ok(self.coordinator.acknowledge_notice()?)
    }

    /// Current sync state
    pub fn get_sync_state(&self) -> Result<SyncStatus, CoreError> {
        let snapshot = self.runtime.block_on(self.coordinator.snapshot())?;
        Ok(SyncStatus::from(&snapshot))
    }

    /// Code of the current session, formatted for display
    pub fn session_code(&self) -> Option<String> {
        self.session_code.read().as_ref().map(|c| c.to_string())
    }
}

impl Session {
    fn open_session(&self, code: SessionCode, role: SessionRole) -> Result<(), CoreError> {
        {
            let mut current = self.session_code.write();
            if current.is_some() {
                return Err(CoreError::AlreadyInSession);
            }
            *current = Some(code.clone());
        }

        let result = self.ensure_network_running().and_then(|handle| {
            handle
                .open_session(&code)
                .map_err(|e| CoreError::NetworkError(e.to_string()))?;
            self.coordinator
                .attach_session(Arc::new(handle), role)
                .map_err(CoreError::from)
        });

        match &result {
            Ok(()) => {
                info!("Session {} opened as {:?}", code, role);
                if let Some(cb) = self.callback.read().as_ref() {
                    cb.on_session_started(code.to_string(), role.is_host());
                }
            }
            Err(e) => {
                warn!("Failed to open session {}: {}", code, e);
                *self.session_code.write() = None;
                let _ = self.coordinator.report_session_failure(e.to_string());
            }
        }
        result
    }

    /// Ensure the network is running, start it if not
    fn ensure_network_running(&self) -> Result<NetworkHandle, CoreError> {
        if let Some(handle) = self.network_handle.read().as_ref() {
            return Ok(handle.clone());
        }

        let (handle, events) = self
            .runtime
            .block_on(async { NetworkManager::new().start() })
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        self.runtime.spawn(run_network_events(
            events,
            Arc::clone(&self.callback),
            self.coordinator.clone(),
        ));

        *self.network_handle.write() = Some(handle.clone());
        Ok(handle)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.coordinator.shutdown();
        if let Some(handle) = self.network_handle.read().as_ref() {
            handle.shutdown();
        }
    }
}
