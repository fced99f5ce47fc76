//! FFI types exposed via uniffi

use std::path::Path;

use crate::coordinator::CoordinatorError;
use crate::player::{Player, PlayerError, SeekTolerance};
use crate::sync::{FileDescriptor, SessionRole, SyncSnapshot};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Invalid session code: {0}")]
    InvalidSessionCode(String),

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Error analyzing file: {0}")]
    FileAnalysis(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoordinatorError> for CoreError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::FileAnalysis(e) => CoreError::FileAnalysis(e.to_string()),
            CoordinatorError::Stopped => CoreError::Internal(e.to_string()),
        }
    }
}

/// File fingerprint exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct FileInfo {
    pub filename: String,
    pub checksum: String,
    pub file_size: i64,
    pub duration: f64,
}

impl From<&FileDescriptor> for FileInfo {
    fn from(f: &FileDescriptor) -> Self {
        Self {
            filename: f.filename.clone(),
            checksum: f.content_digest.clone(),
            file_size: f.file_size,
            duration: f.duration_seconds,
        }
    }
}

/// How this device is taking part
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SessionStatus {
    Idle,
    Hosting,
    Joined,
}

impl From<SessionRole> for SessionStatus {
    fn from(role: SessionRole) -> Self {
        match role {
            SessionRole::Idle => SessionStatus::Idle,
            SessionRole::Hosting => SessionStatus::Hosting,
            SessionRole::Joined => SessionStatus::Joined,
        }
    }
}

/// Sync state exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncStatus {
    pub local_file: Option<FileInfo>,
    pub remote_file: Option<FileInfo>,
    pub files_match: bool,
    pub status: SessionStatus,
    /// Current user-facing notice, if any
    pub notice: Option<String>,
    pub is_playing: bool,
    pub is_connected: bool,
}

impl From<&SyncSnapshot> for SyncStatus {
    fn from(s: &SyncSnapshot) -> Self {
        Self {
            local_file: s.local_file.as_ref().map(FileInfo::from),
            remote_file: s.remote_file.as_ref().map(FileInfo::from),
            files_match: s.files_match,
            status: s.role.into(),
            notice: s.notice.as_ref().map(|n| n.to_string()),
            is_playing: s.is_playing,
            is_connected: s.has_session,
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_state_changed(&self, state: SyncStatus);
    /// Called when the notice changes; `None` once it has been cleared
    fn on_notice(&self, notice: Option<String>);
    fn on_session_started(&self, code: String, is_host: bool);
    fn on_participant_joined(&self, peer_id: String);
    fn on_participant_left(&self, peer_id: String);
    fn on_error(&self, message: String);
}

/// Native video player, implemented by the app
#[uniffi::export(callback_interface)]
pub trait PlayerBridge: Send + Sync {
    /// Load or replace the current item; false if it can't be played
    fn load(&self, path: String) -> bool;
    fn play(&self);
    fn pause(&self);
    fn is_playing(&self) -> bool;
    fn position_seconds(&self) -> f64;
    fn seek(&self, seconds: f64, tolerance_before: f64, tolerance_after: f64);
}

/// Adapts the native bridge to [`Player`]
pub(crate) struct NativePlayer(pub Box<dyn PlayerBridge>);

impl Player for NativePlayer {
    fn load(&self, path: &Path) -> Result<(), PlayerError> {
        let path = path.to_string_lossy().into_owned();
        if self.0.load(path.clone()) {
            Ok(())
        } else {
            Err(PlayerError::Load(path))
        }
    }

    fn play(&self) {
        self.0.play();
    }

    fn pause(&self) {
        self.0.pause();
    }

    fn is_playing(&self) -> bool {
        self.0.is_playing()
    }

    fn position(&self) -> f64 {
        self.0.position_seconds()
    }

    fn seek(&self, seconds: f64, tolerance: SeekTolerance) {
        self.0.seek(seconds, tolerance.before, tolerance.after);
    }
}
