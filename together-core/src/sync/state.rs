//! Sync State Management

use std::fmt;
use std::path::PathBuf;

use super::protocol::FileDescriptor;
use super::reconcile::FileReconciliation;

/// How the current session was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionRole {
    /// No session yet
    #[default]
    Idle,
    /// We started sharing
    Hosting,
    /// We joined someone else's session
    Joined,
}

impl SessionRole {
    pub fn is_host(&self) -> bool {
        matches!(self, SessionRole::Hosting)
    }

    pub fn is_participant(&self) -> bool {
        matches!(self, SessionRole::Joined)
    }

    /// Check if we're in any session
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionRole::Idle)
    }
}

/// The single user-facing notice the coordinator retains
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A peer shared a file and we haven't picked one yet
    SelectRemoteFile { filename: String },
    /// Digests differ but durations are close
    SimilarFiles,
    /// Digests and durations differ
    DifferentFiles { local: String, remote: String },
    /// Reading the selected file failed
    AnalysisFailed(String),
    /// Telling peers about our file failed
    ShareFailed(String),
    /// The player could not load the selected file
    PlaybackFailed(String),
    /// Starting or joining a session failed
    SessionFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SelectRemoteFile { filename } => write!(
                f,
                "Other participant is watching {}. Please select this file to watch together.",
                filename
            ),
            Notice::SimilarFiles => write!(
                f,
                "Warning: Files appear similar but not identical. Playback may not match perfectly."
            ),
            Notice::DifferentFiles { local, remote } => write!(
                f,
                "Files don't match. You're watching '{}' but other participant has '{}'. Please select the same file.",
                local, remote
            ),
            Notice::AnalysisFailed(reason) => write!(f, "Error analyzing file: {}", reason),
            Notice::ShareFailed(reason) => write!(f, "Failed to share file info: {}", reason),
            Notice::PlaybackFailed(reason) => write!(f, "Failed to play file: {}", reason),
            Notice::SessionFailed(reason) => write!(f, "Failed to start sharing: {}", reason),
        }
    }
}

/// Coordinator-owned state for the current session
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub local_file: Option<FileDescriptor>,
    pub remote_file: Option<FileDescriptor>,
    /// Only true while both descriptors are present with equal digests
    pub files_match: bool,
    pub role: SessionRole,
    /// Path currently loaded into the player
    pub selected_path: Option<PathBuf>,
    notice: Option<Notice>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Replace any unacknowledged notice
    pub fn set_notice(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    pub fn acknowledge_notice(&mut self) {
        self.notice = None;
    }

    /// Move out of `Idle`. Returns false if a role was already established.
    pub fn enter_session(&mut self, role: SessionRole) -> bool {
        if self.role.is_active() || !role.is_active() {
            return false;
        }
        self.role = role;
        true
    }

    /// Record a new local file, replacing any previous one
    pub fn update_local_file(&mut self, file: FileDescriptor, path: PathBuf) {
        self.local_file = Some(file);
        self.selected_path = Some(path);
        self.files_match = false;
    }

    /// Record the latest descriptor a peer shared
    pub fn update_remote_file(&mut self, file: FileDescriptor) {
        self.remote_file = Some(file);
        self.files_match = false;
    }

    /// Apply the outcome of comparing local and remote files
    pub fn apply_reconciliation(&mut self, result: FileReconciliation) {
        self.files_match = result.files_match
            && self.local_file.is_some()
            && self.remote_file.is_some();
        self.notice = result.notice;
    }

    /// Read-only view for observers
    pub fn snapshot(&self, is_playing: bool, has_session: bool) -> SyncSnapshot {
        SyncSnapshot {
            local_file: self.local_file.clone(),
            remote_file: self.remote_file.clone(),
            files_match: self.files_match,
            role: self.role,
            notice: self.notice.clone(),
            is_playing,
            has_session,
            selected_path: self.selected_path.clone(),
        }
    }
}

/// What UI observers see of the coordinator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub local_file: Option<FileDescriptor>,
    pub remote_file: Option<FileDescriptor>,
    pub files_match: bool,
    pub role: SessionRole,
    pub notice: Option<Notice>,
    pub is_playing: bool,
    pub has_session: bool,
    pub selected_path: Option<PathBuf>,
}
