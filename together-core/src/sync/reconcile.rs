//! Reconciliation policies
//!
//! Pure decisions the coordinator applies to its state: whether a remote clock
//! sample warrants a seek, and how confident we are that two participants
//! picked the same file.

use super::protocol::{FileDescriptor, PlaybackClockSample};
use super::state::Notice;

/// Clock offset (seconds) beyond which local playback jumps to the remote position
pub const SEEK_THRESHOLD_SECS: f64 = 2.0;

/// Duration difference (seconds) under which mismatched digests are still "similar"
pub const SIMILAR_DURATION_SECS: f64 = 1.0;

/// Outcome of comparing the local and remote file descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct FileReconciliation {
    pub files_match: bool,
    /// `None` clears any current notice
    pub notice: Option<Notice>,
}

/// Compare two descriptors.
///
/// Never blocks playback; a mismatch only produces a notice whose severity
/// depends on how close the durations are.
pub fn reconcile_files(
    local: &FileDescriptor,
    remote: &FileDescriptor,
    similar_duration_secs: f64,
) -> FileReconciliation {
    if local.content_digest == remote.content_digest {
        return FileReconciliation {
            files_match: true,
            notice: None,
        };
    }

    let duration_diff = (local.duration_seconds - remote.duration_seconds).abs();
    let notice = if duration_diff < similar_duration_secs {
        Notice::SimilarFiles
    } else {
        Notice::DifferentFiles {
            local: local.filename.clone(),
            remote: remote.filename.clone(),
        }
    };

    FileReconciliation {
        files_match: false,
        notice: Some(notice),
    }
}

/// Decide whether to seek in response to a remote clock sample.
///
/// Returns the target position when the offset exceeds `threshold_secs`.
/// Smaller offsets are left alone to avoid seeking on every sample.
pub fn clock_correction(
    local_position: f64,
    sample: PlaybackClockSample,
    threshold_secs: f64,
) -> Option<f64> {
    let delta = sample.seconds - local_position;
    if delta.abs() > threshold_secs {
        Some(sample.seconds)
    } else {
        None
    }
}
