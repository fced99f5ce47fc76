//! Sync Protocol Messages

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A point-in-time playback position, broadcast while playing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackClockSample {
    /// Playback position in seconds
    pub seconds: f64,
}

/// Identity of a locally selected video file
///
/// `checksum` only covers a fixed-size prefix of the file, so two files that
/// share that prefix are considered identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Last path component of the selected file
    pub filename: String,
    /// Lowercase hex SHA-256 of the file prefix
    #[serde(rename = "checksum")]
    pub content_digest: String,
    /// Total size in bytes
    pub file_size: i64,
    /// Container duration in seconds
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
}

/// Messages exchanged between participants of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Periodic playback position from a playing peer
    Clock(PlaybackClockSample),
    /// A peer picked a new local file
    File(FileDescriptor),
}

/// The payload did not match any known message shape
#[derive(Debug, Error)]
#[error("Unrecognized sync message: {0}")]
pub struct DecodeMismatch(#[from] serde_json::Error);

impl SyncMessage {
    /// Serialize to the tagged wire format
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a payload received from the session channel.
    ///
    /// Tagged messages are tried first; untagged payloads from older peers
    /// fall back to matching the bare file descriptor, then the bare clock
    /// sample.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeMismatch> {
        let tagged_err = match serde_json::from_slice::<SyncMessage>(bytes) {
            Ok(message) => return Ok(message),
            Err(e) => e,
        };

        if let Ok(file) = serde_json::from_slice::<FileDescriptor>(bytes) {
            return Ok(SyncMessage::File(file));
        }

        if let Ok(sample) = serde_json::from_slice::<PlaybackClockSample>(bytes) {
            return Ok(SyncMessage::Clock(sample));
        }

        Err(DecodeMismatch(tagged_err))
    }

    /// The clock sample carried by this message, if any
    pub fn as_clock(&self) -> Option<PlaybackClockSample> {
        match self {
            SyncMessage::Clock(sample) => Some(*sample),
            SyncMessage::File(_) => None,
        }
    }

    /// The file descriptor carried by this message, if any
    pub fn into_file(self) -> Option<FileDescriptor> {
        match self {
            SyncMessage::File(file) => Some(file),
            SyncMessage::Clock(_) => None,
        }
    }
}

impl From<PlaybackClockSample> for SyncMessage {
    fn from(sample: PlaybackClockSample) -> Self {
        SyncMessage::Clock(sample)
    }
}

impl From<FileDescriptor> for SyncMessage {
    fn from(file: FileDescriptor) -> Self {
        SyncMessage::File(file)
    }
}
