//! Playback collaborator
//!
//! The native video pipeline lives outside this crate. The coordinator drives
//! it through the [`Player`] trait.

use std::path::Path;
use thiserror::Error;

/// Errors reported by the native player
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Failed to load media: {0}")]
    Load(String),
}

/// How far a seek may land from the requested position, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekTolerance {
    pub before: f64,
    pub after: f64,
}

impl SeekTolerance {
    /// Frame-accurate seek
    pub const ZERO: SeekTolerance = SeekTolerance {
        before: 0.0,
        after: 0.0,
    };
}

/// Local playback handle
pub trait Player: Send + Sync {
    /// Load (or replace) the current item
    fn load(&self, path: &Path) -> Result<(), PlayerError>;
    fn play(&self);
    fn pause(&self);
    /// Whether the playback rate is above zero
    fn is_playing(&self) -> bool;
    /// Current position in seconds
    fn position(&self) -> f64;
    fn seek(&self, seconds: f64, tolerance: SeekTolerance);
}
