//! Watch Together - Core Library
//!
//! Keeps local video playback in step across the participants of a group
//! session: periodic clock samples, seek reconciliation, and file identity
//! checks so everyone knows whether they picked the same video.

pub mod coordinator;
pub mod ffi;
pub mod fingerprint;
pub mod network;
pub mod player;
pub mod sync;

// Re-exports for convenience
pub use coordinator::{CoordinatorConfig, CoordinatorError, CoordinatorHandle, SyncCoordinator};
pub use network::{MemoryHub, SessionChannel, SessionCode};
pub use sync::{FileDescriptor, Notice, PlaybackClockSample, SessionRole, SyncMessage, SyncSnapshot};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
