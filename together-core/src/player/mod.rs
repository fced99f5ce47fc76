//! Local playback
//!
//! The native player the coordinator drives, and the container probe used to
//! read a file's duration before it is loaded.

mod bridge;
mod probe;

pub use bridge::{Player, PlayerError, SeekTolerance};
pub use probe::{movie_duration, IsoBmffProbe, MediaProbe, ProbeError};

#[cfg(test)]
pub(crate) use bridge::testing::FakePlayer;
#[cfg(test)]
pub(crate) use probe::testing as mp4_fixtures;
