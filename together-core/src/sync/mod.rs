//! Sync Engine
//!
//! Wire protocol, coordinator state, and the reconciliation policies that
//! decide when to seek and whether two files are the same video.

mod protocol;
mod reconcile;
mod state;

pub use protocol::*;
pub use reconcile::*;
pub use state::*;
