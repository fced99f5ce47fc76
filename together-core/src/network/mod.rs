//! Session Messenger
//!
//! The byte channel participants share, plus the transports behind it.

mod behaviour;
mod channel;
mod memory;
mod session_code;

pub use behaviour::{NetworkConfig, NetworkError, NetworkEvent, NetworkHandle, NetworkManager};
pub use channel::{ChannelError, SessionChannel, INBOUND_CAPACITY};
pub use memory::{MemoryChannel, MemoryHub};
pub use session_code::{InvalidSessionCode, SessionCode};
