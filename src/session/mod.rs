//! Capture sessions
//!
//! A [`Session`] owns one source and one decoder stack and walks them
//! through `Idle -> Arming -> Waiting -> Capturing -> Decoding -> Ready`.
//! Progress and decoder failures are published on a bounded
//! [`StatusChannel`] that never blocks the capture path.

mod coordinator;
mod state;
mod status;

pub use coordinator::Session;
pub use state::SessionState;
pub use status::{StatusChannel, StatusEvent};
