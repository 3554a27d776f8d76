//! Gateway: the panel-facing HTTP control plane.
//!
//! One port serves the send endpoint, the connectivity summary, the live
//! event stream, and the reporting hooks.

mod server;

pub use server::{run_relay, RelayState};
