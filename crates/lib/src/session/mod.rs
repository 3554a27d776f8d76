//! Session layer: the provider seam and the connection lifecycle.
//!
//! The provider trait hides the chat protocol; the lifecycle manager owns the
//! singleton session's connectivity and reconnection. All provider events
//! flow through one mpsc channel into the dispatch loop.

mod lifecycle;
mod loopback;
mod provider;

pub use lifecycle::{ConnectionState, LifecycleConfig, LifecycleManager};
pub use loopback::{LoopbackProvider, SentRecord};
pub use provider::{CloseReason, GroupInfo, OutboundContent, SessionEvent, SessionProvider};
