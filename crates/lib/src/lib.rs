//! Ponte core library — session lifecycle, message correlation, and the
//! panel-facing gateway shared by the CLI.

pub mod classify;
pub mod config;
pub mod correlate;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod outbound;
pub mod relay;
pub mod session;
