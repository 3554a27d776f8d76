//! Error taxonomy for the relay.
//!
//! `SendError` is the gateway-facing outcome of an outbound send; the gateway
//! maps each variant to an HTTP status. `ProviderError` is the provider-seam
//! error surfaced by `SessionProvider` implementations.

use thiserror::Error;

/// Failure of an outbound send as seen by the gateway.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("invalid destination")]
    InvalidDestination,
    #[error("provider error: {0}")]
    Provider(String),
}

/// Failure surfaced across the `SessionProvider` seam.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("open failed: {0}")]
    Open(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("timed out")]
    Timeout,
}
