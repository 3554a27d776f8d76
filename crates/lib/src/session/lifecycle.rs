//! Connection lifecycle: keeps the singleton session open for the life of
//! the process.
//!
//! Reconnects are serialized through the connection state itself: `start`
//! while the state is `Connecting` or `Open` is a no-op, so at most one
//! connect sequence runs at a time. A fixed short delay runs before every
//! reconnect attempt; there is no backoff and no retry cap. A logged-out
//! close purges credentials first so the provider starts a fresh pairing
//! challenge; every other close reason keeps credentials and reconnects
//! as-is.

use crate::error::ProviderError;
use crate::session::provider::{CloseReason, OutboundContent, SessionEvent, SessionProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Connectivity of the singleton session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Lifecycle tunables. Defaults match production; tests shrink the delay.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Timeout for one provider open attempt (also applied to sends).
    pub open_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(2000),
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Owns the session's connectivity and drives reconnection. State
/// transitions happen only here; the rest of the process reads.
pub struct LifecycleManager {
    provider: Arc<dyn SessionProvider>,
    events_tx: mpsc::Sender<SessionEvent>,
    state: RwLock<ConnectionState>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        events_tx: mpsc::Sender<SessionEvent>,
        config: LifecycleConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            events_tx,
            state: RwLock::new(ConnectionState::Idle),
            config,
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_open(&self) -> bool {
        *self.state.read().await == ConnectionState::Open
    }

    /// Begin connecting. No-op while a connect sequence is already pending
    /// or the session is open.
    pub async fn start(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            match *state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    log::debug!("session start ignored: already {}", state.as_str());
                    return;
                }
                _ => *state = ConnectionState::Connecting,
            }
        }
        tokio::spawn(async move { self.run_connect().await });
    }

    /// Open the session, retrying on the fixed timer until an attempt is
    /// accepted. Initialization failure is never fatal to the process.
    async fn run_connect(self: Arc<Self>) {
        loop {
            let attempt = self.provider.open(self.events_tx.clone());
            match tokio::time::timeout(self.config.open_timeout, attempt).await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => log::warn!("session open failed: {}, retrying", e),
                Err(_) => log::warn!(
                    "session open timed out after {:?}, retrying",
                    self.config.open_timeout
                ),
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
        // Still `Connecting` here; the provider's `open` event flips the
        // state via `mark_open`.
    }

    /// Provider reported `open`: mark connectivity.
    pub async fn mark_open(&self) {
        *self.state.write().await = ConnectionState::Open;
        log::info!("session connected, relay ready");
    }

    /// Provider reported a close: purge credentials when logged out, then
    /// reconnect after the fixed delay. The scheduled reconnect yields to any
    /// connect sequence that started in the meantime.
    pub async fn handle_close(self: Arc<Self>, reason: CloseReason) {
        *self.state.write().await = ConnectionState::Closed;
        match &reason {
            CloseReason::LoggedOut => {
                log::warn!("session logged out, purging credentials before fresh pairing");
                if let Err(e) = self.provider.purge_credentials().await {
                    log::warn!("credential purge failed: {}", e);
                }
            }
            CloseReason::Other(detail) => {
                log::info!(
                    "session closed ({}), reconnecting with stored credentials",
                    detail
                );
            }
        }
        let mgr = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(mgr.config.reconnect_delay).await;
            mgr.start().await;
        });
    }

    /// Send through the provider with the fixed query timeout applied.
    pub async fn provider_send(
        &self,
        destination: &str,
        content: OutboundContent,
    ) -> Result<String, ProviderError> {
        match tokio::time::timeout(
            self.config.open_timeout,
            self.provider.send(destination, content),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout),
        }
    }
}
