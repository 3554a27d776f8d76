//! Loopback provider: no wire protocol, connects immediately.
//!
//! Lets the relay run against a panel without a linked account: sends are
//! recorded and assigned generated ids, and inbound traffic can be injected
//! with [`LoopbackProvider::emit`] to exercise the reaction/reply paths.
//! Also serves as the provider double in the test suite.

use crate::error::ProviderError;
use crate::session::provider::{GroupInfo, OutboundContent, SessionEvent, SessionProvider};
use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

/// One recorded outbound unit.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub destination: String,
    pub content: OutboundContent,
    pub message_id: String,
}

/// In-memory provider: opens instantly, records sends, injects events.
#[derive(Default)]
pub struct LoopbackProvider {
    sent: RwLock<Vec<SentRecord>>,
    events_tx: RwLock<Option<mpsc::Sender<SessionEvent>>>,
    purges: RwLock<usize>,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent through this provider, in send order.
    pub async fn sent(&self) -> Vec<SentRecord> {
        self.sent.read().await.clone()
    }

    /// How many times credentials were purged.
    pub async fn purge_count(&self) -> usize {
        *self.purges.read().await
    }

    /// Inject a session event as if the protocol had produced it. No-op
    /// before `open` or after the dispatch side hung up.
    pub async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.events_tx.read().await.as_ref() {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl SessionProvider for LoopbackProvider {
    async fn open(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), ProviderError> {
        let _ = events.send(SessionEvent::Opening).await;
        let _ = events.send(SessionEvent::Open).await;
        *self.events_tx.write().await = Some(events);
        Ok(())
    }

    async fn send(
        &self,
        destination: &str,
        content: OutboundContent,
    ) -> Result<String, ProviderError> {
        let message_id = format!("LOOP-{}", uuid::Uuid::new_v4().simple());
        self.sent.write().await.push(SentRecord {
            destination: destination.to_string(),
            content,
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    async fn purge_credentials(&self) -> Result<(), ProviderError> {
        *self.purges.write().await += 1;
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<GroupInfo>, ProviderError> {
        Ok(Vec::new())
    }
}
