//! Correlation store: message id → business context, so inbound reactions
//! and quoted replies can be traced back to the panel request that caused
//! the message to be sent.
//!
//! The store is a bounded insertion-ordered map. Entries are immutable after
//! insert and are only dropped oldest-first under capacity pressure.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Business context attached to a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationContext {
    /// Customer reference (e.g. a document number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<String>,
    /// Request or category label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_ref: Option<String>,
    /// Owning agent label; drives subscriber filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl CorrelationContext {
    pub fn is_empty(&self) -> bool {
        self.customer_ref.is_none() && self.request_ref.is_none() && self.agent.is_none()
    }
}

pub const DEFAULT_STORE_CAPACITY: usize = 4096;

struct StoreInner {
    entries: HashMap<String, CorrelationContext>,
    /// Insertion order of distinct keys, oldest first.
    order: VecDeque<String>,
}

/// Bounded id → context map. `put` overwrites on collision; eviction is
/// oldest-first and only happens at the capacity ceiling.
pub struct CorrelationStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

impl CorrelationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record the context for a message id. A collision overwrites the value
    /// but keeps the id's original place in the eviction order.
    pub async fn put(&self, message_id: impl Into<String>, context: CorrelationContext) {
        let message_id = message_id.into();
        let mut inner = self.inner.write().await;
        if inner.entries.insert(message_id.clone(), context).is_none() {
            inner.order.push_back(message_id);
            while inner.entries.len() > self.capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
    }

    pub async fn get(&self, message_id: &str) -> Option<CorrelationContext> {
        self.inner.read().await.entries.get(message_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Best-effort extraction of context fields from a message body.
///
/// The panel formats request messages with labeled lines ("Cliente: …",
/// "Solicitação: …", "Agente: …", possibly bold-wrapped). The first match
/// per field wins; anything unrecognized is skipped and extraction failure
/// just leaves the fields unset.
pub fn extract_context(text: &str) -> CorrelationContext {
    let mut ctx = CorrelationContext::default();
    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().trim_matches('*').trim().to_lowercase();
        let value = value.trim().trim_matches('*').trim();
        if value.is_empty() {
            continue;
        }
        let slot = match label.as_str() {
            "cliente" | "cpf" => &mut ctx.customer_ref,
            "solicitação" | "solicitacao" | "categoria" | "assunto" => &mut ctx.request_ref,
            "agente" | "atendente" => &mut ctx.agent,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    ctx
}
