//! Event dispatch: the single task that consumes provider events.
//!
//! All lifecycle transitions and inbound processing run here, one event at a
//! time, which keeps a single writer over the shared state. Per-item work is
//! isolated — one malformed item never stops the rest of its batch.

use crate::classify::{
    classify_update, classify_upsert, normalize_digits, reactor_authorized, InboundEvent,
};
use crate::correlate::CorrelationStore;
use crate::relay::{NotificationRelay, RelayedEvent};
use crate::session::{LifecycleManager, SessionEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Consumes session events and routes classified inbound items through the
/// correlation store to the notification relay.
pub struct Dispatcher {
    pub lifecycle: Arc<LifecycleManager>,
    pub store: Arc<CorrelationStore>,
    pub relay: Arc<NotificationRelay>,
    /// Identity allowed to action reactions/replies; `None` allows everyone.
    pub allowed_reactor: Option<String>,
    /// Toggle for the quoted-reply relay path.
    pub relay_replies: bool,
}

impl Dispatcher {
    /// Run until the provider side hangs up.
    pub async fn run(self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        log::info!("session event channel closed, dispatch stopped");
    }

    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Opening => log::info!("session opening"),
            SessionEvent::QrChallenge(code) => {
                log::info!("pairing required, scan this challenge with the linked phone:");
                log::info!("{}", code);
            }
            SessionEvent::Open => self.lifecycle.mark_open().await,
            SessionEvent::Closed { reason } => {
                self.lifecycle.clone().handle_close(reason).await;
            }
            SessionEvent::MessagesUpserted(items) => {
                for item in &items {
                    self.handle_classified(classify_upsert(item)).await;
                }
            }
            SessionEvent::MessagesUpdated(items) => {
                for item in &items {
                    self.handle_classified(classify_update(item)).await;
                }
            }
        }
    }

    async fn handle_classified(&self, event: InboundEvent) {
        match event {
            InboundEvent::Reaction {
                emoji,
                target_message_id,
                reactor,
            } => self.handle_reaction(emoji, target_message_id, reactor).await,
            InboundEvent::QuotedReply {
                text,
                quoted_message_id,
                replier,
            } => self.handle_reply(text, quoted_message_id, replier).await,
            InboundEvent::Ignored => {}
        }
    }

    async fn handle_reaction(&self, emoji: String, target_message_id: String, reactor: String) {
        let digits = normalize_digits(&reactor);
        if !reactor_authorized(self.allowed_reactor.as_deref(), &reactor) {
            log::info!("ignoring reaction from unauthorized {}", digits);
            return;
        }
        // Reactions on messages we did not send still reach the panel (it
        // decides what an unknown id means), just without context.
        let context = self.store.get(&target_message_id).await.unwrap_or_default();
        log::info!(
            "reaction {} on {} by {}",
            emoji,
            target_message_id,
            digits
        );
        self.relay
            .publish(RelayedEvent::reaction(target_message_id, digits, emoji, context))
            .await;
    }

    async fn handle_reply(&self, text: String, quoted_message_id: String, replier: String) {
        if !self.relay_replies {
            log::debug!("reply relay disabled, dropping reply to {}", quoted_message_id);
            return;
        }
        let digits = normalize_digits(&replier);
        if !reactor_authorized(self.allowed_reactor.as_deref(), &replier) {
            log::info!("ignoring reply from unauthorized {}", digits);
            return;
        }
        // Only replies to messages this relay sent are forwarded.
        let Some(context) = self.store.get(&quoted_message_id).await else {
            log::info!("ignoring reply quoting unknown message {}", quoted_message_id);
            return;
        };
        log::info!(
            "reply to {} by {} ({} chars)",
            quoted_message_id,
            digits,
            text.len()
        );
        self.relay
            .publish(RelayedEvent::reply(quoted_message_id, digits, text, context))
            .await;
    }
}
