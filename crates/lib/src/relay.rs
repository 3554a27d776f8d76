//! Notification relay: bounded recent-event buffer, panel webhook with one
//! retry, and live subscriber fan-out.
//!
//! Published events go three ways: into the buffer (so late subscribers get
//! a snapshot), to the panel webhook (best-effort, never surfaced back), and
//! to every live subscriber whose agent filter matches.

use crate::correlate::CorrelationContext;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

pub const EVENT_BUFFER_CAPACITY: usize = 200;

/// Delay before the single webhook retry.
pub const WEBHOOK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Emoji whose reaction marks a panel request as done.
pub const DONE_EMOJI: &str = "✅";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reaction,
    Reply,
}

/// A correlated inbound event, as delivered to the panel and to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedEvent {
    pub kind: EventKind,
    /// Id of the message that was reacted to / quoted.
    pub message_id: String,
    /// Digit-only reactor/replier identity.
    pub reactor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub context: CorrelationContext,
}

impl RelayedEvent {
    pub fn reaction(
        message_id: impl Into<String>,
        reactor: impl Into<String>,
        emoji: impl Into<String>,
        context: CorrelationContext,
    ) -> Self {
        Self {
            kind: EventKind::Reaction,
            message_id: message_id.into(),
            reactor: reactor.into(),
            emoji: Some(emoji.into()),
            text: None,
            context,
        }
    }

    pub fn reply(
        message_id: impl Into<String>,
        reactor: impl Into<String>,
        text: impl Into<String>,
        context: CorrelationContext,
    ) -> Self {
        Self {
            kind: EventKind::Reply,
            message_id: message_id.into(),
            reactor: reactor.into(),
            emoji: None,
            text: Some(text.into()),
            context,
        }
    }
}

/// Normalize an agent label for filter matching: lowercase with runs of
/// whitespace collapsed to single spaces.
pub fn normalize_agent(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct Subscriber {
    /// Normalized agent filter. `None` matches everything, but the subscribe
    /// path never registers a filterless subscriber (agent is required).
    filter: Option<String>,
    tx: mpsc::UnboundedSender<RelayedEvent>,
}

impl Subscriber {
    fn matches(&self, event: &RelayedEvent) -> bool {
        match &self.filter {
            None => true,
            Some(filter) => event
                .context
                .agent
                .as_deref()
                .map(|a| normalize_agent(a) == *filter)
                .unwrap_or(false),
        }
    }
}

/// HTTP client for panel callbacks.
#[derive(Clone)]
pub struct PanelClient {
    base_url: String,
    client: reqwest::Client,
}

impl PanelClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Deliver one event: auto-status for reactions, the reply hook for
    /// quoted replies. Best-effort: one retry after a short delay, then the
    /// event is dropped with a log line.
    pub async fn deliver(&self, event: &RelayedEvent) {
        let (url, payload) = match event.kind {
            EventKind::Reaction => {
                let mut payload = serde_json::json!({
                    "waMessageId": event.message_id,
                    "reactor": event.reactor,
                    "emoji": event.emoji,
                });
                if event.emoji.as_deref() == Some(DONE_EMOJI) {
                    payload["status"] = serde_json::Value::String("feito".to_string());
                }
                (format!("{}/api/requests/auto-status", self.base_url), payload)
            }
            EventKind::Reply => (
                format!("{}/api/requests/reply", self.base_url),
                serde_json::json!({
                    "waMessageId": event.message_id,
                    "reactor": event.reactor,
                    "text": event.text,
                }),
            ),
        };

        if self.post_once(&url, &payload).await {
            return;
        }
        tokio::time::sleep(WEBHOOK_RETRY_DELAY).await;
        if !self.post_once(&url, &payload).await {
            log::warn!(
                "panel delivery failed twice, dropping event for {}",
                event.message_id
            );
        }
    }

    async fn post_once(&self, url: &str, payload: &serde_json::Value) -> bool {
        match self.client.post(url).json(payload).send().await {
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                let sample: String = body.chars().take(200).collect();
                log::debug!("panel POST {} -> {} {}", url, status, sample);
                status.is_success()
            }
            Err(e) => {
                log::warn!("panel POST {} error: {}", url, e);
                false
            }
        }
    }
}

/// Fans correlated events out to the panel and to live subscribers.
pub struct NotificationRelay {
    panel: Option<PanelClient>,
    buffer: RwLock<VecDeque<RelayedEvent>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl NotificationRelay {
    pub fn new(panel_url: Option<String>) -> Self {
        Self {
            panel: panel_url.map(PanelClient::new),
            buffer: RwLock::new(VecDeque::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe with an agent filter. Returns the snapshot of buffered
    /// events matching the filter plus a receiver for live events. Without a
    /// filter the snapshot is empty and the receiver is already closed;
    /// ongoing events require an agent.
    pub async fn subscribe(
        &self,
        filter: Option<&str>,
    ) -> (Vec<RelayedEvent>, mpsc::UnboundedReceiver<RelayedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(filter) = filter.map(normalize_agent).filter(|f| !f.is_empty()) else {
            log::debug!("subscriber without agent filter, closing after empty snapshot");
            return (Vec::new(), rx);
        };
        let subscriber = Subscriber {
            filter: Some(filter),
            tx,
        };
        let snapshot = self
            .buffer
            .read()
            .await
            .iter()
            .filter(|e| subscriber.matches(e))
            .cloned()
            .collect();
        self.subscribers.write().await.push(subscriber);
        (snapshot, rx)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Publish one event: buffer it, notify the panel (fire-and-forget), and
    /// push to matching subscribers. Disconnected subscribers are pruned.
    pub async fn publish(&self, event: RelayedEvent) {
        {
            let mut buffer = self.buffer.write().await;
            buffer.push_back(event.clone());
            while buffer.len() > EVENT_BUFFER_CAPACITY {
                buffer.pop_front();
            }
        }

        if let Some(panel) = &self.panel {
            let panel = panel.clone();
            let ev = event.clone();
            tokio::spawn(async move { panel.deliver(&ev).await });
        }

        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| {
            if s.tx.is_closed() {
                return false;
            }
            if s.matches(&event) {
                return s.tx.send(event.clone()).is_ok();
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_for(agent: Option<&str>, id: &str) -> RelayedEvent {
        RelayedEvent::reaction(
            id,
            "5511999998888",
            "✅",
            CorrelationContext {
                agent: agent.map(|a| a.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn agent_normalization() {
        assert_eq!(normalize_agent("  Maria   Souza "), "maria souza");
        assert_eq!(normalize_agent("MARIA"), "maria");
        assert_eq!(normalize_agent(""), "");
    }

    #[tokio::test]
    async fn buffer_drops_oldest_on_overflow() {
        let relay = NotificationRelay::new(None);
        for i in 0..(EVENT_BUFFER_CAPACITY + 5) {
            relay
                .publish(event_for(Some("Maria"), &format!("m{}", i)))
                .await;
        }
        let (snapshot, _rx) = relay.subscribe(Some("Maria")).await;
        assert_eq!(snapshot.len(), EVENT_BUFFER_CAPACITY);
        assert_eq!(snapshot[0].message_id, "m5");
        assert_eq!(
            snapshot.last().unwrap().message_id,
            format!("m{}", EVENT_BUFFER_CAPACITY + 4)
        );
    }

    #[tokio::test]
    async fn subscriber_receives_only_matching_agent_events() {
        let relay = NotificationRelay::new(None);
        let (_snapshot, mut rx) = relay.subscribe(Some("Maria")).await;

        relay.publish(event_for(Some("  mAria "), "m1")).await;
        relay.publish(event_for(Some("Paulo"), "m2")).await;
        relay.publish(event_for(None, "m3")).await;
        relay.publish(event_for(Some("MARIA"), "m4")).await;

        assert_eq!(rx.recv().await.unwrap().message_id, "m1");
        assert_eq!(rx.recv().await.unwrap().message_id, "m4");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn snapshot_is_filtered() {
        let relay = NotificationRelay::new(None);
        relay.publish(event_for(Some("Maria"), "m1")).await;
        relay.publish(event_for(Some("Paulo"), "m2")).await;

        let (snapshot, _rx) = relay.subscribe(Some("maria")).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message_id, "m1");
    }

    #[tokio::test]
    async fn missing_filter_yields_empty_closed_subscription() {
        let relay = NotificationRelay::new(None);
        relay.publish(event_for(Some("Maria"), "m1")).await;

        let (snapshot, mut rx) = relay.subscribe(None).await;
        assert!(snapshot.is_empty());
        assert!(rx.recv().await.is_none());
        assert_eq!(relay.subscriber_count().await, 0);

        let (snapshot, mut rx) = relay.subscribe(Some("   ")).await;
        assert!(snapshot.is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn disconnected_subscribers_are_pruned() {
        let relay = NotificationRelay::new(None);
        let (_s, rx) = relay.subscribe(Some("Maria")).await;
        assert_eq!(relay.subscriber_count().await, 1);
        drop(rx);
        relay.publish(event_for(Some("Maria"), "m1")).await;
        assert_eq!(relay.subscriber_count().await, 0);
    }

    #[test]
    fn reaction_event_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(event_for(Some("Maria"), "m1")).unwrap();
        assert_eq!(json["kind"], "reaction");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["reactor"], "5511999998888");
        assert_eq!(json["emoji"], "✅");
        assert_eq!(json["context"]["agent"], "Maria");
        assert!(json.get("text").is_none());
    }
}
