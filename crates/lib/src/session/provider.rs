//! Session provider seam: the chat-protocol client behind a trait.
//!
//! The provider owns connection, authentication, and transport. It reports
//! everything through typed events on an mpsc channel consumed by a single
//! dispatch task, so the rest of the process never touches the wire protocol
//! and shared state keeps a single writer.

use crate::classify::{RawMessage, RawMessageUpdate};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Why the provider closed the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The account was unlinked; stored credentials are invalid and a fresh
    /// pairing challenge is required.
    LoggedOut,
    /// Any transient close (network drop, server restart, unknown code).
    Other(String),
}

/// Lifecycle and message events emitted by a session provider.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opening,
    /// Pairing challenge to render to the operator out-of-band.
    QrChallenge(String),
    Open,
    Closed { reason: CloseReason },
    /// Newly arrived messages; may carry reactions or quoted replies.
    MessagesUpserted(Vec<RawMessage>),
    /// Post-hoc annotations on existing messages (e.g. reactions).
    MessagesUpdated(Vec<RawMessageUpdate>),
}

/// One unit of outbound content for [`SessionProvider::send`].
#[derive(Debug, Clone)]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Media {
        bytes: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
    },
}

impl OutboundContent {
    /// Caption carried by this unit, if any.
    pub fn caption(&self) -> Option<&str> {
        match self {
            OutboundContent::Text { .. } => None,
            OutboundContent::Media { caption, .. } => caption.as_deref(),
        }
    }
}

/// A participating group chat, as listed by the provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: String,
    pub subject: String,
}

/// Chat-protocol client: connection, authentication, and message transport.
///
/// `open` loads persisted credentials (or starts pairing) and emits
/// [`SessionEvent`]s on `events` until the session closes. Implementations
/// must never panic on malformed inbound data; drop and log instead.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Establish a session and start emitting events.
    async fn open(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), ProviderError>;

    /// Send one unit of content; returns the protocol-assigned message id.
    async fn send(
        &self,
        destination: &str,
        content: OutboundContent,
    ) -> Result<String, ProviderError>;

    /// Delete persisted credential material (after a logged-out close).
    async fn purge_credentials(&self) -> Result<(), ProviderError>;

    /// Group chats the session participates in.
    async fn list_groups(&self) -> Result<Vec<GroupInfo>, ProviderError> {
        Err(ProviderError::Query("not supported by this provider".to_string()))
    }
}
