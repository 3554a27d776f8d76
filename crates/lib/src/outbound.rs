//! Outbound dispatch: destination normalization, the media/caption fallback
//! sequence, and correlation bookkeeping.
//!
//! Every produced message id is recorded in the correlation store before the
//! send returns, so a later inbound event referencing any of them finds its
//! context.

use crate::correlate::{extract_context, CorrelationContext, CorrelationStore};
use crate::error::SendError;
use crate::session::{LifecycleManager, OutboundContent};
use serde::Serialize;
use std::sync::Arc;

pub const INDIVIDUAL_SUFFIX: &str = "@s.whatsapp.net";
pub const GROUP_SUFFIX: &str = "@g.us";

/// One media attachment for an outbound send.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Marks the item that should carry the text body as its caption.
    /// When no item is marked, the first one does.
    pub as_caption: bool,
}

/// An outbound send request.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub destination: String,
    pub text: String,
    pub media: Vec<MediaItem>,
    /// Caller-supplied business context. When empty, context is extracted
    /// from the text body instead.
    pub context: CorrelationContext,
}

/// Result of a successful send: the primary id plus every id produced, in
/// send order. The primary id is always a member of the list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub message_id: String,
    pub message_ids: Vec<String>,
}

/// Append the protocol suffix when the destination lacks one: hyphenated
/// ids get the group suffix, anything else the individual suffix.
/// Destinations that already carry an `@` pass through unchanged.
pub fn normalize_destination(destination: &str) -> String {
    let d = destination.trim();
    if d.contains('@') {
        d.to_string()
    } else if d.contains('-') {
        format!("{}{}", d, GROUP_SUFFIX)
    } else {
        format!("{}{}", d, INDIVIDUAL_SUFFIX)
    }
}

/// Executes sends against the provider and records correlation entries.
pub struct OutboundDispatcher {
    lifecycle: Arc<LifecycleManager>,
    store: Arc<CorrelationStore>,
}

impl OutboundDispatcher {
    pub fn new(lifecycle: Arc<LifecycleManager>, store: Arc<CorrelationStore>) -> Self {
        Self { lifecycle, store }
    }

    /// Run the fallback sequence: media first (one item carries the caption),
    /// then the bare text when no media unit produced an id. Individual media
    /// failures are absorbed; only a send that produced nothing errors.
    pub async fn send(&self, message: OutboundMessage) -> Result<SendResult, SendError> {
        if !self.lifecycle.is_open().await {
            return Err(SendError::NotConnected);
        }
        let raw = message.destination.trim();
        if raw.is_empty() {
            return Err(SendError::InvalidDestination);
        }
        let destination = normalize_destination(raw);
        log::info!(
            "send to {}: {}",
            destination,
            preview(&message.text)
        );

        let mut ids: Vec<String> = Vec::new();
        let mut last_error: Option<String> = None;

        if !message.media.is_empty() {
            let caption_idx = message
                .media
                .iter()
                .position(|m| m.as_caption)
                .unwrap_or(0);
            for (i, item) in message.media.iter().enumerate() {
                let caption = (i == caption_idx && !message.text.is_empty())
                    .then(|| message.text.clone());
                let content = OutboundContent::Media {
                    bytes: item.bytes.clone(),
                    mime_type: item.mime_type.clone(),
                    caption,
                };
                match self.lifecycle.provider_send(&destination, content).await {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        log::warn!("media send to {} failed: {}, continuing", destination, e);
                        last_error = Some(e.to_string());
                    }
                }
            }
        }

        if ids.is_empty() {
            let content = OutboundContent::Text {
                body: message.text.clone(),
            };
            match self.lifecycle.provider_send(&destination, content).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    log::warn!("text send to {} failed: {}", destination, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        let Some(primary) = ids.first().cloned() else {
            return Err(SendError::Provider(
                last_error.unwrap_or_else(|| "no unit delivered".to_string()),
            ));
        };

        let context = if message.context.is_empty() {
            extract_context(&message.text)
        } else {
            message.context.clone()
        };
        for id in &ids {
            self.store.put(id.clone(), context.clone()).await;
        }

        log::info!("sent, primary id {} ({} unit(s))", primary, ids.len());
        Ok(SendResult {
            message_id: primary,
            message_ids: ids,
        })
    }
}

fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(80).collect();
    if p.len() < text.len() {
        p.push('…');
    }
    p
}
