//! Inbound event classification: raw provider batches → reactions, quoted
//! replies, or ignorable noise.
//!
//! Two batch shapes arrive from the provider. "Update" items are post-hoc
//! annotations on existing messages and carry the reactor on the outer
//! envelope key. "Upsert" items are newly arrived messages whose own key
//! identifies the sender; they may carry a reaction or quote an earlier
//! message. Classification is pure; correlation gating and authorization
//! happen in the dispatch loop.

use serde::Deserialize;

/// Message key as carried on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageKey {
    pub id: Option<String>,
    pub remote_jid: Option<String>,
    pub participant: Option<String>,
    pub from_me: bool,
}

/// A reaction: emoji text plus the key of the message being reacted to.
/// Empty text means the reaction was removed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionPayload {
    pub text: Option<String>,
    pub key: MessageKey,
}

/// Reply context. The quoted message's id shows up under several field names
/// depending on the client that produced the message; all known variants are
/// mapped here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    #[serde(alias = "stanzaID")]
    pub stanza_id: Option<String>,
    #[serde(alias = "quotedStanzaID")]
    pub quoted_stanza_id: Option<String>,
    pub quoted_message: Option<QuotedMessageRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotedMessageRef {
    pub key: Option<MessageKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedText {
    pub text: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaContent {
    pub caption: Option<String>,
    pub mimetype: Option<String>,
}

/// Message body variants we care about. Unknown variants deserialize to all
/// fields `None` and classify as noise.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text_message: Option<ExtendedText>,
    pub image_message: Option<MediaContent>,
    pub video_message: Option<MediaContent>,
    pub reaction_message: Option<ReactionPayload>,
    /// Protocol housekeeping (history sync, key rotation); never relayed.
    pub protocol_message: Option<serde_json::Value>,
}

/// One newly arrived message (upsert batch item).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub key: MessageKey,
    pub message: Option<MessageContent>,
}

/// One post-hoc update on an existing message (update batch item).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessageUpdate {
    pub key: MessageKey,
    pub update: Option<UpdatePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePayload {
    pub key: Option<MessageKey>,
    pub reaction_message: Option<ReactionPayload>,
}

/// A classified inbound item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Reaction {
        emoji: String,
        target_message_id: String,
        /// Raw reactor identity (jid-like); normalize with
        /// [`normalize_digits`] before matching.
        reactor: String,
    },
    QuotedReply {
        text: String,
        quoted_message_id: String,
        replier: String,
    },
    Ignored,
}

fn sender_identity(key: &MessageKey) -> Option<String> {
    key.participant.clone().or_else(|| key.remote_jid.clone())
}

/// Classify one update-batch item. The reactor comes from the outer envelope
/// key (the update's sender), not from the reacted message's key.
pub fn classify_update(item: &RawMessageUpdate) -> InboundEvent {
    let Some(update) = &item.update else {
        return InboundEvent::Ignored;
    };
    let Some(rx) = &update.reaction_message else {
        return InboundEvent::Ignored;
    };
    reaction_event(rx, || {
        sender_identity(&item.key)
            .or_else(|| update.key.as_ref().and_then(sender_identity))
            .unwrap_or_default()
    })
}

/// Classify one upsert-batch item: reaction, quoted reply, or noise.
pub fn classify_upsert(item: &RawMessage) -> InboundEvent {
    let Some(m) = &item.message else {
        return InboundEvent::Ignored;
    };

    if let Some(rx) = &m.reaction_message {
        return reaction_event(rx, || sender_identity(&item.key).unwrap_or_default());
    }

    if is_protocol_noise(m) {
        // Bare housekeeping markers flood the feed; drop without logging.
        return InboundEvent::Ignored;
    }

    let text = reply_body(m);
    let quoted = quoted_message_id(m);
    match (text, quoted) {
        (Some(text), Some(quoted_message_id)) => InboundEvent::QuotedReply {
            text,
            quoted_message_id,
            replier: sender_identity(&item.key).unwrap_or_default(),
        },
        _ => {
            if let Some(id) = &item.key.id {
                log::debug!("inbound item {} not classifiable, ignoring", id);
            }
            InboundEvent::Ignored
        }
    }
}

fn reaction_event(rx: &ReactionPayload, reactor: impl FnOnce() -> String) -> InboundEvent {
    let emoji = rx.text.clone().unwrap_or_default();
    let Some(target) = rx.key.id.clone() else {
        return InboundEvent::Ignored;
    };
    if emoji.is_empty() {
        // Reaction removal; nothing to relay.
        return InboundEvent::Ignored;
    }
    InboundEvent::Reaction {
        emoji,
        target_message_id: target,
        reactor: reactor(),
    }
}

fn is_protocol_noise(m: &MessageContent) -> bool {
    m.protocol_message.is_some()
        && m.conversation.is_none()
        && m.extended_text_message.is_none()
        && m.image_message.is_none()
        && m.video_message.is_none()
}

/// Reply body: first non-empty of plain text, extended text, image caption,
/// video caption.
fn reply_body(m: &MessageContent) -> Option<String> {
    let candidates = [
        m.conversation.as_deref(),
        m.extended_text_message.as_ref().and_then(|e| e.text.as_deref()),
        m.image_message.as_ref().and_then(|i| i.caption.as_deref()),
        m.video_message.as_ref().and_then(|v| v.caption.as_deref()),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|t| !t.trim().is_empty())
        .map(|t| t.to_string())
}

/// Quoted-message id, trying the known field-name variants in priority
/// order: `stanzaId` (and its `stanzaID` spelling), then the nested quoted
/// key, then `quotedStanzaID`.
fn quoted_message_id(m: &MessageContent) -> Option<String> {
    let ctx = m.extended_text_message.as_ref()?.context_info.as_ref()?;
    ctx.stanza_id
        .clone()
        .or_else(|| {
            ctx.quoted_message
                .as_ref()
                .and_then(|q| q.key.as_ref())
                .and_then(|k| k.id.clone())
        })
        .or_else(|| ctx.quoted_stanza_id.clone())
}

/// Keep only the digits of a phone-like identity.
pub fn normalize_digits(identity: &str) -> String {
    identity.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Allow-list check on normalized digits: exact match or either side a
/// suffix of the other (tolerates country-code asymmetry). An unconfigured
/// or digit-free allow-list authorizes everyone.
pub fn reactor_authorized(allowed: Option<&str>, reactor: &str) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };
    let allowed = normalize_digits(allowed);
    if allowed.is_empty() {
        return true;
    }
    let digits = normalize_digits(reactor);
    if digits.is_empty() {
        return false;
    }
    digits == allowed || digits.ends_with(&allowed) || allowed.ends_with(&digits)
}
