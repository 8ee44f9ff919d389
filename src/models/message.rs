//! Incoming chat messages at the transport boundary.
//!
//! Segments follow the common bot-protocol shape
//! `{"type": "...", "data": {...}}`. Only text and image segments carry
//! meaning here; every other segment type is kept as [`MessageSegment::Other`].

use super::Submitter;
use serde::{Deserialize, Serialize};

/// One segment of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSegment")]
pub enum MessageSegment {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An image hosted by the transport.
    Image {
        /// Download URL for the image bytes.
        url: String,
    },
    /// Any other segment type (face, reply, at, ...).
    Other {
        /// The segment type tag.
        kind: String,
    },
}

impl MessageSegment {
    /// Returns the segment type tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Other { kind } => kind,
        }
    }
}

#[derive(Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl From<RawSegment> for MessageSegment {
    fn from(raw: RawSegment) -> Self {
        let RawSegment { kind, data } = raw;
        let field = |name: &str| {
            data.get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };

        let parsed = match kind.as_str() {
            "text" => field("text").map(|text| Self::Text { text }),
            "image" => field("url").map(|url| Self::Image { url }),
            _ => None,
        };
        parsed.unwrap_or(Self::Other { kind })
    }
}

/// Author of a message as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Stable user identity.
    pub user_id: u64,
    /// Display name.
    #[serde(default)]
    pub nickname: String,
}

impl Sender {
    /// Creates a sender.
    #[must_use]
    pub fn new(user_id: u64, nickname: impl Into<String>) -> Self {
        Self {
            user_id,
            nickname: nickname.into(),
        }
    }
}

impl From<&Sender> for Submitter {
    fn from(sender: &Sender) -> Self {
        Self::new(sender.user_id, sender.nickname.clone())
    }
}

/// A delivered message: its segments plus the sender.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingEvent {
    /// Ordered message segments.
    pub message: Vec<MessageSegment>,
    /// Who sent it.
    pub sender: Sender,
}
