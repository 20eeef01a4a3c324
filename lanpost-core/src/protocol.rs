//! lanpost message model: kinds, envelopes, stored messages and contacts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// URI scheme marking content that points at a materialized file.
pub const FILE_URI_SCHEME: &str = "file://";

/// Default TCP port every peer listens on.
pub const DEFAULT_PORT: u16 = 8888;

/// Media content longer than this (in encoded characters) is spilled to disk.
pub const DEFAULT_INLINE_THRESHOLD: usize = 200;

/// Kind of payload carried by a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
}

impl MessageKind {
    pub fn is_media(self) -> bool {
        !matches!(self, MessageKind::Text)
    }

    /// File extension used when a payload of this kind is written to disk.
    pub fn extension(self) -> &'static str {
        match self {
            MessageKind::Image => "jpg",
            MessageKind::Video => "mp4",
            MessageKind::Audio => "mp3",
            MessageKind::Text => "dat",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a stored message, from this device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Me,
    Other,
}

/// Wire record: what actually travels between peers inside one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Envelope {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            file_name: None,
        }
    }

    /// True when content already points at a file rather than carrying the payload inline.
    pub fn is_file_reference(&self) -> bool {
        self.content.starts_with(FILE_URI_SCHEME)
    }
}

/// A message as stored in a peer's history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub content: String,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Stamp an envelope with its author and the current time.
    pub fn from_envelope(envelope: Envelope, sender: Sender) -> Self {
        Self {
            kind: envelope.kind,
            content: envelope.content,
            file_name: envelope.file_name,
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            kind: self.kind,
            content: self.content.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

/// Address book entry. At most one contact exists per ip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub ip: String,
}
