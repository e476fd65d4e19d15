use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, MessageId, MessageRef, ParticipantId, ParticipantIds, SenderType};

/// Kind of message, used to filter waits and categorize sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Sticker,
    Document,
    Location,
    Contact,
    Reaction,
}

/// Reference to media the platform already holds. Downloading is the
/// adapter's business.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
}

impl MediaRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mime_type: None,
            caption: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundContent {
    Text { text: String },
    Image(MediaRef),
    Video(MediaRef),
    Audio(MediaRef),
    Sticker(MediaRef),
    Document(MediaRef),
    Location { latitude: f64, longitude: f64 },
    Contact { name: String, phone: String },
    Reaction { emoji: String, target: Option<MessageId> },
}

impl InboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image(_) => MessageKind::Image,
            Self::Video(_) => MessageKind::Video,
            Self::Audio(_) => MessageKind::Audio,
            Self::Sticker(_) => MessageKind::Sticker,
            Self::Document(_) => MessageKind::Document,
            Self::Location { .. } => MessageKind::Location,
            Self::Contact { .. } => MessageKind::Contact,
            Self::Reaction { .. } => MessageKind::Reaction,
        }
    }

    /// Text body: the text itself, or a media caption.
    pub fn text_body(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image(m) | Self::Video(m) | Self::Audio(m) | Self::Document(m) => {
                m.caption.as_deref()
            }
            _ => None,
        }
    }
}

/// Cross-platform inbound event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub sender: ParticipantIds,
    pub sender_type: SenderType,
    pub message_id: MessageId,
    pub content: InboundContent,
    pub timestamp: DateTime<Utc>,
    /// Sent by the account the engine runs as.
    #[serde(default)]
    pub from_self: bool,
}

impl InboundEvent {
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    pub fn text_body(&self) -> Option<&str> {
        self.content.text_body()
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id.clone(),
            message_id: self.message_id.clone(),
            sender: self.sender.clone(),
            sender_type: self.sender_type,
            from_self: self.from_self,
        }
    }
}

/// Outgoing media, either raw bytes or a platform-side reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MediaSource {
    Bytes {
        data: Vec<u8>,
        file_name: Option<String>,
    },
    Reference { id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMedia {
    pub source: MediaSource,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
}

impl OutgoingMedia {
    pub fn bytes(data: Vec<u8>) -> Self {
        Self {
            source: MediaSource::Bytes {
                data,
                file_name: None,
            },
            mime_type: None,
            caption: None,
        }
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Self {
            source: MediaSource::Reference { id: id.into() },
            mime_type: None,
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingPayload {
    Text { text: String },
    Image(OutgoingMedia),
    Video(OutgoingMedia),
    Audio(OutgoingMedia),
    Sticker(OutgoingMedia),
    Document(OutgoingMedia),
    Location { latitude: f64, longitude: f64 },
    Contact { name: String, phone: String },
    Reaction { emoji: String, target: MessageRef },
}

impl OutgoingPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image(_) => MessageKind::Image,
            Self::Video(_) => MessageKind::Video,
            Self::Audio(_) => MessageKind::Audio,
            Self::Sticker(_) => MessageKind::Sticker,
            Self::Document(_) => MessageKind::Document,
            Self::Location { .. } => MessageKind::Location,
            Self::Contact { .. } => MessageKind::Contact,
            Self::Reaction { .. } => MessageKind::Reaction,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Quote this message.
    pub reply_to: Option<MessageRef>,
    /// Participants to notify via mention.
    pub mentions: Vec<ParticipantId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub raw_id: ParticipantId,
    pub as_mention_formatted: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub group_name: String,
    pub members: Vec<GroupMember>,
}
