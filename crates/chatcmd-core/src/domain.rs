use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform chat id (individual or group conversation).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

/// Platform message id, unique within a chat.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// A participant id in one of the platform's identity namespaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The same participant as seen through both identity namespaces.
///
/// `primary` is the stable phone-number-style id, `linked` the opaque
/// linked-device id. Platforms may supply either, both or neither.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantIds {
    pub primary: Option<ParticipantId>,
    pub linked: Option<ParticipantId>,
}

impl ParticipantIds {
    pub fn primary(id: impl Into<String>) -> Self {
        Self {
            primary: Some(ParticipantId(id.into())),
            linked: None,
        }
    }

    pub fn with_linked(mut self, id: impl Into<String>) -> Self {
        self.linked = Some(ParticipantId(id.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.linked.is_none()
    }

    /// True when any namespace populated on both sides carries the same id.
    pub fn shares_any(&self, other: &ParticipantIds) -> bool {
        let same = |a: &Option<ParticipantId>, b: &Option<ParticipantId>| match (a, b) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        same(&self.primary, &other.primary) || same(&self.linked, &other.linked)
    }

    /// True when `id` matches either namespace.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.primary.as_ref() == Some(id) || self.linked.as_ref() == Some(id)
    }

    /// Preferred id for display and mentions.
    pub fn preferred(&self) -> Option<&ParticipantId> {
        self.primary.as_ref().or(self.linked.as_ref())
    }
}

/// Whether a conversation is a one-to-one chat or a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    #[default]
    Individual,
    Group,
}

/// A stable reference to a platform message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: ParticipantIds,
    pub sender_type: SenderType,
    /// Sent by the account the engine runs as.
    #[serde(default)]
    pub from_self: bool,
}

/// Who a conversation talks to, and which message started it.
///
/// Never mutated once a context owns it; retargeting builds a new identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationIdentity {
    pub chat_id: ChatId,
    pub participant: ParticipantIds,
    pub sender_type: SenderType,
    /// Conversational anchor: replies quote this message.
    pub origin: Option<MessageRef>,
}

impl ConversationIdentity {
    pub fn new(chat_id: ChatId, participant: ParticipantIds, sender_type: SenderType) -> Self {
        Self {
            chat_id,
            participant,
            sender_type,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: MessageRef) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Identity of the conversation a message belongs to, without an anchor.
    ///
    /// The engine's own messages (and those without a known sender) keep
    /// `fallback` as the participant.
    pub fn from_message(msg: &MessageRef, fallback: &ParticipantIds) -> Self {
        let participant = if msg.from_self || msg.sender.is_empty() {
            fallback.clone()
        } else {
            msg.sender.clone()
        };
        Self::new(msg.chat_id.clone(), participant, msg.sender_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_any_requires_a_populated_match() {
        let a = ParticipantIds::primary("111").with_linked("L1");
        let b = ParticipantIds {
            primary: None,
            linked: Some(ParticipantId("L1".to_string())),
        };
        let c = ParticipantIds::default();

        assert!(a.shares_any(&b));
        assert!(!a.shares_any(&c));
        assert!(!c.shares_any(&c));
        assert!(!a.shares_any(&ParticipantIds::primary("222")));
    }

    #[test]
    fn preferred_falls_back_to_linked() {
        let ids = ParticipantIds {
            primary: None,
            linked: Some(ParticipantId("L9".to_string())),
        };
        assert_eq!(ids.preferred(), Some(&ParticipantId("L9".to_string())));
    }

    #[test]
    fn identity_from_own_message_keeps_fallback_participant() {
        let user = ParticipantIds::primary("555");
        let mut msg = MessageRef {
            chat_id: ChatId::from("group-1"),
            message_id: MessageId("m-2".to_string()),
            sender: ParticipantIds::primary("engine"),
            sender_type: SenderType::Group,
            from_self: true,
        };

        let own = ConversationIdentity::from_message(&msg, &user);
        assert_eq!(own.participant, user);
        assert_eq!(own.sender_type, SenderType::Group);
        assert_eq!(own.origin, None);

        msg.from_self = false;
        msg.sender = ParticipantIds::primary("777");
        assert_eq!(
            ConversationIdentity::from_message(&msg, &user).participant,
            ParticipantIds::primary("777")
        );
    }
}
