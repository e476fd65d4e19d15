//! Conversion of Telegram messages into engine events.

use teloxide::types::{Chat, MediaKind, Message, MessageKind as TgMessageKind, User, UserId};

use chatcmd_core::{
    domain::{ChatId, MessageId, ParticipantIds, SenderType},
    messaging::types::{InboundContent, InboundEvent, MediaRef},
};

pub fn sender_type_of(chat: &Chat) -> SenderType {
    if chat.is_group() || chat.is_supergroup() {
        SenderType::Group
    } else {
        SenderType::Individual
    }
}

/// Numeric user id as the primary namespace, `@username` (without the `@`) as linked.
pub fn participant_of(user: &User) -> ParticipantIds {
    let ids = ParticipantIds::primary(user.id.0.to_string());
    match &user.username {
        Some(name) => ids.with_linked(name.clone()),
        None => ids,
    }
}

fn media(id: &str, mime: Option<String>, caption: &Option<String>) -> MediaRef {
    MediaRef {
        id: id.to_string(),
        mime_type: mime,
        caption: caption.clone(),
    }
}

/// `None` for message kinds the engine does not model (polls, games, service messages).
pub fn content_of(kind: &MediaKind) -> Option<InboundContent> {
    let content = match kind {
        MediaKind::Text(t) => InboundContent::text(t.text.clone()),
        MediaKind::Photo(p) => {
            let best = p.photo.last()?;
            InboundContent::Image(media(&best.file.id, None, &p.caption))
        }
        MediaKind::Video(v) => InboundContent::Video(media(
            &v.video.file.id,
            v.video.mime_type.as_ref().map(ToString::to_string),
            &v.caption,
        )),
        MediaKind::Animation(a) => InboundContent::Video(media(
            &a.animation.file.id,
            a.animation.mime_type.as_ref().map(ToString::to_string),
            &a.caption,
        )),
        MediaKind::Audio(a) => InboundContent::Audio(media(
            &a.audio.file.id,
            a.audio.mime_type.as_ref().map(ToString::to_string),
            &a.caption,
        )),
        MediaKind::Voice(v) => InboundContent::Audio(media(
            &v.voice.file.id,
            v.voice.mime_type.as_ref().map(ToString::to_string),
            &v.caption,
        )),
        MediaKind::Document(d) => InboundContent::Document(media(
            &d.document.file.id,
            d.document.mime_type.as_ref().map(ToString::to_string),
            &d.caption,
        )),
        MediaKind::Sticker(s) => InboundContent::Sticker(media(&s.sticker.file.id, None, &None)),
        MediaKind::Location(l) => InboundContent::Location {
            latitude: l.location.latitude,
            longitude: l.location.longitude,
        },
        MediaKind::Venue(v) => InboundContent::Location {
            latitude: v.venue.location.latitude,
            longitude: v.venue.location.longitude,
        },
        MediaKind::Contact(c) => InboundContent::Contact {
            name: match &c.contact.last_name {
                Some(last) => format!("{} {last}", c.contact.first_name),
                None => c.contact.first_name.clone(),
            },
            phone: c.contact.phone_number.clone(),
        },
        _ => return None,
    };
    Some(content)
}

/// Map a polled message to an [`InboundEvent`]; `None` for service messages
/// and unsupported media.
pub fn to_inbound_event(msg: &Message, bot_id: UserId) -> Option<InboundEvent> {
    let TgMessageKind::Common(common) = &msg.kind else {
        return None;
    };
    let content = content_of(&common.media_kind)?;
    let from = msg.from();

    Some(InboundEvent {
        chat_id: ChatId(msg.chat.id.0.to_string()),
        sender: from.map(participant_of).unwrap_or_default(),
        sender_type: sender_type_of(&msg.chat),
        message_id: MessageId(msg.id.0.to_string()),
        content,
        timestamp: msg.date,
        from_self: from.is_some_and(|u| u.id == bot_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcmd_core::messaging::types::MessageKind;

    fn message(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn private_text_message() {
        let msg = message(
            r#"{"message_id":7,"date":1700000000,
                "chat":{"id":42,"first_name":"Ann","username":"ann","type":"private"},
                "from":{"id":42,"is_bot":false,"first_name":"Ann","username":"ann"},
                "text":"!ping now"}"#,
        );

        let ev = to_inbound_event(&msg, UserId(1)).unwrap();
        assert_eq!(ev.chat_id, ChatId::from("42"));
        assert_eq!(ev.message_id, MessageId("7".to_string()));
        assert_eq!(ev.sender_type, SenderType::Individual);
        assert_eq!(ev.sender, ParticipantIds::primary("42").with_linked("ann"));
        assert_eq!(ev.text_body(), Some("!ping now"));
        assert!(!ev.from_self);
    }

    #[test]
    fn group_location_from_the_bot_itself() {
        let msg = message(
            r#"{"message_id":9,"date":1700000000,
                "chat":{"id":-5001,"title":"Team","type":"group"},
                "from":{"id":1,"is_bot":true,"first_name":"Bot"},
                "location":{"latitude":1.5,"longitude":-2.25}}"#,
        );

        let ev = to_inbound_event(&msg, UserId(1)).unwrap();
        assert_eq!(ev.sender_type, SenderType::Group);
        assert_eq!(ev.kind(), MessageKind::Location);
        assert_eq!(
            ev.content,
            InboundContent::Location {
                latitude: 1.5,
                longitude: -2.25
            }
        );
        assert!(ev.from_self);
    }
}
