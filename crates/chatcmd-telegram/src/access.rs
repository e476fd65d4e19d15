use async_trait::async_trait;
use tracing::debug;

use chatcmd_core::{
    commands::{Flow, Middleware, ParsedCommand},
    domain::ParticipantIds,
    messaging::types::InboundEvent,
};

pub fn is_authorized(sender: &ParticipantIds, allowed_users: &[i64]) -> bool {
    let Some(id) = sender.primary.as_ref().and_then(|p| p.0.parse::<i64>().ok()) else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&id)
}

/// Drops every event whose sender is not on the allow list.
pub struct AllowList {
    users: Vec<i64>,
}

impl AllowList {
    pub fn new(users: Vec<i64>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Middleware for AllowList {
    async fn handle(&self, event: &InboundEvent, parsed: Option<&ParsedCommand>) -> Flow {
        if is_authorized(&event.sender, &self.users) {
            return Flow::Continue;
        }
        debug!(
            chat_id = %event.chat_id,
            command = parsed.map(|p| p.token.as_str()),
            "sender not on allow list"
        );
        Flow::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcmd_core::domain::{ChatId, MessageId, SenderType};
    use chatcmd_core::messaging::types::InboundContent;
    use chrono::Utc;

    #[test]
    fn authorization_requires_listed_numeric_id() {
        let allowed = [42_i64, 7];
        assert!(is_authorized(&ParticipantIds::primary("42"), &allowed));
        assert!(!is_authorized(&ParticipantIds::primary("43"), &allowed));
        assert!(!is_authorized(&ParticipantIds::default(), &allowed));
        assert!(!is_authorized(&ParticipantIds::primary("ann"), &allowed));
        assert!(!is_authorized(&ParticipantIds::primary("42"), &[]));
    }

    #[tokio::test]
    async fn allow_list_stops_strangers() {
        let stage = AllowList::new(vec![42]);
        let mut event = InboundEvent {
            chat_id: ChatId::from("42"),
            sender: ParticipantIds::primary("42"),
            sender_type: SenderType::Individual,
            message_id: MessageId("1".to_string()),
            content: InboundContent::text("hi"),
            timestamp: Utc::now(),
            from_self: false,
        };
        assert_eq!(stage.handle(&event, None).await, Flow::Continue);

        event.sender = ParticipantIds::primary("99");
        assert_eq!(stage.handle(&event, None).await, Flow::Stop);
    }
}
