use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    conversation::{ReplyMatch, ReplySource, Subscription, WaitRequest},
    domain::MessageId,
    messaging::types::{InboundContent, InboundEvent, MessageKind},
};

/// How a simulated wait resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitResolution {
    Value,
    TimedOut,
    Cancelled,
}

/// One `wait_*` call observed during a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WaitRecord {
    /// Position among the run's waits, starting at 0.
    pub index: usize,
    pub kind: MessageKind,
    pub timeout: Duration,
    pub cancel_keywords: Vec<String>,
    pub outcome: WaitResolution,
    /// Scripted item this wait consumed, if the script was not exhausted.
    pub consumed: Option<InboundContent>,
}

#[derive(Default)]
struct ScriptState {
    items: VecDeque<InboundContent>,
    waits: Vec<WaitRecord>,
    next_message: u64,
}

/// [`ReplySource`] that answers the Nth wait with the Nth scripted item.
///
/// Every subscription is settled on creation, so no wait ever reaches its
/// timer. A scripted item of the wrong kind (and not a cancel keyword)
/// resolves its wait as timed out; so does an exhausted script.
pub struct ScriptedReplies {
    state: Mutex<ScriptState>,
}

impl ScriptedReplies {
    pub fn new(items: impl IntoIterator<Item = InboundContent>) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                items: items.into_iter().collect(),
                ..ScriptState::default()
            }),
        }
    }

    pub fn waits(&self) -> Vec<WaitRecord> {
        lock(&self.state).waits.clone()
    }

    /// Items no wait consumed.
    pub fn remaining(&self) -> Vec<InboundContent> {
        lock(&self.state).items.iter().cloned().collect()
    }
}

impl ReplySource for ScriptedReplies {
    fn subscribe(&self, request: WaitRequest) -> Subscription {
        let mut state = lock(&self.state);
        let consumed = state.items.pop_front();

        let reply = consumed.clone().and_then(|content| {
            state.next_message += 1;
            // Scripted replies always come from the party being waited on.
            let event = InboundEvent {
                chat_id: request.chat_id.clone(),
                sender: request.participant.clone(),
                sender_type: request.sender_type,
                message_id: MessageId(format!("script-{}", state.next_message)),
                content,
                timestamp: Utc::now(),
                from_self: false,
            };
            request.classify(&event)
        });

        let outcome = match &reply {
            Some(ReplyMatch::Accepted(_)) => WaitResolution::Value,
            Some(ReplyMatch::Cancelled(_)) => WaitResolution::Cancelled,
            None => WaitResolution::TimedOut,
        };
        let index = state.waits.len();
        state.waits.push(WaitRecord {
            index,
            kind: request.accepted,
            timeout: request.timeout,
            cancel_keywords: request.cancel_keywords.clone(),
            outcome,
            consumed,
        });

        Subscription::settled(reply)
    }
}

fn lock(m: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{WaitDefaults, WaitOptions};
    use crate::domain::{ChatId, ConversationIdentity, ParticipantIds, SenderType};

    fn request(kind: MessageKind) -> WaitRequest {
        let identity = ConversationIdentity::new(
            ChatId::from("g"),
            ParticipantIds::primary("1"),
            SenderType::Group,
        );
        WaitOptions::new().resolve(&WaitDefaults::default(), &identity, kind)
    }

    #[test]
    fn items_are_consumed_in_order_regardless_of_content() {
        let script = ScriptedReplies::new([
            InboundContent::text("first"),
            InboundContent::Location {
                latitude: 1.0,
                longitude: 2.0,
            },
            InboundContent::text("CANCEL"),
        ]);

        let mut a = script.subscribe(request(MessageKind::Text));
        let mut b = script.subscribe(request(MessageKind::Text));
        let mut c = script.subscribe(request(MessageKind::Image));
        let mut d = script.subscribe(request(MessageKind::Text));

        assert!(matches!(a.try_recv(), Some(ReplyMatch::Accepted(e)) if e.text_body() == Some("first")));
        assert!(b.try_recv().is_none());
        assert!(matches!(c.try_recv(), Some(ReplyMatch::Cancelled(_))));
        assert!(d.try_recv().is_none());

        let outcomes: Vec<_> = script.waits().iter().map(|w| w.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                WaitResolution::Value,
                WaitResolution::TimedOut,
                WaitResolution::Cancelled,
                WaitResolution::TimedOut,
            ]
        );
        assert_eq!(script.waits()[3].consumed, None);
        assert!(script.remaining().is_empty());
    }
}
