use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, ConversationIdentity, ParticipantIds, SenderType},
    messaging::types::{InboundEvent, MessageKind},
};

/// Whose replies a wait accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// The conversation's participant (in groups) or the chat peer (one-to-one).
    #[default]
    Sender,
    /// Anyone writing in the conversation's chat.
    AnyoneInChat,
}

/// Engine-wide wait settings; per-call [`WaitOptions`] override them.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitDefaults {
    pub timeout: Duration,
    pub cancel_keywords: Vec<String>,
    pub case_sensitive: bool,
    pub policy: MatchPolicy,
}

impl Default for WaitDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            cancel_keywords: vec!["cancel".to_string()],
            case_sensitive: false,
            policy: MatchPolicy::Sender,
        }
    }
}

/// Per-call wait options. Unset fields inherit the context's [`WaitDefaults`].
#[derive(Clone, Debug, Default)]
pub struct WaitOptions {
    timeout: Option<Duration>,
    cancel_keywords: Option<Vec<String>>,
    policy: Option<MatchPolicy>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn cancel_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cancel_keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn resolve(
        self,
        defaults: &WaitDefaults,
        identity: &ConversationIdentity,
        accepted: MessageKind,
    ) -> WaitRequest {
        WaitRequest {
            chat_id: identity.chat_id.clone(),
            participant: identity.participant.clone(),
            sender_type: identity.sender_type,
            accepted,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            cancel_keywords: self
                .cancel_keywords
                .unwrap_or_else(|| defaults.cancel_keywords.clone()),
            case_sensitive: defaults.case_sensitive,
            policy: self.policy.unwrap_or(defaults.policy),
        }
    }
}

/// A fully resolved wait: which replies resolve it and when it gives up.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WaitRequest {
    pub chat_id: ChatId,
    pub participant: ParticipantIds,
    pub sender_type: SenderType,
    pub accepted: MessageKind,
    pub timeout: Duration,
    pub cancel_keywords: Vec<String>,
    pub case_sensitive: bool,
    pub policy: MatchPolicy,
}

/// How a reply resolved a wait.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyMatch {
    Accepted(InboundEvent),
    Cancelled(InboundEvent),
}

impl WaitRequest {
    /// True when `event` comes from the conversation this wait listens to.
    pub fn matches_source(&self, event: &InboundEvent) -> bool {
        if event.from_self || event.chat_id != self.chat_id {
            return false;
        }
        match (self.policy, self.sender_type) {
            (MatchPolicy::AnyoneInChat, _) => true,
            (MatchPolicy::Sender, SenderType::Individual) => true,
            (MatchPolicy::Sender, SenderType::Group) => {
                self.participant.is_empty() || self.participant.shares_any(&event.sender)
            }
        }
    }

    /// True when the event's text body is one of the cancel keywords.
    pub fn is_cancel(&self, event: &InboundEvent) -> bool {
        let Some(body) = event.text_body() else {
            return false;
        };
        let body = body.trim();
        self.cancel_keywords.iter().any(|k| {
            let k = k.trim();
            if self.case_sensitive {
                body == k
            } else {
                body.to_lowercase() == k.to_lowercase()
            }
        })
    }

    /// `None` when the event does not resolve this wait.
    pub fn classify(&self, event: &InboundEvent) -> Option<ReplyMatch> {
        if !self.matches_source(event) {
            return None;
        }
        if self.is_cancel(event) {
            return Some(ReplyMatch::Cancelled(event.clone()));
        }
        if event.kind() == self.accepted {
            return Some(ReplyMatch::Accepted(event.clone()));
        }
        None
    }
}

/// Result of a wait. Timeout and cancellation stay distinguishable; use
/// [`WaitOutcome::into_option`] where only the value matters.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome<T> {
    Value(T),
    TimedOut,
    Cancelled,
}

impl<T> WaitOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitOutcome<U> {
        match self {
            Self::Value(v) => WaitOutcome::Value(f(v)),
            Self::TimedOut => WaitOutcome::TimedOut,
            Self::Cancelled => WaitOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::messaging::types::{InboundContent, MediaRef};
    use chrono::Utc;

    fn group_identity() -> ConversationIdentity {
        ConversationIdentity::new(
            ChatId::from("group-1"),
            ParticipantIds::primary("555").with_linked("L555"),
            SenderType::Group,
        )
    }

    fn event(chat: &str, sender: ParticipantIds, content: InboundContent) -> InboundEvent {
        InboundEvent {
            chat_id: ChatId::from(chat),
            sender,
            sender_type: SenderType::Group,
            message_id: MessageId("m".to_string()),
            content,
            timestamp: Utc::now(),
            from_self: false,
        }
    }

    #[test]
    fn unset_options_inherit_defaults() {
        let defaults = WaitDefaults::default();
        let req = WaitOptions::new()
            .timeout_secs(3)
            .resolve(&defaults, &group_identity(), MessageKind::Text);
        assert_eq!(req.timeout, Duration::from_secs(3));
        assert_eq!(req.cancel_keywords, vec!["cancel".to_string()]);
        assert_eq!(req.policy, MatchPolicy::Sender);
    }

    #[test]
    fn group_wait_matches_participant_in_either_namespace() {
        let req = WaitOptions::new().resolve(
            &WaitDefaults::default(),
            &group_identity(),
            MessageKind::Text,
        );
        let by_linked = event(
            "group-1",
            ParticipantIds {
                primary: None,
                linked: Some("L555".into()),
            },
            InboundContent::text("hi"),
        );
        let other = event(
            "group-1",
            ParticipantIds::primary("777"),
            InboundContent::text("hi"),
        );
        let elsewhere = event(
            "group-2",
            ParticipantIds::primary("555"),
            InboundContent::text("hi"),
        );

        assert!(matches!(req.classify(&by_linked), Some(ReplyMatch::Accepted(_))));
        assert!(req.classify(&other).is_none());
        assert!(req.classify(&elsewhere).is_none());

        let anyone = WaitOptions::new()
            .policy(MatchPolicy::AnyoneInChat)
            .resolve(&WaitDefaults::default(), &group_identity(), MessageKind::Text);
        assert!(anyone.classify(&other).is_some());
    }

    #[test]
    fn cancel_keywords_follow_case_policy() {
        let mut defaults = WaitDefaults::default();
        let req = WaitOptions::new()
            .cancel_keywords(["hello", "world"])
            .resolve(&defaults, &group_identity(), MessageKind::Text);
        let shout = event(
            "group-1",
            ParticipantIds::primary("555"),
            InboundContent::text(" HELLO "),
        );
        assert!(matches!(req.classify(&shout), Some(ReplyMatch::Cancelled(_))));

        defaults.case_sensitive = true;
        let strict = WaitOptions::new()
            .cancel_keywords(["hello", "world"])
            .resolve(&defaults, &group_identity(), MessageKind::Text);
        assert!(matches!(strict.classify(&shout), Some(ReplyMatch::Accepted(_))));
    }

    #[test]
    fn cancel_keyword_resolves_non_text_wait() {
        let req = WaitOptions::new().resolve(
            &WaitDefaults::default(),
            &group_identity(),
            MessageKind::Image,
        );
        let cancel = event(
            "group-1",
            ParticipantIds::primary("555"),
            InboundContent::text("Cancel"),
        );
        let chatter = event(
            "group-1",
            ParticipantIds::primary("555"),
            InboundContent::text("one sec"),
        );
        let image = event(
            "group-1",
            ParticipantIds::primary("555"),
            InboundContent::Image(MediaRef::new("img-1")),
        );

        assert!(matches!(req.classify(&cancel), Some(ReplyMatch::Cancelled(_))));
        assert!(req.classify(&chatter).is_none());
        assert!(matches!(req.classify(&image), Some(ReplyMatch::Accepted(_))));
    }

    #[test]
    fn own_messages_never_match() {
        let req = WaitOptions::new().resolve(
            &WaitDefaults::default(),
            &group_identity(),
            MessageKind::Text,
        );
        let mut echo = event(
            "group-1",
            ParticipantIds::primary("555"),
            InboundContent::text("hi"),
        );
        echo.from_self = true;
        assert!(req.classify(&echo).is_none());
    }
}
