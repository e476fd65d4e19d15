use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::{
    conversation::wait::{ReplyMatch, WaitRequest},
    messaging::types::InboundEvent,
};

/// Where pending waits get their replies from.
///
/// Production uses [`ReplyHub`], fed by the dispatcher; the simulation
/// harness serves replies from a script instead.
pub trait ReplySource: Send + Sync {
    fn subscribe(&self, request: WaitRequest) -> Subscription;
}

/// A registered listener for one wait. Dropping it unsubscribes.
pub struct Subscription {
    rx: oneshot::Receiver<ReplyMatch>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(rx: oneshot::Receiver<ReplyMatch>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// A subscription that is already settled: `None` means "no reply".
    pub fn settled(reply: Option<ReplyMatch>) -> Self {
        let (tx, rx) = oneshot::channel();
        if let Some(reply) = reply {
            let _ = tx.send(reply);
        }
        Self { rx, release: None }
    }

    /// `None` when the source will never deliver a reply.
    pub async fn recv(&mut self) -> Option<ReplyMatch> {
        (&mut self.rx).await.ok()
    }

    /// A reply that was delivered but not yet received, if any.
    pub fn try_recv(&mut self) -> Option<ReplyMatch> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

struct Listener {
    id: u64,
    request: WaitRequest,
    tx: oneshot::Sender<ReplyMatch>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Routes inbound events to pending waits.
///
/// An event resolves at most one wait: the oldest subscription it matches.
#[derive(Clone, Default)]
pub struct ReplyHub {
    state: Arc<Mutex<HubState>>,
}

impl ReplyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an inbound event to pending waits. Returns true if one took it.
    pub fn publish(&self, event: &InboundEvent) -> bool {
        let mut state = lock(&self.state);
        let mut idx = 0;
        while idx < state.listeners.len() {
            let Some(reply) = state.listeners[idx].request.classify(event) else {
                idx += 1;
                continue;
            };
            let listener = state.listeners.remove(idx);
            if listener.tx.send(reply).is_ok() {
                return true;
            }
            // Receiver already gone (timed out concurrently); keep looking.
        }
        false
    }

    /// Number of waits currently subscribed.
    pub fn pending(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

impl ReplySource for ReplyHub {
    fn subscribe(&self, request: WaitRequest) -> Subscription {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push(Listener { id, request, tx });
            id
        };

        let state = self.state.clone();
        Subscription::new(rx, move || {
            lock(&state).listeners.retain(|l| l.id != id);
        })
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::wait::{WaitDefaults, WaitOptions};
    use crate::domain::{ChatId, ConversationIdentity, MessageId, ParticipantIds, SenderType};
    use crate::messaging::types::{InboundContent, MessageKind};
    use chrono::Utc;

    fn request(chat: &str) -> WaitRequest {
        let identity = ConversationIdentity::new(
            ChatId::from(chat),
            ParticipantIds::primary("1"),
            SenderType::Individual,
        );
        WaitOptions::new().resolve(&WaitDefaults::default(), &identity, MessageKind::Text)
    }

    fn text_event(chat: &str, text: &str) -> InboundEvent {
        InboundEvent {
            chat_id: ChatId::from(chat),
            sender: ParticipantIds::primary("1"),
            sender_type: SenderType::Individual,
            message_id: MessageId("x".to_string()),
            content: InboundContent::text(text),
            timestamp: Utc::now(),
            from_self: false,
        }
    }

    #[tokio::test]
    async fn event_resolves_oldest_matching_subscription_only() {
        let hub = ReplyHub::new();
        let mut first = hub.subscribe(request("a"));
        let mut second = hub.subscribe(request("a"));

        assert!(hub.publish(&text_event("a", "one")));
        assert!(matches!(first.recv().await, Some(ReplyMatch::Accepted(_))));
        assert!(second.try_recv().is_none());
        assert_eq!(hub.pending(), 1);

        assert!(hub.publish(&text_event("a", "two")));
        assert!(matches!(second.recv().await, Some(ReplyMatch::Accepted(_))));
        assert!(!hub.publish(&text_event("a", "three")));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = ReplyHub::new();
        let sub = hub.subscribe(request("a"));
        assert_eq!(hub.pending(), 1);
        drop(sub);
        assert_eq!(hub.pending(), 0);
        assert!(!hub.publish(&text_event("a", "late")));
    }

    #[test]
    fn unrelated_chat_is_not_consumed() {
        let hub = ReplyHub::new();
        let _sub = hub.subscribe(request("a"));
        assert!(!hub.publish(&text_event("b", "hi")));
        assert_eq!(hub.pending(), 1);
    }

    #[tokio::test]
    async fn settled_subscription_reports_no_reply() {
        let mut sub = Subscription::settled(None);
        assert!(sub.recv().await.is_none());
    }
}
