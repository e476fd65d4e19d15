use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    domain::{ChatId, MessageId, MessageRef, ParticipantIds, SenderType},
    messaging::{
        port::Transport,
        types::{GroupMetadata, MessageKind, OutgoingPayload, SendOptions},
    },
    Error, Result,
};

/// One captured send, in delivery order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SentRecord {
    pub destination: ChatId,
    pub kind: MessageKind,
    pub payload: OutgoingPayload,
    pub options: SendOptions,
}

#[derive(Default)]
struct Recorded {
    sent: Vec<SentRecord>,
    fail_next: usize,
    next_id: u64,
}

/// In-memory [`Transport`] that records every delivered payload.
pub struct RecordingTransport {
    self_id: ParticipantIds,
    state: Mutex<Recorded>,
    groups: Mutex<HashMap<ChatId, GroupMetadata>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            self_id: ParticipantIds::primary("engine"),
            state: Mutex::new(Recorded::default()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Metadata returned by `fetch_group_metadata` for `chat_id`.
    pub fn set_group_metadata(&self, chat_id: ChatId, metadata: GroupMetadata) {
        lock(&self.groups).insert(chat_id, metadata);
    }

    /// Fail the next `n` sends with a transport error. Failed sends are not recorded.
    pub fn fail_next_sends(&self, n: usize) {
        lock(&self.state).fail_next = n;
    }

    pub fn records(&self) -> Vec<SentRecord> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(|r| r.payload.as_text().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        destination: &ChatId,
        payload: &OutgoingPayload,
        options: &SendOptions,
    ) -> Result<MessageRef> {
        let sender_type = if lock(&self.groups).contains_key(destination) {
            SenderType::Group
        } else {
            SenderType::Individual
        };

        let mut state = lock(&self.state);
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::Transport("simulated delivery failure".to_string()));
        }

        state.next_id += 1;
        let message_id = MessageId(format!("sim-{}", state.next_id));
        state.sent.push(SentRecord {
            destination: destination.clone(),
            kind: payload.kind(),
            payload: payload.clone(),
            options: options.clone(),
        });

        Ok(MessageRef {
            chat_id: destination.clone(),
            message_id,
            sender: self.self_id.clone(),
            sender_type,
            from_self: true,
        })
    }

    async fn fetch_group_metadata(&self, chat_id: &ChatId) -> Result<Option<GroupMetadata>> {
        Ok(lock(&self.groups).get(chat_id).cloned())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
