use std::sync::{Arc, Mutex};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    conversation::{
        replies::ReplySource,
        wait::{ReplyMatch, WaitDefaults, WaitOptions, WaitOutcome},
    },
    domain::{ChatId, ConversationIdentity, MessageRef, ParticipantId, SenderType},
    messaging::{
        port::Transport,
        queue::DeliveryQueue,
        types::{
            GroupMetadata, InboundContent, InboundEvent, MediaRef, MessageKind, OutgoingMedia,
            OutgoingPayload, SendOptions,
        },
    },
    Error, Result,
};

/// Shared collaborators of every context on one transport connection.
#[derive(Clone)]
pub struct ContextServices {
    pub queue: DeliveryQueue,
    pub transport: Arc<dyn Transport>,
    pub replies: Arc<dyn ReplySource>,
    pub wait_defaults: WaitDefaults,
    pub mention_char: char,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitPhase {
    Idle,
    AwaitingReply(MessageKind),
}

/// How a retargeted context derives its identity.
#[derive(Clone, Debug)]
pub enum Retarget {
    /// Same identity, fresh wait state.
    Same,
    /// The conversation the message belongs to.
    Message(MessageRef),
    Group(ChatId),
    Individual(ChatId),
    /// The message's conversation, with the message as reply anchor.
    AnchoredTo(MessageRef),
}

/// Send/wait state for one conversational identity.
///
/// At most one wait is pending at a time; a second concurrent wait fails with
/// [`Error::IllegalConcurrentWait`]. Contexts derived with [`ChatContext::retarget`]
/// share the delivery queue but never the wait state.
pub struct ChatContext {
    identity: ConversationIdentity,
    services: ContextServices,
    phase: Mutex<WaitPhase>,
}

struct WaitGuard<'a> {
    phase: &'a Mutex<WaitPhase>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        *phase = WaitPhase::Idle;
    }
}

impl ChatContext {
    pub fn new(identity: ConversationIdentity, services: ContextServices) -> Self {
        Self {
            identity,
            services,
            phase: Mutex::new(WaitPhase::Idle),
        }
    }

    pub fn identity(&self) -> &ConversationIdentity {
        &self.identity
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.identity.chat_id
    }

    pub fn is_waiting(&self) -> bool {
        !matches!(self.current_phase(), WaitPhase::Idle)
    }

    fn current_phase(&self) -> WaitPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn begin_wait(&self, kind: MessageKind) -> Result<WaitGuard<'_>> {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if let WaitPhase::AwaitingReply(pending) = *phase {
            warn!(
                chat_id = %self.identity.chat_id,
                pending = ?pending,
                requested = ?kind,
                "second wait started while one is pending"
            );
            return Err(Error::IllegalConcurrentWait);
        }
        *phase = WaitPhase::AwaitingReply(kind);
        Ok(WaitGuard { phase: &self.phase })
    }

    // ============== Sending ==============

    /// Queue a payload for this conversation and wait for the transport result.
    ///
    /// Returns `None` on queue overflow or delivery failure.
    pub async fn send(&self, payload: OutgoingPayload, options: SendOptions) -> Option<MessageRef> {
        let kind = payload.kind();
        let pending = match self
            .services
            .queue
            .enqueue(self.identity.chat_id.clone(), payload, options)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(chat_id = %self.identity.chat_id, ?kind, error = %e, "send not queued");
                return None;
            }
        };

        match pending.outcome().await {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!(chat_id = %self.identity.chat_id, ?kind, error = %e, "send failed");
                None
            }
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Option<MessageRef> {
        self.send(OutgoingPayload::text(text), SendOptions::default())
            .await
    }

    /// Send text quoting the conversation anchor (plain send when there is none).
    pub async fn reply_text(&self, text: impl Into<String>) -> Option<MessageRef> {
        self.send(OutgoingPayload::text(text), self.anchored_options())
            .await
    }

    pub async fn send_text_with_mentions(
        &self,
        text: impl Into<String>,
        mentions: Vec<ParticipantId>,
    ) -> Option<MessageRef> {
        let options = SendOptions {
            mentions,
            ..self.anchored_options()
        };
        self.send(OutgoingPayload::text(text), options).await
    }

    pub async fn send_image(&self, media: OutgoingMedia) -> Option<MessageRef> {
        self.send(OutgoingPayload::Image(media), SendOptions::default())
            .await
    }

    pub async fn send_video(&self, media: OutgoingMedia) -> Option<MessageRef> {
        self.send(OutgoingPayload::Video(media), SendOptions::default())
            .await
    }

    pub async fn send_audio(&self, media: OutgoingMedia) -> Option<MessageRef> {
        self.send(OutgoingPayload::Audio(media), SendOptions::default())
            .await
    }

    pub async fn send_sticker(&self, media: OutgoingMedia) -> Option<MessageRef> {
        self.send(OutgoingPayload::Sticker(media), SendOptions::default())
            .await
    }

    pub async fn send_document(&self, media: OutgoingMedia) -> Option<MessageRef> {
        self.send(OutgoingPayload::Document(media), SendOptions::default())
            .await
    }

    pub async fn send_location(&self, latitude: f64, longitude: f64) -> Option<MessageRef> {
        self.send(
            OutgoingPayload::Location {
                latitude,
                longitude,
            },
            SendOptions::default(),
        )
        .await
    }

    pub async fn send_contact(
        &self,
        name: impl Into<String>,
        phone: impl Into<String>,
    ) -> Option<MessageRef> {
        self.send(
            OutgoingPayload::Contact {
                name: name.into(),
                phone: phone.into(),
            },
            SendOptions::default(),
        )
        .await
    }

    pub async fn send_reaction(
        &self,
        emoji: impl Into<String>,
        target: MessageRef,
    ) -> Option<MessageRef> {
        self.send(
            OutgoingPayload::Reaction {
                emoji: emoji.into(),
                target,
            },
            SendOptions::default(),
        )
        .await
    }

    /// React to the conversation anchor; `None` if the context has none.
    pub async fn react_to_origin(&self, emoji: impl Into<String>) -> Option<MessageRef> {
        let target = self.identity.origin.clone()?;
        self.send_reaction(emoji, target).await
    }

    fn anchored_options(&self) -> SendOptions {
        SendOptions {
            reply_to: self.identity.origin.clone(),
            mentions: Vec::new(),
        }
    }

    // ============== Waiting ==============

    /// Suspend until a reply of `kind` arrives, the timeout elapses, or the
    /// user answers with a cancel keyword.
    pub async fn wait_for(
        &self,
        kind: MessageKind,
        options: WaitOptions,
    ) -> Result<WaitOutcome<InboundEvent>> {
        let _busy = self.begin_wait(kind)?;
        let request = options.resolve(&self.services.wait_defaults, &self.identity, kind);
        let timeout = request.timeout;
        let mut subscription = self.services.replies.subscribe(request);

        let reply = tokio::select! {
            biased;
            reply = subscription.recv() => reply,
            // A reply delivered in the same instant still wins.
            _ = sleep(timeout) => subscription.try_recv(),
        };
        drop(subscription);

        let outcome = match reply {
            Some(ReplyMatch::Accepted(event)) => WaitOutcome::Value(event),
            Some(ReplyMatch::Cancelled(_)) => WaitOutcome::Cancelled,
            None => WaitOutcome::TimedOut,
        };
        debug!(
            chat_id = %self.identity.chat_id,
            ?kind,
            resolved = outcome_label(&outcome),
            "wait resolved"
        );
        Ok(outcome)
    }

    pub async fn wait_text(&self, options: WaitOptions) -> Result<WaitOutcome<String>> {
        self.wait_extract(MessageKind::Text, options, |content| match content {
            InboundContent::Text { text } => Some(text),
            _ => None,
        })
        .await
    }

    pub async fn wait_image(&self, options: WaitOptions) -> Result<WaitOutcome<MediaRef>> {
        self.wait_extract(MessageKind::Image, options, |content| match content {
            InboundContent::Image(m) => Some(m),
            _ => None,
        })
        .await
    }

    pub async fn wait_video(&self, options: WaitOptions) -> Result<WaitOutcome<MediaRef>> {
        self.wait_extract(MessageKind::Video, options, |content| match content {
            InboundContent::Video(m) => Some(m),
            _ => None,
        })
        .await
    }

    pub async fn wait_audio(&self, options: WaitOptions) -> Result<WaitOutcome<MediaRef>> {
        self.wait_extract(MessageKind::Audio, options, |content| match content {
            InboundContent::Audio(m) => Some(m),
            _ => None,
        })
        .await
    }

    pub async fn wait_sticker(&self, options: WaitOptions) -> Result<WaitOutcome<MediaRef>> {
        self.wait_extract(MessageKind::Sticker, options, |content| match content {
            InboundContent::Sticker(m) => Some(m),
            _ => None,
        })
        .await
    }

    pub async fn wait_document(&self, options: WaitOptions) -> Result<WaitOutcome<MediaRef>> {
        self.wait_extract(MessageKind::Document, options, |content| match content {
            InboundContent::Document(m) => Some(m),
            _ => None,
        })
        .await
    }

    /// Resolves to `(latitude, longitude)`.
    pub async fn wait_location(&self, options: WaitOptions) -> Result<WaitOutcome<(f64, f64)>> {
        self.wait_extract(MessageKind::Location, options, |content| match content {
            InboundContent::Location {
                latitude,
                longitude,
            } => Some((latitude, longitude)),
            _ => None,
        })
        .await
    }

    /// Resolves to `(name, phone)`.
    pub async fn wait_contact(&self, options: WaitOptions) -> Result<WaitOutcome<(String, String)>> {
        self.wait_extract(MessageKind::Contact, options, |content| match content {
            InboundContent::Contact { name, phone } => Some((name, phone)),
            _ => None,
        })
        .await
    }

    /// Resolves to the reaction emoji.
    pub async fn wait_reaction(&self, options: WaitOptions) -> Result<WaitOutcome<String>> {
        self.wait_extract(MessageKind::Reaction, options, |content| match content {
            InboundContent::Reaction { emoji, .. } => Some(emoji),
            _ => None,
        })
        .await
    }

    async fn wait_extract<T>(
        &self,
        kind: MessageKind,
        options: WaitOptions,
        extract: impl FnOnce(InboundContent) -> Option<T>,
    ) -> Result<WaitOutcome<T>> {
        let outcome = match self.wait_for(kind, options).await? {
            WaitOutcome::Value(event) => match extract(event.content) {
                Some(v) => WaitOutcome::Value(v),
                None => WaitOutcome::TimedOut,
            },
            WaitOutcome::TimedOut => WaitOutcome::TimedOut,
            WaitOutcome::Cancelled => WaitOutcome::Cancelled,
        };
        Ok(outcome)
    }

    // ============== Platform lookups ==============

    /// Group name and members, or `None` for one-to-one chats and lookup failures.
    pub async fn group_metadata(&self) -> Option<GroupMetadata> {
        if self.identity.sender_type != SenderType::Group {
            return None;
        }
        match self
            .services
            .transport
            .fetch_group_metadata(&self.identity.chat_id)
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                warn!(chat_id = %self.identity.chat_id, error = %e, "group metadata lookup failed");
                None
            }
        }
    }

    /// Mention text for a participant, e.g. `@5551234`.
    pub fn mention(&self, participant: &ParticipantId) -> String {
        format!("{}{}", self.services.mention_char, participant.0)
    }

    // ============== Retargeting ==============

    /// New context with a derived identity and independent wait state.
    pub fn retarget(&self, target: Retarget) -> ChatContext {
        let current = &self.identity;
        let identity = match target {
            Retarget::Same => current.clone(),
            Retarget::Message(msg) => {
                ConversationIdentity::from_message(&msg, &current.participant)
            }
            Retarget::AnchoredTo(msg) => {
                ConversationIdentity::from_message(&msg, &current.participant).with_origin(msg)
            }
            Retarget::Group(chat_id) => ConversationIdentity::new(
                chat_id,
                current.participant.clone(),
                SenderType::Group,
            ),
            Retarget::Individual(chat_id) => ConversationIdentity::new(
                chat_id,
                current.participant.clone(),
                SenderType::Individual,
            ),
        };

        ChatContext::new(identity, self.services.clone())
    }

    /// Same identity, independent wait state (for detached background work).
    pub fn clone_context(&self) -> ChatContext {
        self.retarget(Retarget::Same)
    }

    pub fn targeted_to(&self, msg: MessageRef) -> ChatContext {
        self.retarget(Retarget::Message(msg))
    }

    pub fn targeted_to_group(&self, group: ChatId) -> ChatContext {
        self.retarget(Retarget::Group(group))
    }

    pub fn targeted_to_individual(&self, chat: ChatId) -> ChatContext {
        self.retarget(Retarget::Individual(chat))
    }

    pub fn targeted_to_with_initial_msg(&self, msg: MessageRef) -> ChatContext {
        self.retarget(Retarget::AnchoredTo(msg))
    }
}

fn outcome_label<T>(outcome: &WaitOutcome<T>) -> &'static str {
    match outcome {
        WaitOutcome::Value(_) => "value",
        WaitOutcome::TimedOut => "timeout",
        WaitOutcome::Cancelled => "cancelled",
    }
}
