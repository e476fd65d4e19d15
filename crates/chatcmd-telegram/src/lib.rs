//! Telegram adapter (teloxide).
//!
//! This crate implements the `chatcmd-core` [`Transport`] over the Telegram
//! Bot API and feeds polled messages into the command dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, UserId},
};

use tokio::time::sleep;

pub mod access;
pub mod config;
pub mod inbound;
pub mod router;

use chatcmd_core::{
    domain::{ChatId, MessageId, MessageRef, ParticipantId, ParticipantIds, SenderType},
    errors::Error,
    messaging::{
        port::Transport,
        types::{
            GroupMember, GroupMetadata, MediaSource, OutgoingMedia, OutgoingPayload, SendOptions,
        },
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    me: ParticipantIds,
}

impl TelegramTransport {
    pub fn new(bot: Bot, bot_id: UserId, bot_username: Option<&str>) -> Self {
        let mut me = ParticipantIds::primary(bot_id.0.to_string());
        if let Some(name) = bot_username {
            me = me.with_linked(name);
        }
        Self { bot, me }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: &ChatId) -> Result<teloxide::types::ChatId> {
        chat_id
            .0
            .parse::<i64>()
            .map(teloxide::types::ChatId)
            .map_err(|_| Error::Transport(format!("invalid telegram chat id: {chat_id}")))
    }

    fn tg_msg_id(message_id: &MessageId) -> Result<teloxide::types::MessageId> {
        message_id
            .0
            .parse::<i32>()
            .map(teloxide::types::MessageId)
            .map_err(|_| Error::Transport(format!("invalid telegram message id: {}", message_id.0)))
    }

    fn input_file(media: &OutgoingMedia) -> InputFile {
        match &media.source {
            MediaSource::Bytes { data, file_name } => {
                let file = InputFile::memory(data.clone());
                match file_name {
                    Some(name) => file.file_name(name.clone()),
                    None => file,
                }
            }
            MediaSource::Reference { id } => InputFile::file_id(id.clone()),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    fn location_request(
        &self,
        chat: teloxide::types::ChatId,
        latitude: f64,
        longitude: f64,
        reply_to: Option<teloxide::types::MessageId>,
    ) -> <Bot as Requester>::SendLocation {
        let req = self.bot.send_location(chat, latitude, longitude);
        match reply_to {
            Some(id) => req.reply_to_message_id(id),
            None => req,
        }
    }

    fn contact_request(
        &self,
        chat: teloxide::types::ChatId,
        name: &str,
        phone: &str,
        reply_to: Option<teloxide::types::MessageId>,
    ) -> <Bot as Requester>::SendContact {
        let req = self.bot.send_contact(chat, phone, name);
        match reply_to {
            Some(id) => req.reply_to_message_id(id),
            None => req,
        }
    }

    async fn send_media(
        &self,
        chat: teloxide::types::ChatId,
        payload: &OutgoingPayload,
        media: &OutgoingMedia,
        reply_to: Option<teloxide::types::MessageId>,
    ) -> Result<Message> {
        let file = Self::input_file(media);
        let caption = media.caption.clone();

        macro_rules! send_with_caption {
            ($method:ident) => {
                self.with_retry(|| {
                    let mut req = self.bot.$method(chat, file.clone());
                    if let Some(c) = &caption {
                        req = req.caption(c.clone());
                    }
                    if let Some(id) = reply_to {
                        req = req.reply_to_message_id(id);
                    }
                    req
                })
                .await
            };
        }

        match payload {
            OutgoingPayload::Image(_) => send_with_caption!(send_photo),
            OutgoingPayload::Video(_) => send_with_caption!(send_video),
            OutgoingPayload::Audio(_) => send_with_caption!(send_audio),
            OutgoingPayload::Document(_) => send_with_caption!(send_document),
            OutgoingPayload::Sticker(_) => {
                self.with_retry(|| {
                    let mut req = self.bot.send_sticker(chat, file.clone());
                    if let Some(id) = reply_to {
                        req = req.reply_to_message_id(id.0);
                    }
                    req
                })
                .await
            }
            other => Err(Error::Unsupported(format!(
                "{:?} is not a media payload",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(
        &self,
        destination: &ChatId,
        payload: &OutgoingPayload,
        options: &SendOptions,
    ) -> Result<MessageRef> {
        let chat = Self::tg_chat(destination)?;
        let reply_to = match &options.reply_to {
            Some(anchor) => Some(Self::tg_msg_id(&anchor.message_id)?),
            None => None,
        };

        let msg = match payload {
            OutgoingPayload::Text { text } => {
                self.with_retry(|| {
                    let mut req = self.bot.send_message(chat, text.clone());
                    if let Some(id) = reply_to {
                        req = req.reply_to_message_id(id);
                    }
                    req
                })
                .await?
            }
            OutgoingPayload::Image(media)
            | OutgoingPayload::Video(media)
            | OutgoingPayload::Audio(media)
            | OutgoingPayload::Sticker(media)
            | OutgoingPayload::Document(media) => {
                self.send_media(chat, payload, media, reply_to).await?
            }
            OutgoingPayload::Location {
                latitude,
                longitude,
            } => {
                self.with_retry(|| self.location_request(chat, *latitude, *longitude, reply_to))
                    .await?
            }
            OutgoingPayload::Contact { name, phone } => {
                self.with_retry(|| self.contact_request(chat, name, phone, reply_to))
                    .await?
            }
            OutgoingPayload::Reaction { .. } => {
                return Err(Error::Unsupported(
                    "message reactions are not available in this Bot API version".to_string(),
                ));
            }
        };

        Ok(MessageRef {
            chat_id: destination.clone(),
            message_id: MessageId(msg.id.0.to_string()),
            sender: self.me.clone(),
            sender_type: inbound::sender_type_of(&msg.chat),
            from_self: true,
        })
    }

    /// Telegram only exposes administrators; ordinary members are not listed.
    async fn fetch_group_metadata(&self, chat_id: &ChatId) -> Result<Option<GroupMetadata>> {
        let chat = Self::tg_chat(chat_id)?;
        let info = self.with_retry(|| self.bot.get_chat(chat)).await?;
        if inbound::sender_type_of(&info) != SenderType::Group {
            return Ok(None);
        }

        let admins = self
            .with_retry(|| self.bot.get_chat_administrators(chat))
            .await?;
        let members = admins
            .into_iter()
            .map(|m| GroupMember {
                raw_id: ParticipantId(m.user.id.0.to_string()),
                as_mention_formatted: match &m.user.username {
                    Some(u) => format!("@{u}"),
                    None => m.user.first_name.clone(),
                },
            })
            .collect();

        Ok(Some(GroupMetadata {
            group_name: info.title().unwrap_or_default().to_string(),
            members,
        }))
    }
}
