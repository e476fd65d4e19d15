use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{GroupMetadata, OutgoingPayload, SendOptions},
    Result,
};

/// Cross-platform transport port.
///
/// Implementations encode and transmit one payload per call. The engine never
/// calls `send` concurrently for the same transport: every send goes through
/// the [`DeliveryQueue`](crate::messaging::queue::DeliveryQueue) drain loop.
/// Inbound events reach the engine separately, through the channel handed to
/// [`Dispatcher::run`](crate::dispatcher::Dispatcher::run).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        destination: &ChatId,
        payload: &OutgoingPayload,
        options: &SendOptions,
    ) -> Result<MessageRef>;

    /// `Ok(None)` when the chat is not a group or the platform has no data.
    async fn fetch_group_metadata(&self, chat_id: &ChatId) -> Result<Option<GroupMetadata>>;
}
