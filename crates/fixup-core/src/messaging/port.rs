use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageRef, UserId},
    messaging::types::{
        BotIdentity, ChannelInfo, InteractionReply, InteractionRef, OutgoingRelay, UserInfo,
        Webhook,
    },
    Result,
};

/// Outbound operations the relay needs from the chat platform.
///
/// Discord is the implementation today. Errors are mapped into the core
/// `Error` by the adapter; a target that no longer exists should surface as
/// `Error::NotFound`.
#[async_trait]
pub trait RelayPort: Send + Sync {
    /// The bot's own account.
    async fn current_user(&self) -> Result<BotIdentity>;

    async fn fetch_user(&self, user_id: UserId) -> Result<UserInfo>;

    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<ChannelInfo>;

    async fn list_webhooks(&self, channel_id: ChannelId) -> Result<Vec<Webhook>>;

    async fn create_webhook(
        &self,
        channel_id: ChannelId,
        name: &str,
        avatar_url: Option<&str>,
    ) -> Result<Webhook>;

    /// Post through a webhook; returns the created message.
    async fn execute_webhook(&self, webhook: &Webhook, relay: OutgoingRelay) -> Result<MessageRef>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    /// The single initial response to an interaction, carrying a message.
    async fn respond_interaction(
        &self,
        interaction: &InteractionRef,
        reply: InteractionReply,
    ) -> Result<()>;

    /// Initial response that acknowledges without showing anything.
    async fn acknowledge_interaction(&self, interaction: &InteractionRef) -> Result<()>;

    /// Additional message after the initial response was sent.
    async fn follow_up_interaction(
        &self,
        interaction: &InteractionRef,
        reply: InteractionReply,
    ) -> Result<()>;
}
