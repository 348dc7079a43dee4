use crate::{
    domain::{ChannelId, GuildId, MessageRef, UserId, WebhookId},
    retraction::RetractControl,
};

/// Longest name a webhook message may carry.
pub const MAX_WEBHOOK_USERNAME_LEN: usize = 80;

/// A file attached to an incoming message, forwarded by URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    pub global_name: Option<String>,
    pub bot: bool,
}

/// A message-created event, reduced to what the relay needs.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub msg: MessageRef,
    pub guild_id: Option<GuildId>,
    pub author: Author,
    /// Set when the message was posted through a webhook.
    pub webhook_id: Option<WebhookId>,
    pub member_nick: Option<String>,
    pub member_avatar_url: Option<String>,
    pub user_avatar_url: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl IncomingMessage {
    /// Automation-originated messages are never relayed.
    pub fn is_automated(&self) -> bool {
        self.author.bot || self.webhook_id.is_some()
    }

    /// Guild nickname, then global display name, then username.
    pub fn display_name(&self) -> String {
        let name = [self.member_nick.as_deref(), self.author.global_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(self.author.username.as_str());
        name.chars().take(MAX_WEBHOOK_USERNAME_LEN).collect()
    }

    /// Per-guild member avatar when set, else the account avatar.
    pub fn avatar_url(&self) -> &str {
        self.member_avatar_url
            .as_deref()
            .unwrap_or(&self.user_avatar_url)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub bot: bool,
}

/// A reaction-added event. `user` is `None` when the payload was partial.
#[derive(Clone, Debug)]
pub struct ReactionAdd {
    pub msg: MessageRef,
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    pub emoji: String,
    pub user: Option<UserInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionRef {
    pub id: u64,
    /// Follow-up messages are posted under the application, not the bot user.
    pub application_id: u64,
    pub token: String,
}

/// A button activation on a message.
#[derive(Clone, Debug)]
pub struct ComponentInteraction {
    pub interaction: InteractionRef,
    pub msg: MessageRef,
    pub user_id: UserId,
    pub custom_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionReply {
    pub content: String,
    /// Visible only to the activating user.
    pub ephemeral: bool,
}

impl InteractionReply {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    GuildText,
    GuildAnnouncement,
    /// Voice channel text chat.
    GuildVoice,
    Thread,
    Direct,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
}

impl ChannelInfo {
    /// Text-capable guild channel.
    pub fn accepts_relay(&self) -> bool {
        match self.kind {
            ChannelKind::GuildText | ChannelKind::GuildAnnouncement | ChannelKind::GuildVoice => {
                true
            }
            ChannelKind::Thread => self.parent_id.is_some(),
            ChannelKind::Direct | ChannelKind::Other => false,
        }
    }

    /// Channel that owns the webhook, plus the thread to post into (if any).
    pub fn webhook_target(&self) -> (ChannelId, Option<ChannelId>) {
        match (self.kind, self.parent_id) {
            (ChannelKind::Thread, Some(parent)) => (parent, Some(self.id)),
            _ => (self.id, None),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Webhook {
    pub id: WebhookId,
    pub channel_id: ChannelId,
    pub name: Option<String>,
    /// Only incoming webhooks visible to us carry a token.
    pub token: Option<String>,
    /// User that created the webhook.
    pub owner_id: Option<UserId>,
}

impl Webhook {
    pub fn is_usable_by(&self, bot: UserId) -> bool {
        self.owner_id == Some(bot) && self.token.is_some()
    }
}

/// The bot's own account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// A message to post through a webhook on behalf of someone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingRelay {
    pub content: String,
    pub username: String,
    pub avatar_url: String,
    pub attachments: Vec<Attachment>,
    pub thread_id: Option<ChannelId>,
    pub retract_control: Option<RetractControl>,
}
