//! Discord adapter.
//!
//! This crate implements the `fixup-core` RelayPort over the Discord REST API
//! and feeds gateway events into the core handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

pub mod avatar;
pub mod gateway;
pub mod handlers;
pub mod http_client;
pub mod router;
pub mod types;

use fixup_core::{
    domain::{ChannelId, MessageId, MessageRef, UserId, WebhookId},
    errors::Error,
    messaging::{
        port::RelayPort,
        types::{
            BotIdentity, ChannelInfo, ChannelKind, InteractionReply, InteractionRef,
            OutgoingRelay, UserInfo, Webhook,
        },
    },
    retraction::RETRACT_BUTTON_LABEL,
    Result,
};

use crate::{
    http_client::{ApiError, DiscordHttpClient, UploadFile},
    types::{component, DiscordChannelType, InteractionCallbackType, EPHEMERAL_FLAG},
};

#[derive(Clone)]
pub struct DiscordPort {
    http: Arc<DiscordHttpClient>,
}

impl DiscordPort {
    pub fn new(http: Arc<DiscordHttpClient>) -> Self {
        Self { http }
    }

    fn map_err(e: anyhow::Error) -> Error {
        let api = e.chain().find_map(|c| c.downcast_ref::<ApiError>());
        match api {
            Some(api) if api.status == reqwest::StatusCode::NOT_FOUND => {
                Error::NotFound(format!("discord: {}", api.route))
            }
            _ => Error::External(format!("discord error: {e:#}")),
        }
    }

    fn malformed(what: &str) -> Error {
        Error::External(format!("discord error: malformed {what} payload"))
    }

    /// Download attachments for re-upload. A file that cannot be fetched is
    /// dropped from the relay rather than failing it.
    async fn fetch_uploads(&self, relay: &OutgoingRelay) -> Vec<UploadFile> {
        let mut files = Vec::with_capacity(relay.attachments.len());
        for attachment in &relay.attachments {
            match self.http.download(&attachment.url).await {
                Ok((bytes, fetched_type)) => files.push(UploadFile {
                    filename: attachment.filename.clone(),
                    content_type: attachment.content_type.clone().or(fetched_type),
                    bytes,
                }),
                Err(error) => tracing::warn!(
                    file = %attachment.filename,
                    error = %format!("{error:#}"),
                    "skipping attachment that could not be downloaded"
                ),
            }
        }
        files
    }
}

fn snowflake(value: Option<&Value>) -> Option<u64> {
    value.and_then(Value::as_str).and_then(|s| s.parse().ok())
}

fn bot_identity_from_json(v: &Value) -> Option<BotIdentity> {
    let user_id = UserId(snowflake(v.get("id"))?);
    let username = v.get("username")?.as_str()?;
    let name = v
        .get("global_name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(username);
    Some(BotIdentity {
        user_id,
        name: name.to_string(),
        avatar_url: Some(avatar::user_avatar_url(
            user_id,
            v.get("avatar").and_then(Value::as_str),
            v.get("discriminator").and_then(Value::as_str),
        )),
    })
}

fn user_from_json(v: &Value) -> Option<UserInfo> {
    Some(UserInfo {
        id: UserId(snowflake(v.get("id"))?),
        username: v.get("username")?.as_str()?.to_string(),
        bot: v.get("bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn channel_from_json(v: &Value) -> Option<ChannelInfo> {
    let kind = v
        .get("type")
        .and_then(Value::as_u64)
        .and_then(DiscordChannelType::from_u64)
        .map_or(ChannelKind::Other, |t| match t {
            DiscordChannelType::GuildText => ChannelKind::GuildText,
            DiscordChannelType::GuildAnnouncement => ChannelKind::GuildAnnouncement,
            DiscordChannelType::GuildVoice | DiscordChannelType::GuildStageVoice => {
                ChannelKind::GuildVoice
            }
            DiscordChannelType::Dm | DiscordChannelType::GroupDm => ChannelKind::Direct,
            t if t.is_thread() => ChannelKind::Thread,
            _ => ChannelKind::Other,
        });
    Some(ChannelInfo {
        id: ChannelId(snowflake(v.get("id"))?),
        kind,
        parent_id: snowflake(v.get("parent_id")).map(ChannelId),
    })
}

fn webhook_from_json(v: &Value) -> Option<Webhook> {
    Some(Webhook {
        id: WebhookId(snowflake(v.get("id"))?),
        channel_id: ChannelId(snowflake(v.get("channel_id"))?),
        name: v.get("name").and_then(Value::as_str).map(str::to_string),
        token: v.get("token").and_then(Value::as_str).map(str::to_string),
        owner_id: snowflake(v.get("user").and_then(|u| u.get("id"))).map(UserId),
    })
}

/// JSON body for a webhook execution. `uploads` are the filenames actually
/// sent as `files[n]`, in order.
fn webhook_payload(relay: &OutgoingRelay, uploads: &[UploadFile]) -> Value {
    let mut payload = json!({
        "content": relay.content,
        "username": relay.username,
        "avatar_url": relay.avatar_url,
        "allowed_mentions": { "parse": [] },
    });
    if let Some(control) = &relay.retract_control {
        payload["components"] = json!([{
            "type": component::ACTION_ROW,
            "components": [{
                "type": component::BUTTON,
                "style": component::STYLE_DANGER,
                "label": RETRACT_BUTTON_LABEL,
                "custom_id": control.custom_id(),
            }]
        }]);
    }
    if !uploads.is_empty() {
        payload["attachments"] = Value::Array(
            uploads
                .iter()
                .enumerate()
                .map(|(id, file)| json!({ "id": id, "filename": file.filename }))
                .collect(),
        );
    }
    payload
}

fn interaction_reply_data(reply: &InteractionReply) -> Value {
    let mut data = json!({
        "content": reply.content,
        "allowed_mentions": { "parse": [] },
    });
    if reply.ephemeral {
        data["flags"] = json!(EPHEMERAL_FLAG);
    }
    data
}

#[async_trait]
impl RelayPort for DiscordPort {
    async fn current_user(&self) -> Result<BotIdentity> {
        let me = self.http.get_current_user().await.map_err(Self::map_err)?;
        bot_identity_from_json(&me).ok_or_else(|| Self::malformed("current user"))
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<UserInfo> {
        let user = self.http.get_user(user_id.0).await.map_err(Self::map_err)?;
        user_from_json(&user).ok_or_else(|| Self::malformed("user"))
    }

    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<ChannelInfo> {
        let channel = self
            .http
            .get_channel(channel_id.0)
            .await
            .map_err(Self::map_err)?;
        channel_from_json(&channel).ok_or_else(|| Self::malformed("channel"))
    }

    async fn list_webhooks(&self, channel_id: ChannelId) -> Result<Vec<Webhook>> {
        let hooks = self
            .http
            .list_channel_webhooks(channel_id.0)
            .await
            .map_err(Self::map_err)?;
        Ok(hooks
            .as_array()
            .map(|items| items.iter().filter_map(webhook_from_json).collect())
            .unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        channel_id: ChannelId,
        name: &str,
        avatar_url: Option<&str>,
    ) -> Result<Webhook> {
        let avatar = match avatar_url {
            Some(url) => match self.http.image_data_uri(url).await {
                Ok(data_uri) => Some(data_uri),
                Err(error) => {
                    tracing::warn!(
                        error = %format!("{error:#}"),
                        "creating webhook without avatar"
                    );
                    None
                }
            },
            None => None,
        };
        let hook = self
            .http
            .create_webhook(channel_id.0, name, avatar)
            .await
            .map_err(Self::map_err)?;
        webhook_from_json(&hook).ok_or_else(|| Self::malformed("webhook"))
    }

    async fn execute_webhook(&self, webhook: &Webhook, relay: OutgoingRelay) -> Result<MessageRef> {
        let token = webhook
            .token
            .as_deref()
            .ok_or_else(|| Error::External(format!("webhook {} has no token", webhook.id)))?;
        let uploads = self.fetch_uploads(&relay).await;
        let payload = webhook_payload(&relay, &uploads);

        let message = self
            .http
            .execute_webhook(
                webhook.id.0,
                token,
                relay.thread_id.map(|t| t.0),
                payload,
                &uploads,
            )
            .await
            .map_err(Self::map_err)?;

        let message_id = snowflake(message.get("id")).ok_or_else(|| Self::malformed("message"))?;
        let channel_id = snowflake(message.get("channel_id"))
            .map(ChannelId)
            .or(relay.thread_id)
            .unwrap_or(webhook.channel_id);
        Ok(MessageRef {
            channel_id,
            message_id: MessageId(message_id),
        })
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.http
            .delete_message(msg.channel_id.0, msg.message_id.0)
            .await
            .map_err(Self::map_err)
    }

    async fn respond_interaction(
        &self,
        interaction: &InteractionRef,
        reply: InteractionReply,
    ) -> Result<()> {
        self.http
            .create_interaction_response(
                interaction.id,
                &interaction.token,
                InteractionCallbackType::ChannelMessageWithSource as u8,
                Some(interaction_reply_data(&reply)),
            )
            .await
            .map_err(Self::map_err)
    }

    async fn acknowledge_interaction(&self, interaction: &InteractionRef) -> Result<()> {
        self.http
            .create_interaction_response(
                interaction.id,
                &interaction.token,
                InteractionCallbackType::DeferredUpdateMessage as u8,
                None,
            )
            .await
            .map_err(Self::map_err)
    }

    async fn follow_up_interaction(
        &self,
        interaction: &InteractionRef,
        reply: InteractionReply,
    ) -> Result<()> {
        self.http
            .create_followup_message(
                interaction.application_id,
                &interaction.token,
                interaction_reply_data(&reply),
            )
            .await
            .map_err(Self::map_err)
    }
}
