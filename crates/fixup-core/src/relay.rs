//! The relay pipeline: rewrite links, repost as the author, delete the original.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    config::{Config, RetractMode},
    domain::MessageRef,
    links::LinkRewriter,
    messaging::{
        port::RelayPort,
        types::{BotIdentity, IncomingMessage, OutgoingRelay},
    },
    ownership::OwnershipTable,
    retraction::{RetractControl, Retractor},
    webhooks::WebhookResolver,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed { relayed: MessageRef },
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Sent by a bot account or through a webhook.
    Automated,
    NoLinks,
    /// Direct message or a channel without text.
    UnsupportedChannel,
}

pub struct Relay {
    port: Arc<dyn RelayPort>,
    bot: BotIdentity,
    rewriter: LinkRewriter,
    webhooks: WebhookResolver,
    ownership: Arc<Mutex<OwnershipTable>>,
    retract_mode: RetractMode,
}

impl Relay {
    pub fn new(cfg: &Config, port: Arc<dyn RelayPort>, bot: BotIdentity) -> Self {
        let webhook_name = cfg
            .webhook_name
            .clone()
            .unwrap_or_else(|| bot.name.clone());
        Self {
            port,
            rewriter: LinkRewriter::new(cfg.target_domain.clone()),
            webhooks: WebhookResolver::new(webhook_name, cfg.serialize_webhook_creation),
            ownership: Arc::new(Mutex::new(OwnershipTable::new(
                cfg.ownership_capacity,
                cfg.ownership_ttl,
            ))),
            retract_mode: cfg.retract_mode,
            bot,
        }
    }

    /// Shared handle to the ownership table.
    pub fn ownership(&self) -> Arc<Mutex<OwnershipTable>> {
        self.ownership.clone()
    }

    /// Retraction handler sharing this relay's port and ownership table.
    pub fn retractor(&self) -> Retractor {
        Retractor::new(self.port.clone(), self.ownership(), self.retract_mode)
    }

    /// Message-created handler. Errors are logged and dropped; never retried.
    pub async fn on_message(&self, msg: &IncomingMessage) -> Option<RelayOutcome> {
        match self.relay_message(msg).await {
            Ok(outcome) => {
                if let RelayOutcome::Skipped(reason) = outcome {
                    tracing::debug!(msg = %msg.msg, ?reason, "message not relayed");
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(msg = %msg.msg, author = %msg.author.id, "error handling message: {e}");
                None
            }
        }
    }

    pub async fn relay_message(&self, msg: &IncomingMessage) -> Result<RelayOutcome> {
        if msg.is_automated() || msg.author.id == self.bot.user_id {
            return Ok(RelayOutcome::Skipped(SkipReason::Automated));
        }
        if msg.guild_id.is_none() {
            return Ok(RelayOutcome::Skipped(SkipReason::UnsupportedChannel));
        }
        let Some(content) = self.rewriter.rewrite(&msg.content) else {
            return Ok(RelayOutcome::Skipped(SkipReason::NoLinks));
        };

        let channel = self.port.fetch_channel(msg.msg.channel_id).await?;
        if !channel.accepts_relay() {
            return Ok(RelayOutcome::Skipped(SkipReason::UnsupportedChannel));
        }
        let (hook_channel, thread_id) = channel.webhook_target();

        let webhook = self
            .webhooks
            .resolve(self.port.as_ref(), &self.bot, hook_channel)
            .await?;

        let avatar_url = msg.avatar_url().to_string();
        tracing::info!(
            author = %msg.author.id,
            username = %msg.author.username,
            avatar = %avatar_url,
            "replacing message {}",
            msg.msg
        );

        let retract_control = self
            .retract_mode
            .buttons_enabled()
            .then(|| RetractControl::new(msg.author.id));

        let relayed = self
            .port
            .execute_webhook(
                &webhook,
                OutgoingRelay {
                    content,
                    username: msg.display_name(),
                    avatar_url,
                    attachments: msg.attachments.clone(),
                    thread_id,
                    retract_control,
                },
            )
            .await?;

        // Record before deleting so a failed delete still leaves the copy retractable.
        self.ownership
            .lock()
            .await
            .insert(relayed.message_id, msg.author.id);

        self.port.delete_message(msg.msg).await?;

        Ok(RelayOutcome::Relayed { relayed })
    }
}
