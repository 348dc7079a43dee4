//! In-memory `RelayPort` for unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, MessageId, MessageRef, UserId, WebhookId},
    errors::Error,
    messaging::{
        port::RelayPort,
        types::{
            BotIdentity, ChannelInfo, ChannelKind, InteractionRef, InteractionReply,
            OutgoingRelay, UserInfo, Webhook,
        },
    },
    Result,
};

pub const BOT: UserId = UserId(1);

pub fn bot_identity() -> BotIdentity {
    BotIdentity {
        user_id: BOT,
        name: "FixupBot".to_string(),
        avatar_url: Some("https://cdn.example/bot.png".to_string()),
    }
}

#[derive(Default)]
pub struct FakePort {
    next_id: AtomicU64,
    channels: Mutex<HashMap<ChannelId, ChannelInfo>>,
    webhooks: Mutex<Vec<Webhook>>,
    users: Mutex<HashMap<UserId, UserInfo>>,
    missing: Mutex<HashSet<MessageRef>>,

    created_webhooks: Mutex<Vec<(ChannelId, String, Option<String>)>>,
    sent: Mutex<Vec<(WebhookId, OutgoingRelay, MessageRef)>>,
    deleted: Mutex<Vec<MessageRef>>,
    fetched_users: Mutex<Vec<UserId>>,
    replies: Mutex<Vec<(u64, InteractionReply)>>,
    acknowledged: Mutex<Vec<u64>>,
    follow_ups: Mutex<Vec<(u64, InteractionReply)>>,
    /// Port method names, in call order.
    calls: Mutex<Vec<String>>,

    fail_deletes: AtomicBool,
    fail_acknowledgements: AtomicBool,
    fail_sends: AtomicBool,
    fail_webhook_listing: AtomicBool,
    /// Delay applied to `list_webhooks`, to widen creation races.
    list_delay_ms: AtomicU64,
}

impl FakePort {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn alloc(&self) -> u64 {
        1_000 + self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add_text_channel(&self, id: ChannelId) {
        self.add_channel(ChannelInfo {
            id,
            kind: ChannelKind::GuildText,
            parent_id: None,
        });
    }

    pub fn add_channel(&self, info: ChannelInfo) {
        self.channels.lock().unwrap().insert(info.id, info);
    }

    pub fn add_webhook(&self, hook: Webhook) {
        self.webhooks.lock().unwrap().push(hook);
    }

    pub fn add_user(&self, user: UserInfo) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn mark_missing(&self, msg: MessageRef) {
        self.missing.lock().unwrap().insert(msg);
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn fail_acknowledgements(&self) {
        self.fail_acknowledgements.store(true, Ordering::SeqCst);
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_webhook_listing(&self) {
        self.fail_webhook_listing.store(true, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn created_webhooks(&self) -> Vec<(ChannelId, String, Option<String>)> {
        self.created_webhooks.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(WebhookId, OutgoingRelay, MessageRef)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fetched_users(&self) -> Vec<UserId> {
        self.fetched_users.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(u64, InteractionReply)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn acknowledged(&self) -> Vec<u64> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn follow_ups(&self) -> Vec<(u64, InteractionReply)> {
        self.follow_ups.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayPort for FakePort {
    async fn current_user(&self) -> Result<BotIdentity> {
        self.record("current_user");
        Ok(bot_identity())
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<UserInfo> {
        self.record("fetch_user");
        self.fetched_users.lock().unwrap().push(user_id);
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))
    }

    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<ChannelInfo> {
        self.record("fetch_channel");
        self.channels
            .lock()
            .unwrap()
            .get(&channel_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("channel {channel_id}")))
    }

    async fn list_webhooks(&self, channel_id: ChannelId) -> Result<Vec<Webhook>> {
        self.record("list_webhooks");
        if self.fail_webhook_listing.load(Ordering::SeqCst) {
            return Err(Error::External("missing permissions".to_string()));
        }
        // Snapshot first, then delay: a concurrent caller sees the same
        // (possibly stale) list, as with a real round trip.
        let snapshot: Vec<Webhook> = self
            .webhooks
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.channel_id == channel_id)
            .cloned()
            .collect();
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(snapshot)
    }

    async fn create_webhook(
        &self,
        channel_id: ChannelId,
        name: &str,
        avatar_url: Option<&str>,
    ) -> Result<Webhook> {
        self.record("create_webhook");
        let hook = Webhook {
            id: WebhookId(self.alloc()),
            channel_id,
            name: Some(name.to_string()),
            token: Some("hook-token".to_string()),
            owner_id: Some(BOT),
        };
        self.created_webhooks.lock().unwrap().push((
            channel_id,
            name.to_string(),
            avatar_url.map(str::to_string),
        ));
        self.webhooks.lock().unwrap().push(hook.clone());
        Ok(hook)
    }

    async fn execute_webhook(&self, webhook: &Webhook, relay: OutgoingRelay) -> Result<MessageRef> {
        self.record("execute_webhook");
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("send failed".to_string()));
        }
        let msg = MessageRef {
            channel_id: relay.thread_id.unwrap_or(webhook.channel_id),
            message_id: MessageId(self.alloc()),
        };
        self.sent.lock().unwrap().push((webhook.id, relay, msg));
        Ok(msg)
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.record("delete_message");
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::External("missing permissions".to_string()));
        }
        if !self.missing.lock().unwrap().insert(msg) {
            return Err(Error::NotFound(format!("message {msg}")));
        }
        self.deleted.lock().unwrap().push(msg);
        Ok(())
    }

    async fn respond_interaction(
        &self,
        interaction: &InteractionRef,
        reply: InteractionReply,
    ) -> Result<()> {
        self.record("respond_interaction");
        self.replies.lock().unwrap().push((interaction.id, reply));
        Ok(())
    }

    async fn acknowledge_interaction(&self, interaction: &InteractionRef) -> Result<()> {
        self.record("acknowledge_interaction");
        if self.fail_acknowledgements.load(Ordering::SeqCst) {
            return Err(Error::External("unknown interaction".to_string()));
        }
        self.acknowledged.lock().unwrap().push(interaction.id);
        Ok(())
    }

    async fn follow_up_interaction(
        &self,
        interaction: &InteractionRef,
        reply: InteractionReply,
    ) -> Result<()> {
        self.record("follow_up_interaction");
        self.follow_ups.lock().unwrap().push((interaction.id, reply));
        Ok(())
    }
}
