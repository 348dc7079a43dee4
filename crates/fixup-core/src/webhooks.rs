//! Find-or-create the bot's impersonation webhook per channel.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    domain::ChannelId,
    messaging::{
        port::RelayPort,
        types::{BotIdentity, Webhook},
    },
    Result,
};

#[derive(Default)]
pub struct ChannelLocks {
    inner: Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

impl ChannelLocks {
    pub async fn lock_channel(&self, channel_id: ChannelId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(channel_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget the channel's lock once nobody holds or waits on it.
    pub async fn release(&self, channel_id: ChannelId) {
        let mut map = self.inner.lock().await;
        if map
            .get(&channel_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&channel_id);
        }
    }
}

pub struct WebhookResolver {
    name: String,
    serialize: bool,
    locks: ChannelLocks,
}

impl WebhookResolver {
    /// `serialize` holds a per-channel lock across list-then-create, so
    /// concurrent messages in one channel never create two webhooks.
    pub fn new(name: impl Into<String>, serialize: bool) -> Self {
        Self {
            name: name.into(),
            serialize,
            locks: ChannelLocks::default(),
        }
    }

    pub async fn resolve(
        &self,
        port: &dyn RelayPort,
        bot: &BotIdentity,
        channel_id: ChannelId,
    ) -> Result<Webhook> {
        if !self.serialize {
            return self.find_or_create(port, bot, channel_id).await;
        }

        let guard = self.locks.lock_channel(channel_id).await;
        let result = self.find_or_create(port, bot, channel_id).await;
        drop(guard);
        self.locks.release(channel_id).await;
        result
    }

    async fn find_or_create(
        &self,
        port: &dyn RelayPort,
        bot: &BotIdentity,
        channel_id: ChannelId,
    ) -> Result<Webhook> {
        let existing = port.list_webhooks(channel_id).await?;
        if let Some(hook) = existing.into_iter().find(|w| w.is_usable_by(bot.user_id)) {
            return Ok(hook);
        }

        tracing::info!(channel = %channel_id, name = %self.name, "creating relay webhook");
        port.create_webhook(channel_id, &self.name, bot.avatar_url.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{UserId, WebhookId},
        testing::{bot_identity, FakePort},
    };
    use std::time::Duration;

    #[tokio::test]
    async fn second_resolution_reuses_created_webhook() {
        let port = FakePort::default();
        let resolver = WebhookResolver::new("FixupBot", true);
        let bot = bot_identity();

        let first = resolver.resolve(&port, &bot, ChannelId(9)).await.unwrap();
        let second = resolver.resolve(&port, &bot, ChannelId(9)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            port.created_webhooks(),
            vec![(
                ChannelId(9),
                "FixupBot".to_string(),
                Some("https://cdn.example/bot.png".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn foreign_and_tokenless_webhooks_are_skipped() {
        let port = FakePort::default();
        let bot = bot_identity();
        port.add_webhook(Webhook {
            id: WebhookId(1),
            channel_id: ChannelId(9),
            name: Some("someone else".to_string()),
            token: Some("t".to_string()),
            owner_id: Some(UserId(77)),
        });
        port.add_webhook(Webhook {
            id: WebhookId(2),
            channel_id: ChannelId(9),
            name: Some("ours, no token".to_string()),
            token: None,
            owner_id: Some(bot.user_id),
        });
        port.add_webhook(Webhook {
            id: WebhookId(3),
            channel_id: ChannelId(9),
            name: Some("ours".to_string()),
            token: Some("t".to_string()),
            owner_id: Some(bot.user_id),
        });

        let resolver = WebhookResolver::new("FixupBot", true);
        let hook = resolver.resolve(&port, &bot, ChannelId(9)).await.unwrap();
        assert_eq!(hook.id, WebhookId(3));
        assert!(port.created_webhooks().is_empty());
    }

    #[tokio::test]
    async fn concurrent_resolution_creates_one_webhook_when_serialized() {
        let port = FakePort::default();
        port.set_list_delay(Duration::from_millis(20));
        let resolver = WebhookResolver::new("FixupBot", true);
        let bot = bot_identity();

        let (a, b) = tokio::join!(
            resolver.resolve(&port, &bot, ChannelId(9)),
            resolver.resolve(&port, &bot, ChannelId(9)),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(port.created_webhooks().len(), 1);
        assert!(resolver.locks.inner.lock().await.is_empty());
    }

    #[tokio::test]
    async fn channel_lock_is_kept_while_contended() {
        let locks = ChannelLocks::default();
        let held = locks.lock_channel(ChannelId(9)).await;
        let waiter_lock = locks.inner.lock().await.get(&ChannelId(9)).cloned();

        locks.release(ChannelId(9)).await;
        assert_eq!(locks.inner.lock().await.len(), 1);

        drop(waiter_lock);
        drop(held);
        locks.release(ChannelId(9)).await;
        assert!(locks.inner.lock().await.is_empty());
    }

    #[tokio::test]
    async fn channel_locks_are_released_after_resolution() {
        let port = FakePort::default();
        let resolver = WebhookResolver::new("FixupBot", true);
        let bot = bot_identity();
        for channel in 1..=5 {
            resolver
                .resolve(&port, &bot, ChannelId(channel))
                .await
                .unwrap();
        }
        assert!(resolver.locks.inner.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unserialized_resolution_can_race() {
        let port = FakePort::default();
        port.set_list_delay(Duration::from_millis(20));
        let resolver = WebhookResolver::new("FixupBot", false);
        let bot = bot_identity();

        let (a, b) = tokio::join!(
            resolver.resolve(&port, &bot, ChannelId(9)),
            resolver.resolve(&port, &bot, ChannelId(9)),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(port.created_webhooks().len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_is_propagated() {
        let port = FakePort::default();
        port.fail_webhook_listing();
        let resolver = WebhookResolver::new("FixupBot", true);
        assert!(resolver
            .resolve(&port, &bot_identity(), ChannelId(9))
            .await
            .is_err());
        assert!(port.created_webhooks().is_empty());
    }
}
