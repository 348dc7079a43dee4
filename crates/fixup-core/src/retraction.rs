//! Author-only deletion of relayed messages, by reaction or by button.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    config::RetractMode,
    domain::{MessageRef, UserId},
    messaging::{
        port::RelayPort,
        types::{ComponentInteraction, InteractionReply, ReactionAdd},
    },
    ownership::OwnershipTable,
    Result,
};

/// Reactions that request retraction.
pub const RETRACT_EMOJIS: [&str; 2] = ["❌", "x"];

pub const RETRACT_BUTTON_LABEL: &str = "Delete";
pub const DENIED_NOTICE: &str = "Only the original author can delete this message.";
pub const FAILED_NOTICE: &str = "Could not delete this message. It may already be gone.";

const CUSTOM_ID_PREFIX: &str = "retract:";

/// Payload of the "Delete" button: who may press it.
///
/// Wire form is the plain component id `retract:<author_id>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetractControl {
    pub author: UserId,
}

impl RetractControl {
    pub fn new(author: UserId) -> Self {
        Self { author }
    }

    pub fn custom_id(&self) -> String {
        format!("{CUSTOM_ID_PREFIX}{}", self.author)
    }

    /// `None` for ids that were not produced by `custom_id`.
    pub fn parse(custom_id: &str) -> Option<Self> {
        let raw = custom_id.strip_prefix(CUSTOM_ID_PREFIX)?;
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse::<u64>().ok().map(|id| Self::new(UserId(id)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetractOutcome {
    Retracted,
    /// Requester is not the recorded author.
    Denied,
    /// The delete call failed.
    Failed,
    Ignored(IgnoreReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    Disabled,
    NotRetractEmoji,
    NotTracked,
    FromBot,
    AlreadyGone,
    ForeignControl,
}

/// Handles retraction requests against the shared ownership table.
pub struct Retractor {
    port: Arc<dyn RelayPort>,
    ownership: Arc<Mutex<OwnershipTable>>,
    mode: RetractMode,
}

impl Retractor {
    pub fn new(
        port: Arc<dyn RelayPort>,
        ownership: Arc<Mutex<OwnershipTable>>,
        mode: RetractMode,
    ) -> Self {
        Self {
            port,
            ownership,
            mode,
        }
    }

    /// Reaction-added handler. Failures are logged, never returned.
    pub async fn on_reaction_add(&self, ev: &ReactionAdd) -> RetractOutcome {
        if !self.mode.reactions_enabled() {
            return RetractOutcome::Ignored(IgnoreReason::Disabled);
        }
        if !RETRACT_EMOJIS.contains(&ev.emoji.as_str()) {
            return RetractOutcome::Ignored(IgnoreReason::NotRetractEmoji);
        }

        let Some(owner) = self.ownership.lock().await.owner(ev.msg.message_id) else {
            return RetractOutcome::Ignored(IgnoreReason::NotTracked);
        };

        // Partial payloads carry only the user id; resolve before inspecting.
        let reactor = match &ev.user {
            Some(user) => user.clone(),
            None => match self.port.fetch_user(ev.user_id).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::error!(user = %ev.user_id, msg = %ev.msg, "failed to fetch reacting user: {e}");
                    return RetractOutcome::Failed;
                }
            },
        };
        if reactor.bot {
            return RetractOutcome::Ignored(IgnoreReason::FromBot);
        }
        if reactor.id != owner {
            tracing::debug!(user = %reactor.id, msg = %ev.msg, "retraction reaction from non-owner ignored");
            return RetractOutcome::Denied;
        }

        match self.port.delete_message(ev.msg).await {
            Ok(()) => {
                self.ownership.lock().await.remove(ev.msg.message_id);
                tracing::info!(user = %reactor.id, msg = %ev.msg, "relayed message retracted via reaction");
                RetractOutcome::Retracted
            }
            Err(e) if e.is_not_found() => {
                self.ownership.lock().await.remove(ev.msg.message_id);
                RetractOutcome::Ignored(IgnoreReason::AlreadyGone)
            }
            Err(e) => {
                tracing::error!(msg = %ev.msg, "error deleting message via reaction: {e}");
                RetractOutcome::Failed
            }
        }
    }

    /// Button handler. Every activation gets exactly one initial response:
    /// a denial for non-authors, a silent acknowledgement for the author.
    /// Delete failures are reported to the presser.
    pub async fn on_component(&self, ev: &ComponentInteraction) -> RetractOutcome {
        let Some(control) = RetractControl::parse(&ev.custom_id) else {
            tracing::debug!(custom_id = %ev.custom_id, "ignoring unknown component");
            return RetractOutcome::Ignored(IgnoreReason::ForeignControl);
        };

        let mut responder = Responder::new(self.port.as_ref(), ev);

        if ev.user_id != control.author {
            if let Err(e) = responder.reply(DENIED_NOTICE).await {
                tracing::warn!(msg = %ev.msg, "failed to send retraction denial: {e}");
            }
            return RetractOutcome::Denied;
        }

        // Acknowledge before deleting: the interaction token must be answered
        // within seconds, and the delete may wait on a rate limit.
        if let Err(e) = responder.acknowledge().await {
            tracing::warn!(msg = %ev.msg, "failed to acknowledge retraction button: {e}");
        }

        match self.delete(ev.msg).await {
            Ok(()) => {
                tracing::info!(user = %ev.user_id, msg = %ev.msg, "relayed message retracted via button");
                RetractOutcome::Retracted
            }
            Err(e) => {
                tracing::warn!(msg = %ev.msg, "error deleting message via button: {e}");
                if let Err(e) = responder.reply(FAILED_NOTICE).await {
                    tracing::warn!(msg = %ev.msg, "failed to send retraction failure notice: {e}");
                }
                RetractOutcome::Failed
            }
        }
    }

    async fn delete(&self, msg: MessageRef) -> Result<()> {
        self.port.delete_message(msg).await?;
        self.ownership.lock().await.remove(msg.message_id);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResponseState {
    Pending,
    Acknowledged,
    Replied,
}

/// Sends at most one initial response and at most one message per activation.
struct Responder<'a> {
    port: &'a dyn RelayPort,
    ev: &'a ComponentInteraction,
    state: ResponseState,
}

impl<'a> Responder<'a> {
    fn new(port: &'a dyn RelayPort, ev: &'a ComponentInteraction) -> Self {
        Self {
            port,
            ev,
            state: ResponseState::Pending,
        }
    }

    async fn acknowledge(&mut self) -> Result<()> {
        if self.state != ResponseState::Pending {
            return Ok(());
        }
        self.port.acknowledge_interaction(&self.ev.interaction).await?;
        self.state = ResponseState::Acknowledged;
        Ok(())
    }

    /// Ephemeral message: the initial response if nothing was sent yet,
    /// otherwise a follow-up to the acknowledgement.
    async fn reply(&mut self, text: &str) -> Result<()> {
        let reply = InteractionReply::ephemeral(text);
        let previous = self.state;
        self.state = ResponseState::Replied;
        match previous {
            ResponseState::Pending => {
                self.port
                    .respond_interaction(&self.ev.interaction, reply)
                    .await
            }
            ResponseState::Acknowledged => {
                self.port
                    .follow_up_interaction(&self.ev.interaction, reply)
                    .await
            }
            ResponseState::Replied => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChannelId, MessageId},
        messaging::types::{InteractionRef, UserInfo},
        testing::FakePort,
    };
    use std::time::Duration;

    const OWNER: UserId = UserId(100);
    const OTHER: UserId = UserId(200);

    fn msg_ref(id: u64) -> MessageRef {
        MessageRef {
            channel_id: ChannelId(1),
            message_id: MessageId(id),
        }
    }

    fn setup(mode: RetractMode) -> (Arc<FakePort>, Arc<Mutex<OwnershipTable>>, Retractor) {
        let port = Arc::new(FakePort::default());
        let table = Arc::new(Mutex::new(OwnershipTable::new(16, Duration::from_secs(3600))));
        let retractor = Retractor::new(port.clone(), table.clone(), mode);
        (port, table, retractor)
    }

    fn reaction(user: UserId, emoji: &str, bot: bool) -> ReactionAdd {
        ReactionAdd {
            msg: msg_ref(7),
            guild_id: None,
            user_id: user,
            emoji: emoji.to_string(),
            user: Some(UserInfo {
                id: user,
                username: "u".to_string(),
                bot,
            }),
        }
    }

    fn press(user: UserId, custom_id: &str) -> ComponentInteraction {
        ComponentInteraction {
            interaction: InteractionRef {
                id: 55,
                application_id: 3,
                token: "tok".to_string(),
            },
            msg: msg_ref(7),
            user_id: user,
            custom_id: custom_id.to_string(),
        }
    }

    #[test]
    fn control_custom_id_roundtrip_and_rejects_foreign_ids() {
        let control = RetractControl::new(UserId(123456789012345678));
        assert_eq!(control.custom_id(), "retract:123456789012345678");
        assert_eq!(RetractControl::parse(&control.custom_id()), Some(control));

        for bad in ["", "retract:", "retract:abc", "retract:-1", "retract:1 ", "delete:1"] {
            assert_eq!(RetractControl::parse(bad), None, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn owner_reaction_deletes_and_untracks() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);

        let out = r.on_reaction_add(&reaction(OWNER, "❌", false)).await;
        assert_eq!(out, RetractOutcome::Retracted);
        assert_eq!(port.deleted(), vec![msg_ref(7)]);
        assert!(table.lock().await.owner(MessageId(7)).is_none());

        // A second attempt finds nothing tracked.
        let out = r.on_reaction_add(&reaction(OWNER, "❌", false)).await;
        assert_eq!(out, RetractOutcome::Ignored(IgnoreReason::NotTracked));
        assert_eq!(port.deleted().len(), 1);
    }

    #[tokio::test]
    async fn non_owner_reaction_does_nothing() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);

        let out = r.on_reaction_add(&reaction(OTHER, "❌", false)).await;
        assert_eq!(out, RetractOutcome::Denied);
        assert!(port.deleted().is_empty());
        assert_eq!(table.lock().await.owner(MessageId(7)), Some(OWNER));
    }

    #[tokio::test]
    async fn other_emojis_and_bots_are_ignored() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);

        assert_eq!(
            r.on_reaction_add(&reaction(OWNER, "👍", false)).await,
            RetractOutcome::Ignored(IgnoreReason::NotRetractEmoji)
        );
        assert_eq!(
            r.on_reaction_add(&reaction(OWNER, "x", true)).await,
            RetractOutcome::Ignored(IgnoreReason::FromBot)
        );
        assert!(port.deleted().is_empty());
    }

    #[tokio::test]
    async fn plain_x_emoji_is_accepted() {
        let (port, table, r) = setup(RetractMode::Reaction);
        table.lock().await.insert(MessageId(7), OWNER);
        assert_eq!(
            r.on_reaction_add(&reaction(OWNER, "x", false)).await,
            RetractOutcome::Retracted
        );
        assert_eq!(port.deleted().len(), 1);
    }

    #[tokio::test]
    async fn partial_reaction_fetches_user_first() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);
        port.add_user(UserInfo {
            id: OWNER,
            username: "owner".to_string(),
            bot: false,
        });

        let mut ev = reaction(OWNER, "❌", false);
        ev.user = None;
        assert_eq!(r.on_reaction_add(&ev).await, RetractOutcome::Retracted);
        assert_eq!(port.fetched_users(), vec![OWNER]);
    }

    #[tokio::test]
    async fn partial_reaction_fetch_failure_drops_event() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);

        let mut ev = reaction(OWNER, "❌", false);
        ev.user = None;
        assert_eq!(r.on_reaction_add(&ev).await, RetractOutcome::Failed);
        assert!(port.deleted().is_empty());
        assert_eq!(table.lock().await.owner(MessageId(7)), Some(OWNER));
    }

    #[tokio::test]
    async fn reaction_on_already_deleted_message_is_noop() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);
        port.mark_missing(msg_ref(7));

        assert_eq!(
            r.on_reaction_add(&reaction(OWNER, "❌", false)).await,
            RetractOutcome::Ignored(IgnoreReason::AlreadyGone)
        );
        assert!(table.lock().await.is_empty());
    }

    #[tokio::test]
    async fn reactions_ignored_in_button_mode() {
        let (port, table, r) = setup(RetractMode::Button);
        table.lock().await.insert(MessageId(7), OWNER);
        assert_eq!(
            r.on_reaction_add(&reaction(OWNER, "❌", false)).await,
            RetractOutcome::Ignored(IgnoreReason::Disabled)
        );
        assert!(port.deleted().is_empty());
    }

    #[tokio::test]
    async fn button_by_non_owner_is_denied_privately() {
        let (port, _table, r) = setup(RetractMode::Both);
        let custom_id = RetractControl::new(OWNER).custom_id();

        let out = r.on_component(&press(OTHER, &custom_id)).await;
        assert_eq!(out, RetractOutcome::Denied);
        assert!(port.deleted().is_empty());
        assert!(port.acknowledged().is_empty());
        assert_eq!(
            port.replies(),
            vec![(55, InteractionReply::ephemeral(DENIED_NOTICE))]
        );
    }

    #[tokio::test]
    async fn button_by_owner_deletes_message() {
        let (port, table, r) = setup(RetractMode::Both);
        table.lock().await.insert(MessageId(7), OWNER);
        let custom_id = RetractControl::new(OWNER).custom_id();

        let out = r.on_component(&press(OWNER, &custom_id)).await;
        assert_eq!(out, RetractOutcome::Retracted);
        assert_eq!(port.deleted(), vec![msg_ref(7)]);
        assert!(table.lock().await.is_empty());

        // Silently acknowledged, exactly once, with nothing shown.
        assert_eq!(port.acknowledged(), vec![55]);
        assert!(port.replies().is_empty());
        assert!(port.follow_ups().is_empty());
    }

    #[tokio::test]
    async fn button_is_acknowledged_before_delete() {
        let (port, _table, r) = setup(RetractMode::Both);
        let custom_id = RetractControl::new(OWNER).custom_id();

        r.on_component(&press(OWNER, &custom_id)).await;
        assert_eq!(
            port.calls(),
            vec!["acknowledge_interaction".to_string(), "delete_message".to_string()]
        );
    }

    #[tokio::test]
    async fn button_delete_failure_sends_single_notice() {
        let (port, _table, r) = setup(RetractMode::Both);
        port.fail_deletes();
        let custom_id = RetractControl::new(OWNER).custom_id();

        let out = r.on_component(&press(OWNER, &custom_id)).await;
        assert_eq!(out, RetractOutcome::Failed);
        assert_eq!(port.acknowledged(), vec![55]);
        assert!(port.replies().is_empty());
        assert_eq!(
            port.follow_ups(),
            vec![(55, InteractionReply::ephemeral(FAILED_NOTICE))]
        );
    }

    #[tokio::test]
    async fn failure_notice_becomes_initial_response_when_ack_fails() {
        let (port, _table, r) = setup(RetractMode::Both);
        port.fail_deletes();
        port.fail_acknowledgements();
        let custom_id = RetractControl::new(OWNER).custom_id();

        let out = r.on_component(&press(OWNER, &custom_id)).await;
        assert_eq!(out, RetractOutcome::Failed);
        assert!(port.acknowledged().is_empty());
        assert!(port.follow_ups().is_empty());
        assert_eq!(
            port.replies(),
            vec![(55, InteractionReply::ephemeral(FAILED_NOTICE))]
        );
    }

    #[tokio::test]
    async fn foreign_components_are_left_alone() {
        let (port, _table, r) = setup(RetractMode::Both);
        let out = r.on_component(&press(OWNER, "something_else")).await;
        assert_eq!(out, RetractOutcome::Ignored(IgnoreReason::ForeignControl));
        assert!(port.replies().is_empty());
        assert!(port.deleted().is_empty());
    }
}
