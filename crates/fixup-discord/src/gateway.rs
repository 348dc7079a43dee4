//! Discord gateway session: handshake, heartbeats, resume and the
//! dispatch events the relay cares about.

use std::time::Duration;

use anyhow::{Context, Result};
use fixup_core::{
    domain::{ChannelId, GuildId, MessageId, MessageRef, UserId, WebhookId},
    messaging::types::{
        Attachment, Author, ComponentInteraction, IncomingMessage, InteractionRef, ReactionAdd,
        UserInfo,
    },
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::{
    avatar,
    types::{
        is_fatal_close_code, GatewayOpcode, InteractionType, DEFAULT_HEARTBEAT_INTERVAL_MS,
        RELAY_INTENTS,
    },
};

/// Events forwarded to the handlers.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    MessageCreate(IncomingMessage),
    ReactionAdd(ReactionAdd),
    Component(ComponentInteraction),
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Connection dropped or the server asked us to reconnect.
    Reconnect,
    /// Shutdown was requested.
    Cancelled,
    /// Closed with a code that rules out reconnecting (bad token, intents).
    Fatal(u16),
}

#[derive(Debug, Clone, Deserialize)]
struct ResumeState {
    session_id: String,
    #[serde(rename = "resume_gateway_url")]
    resume_url: String,
}

pub struct Gateway {
    token: String,
    resume: Option<ResumeState>,
    sequence: Option<u64>,
}

impl Gateway {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            resume: None,
            sequence: None,
        }
    }

    /// Whether the next session will try to resume.
    pub fn can_resume(&self) -> bool {
        self.resume.is_some()
    }

    /// Run one connection until it drops, resuming the previous session when
    /// possible. Errors are connection failures and may be retried.
    pub async fn run_session(
        &mut self,
        gateway_url: &str,
        tx: &mpsc::Sender<GatewayEvent>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let base_url = self
            .resume
            .as_ref()
            .map_or(gateway_url, |r| r.resume_url.as_str());
        let ws_url = format!("{}/?v=10&encoding=json", base_url.trim_end_matches('/'));
        tracing::info!(resume = self.can_resume(), "connecting to Discord gateway");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .context("connect to Discord gateway WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        let hello = read
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("gateway closed before hello"))?
            .context("read Discord gateway hello message")?;
        let hello: Value = serde_json::from_str(&hello.to_string())
            .context("parse Discord gateway hello event")?;
        let heartbeat_interval = heartbeat_interval(&hello);

        let handshake = match (&self.resume, self.sequence) {
            (Some(resume), Some(seq)) => json!({
                "op": GatewayOpcode::Resume as u8,
                "d": {
                    "token": self.token,
                    "session_id": resume.session_id,
                    "seq": seq,
                }
            }),
            _ => {
                self.resume = None;
                self.sequence = None;
                identify_payload(&self.token)
            }
        };
        write
            .send(Message::Text(handshake.to_string().into()))
            .await
            .context("send Discord gateway handshake")?;

        let period = Duration::from_millis(heartbeat_interval);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        tracing::warn!("Discord gateway missed heartbeat ack, reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    }
                    let hb = json!({"op": GatewayOpcode::Heartbeat as u8, "d": self.sequence});
                    if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                        return Ok(SessionEnd::Reconnect);
                    }
                    awaiting_ack = true;
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code));
                            if let Some(code) = code.filter(|c| is_fatal_close_code(*c)) {
                                return Ok(SessionEnd::Fatal(code));
                            }
                            tracing::warn!(?code, "Discord gateway closed");
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(Err(error)) => {
                            tracing::warn!(%error, "Discord gateway read failed");
                            return Ok(SessionEnd::Reconnect);
                        }
                        None => return Ok(SessionEnd::Reconnect),
                        Some(Ok(_)) => continue,
                    };

                    let Ok(event) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    if let Some(s) = event.get("s").and_then(Value::as_u64) {
                        self.sequence = Some(s);
                    }

                    let op = event
                        .get("op")
                        .and_then(Value::as_u64)
                        .and_then(GatewayOpcode::from_u64);
                    match op {
                        Some(GatewayOpcode::Heartbeat) => {
                            let hb = json!({"op": GatewayOpcode::Heartbeat as u8, "d": self.sequence});
                            if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                                return Ok(SessionEnd::Reconnect);
                            }
                        }
                        Some(GatewayOpcode::HeartbeatAck) => awaiting_ack = false,
                        Some(GatewayOpcode::Reconnect) => {
                            tracing::info!("Discord gateway requested reconnect");
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(GatewayOpcode::InvalidSession) => {
                            let resumable = event.get("d").and_then(Value::as_bool).unwrap_or(false);
                            tracing::warn!(resumable, "Discord gateway invalidated session");
                            if !resumable {
                                self.resume = None;
                                self.sequence = None;
                            }
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(GatewayOpcode::Dispatch) => {
                            let kind = event.get("t").and_then(Value::as_str).unwrap_or("");
                            let Some(d) = event.get("d") else {
                                continue;
                            };
                            if kind == "READY" {
                                self.resume = parse_ready(d);
                                tracing::info!("Discord gateway session ready");
                                continue;
                            }
                            if kind == "RESUMED" {
                                tracing::info!("Discord gateway session resumed");
                                continue;
                            }
                            if let Some(parsed) = parse_dispatch(kind, d) {
                                if tx.send(parsed).await.is_err() {
                                    return Ok(SessionEnd::Cancelled);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn heartbeat_interval(hello: &Value) -> u64 {
    hello
        .get("d")
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS)
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": GatewayOpcode::Identify as u8,
        "d": {
            "token": token,
            "intents": RELAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "fixup",
                "device": "fixup"
            }
        }
    })
}

fn parse_ready(d: &Value) -> Option<ResumeState> {
    ResumeState::deserialize(d).ok()
}

/// Map a dispatch event to the relay's view of it.
pub fn parse_dispatch(kind: &str, d: &Value) -> Option<GatewayEvent> {
    match kind {
        "MESSAGE_CREATE" => parse_message_create(d).map(GatewayEvent::MessageCreate),
        "MESSAGE_REACTION_ADD" => parse_reaction_add(d).map(GatewayEvent::ReactionAdd),
        "INTERACTION_CREATE" => parse_component(d).map(GatewayEvent::Component),
        _ => None,
    }
}

/// Snowflakes arrive as strings.
fn snowflake(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn opt_str(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn parse_message_create(d: &Value) -> Option<IncomingMessage> {
    let msg = MessageRef {
        channel_id: ChannelId(snowflake(d.get("channel_id"))?),
        message_id: MessageId(snowflake(d.get("id"))?),
    };
    let guild_id = snowflake(d.get("guild_id")).map(GuildId);

    let author = d.get("author")?;
    let author_id = UserId(snowflake(author.get("id"))?);
    let user_avatar_url = avatar::user_avatar_url(
        author_id,
        author.get("avatar").and_then(Value::as_str),
        author.get("discriminator").and_then(Value::as_str),
    );

    let member = d.get("member");
    let member_nick = opt_str(member.and_then(|m| m.get("nick")));
    let member_avatar_url = match (guild_id, member.and_then(|m| m.get("avatar")).and_then(Value::as_str)) {
        (Some(guild), Some(hash)) => Some(avatar::member_avatar_url(guild, author_id, hash)),
        _ => None,
    };

    Some(IncomingMessage {
        msg,
        guild_id,
        author: Author {
            id: author_id,
            username: opt_str(author.get("username")).unwrap_or_default(),
            global_name: opt_str(author.get("global_name")),
            bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
        },
        webhook_id: snowflake(d.get("webhook_id")).map(WebhookId),
        member_nick,
        member_avatar_url,
        user_avatar_url,
        content: opt_str(d.get("content")).unwrap_or_default(),
        attachments: parse_attachments(d),
    })
}

fn parse_attachments(d: &Value) -> Vec<Attachment> {
    d.get("attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(Attachment {
                        url: opt_str(item.get("url"))?,
                        filename: opt_str(item.get("filename"))
                            .unwrap_or_else(|| "attachment".to_string()),
                        content_type: opt_str(item.get("content_type")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_user(user: &Value) -> Option<UserInfo> {
    Some(UserInfo {
        id: UserId(snowflake(user.get("id"))?),
        username: opt_str(user.get("username")).unwrap_or_default(),
        bot: user.get("bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_reaction_add(d: &Value) -> Option<ReactionAdd> {
    Some(ReactionAdd {
        msg: MessageRef {
            channel_id: ChannelId(snowflake(d.get("channel_id"))?),
            message_id: MessageId(snowflake(d.get("message_id"))?),
        },
        guild_id: snowflake(d.get("guild_id")).map(GuildId),
        user_id: UserId(snowflake(d.get("user_id"))?),
        emoji: opt_str(d.get("emoji").and_then(|e| e.get("name")))?,
        user: d
            .get("member")
            .and_then(|m| m.get("user"))
            .and_then(parse_user),
    })
}

fn parse_component(d: &Value) -> Option<ComponentInteraction> {
    let kind = d
        .get("type")
        .and_then(Value::as_u64)
        .and_then(InteractionType::from_u64);
    if kind != Some(InteractionType::MessageComponent) {
        return None;
    }

    let user = d
        .get("member")
        .and_then(|m| m.get("user"))
        .or_else(|| d.get("user"))?;
    let message = d.get("message")?;

    Some(ComponentInteraction {
        interaction: InteractionRef {
            id: snowflake(d.get("id"))?,
            application_id: snowflake(d.get("application_id"))?,
            token: opt_str(d.get("token"))?,
        },
        msg: MessageRef {
            channel_id: ChannelId(
                snowflake(d.get("channel_id")).or_else(|| snowflake(message.get("channel_id")))?,
            ),
            message_id: MessageId(snowflake(message.get("id"))?),
        },
        user_id: UserId(snowflake(user.get("id"))?),
        custom_id: opt_str(d.get("data").and_then(|data| data.get("custom_id")))?,
    })
}
