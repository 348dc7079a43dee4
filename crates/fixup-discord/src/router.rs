use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fixup_core::{
    config::Config,
    messaging::port::RelayPort,
    relay::Relay,
    retraction::Retractor,
};

use crate::{
    gateway::{Gateway, GatewayEvent, SessionEnd},
    handlers,
    http_client::DiscordHttpClient,
    DiscordPort,
};

const FALLBACK_GATEWAY_URL: &str = "wss://gateway.discord.gg";
const EVENT_QUEUE: usize = 256;
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// A session that lived this long resets the reconnect backoff.
const STABLE_SESSION: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub retractor: Arc<Retractor>,
}

pub async fn run(cfg: Arc<Config>, cancel: CancellationToken) -> anyhow::Result<()> {
    let http = Arc::new(DiscordHttpClient::new(cfg.discord_token.clone()));
    let port = Arc::new(DiscordPort::new(http.clone()));

    let bot = port
        .current_user()
        .await
        .context("fetch bot identity")?;
    tracing::info!(bot = %bot.name, id = %bot.user_id, mode = ?cfg.retract_mode, "fixup started");

    let relay = Arc::new(Relay::new(&cfg, port, bot));
    let state = Arc::new(AppState {
        retractor: Arc::new(relay.retractor()),
        relay,
    });

    let gateway_url = http
        .get_gateway_bot()
        .await
        .context("fetch gateway URL")?
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or(FALLBACK_GATEWAY_URL)
        .to_string();

    let (tx, rx) = mpsc::channel::<GatewayEvent>(EVENT_QUEUE);
    let dispatcher = tokio::spawn(dispatch_events(rx, state));

    let result = supervise_gateway(&cfg.discord_token, &gateway_url, tx, &cancel).await;
    // The sender was dropped with the gateway; let queued events drain.
    let _ = dispatcher.await;
    result
}

/// One task per event, so a slow relay never stalls the gateway reader.
async fn dispatch_events(mut rx: mpsc::Receiver<GatewayEvent>, state: Arc<AppState>) {
    while let Some(event) = rx.recv().await {
        tokio::spawn(handlers::handle_event(event, state.clone()));
    }
}

async fn supervise_gateway(
    token: &str,
    gateway_url: &str,
    tx: mpsc::Sender<GatewayEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut gateway = Gateway::new(token);
    let mut backoff = MIN_BACKOFF;

    loop {
        let started = Instant::now();
        match gateway.run_session(gateway_url, &tx, cancel).await {
            Ok(SessionEnd::Cancelled) => {
                tracing::info!("gateway stopped");
                return Ok(());
            }
            Ok(SessionEnd::Fatal(code)) => {
                anyhow::bail!("Discord gateway closed with fatal code {code}");
            }
            Ok(SessionEnd::Reconnect) => {}
            Err(e) => tracing::warn!("gateway session failed: {e:#}"),
        }

        if started.elapsed() >= STABLE_SESSION {
            backoff = MIN_BACKOFF;
        }
        tracing::info!(?backoff, resume = gateway.can_resume(), "reconnecting to gateway");
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(MIN_BACKOFF), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(40)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn dispatcher_stops_when_sender_drops() {
        let cfg = fixup_core::config::Config::from_lookup(|key| {
            (key == "DISCORD_TOKEN").then(|| "t".to_string())
        })
        .unwrap();
        let http = Arc::new(DiscordHttpClient::new("t"));
        let port = Arc::new(DiscordPort::new(http));
        let bot = fixup_core::messaging::types::BotIdentity {
            user_id: fixup_core::domain::UserId(1),
            name: "FixupBot".to_string(),
            avatar_url: None,
        };
        let relay = Arc::new(Relay::new(&cfg, port, bot));
        let state = Arc::new(AppState {
            retractor: Arc::new(relay.retractor()),
            relay,
        });

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(dispatch_events(rx, state));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
