use std::sync::Arc;

use fixup_core::{messaging::types::IncomingMessage, relay::RelayOutcome};

use crate::router::AppState;

pub(super) async fn handle_message(msg: IncomingMessage, state: Arc<AppState>) {
    if let Some(RelayOutcome::Relayed { relayed }) = state.relay.on_message(&msg).await {
        tracing::debug!(original = %msg.msg, %relayed, "relay complete");
    }
}
