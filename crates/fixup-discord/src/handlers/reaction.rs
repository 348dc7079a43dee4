use std::sync::Arc;

use fixup_core::{
    messaging::types::ReactionAdd,
    retraction::{RetractOutcome, RETRACT_EMOJIS},
};

use crate::router::AppState;

pub(super) async fn handle_reaction(ev: ReactionAdd, state: Arc<AppState>) {
    // Most reactions are unrelated; skip them before touching shared state.
    if !RETRACT_EMOJIS.contains(&ev.emoji.as_str()) {
        return;
    }
    if let RetractOutcome::Ignored(reason) = state.retractor.on_reaction_add(&ev).await {
        tracing::trace!(msg = %ev.msg, ?reason, "reaction ignored");
    }
}
