use std::sync::Arc;

use fixup_core::{messaging::types::ComponentInteraction, retraction::RetractOutcome};

use crate::router::AppState;

pub(super) async fn handle_component(ev: ComponentInteraction, state: Arc<AppState>) {
    if let RetractOutcome::Ignored(reason) = state.retractor.on_component(&ev).await {
        tracing::trace!(msg = %ev.msg, ?reason, "component ignored");
    }
}
