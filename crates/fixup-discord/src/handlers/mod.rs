//! Gateway event handlers.
//!
//! Each handler hands the parsed event to the matching `fixup-core` handler
//! and logs the outcome. Nothing is returned to the gateway loop; failures
//! are logged where they happen.

use std::sync::Arc;

use crate::{gateway::GatewayEvent, router::AppState};

mod component;
mod message;
mod reaction;

pub async fn handle_event(event: GatewayEvent, state: Arc<AppState>) {
    match event {
        GatewayEvent::MessageCreate(msg) => message::handle_message(msg, state).await,
        GatewayEvent::ReactionAdd(ev) => reaction::handle_reaction(ev, state).await,
        GatewayEvent::Component(ev) => component::handle_component(ev, state).await,
    }
}
