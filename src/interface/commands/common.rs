//! # Common Actions
//!
//! `!common cancel [label]` ends the pending dialog, `!common next [answer]` feeds the
//! action to the next pending step as if it were typed.

use anyhow::Result;
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::domain::error::CoreError;
use crate::domain::types::{ActionEvent, Event, Namespace};
use crate::strings::messages;

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register(Namespace::Common, "cancel", cancel)?;
    table.register(Namespace::Common, "next", next)?;
    Ok(())
}

async fn cancel(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let discarded = services.sessions.clear(&action.user);
    if discarded == 0 {
        return Ok(());
    }
    tracing::info!(user = %action.user, discarded, "Dialog cancelled");
    let label = action.payload.as_deref().unwrap_or("Action");
    services.reply(&action.user, &messages::cancelled(label)).await?;
    Ok(())
}

async fn next(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    dispatcher.resume(Event::Action(action)).await;
    Ok(())
}
