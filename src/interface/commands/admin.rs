//! # Admin Commands
//!
//! `.ban`, `.unban`, `.bansite`, `.admins` and `.getuser`. Only the users listed in
//! `system.admin` get an answer; everybody else is ignored.

use anyhow::Result;
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::entities;
use crate::domain::error::CoreError;
use crate::domain::types::{SendOptions, TextEvent, UserId};
use crate::interface::commands::misc;
use crate::strings::messages;

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register_text_pattern(r"(?i)^\.ban\s+(\S+)$", ban)?;
    table.register_text_pattern(r"(?i)^\.unban\s+(\S+)$", unban)?;
    table.register_text_pattern(r"(?i)^\.bansite\s+(\S+)$", ban_site)?;
    table.register_text_pattern(r"(?i)^\.admins$", admins)?;
    table.register_text_pattern(r"(?i)^\.getuser\s+(\S+)$", get_user)?;
    Ok(())
}

/// The argument of an admin command, or `None` when the sender is not an admin.
fn admin_argument(dispatcher: &Dispatcher, text: &TextEvent, captures: &[String]) -> Option<String> {
    if !dispatcher.services().is_admin(&text.user) {
        tracing::warn!(user = %text.user, command = %text.text, "Admin command from non-admin");
        return None;
    }
    captures.get(1).map(|c| c.trim().to_string())
}

fn admin_target(dispatcher: &Dispatcher, text: &TextEvent, captures: &[String]) -> Option<UserId> {
    admin_argument(dispatcher, text, captures).map(UserId::new)
}

async fn ban(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let Some(target) = admin_target(&dispatcher, &text, &captures) else {
        return Ok(());
    };
    let services = dispatcher.services();
    if services.is_admin(&target) {
        services.reply(&text.user, messages::CANNOT_BAN_ADMIN).await?;
        return Ok(());
    }

    services.store.ban_user(&target).await?;
    services.audit.record(format!("{} banned {target}", text.user));
    tracing::info!(admin = %text.user, user = %target, "User banned");
    services.reply(&text.user, &messages::user_banned(target.as_str())).await?;
    Ok(())
}

async fn unban(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let Some(target) = admin_target(&dispatcher, &text, &captures) else {
        return Ok(());
    };
    let services = dispatcher.services();
    services.store.unban_user(&target).await?;
    services.audit.record(format!("{} unbanned {target}", text.user));
    tracing::info!(admin = %text.user, user = %target, "User unbanned");
    services.reply(&text.user, &messages::user_unbanned(target.as_str())).await?;
    Ok(())
}

async fn ban_site(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let Some(site) = admin_argument(&dispatcher, &text, &captures) else {
        return Ok(());
    };
    let services = dispatcher.services();
    let Some(domain) = entities::hostname(&site) else {
        services.reply(&text.user, &messages::invalid_site(&site)).await?;
        return Ok(());
    };

    services.store.ban_site(&domain).await?;
    services.audit.record(format!("{} banned site {domain}", text.user));
    tracing::info!(admin = %text.user, site = %domain, "Site banned");
    services.reply(&text.user, &messages::site_banned(&domain)).await?;
    Ok(())
}

async fn admins(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    if !dispatcher.services().is_admin(&text.user) {
        return Ok(());
    }
    dispatcher
        .services()
        .reply(&text.user, messages::ADMIN_COMMANDS)
        .await?;
    Ok(())
}

async fn get_user(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let Some(target) = admin_target(&dispatcher, &text, &captures) else {
        return Ok(());
    };
    let services = dispatcher.services();
    let report = misc::user_report(services, &target).await?;
    let options = SendOptions {
        link_preview: false,
        ..SendOptions::default()
    };
    services.reply_with(&text.user, &report, &options).await?;
    Ok(())
}
