//! # Moderation
//!
//! Staff tools on submitted suggestions (`send` namespace, payload = suggestion id):
//! flag as interesting, publish to the broadcast room, browse interesting posts.

use anyhow::{Result, anyhow};
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::services::Services;
use crate::application::session::Continuation;
use crate::domain::error::CoreError;
use crate::domain::types::{ActionEvent, Event, Menu, Namespace, SendOptions, Suggestion, TextEvent, UserId};
use crate::interface::commands::{checked, is_yes};
use crate::strings::{menu, messages};

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register(Namespace::Send, "options", options)?;
    table.register(Namespace::Send, "interesting", |d: Arc<Dispatcher>, a: ActionEvent| {
        mark(d, a, true)
    })?;
    table.register(Namespace::Send, "not_interesting", |d: Arc<Dispatcher>, a: ActionEvent| {
        mark(d, a, false)
    })?;
    table.register(Namespace::Send, "back", back)?;
    table.register(Namespace::Send, "publish", publish)?;
    table.register_text_pattern(r"(?i)^\.list\s+(.+)$", list)?;
    table.register_text_pattern(r"(?i)^\.evoke[_\s]+(\d+)$", evoke)?;
    Ok(())
}

/// Menu under a fresh staff post.
pub fn collapsed_menu(id: u64) -> Menu {
    menu::single(menu::button("Options", Namespace::Send, "options", Some(&id.to_string())))
}

fn options_menu(id: u64, interesting: bool) -> Menu {
    let id = id.to_string();
    let toggle = if interesting {
        menu::button("⭐️ This is an interesting post (undo) ⭐️", Namespace::Send, "not_interesting", Some(&id))
    } else {
        menu::button("⭐️ Set as Interesting", Namespace::Send, "interesting", Some(&id))
    };
    Menu {
        rows: vec![
            vec![toggle],
            vec![menu::button("⚠️ Publish Now", Namespace::Send, "publish", Some(&id))],
            vec![menu::button("◀️ Go back", Namespace::Send, "back", Some(&id))],
        ],
    }
}

fn package(suggestion: &Suggestion) -> String {
    messages::package(
        &suggestion.link,
        &suggestion.note,
        &suggestion.tags,
        suggestion.referencer.as_ref().map(UserId::as_str),
    )
}

/// The suggestion an admin's action points at, if the sender is an admin and it exists.
async fn target(services: &Services, action: &ActionEvent) -> Result<Option<Suggestion>> {
    if !services.is_admin(&action.user) {
        tracing::debug!(user = %action.user, action = %action.action, "Ignoring moderation action from non-admin");
        return Ok(None);
    }
    let id: u64 = action
        .payload
        .as_deref()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(|| anyhow!("`send/{}` needs a suggestion id", action.action))?;
    let suggestion = services.store.suggestion(id).await?;
    if suggestion.is_none() {
        services.reply(&action.user, &messages::suggestion_not_found(id)).await?;
    }
    Ok(suggestion)
}

/// Swaps the menu under the staff post of `suggestion`.
async fn show_menu(services: &Services, user: &UserId, suggestion: &Suggestion, menu: Menu) -> Result<()> {
    let options = SendOptions {
        markdown: false,
        ..SendOptions::with_menu(menu)
    };
    match &suggestion.staff_message {
        Some(message) => {
            let body = message.body.clone().unwrap_or_else(|| package(suggestion));
            services.channel.edit(message, &body, &options).await?;
        }
        None => {
            services.reply_with(user, &package(suggestion), &options).await?;
        }
    }
    Ok(())
}

async fn options(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let Some(suggestion) = target(services, &action).await? else {
        return Ok(());
    };
    show_menu(services, &action.user, &suggestion, options_menu(suggestion.id, suggestion.interesting)).await
}

async fn mark(dispatcher: Arc<Dispatcher>, action: ActionEvent, interesting: bool) -> Result<()> {
    let services = dispatcher.services();
    let Some(suggestion) = target(services, &action).await? else {
        return Ok(());
    };
    checked(
        services,
        &action.user,
        services.store.set_interesting(suggestion.id, interesting).await,
    )
    .await?;
    tracing::info!(user = %action.user, suggestion = suggestion.id, interesting, "Suggestion flagged");
    show_menu(services, &action.user, &suggestion, options_menu(suggestion.id, interesting)).await
}

async fn back(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let Some(suggestion) = target(services, &action).await? else {
        return Ok(());
    };
    show_menu(services, &action.user, &suggestion, collapsed_menu(suggestion.id)).await
}

async fn publish(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let Some(suggestion) = target(services, &action).await? else {
        return Ok(());
    };
    let user = action.user;
    let compiled = package(&suggestion);

    services.reply(&user, messages::POST_PREVIEW).await?;
    services.reply_with(&user, &compiled, &SendOptions::plain()).await?;

    services.sessions.clear(&user);
    let confirm = Continuation::new("publish_confirm", {
        let services = Arc::clone(services);
        move |answer: Event| confirm_publish(services, answer, suggestion, compiled)
    });
    services.sessions.register(&user, [confirm])?;
    services
        .reply_with(
            &user,
            messages::CONFIRM_PUBLISH,
            &SendOptions::with_menu(menu::confirm("Yes, I'm sure 👍", "No, what am I doing? ❌", "Publishing")),
        )
        .await?;
    Ok(())
}

async fn confirm_publish(services: Arc<Services>, answer: Event, suggestion: Suggestion, compiled: String) -> Result<()> {
    let user = answer.user().clone();
    if !is_yes(&answer) {
        services.reply(&user, messages::CANCELLED).await?;
        return Ok(());
    }

    let posted = services
        .channel
        .send(services.broadcast_room(), &compiled, &SendOptions::plain())
        .await?;
    let publication = checked(&services, &user, services.store.record_publication(&suggestion.link).await).await?;
    let report = checked(&services, &user, services.fanout.publish(&posted, &suggestion.tags).await).await?;
    tracing::info!(
        user = %user,
        suggestion = suggestion.id,
        times = publication.times,
        "Suggestion published: {}",
        report
    );

    services.reply(&user, &messages::published(&report.to_string())).await?;
    Ok(())
}

async fn list(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    if !services.is_admin(&text.user) {
        return Ok(());
    }

    let mut selection: Vec<String> = Vec::new();
    for word in captures.get(1).map(String::as_str).unwrap_or_default().split_whitespace() {
        if let Some(tag) = word.strip_prefix('#').filter(|t| !t.is_empty()) {
            let tag = tag.to_lowercase();
            if !selection.contains(&tag) {
                selection.push(tag);
            }
        }
    }
    if selection.is_empty() {
        services.reply(&text.user, messages::NO_VALID_HASHTAGS).await?;
        return Ok(());
    }

    let found = services.store.interesting_by_topics(&selection).await?;
    let reply = if found.is_empty() {
        messages::NOTHING_FOUND.to_string()
    } else {
        let mut reply = messages::interesting_list_header(&selection);
        for suggestion in &found {
            reply.push('\n');
            reply.push_str(&messages::interesting_list_line(suggestion.id, &suggestion.link, &suggestion.note));
        }
        reply
    };
    let options = SendOptions {
        link_preview: false,
        ..SendOptions::default()
    };
    services.reply_with(&text.user, &reply, &options).await?;
    Ok(())
}

async fn evoke(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    if !services.is_admin(&text.user) {
        return Ok(());
    }
    let id: u64 = captures
        .get(1)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| anyhow!("`.evoke` needs a suggestion id"))?;

    let suggestion = services.store.suggestion(id).await?.filter(|s| s.interesting);
    let Some(suggestion) = suggestion else {
        services.reply(&text.user, &messages::not_interesting(id)).await?;
        return Ok(());
    };

    let publication = services.store.publication(&suggestion.link).await?;
    services
        .reply(&text.user, &messages::publication_stats(publication.as_ref()))
        .await?;

    let menu = Menu {
        rows: vec![
            vec![menu::button(
                "⭐️ This is an interesting post (undo) ⭐️",
                Namespace::Send,
                "not_interesting",
                Some(&id.to_string()),
            )],
            vec![menu::button("⚠️ Publish Now", Namespace::Send, "publish", Some(&id.to_string()))],
        ],
    };
    services
        .reply_with(&text.user, &package(&suggestion), &SendOptions::with_menu(menu))
        .await?;
    Ok(())
}
