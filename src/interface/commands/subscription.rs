//! # Subscriptions
//!
//! Topic menus (`subs` namespace), custom topics, unsubscribe-all and the fan-out of
//! broadcast room posts to subscribers.
//!
//! The last menu a user opened is remembered as their menu tag, so a custom
//! subscription lands back where it started.

use anyhow::{Result, anyhow};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::entities;
use crate::application::fanout::{FanoutReport, FlushReport};
use crate::application::services::Services;
use crate::application::session::Continuation;
use crate::domain::error::{CoreError, StorageError};
use crate::domain::types::{
    ActionEvent, Category, EntityKind, Event, MAIN_MENU, Menu, MenuButton, MessageRef, Namespace, SendOptions,
    TextEvent, Topic, TopicId, UserId,
};
use crate::interface::commands::{checked, is_yes, storage_failure};
use crate::strings::{menu, messages};

const MYSUBS: &str = "mysubs";

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register(Namespace::Subs, "nav", nav)?;
    table.register(Namespace::Subs, "topic", topic)?;
    table.register(Namespace::Subs, "action", action)?;
    table.register_text_pattern(r"(?i)^\.subscribe\b", subscribe)?;
    table.register_text_pattern(r"(?i)^\.stats$", stats)?;
    table.register_text_pattern(r"(?i)^\.setformatted(?:\s+(\S+)\s+(.+))?$", set_formatted)?;
    Ok(())
}

fn back_button() -> MenuButton {
    menu::button("◀ Back to the main page", Namespace::Subs, "nav", Some("back"))
}

fn main_menu(categories: &[Category]) -> Menu {
    let mut rows: Vec<Vec<MenuButton>> = categories
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|c| menu::button(c.label.clone(), Namespace::Subs, "nav", Some(&c.key)))
                .collect()
        })
        .collect();
    rows.push(vec![
        menu::button("Custom ✏️", Namespace::Subs, "action", Some("custom")),
        menu::button("My subscriptions ✅", Namespace::Subs, "nav", Some(MYSUBS)),
    ]);
    Menu { rows }
}

fn category_menu(category: &Category, topics: &[Topic], subscribed: &BTreeSet<TopicId>) -> Menu {
    let buttons: Vec<MenuButton> = category
        .topics
        .iter()
        .filter_map(|id| topics.iter().find(|t| t.id == *id))
        .map(|t| {
            let label = if subscribed.contains(&t.id) {
                format!("{} ☑️", t.label())
            } else {
                t.label().to_string()
            };
            menu::button(label, Namespace::Subs, "topic", Some(&t.id.to_string()))
        })
        .collect();

    let mut rows: Vec<Vec<MenuButton>> = buttons.chunks(2).map(<[MenuButton]>::to_vec).collect();
    rows.push(vec![
        menu::button("All subcategories", Namespace::Subs, "topic", Some(&format!("{}:all", category.key))),
        menu::button("Custom ✏️", Namespace::Subs, "action", Some(&format!("custom:{}", category.key))),
    ]);
    rows.push(vec![back_button()]);
    Menu { rows }
}

fn mysubs_menu(mut subscribed: Vec<Topic>) -> Menu {
    subscribed.sort_by_key(|t| t.label().chars().count());
    let buttons: Vec<MenuButton> = subscribed
        .iter()
        .map(|t| menu::button(t.label(), Namespace::Subs, "topic", Some(&format!("{}:{MYSUBS}", t.id))))
        .collect();

    let mut rows: Vec<Vec<MenuButton>> = buttons.chunks(2).map(<[MenuButton]>::to_vec).collect();
    if !subscribed.is_empty() {
        rows.push(vec![menu::button(
            "❌ Unsubscribe from all categories",
            Namespace::Subs,
            "action",
            Some("unsub-all"),
        )]);
    }
    rows.push(vec![back_button()]);
    Menu { rows }
}

/// Sends the menu called `tag`. Returns false (after telling the user) when there is none.
async fn show_menu(services: &Services, user: &UserId, tag: &str, intro: Option<String>) -> Result<bool> {
    let categories = services.store.categories().await?;
    let subscribed = services.store.topics_for_user(user).await?;

    let (text, menu) = match tag {
        MAIN_MENU => (messages::MAIN_MENU_INTRO, main_menu(&categories)),
        MYSUBS => {
            let mut topics = Vec::with_capacity(subscribed.len());
            for id in &subscribed {
                if let Some(topic) = services.store.topic(*id).await? {
                    topics.push(topic);
                }
            }
            let text = if topics.is_empty() {
                messages::NO_SUBSCRIPTIONS
            } else {
                messages::MYSUBS_INTRO
            };
            (text, mysubs_menu(topics))
        }
        key => match categories.iter().find(|c| c.key == key) {
            Some(category) => {
                let topics = services.store.topics().await?;
                (messages::CATEGORY_INTRO, category_menu(category, &topics, &subscribed))
            }
            None => {
                services.reply(user, &messages::unknown_menu(key)).await?;
                return Ok(false);
            }
        },
    };

    let text = intro.unwrap_or_else(|| text.to_string());
    services.reply_with(user, &text, &SendOptions::with_menu(menu)).await?;
    Ok(true)
}

/// Replies `MEMBERS_ONLY` and returns false when the user is outside the community.
async fn ensure_member(services: &Services, user: &UserId) -> Result<bool> {
    if services.is_member(user).await? {
        return Ok(true);
    }
    services.reply(user, messages::MEMBERS_ONLY).await?;
    Ok(false)
}

async fn subscribe(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    let user = text.user;
    if !ensure_member(services, &user).await? {
        return Ok(());
    }
    let greeting = messages::greeting_subscribe(user.as_str());
    if show_menu(services, &user, MAIN_MENU, Some(greeting)).await? {
        services.store.set_menu_tag(&user, MAIN_MENU).await?;
    }
    Ok(())
}

async fn nav(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let tag = match action.payload.as_deref() {
        None | Some("back") => MAIN_MENU,
        Some(tag) => tag,
    };
    if show_menu(services, &action.user, tag, None).await? {
        services.store.set_menu_tag(&action.user, tag).await?;
    }
    Ok(())
}

/// Flips one subscription and returns whether the user is now subscribed.
async fn toggle(services: &Services, user: &UserId, topic: &Topic) -> Result<bool, StorageError> {
    if services.store.is_subscribed(user, topic.id).await? {
        services.store.remove_subscription(user, topic.id).await?;
        services.audit.record(format!("{user} unsubscribed from {}", topic.name));
        tracing::info!(user = %user, topic = %topic.name, "Unsubscribed");
        Ok(false)
    } else {
        services.store.add_subscription(user, topic.id).await?;
        services.audit.record(format!("{user} subscribed to {}", topic.name));
        tracing::info!(user = %user, topic = %topic.name, "Subscribed");
        Ok(true)
    }
}

async fn topic(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let user = &action.user;
    let payload = action
        .payload
        .as_deref()
        .ok_or_else(|| anyhow!("`subs/topic` needs a topic"))?;
    let (key, scope) = payload.split_once(':').unwrap_or((payload, ""));

    if scope == "all" {
        let categories = services.store.categories().await?;
        let Some(category) = categories.iter().find(|c| c.key == key) else {
            services.reply(user, &messages::unknown_menu(key)).await?;
            return Ok(());
        };
        let subscribed = checked(services, user, services.store.topics_for_user(user).await).await?;
        let everything = category.topics.iter().all(|id| subscribed.contains(id));
        for id in &category.topics {
            if everything || !subscribed.contains(id) {
                if let Some(topic) = services.store.topic(*id).await? {
                    checked(services, user, toggle(services, user, &topic).await).await?;
                }
            }
        }
        show_menu(services, user, &category.key, None).await?;
        return Ok(());
    }

    let found = match key.parse::<TopicId>() {
        Ok(id) => services.store.topic(id).await?,
        Err(_) => None,
    };
    let Some(topic) = found else {
        services.reply(user, &messages::topic_not_found(key)).await?;
        return Ok(());
    };
    checked(services, user, toggle(services, user, &topic).await).await?;

    let tag = if scope == MYSUBS {
        MYSUBS.to_string()
    } else {
        services
            .store
            .categories()
            .await?
            .into_iter()
            .find(|c| c.topics.contains(&topic.id))
            .map(|c| c.key)
            .unwrap_or_else(|| MAIN_MENU.to_string())
    };
    show_menu(services, user, &tag, None).await?;
    Ok(())
}

async fn action(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let services = dispatcher.services();
    let user = action.user;
    let payload = action.payload.as_deref().unwrap_or_default();
    let (name, key) = payload.split_once(':').unwrap_or((payload, ""));

    match name {
        "custom" => {
            if !ensure_member(services, &user).await? {
                return Ok(());
            }
            if !key.is_empty() {
                services.store.set_menu_tag(&user, key).await?;
            }
            services.sessions.clear(&user);
            let answer = Continuation::new("custom_topics", {
                let services = Arc::clone(services);
                move |event: Event| custom_topics(services, event)
            });
            services.sessions.register(&user, [answer])?;
            services
                .reply_with(
                    &user,
                    messages::ASK_CUSTOM_TOPICS,
                    &SendOptions::with_menu(menu::single(menu::cancel("Custom sub."))),
                )
                .await?;
        }
        "unsub-all" => {
            services.sessions.clear(&user);
            let confirm = Continuation::new("unsubscribe_all", {
                let services = Arc::clone(services);
                move |event: Event| unsubscribe_all(services, event)
            });
            services.sessions.register(&user, [confirm])?;
            services
                .reply_with(
                    &user,
                    messages::CONFIRM_UNSUBSCRIBE_ALL,
                    &SendOptions::with_menu(menu::confirm(
                        "I'm sure.",
                        "Nope, let me stay here where I am.",
                        "Unsubscription",
                    )),
                )
                .await?;
        }
        other => tracing::debug!(user = %user, action = other, "Unknown subscription action"),
    }
    Ok(())
}

async fn custom_topics(services: Arc<Services>, answer: Event) -> Result<()> {
    let user = answer.user().clone();
    let mut seen = HashSet::new();
    let wanted: Vec<(String, String)> = entities::parse_custom_topics(answer.text().unwrap_or_default())
        .into_iter()
        .filter(|(_, name)| seen.insert(name.clone()))
        .collect();

    if wanted.is_empty() {
        services.reply(&user, messages::NO_VALID_TOPICS).await?;
        return Ok(());
    }

    let mut names = Vec::with_capacity(wanted.len());
    for (display, name) in wanted {
        let topic = checked(&services, &user, services.store.ensure_topic(&name).await).await?;
        checked(&services, &user, toggle(&services, &user, &topic).await).await?;
        names.push(display);
    }

    let tag = services
        .store
        .menu_tag(&user)
        .await?
        .unwrap_or_else(|| MAIN_MENU.to_string());
    show_menu(&services, &user, &tag, Some(messages::custom_subscription_done(&names))).await?;
    Ok(())
}

async fn unsubscribe_all(services: Arc<Services>, answer: Event) -> Result<()> {
    let user = answer.user().clone();
    if !is_yes(&answer) {
        services.reply(&user, messages::CANCELLED).await?;
        return Ok(());
    }
    if let Err(e) = services.store.unsubscribe_all(&user).await {
        return Err(storage_failure(&services, &user, e).await);
    }
    services.audit.record(format!("{user} unsubscribed from every topic"));
    tracing::info!(user = %user, "Unsubscribed from every topic");
    services.reply(&user, messages::UNSUBSCRIBED_ALL).await?;
    show_menu(&services, &user, MAIN_MENU, None).await?;
    Ok(())
}

async fn stats(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    if !services.is_admin(&text.user) {
        return Ok(());
    }
    let rows: Vec<(String, usize)> = services
        .store
        .topic_stats()
        .await?
        .into_iter()
        .map(|(topic, count)| (topic.name, count))
        .collect();
    let reply = if rows.is_empty() {
        messages::NO_SUBSCRIBED_USERS.to_string()
    } else {
        messages::stats(&rows)
    };
    services.reply(&text.user, &reply).await?;
    Ok(())
}

async fn set_formatted(dispatcher: Arc<Dispatcher>, text: TextEvent, captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    if !services.is_admin(&text.user) {
        return Ok(());
    }
    let key = captures.get(1).map(String::as_str).unwrap_or_default();
    let label = captures.get(2).map(|l| l.trim()).unwrap_or_default();
    if key.is_empty() || label.is_empty() {
        services.reply(&text.user, messages::SETFORMATTED_USAGE).await?;
        return Ok(());
    }

    let reply = if services.store.set_topic_label(key, label).await? {
        tracing::info!(user = %text.user, topic = key, label, "Topic label updated");
        messages::topic_label_set(key, label)
    } else {
        messages::topic_not_found(key)
    };
    services.reply(&text.user, &reply).await?;
    Ok(())
}

/// Fans a broadcast room post out to the subscribers of its hashtags.
///
/// A post linking a known suggestion also counts as a publication of it.
pub async fn broadcast_post(services: &Services, message: MessageRef, tags: Vec<String>) -> Result<FanoutReport> {
    let report = services.fanout.publish(&message, &tags).await?;
    tracing::info!(tags = ?tags, "Broadcast post {} fanned out: {}", message.message_id, report);

    let body = message.body.as_deref().unwrap_or_default();
    let link = entities::scan(body)
        .into_iter()
        .find(|e| e.kind == EntityKind::Url)
        .map(|e| e.slice(body).to_string());
    if let Some(link) = link {
        if services.store.suggestion_by_link(&link).await?.is_some() {
            let publication = services.store.record_publication(&link).await?;
            tracing::debug!(link = %link, times = publication.times, "Publication recorded");
        }
    }
    Ok(report)
}

/// Delivers whatever piled up for `user` while they were unreachable.
pub async fn replay_pending(services: &Services, user: &UserId) -> Result<FlushReport> {
    if services.store.list_backlog(user).await?.is_empty() {
        return Ok(FlushReport::default());
    }
    services.reply(user, messages::PENDING_POSTS).await?;
    let report = services.fanout.replay_backlog(user).await?;
    tracing::info!(user = %user, flushed = report.flushed, dropped = report.dropped, kept = report.kept, "Backlog replayed");
    Ok(report)
}
