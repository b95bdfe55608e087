//! # Suggestions
//!
//! `.send` walks a member through sharing a resource: a link, an optional note and
//! some hashtags. The result is posted to the staff room for moderation.

use anyhow::Result;
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::entities;
use crate::application::flow::{FlowBuilder, Turn};
use crate::application::services::Services;
use crate::application::session::Continuation;
use crate::domain::error::CoreError;
use crate::domain::types::{
    ActionEvent, EntityKind, Event, Menu, Namespace, SendOptions, Suggestion, TextEvent, UserId,
};
use crate::interface::commands::{is_yes, moderation, storage_failure};
use crate::strings::{menu, messages};

const LABEL: &str = "Suggestion";

/// What the member has told us so far.
#[derive(Debug, Clone, Default)]
pub struct SuggestionDraft {
    pub link: String,
    pub note: String,
    pub tags: Vec<String>,
    pub raw_tags: Vec<String>,
}

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register_text_pattern(r"(?i)^\.send\b", start)?;
    table.register(Namespace::Send, "skip", skip)?;
    Ok(())
}

pub fn suggestion_flow() -> FlowBuilder<SuggestionDraft> {
    FlowBuilder::new("suggestion")
        .step("ask_url", ask_url)
        .step("ask_note", ask_note)
        .step("ask_tags", ask_tags)
}

fn cancel_options() -> SendOptions {
    SendOptions::with_menu(menu::single(menu::cancel(LABEL)))
}

fn note_options() -> SendOptions {
    SendOptions::with_menu(Menu {
        rows: vec![
            vec![menu::button("Skip", Namespace::Send, "skip", None)],
            vec![menu::cancel(LABEL)],
        ],
    })
}

async fn start(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    let user = text.user;

    let banned = match services.store.is_user_banned(&user).await {
        Ok(banned) => banned,
        Err(e) => return Err(storage_failure(services, &user, e).await),
    };
    if banned {
        services.reply(&user, messages::BANNED_USER).await?;
        return Ok(());
    }
    if !services.is_member(&user).await? {
        services.reply(&user, messages::MEMBERS_ONLY).await?;
        return Ok(());
    }

    services.sessions.clear(&user);
    suggestion_flow().start(&dispatcher, &user, SuggestionDraft::default())?;
    services.reply_with(&user, messages::ASK_URL, &cancel_options()).await?;
    Ok(())
}

/// `!send skip`: leaves the note empty and moves on to the hashtags.
async fn skip(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    let pending = dispatcher.services().sessions.list(&action.user);
    if pending.first() != Some(&"ask_note") {
        tracing::debug!(user = %action.user, "Nothing to skip");
        return Ok(());
    }
    dispatcher.resume(Event::synthetic(action.user, "")).await;
    Ok(())
}

async fn ask_url(turn: Turn<SuggestionDraft>) -> Result<()> {
    let services = turn.services();
    let user = turn.user();

    let link = turn
        .event()
        .as_text()
        .and_then(|t| t.first_entity(EntityKind::Url))
        .map(String::from);
    let Some(link) = link else {
        turn.retry()?;
        services.reply_with(user, messages::INVALID_URL, &cancel_options()).await?;
        return Ok(());
    };
    let Some(host) = entities::hostname(&link) else {
        turn.retry()?;
        services.reply_with(user, messages::INVALID_CONTENT, &cancel_options()).await?;
        return Ok(());
    };

    let banned = match services.store.is_site_banned(&host).await {
        Ok(banned) => banned,
        Err(e) => return Err(storage_failure(services, user, e).await),
    };
    if banned {
        turn.abort();
        tracing::info!(user = %user, site = %host, "Refused suggestion of a banned site");
        services.reply(user, messages::BANNED_SITE).await?;
        return Ok(());
    }

    turn.update(|draft| draft.link = link).await;
    services.reply_with(user, messages::ASK_NOTE, &note_options()).await?;
    Ok(())
}

async fn ask_note(turn: Turn<SuggestionDraft>) -> Result<()> {
    let note = turn
        .event()
        .as_text()
        .map(|t| entities::strip_hashtags(&t.text, &t.entities))
        .unwrap_or_default();
    // An empty answer (skip, or a replay after missing hashtags) keeps what we had.
    if !note.is_empty() {
        turn.update(|draft| draft.note = note).await;
    }
    turn.services()
        .reply_with(turn.user(), messages::ASK_TAGS, &cancel_options())
        .await?;
    Ok(())
}

async fn ask_tags(turn: Turn<SuggestionDraft>) -> Result<()> {
    let services = turn.services();
    let user = turn.user();

    let tags = turn
        .event()
        .as_text()
        .map(|t| entities::extract_tags(&t.text, &t.entities))
        .unwrap_or_default();
    if !tags.has_hashtags {
        turn.rewind(1)?;
        services.reply(user, messages::NO_HASHTAGS).await?;
        turn.replay_empty().await;
        return Ok(());
    }

    turn.update(|draft| {
        draft.tags = tags.tags;
        draft.raw_tags = tags.raw;
    })
    .await;
    let draft = turn.snapshot().await;

    if services.is_admin(user) {
        let existing = match services.store.suggestion_by_link(&draft.link).await {
            Ok(existing) => existing,
            Err(e) => return Err(storage_failure(services, user, e).await),
        };
        if let Some(existing) = existing {
            let by = existing.referencer.as_ref().map(UserId::as_str);
            let confirm = Continuation::new("confirm_duplicate", {
                let services = Arc::clone(services);
                let user = user.clone();
                move |answer: Event| confirm_duplicate(services, user, answer, draft)
            });
            services.sessions.register(user, [confirm])?;
            services
                .reply_with(
                    user,
                    &messages::already_proposed(by),
                    &SendOptions::with_menu(menu::confirm("Yes", "No", LABEL)),
                )
                .await?;
            return Ok(());
        }
    }

    submit(services, user, draft).await
}

async fn confirm_duplicate(services: Arc<Services>, user: UserId, answer: Event, draft: SuggestionDraft) -> Result<()> {
    if !is_yes(&answer) {
        services.reply(&user, messages::DISCARDED).await?;
        return Ok(());
    }
    submit(&services, &user, draft).await
}

/// Stores the suggestion, posts it to the staff room and thanks the member.
async fn submit(services: &Arc<Services>, user: &UserId, draft: SuggestionDraft) -> Result<()> {
    let suggestion = Suggestion {
        id: 0,
        link: draft.link.clone(),
        note: draft.note.clone(),
        tags: draft.tags.clone(),
        referencer: (!services.is_admin(user)).then(|| user.clone()),
        interesting: false,
        staff_message: None,
    };
    let id = match services.store.add_suggestion(suggestion).await {
        Ok(id) => id,
        Err(e) => return Err(storage_failure(services, user, e).await),
    };

    let staff_text = messages::staff_suggestion(user.as_str(), &draft.link, &draft.note, &draft.raw_tags);
    let options = SendOptions {
        markdown: false,
        ..SendOptions::with_menu(moderation::collapsed_menu(id))
    };
    let posted = services.channel.send(services.staff_room(), &staff_text, &options).await?;
    services.store.set_staff_message(id, posted).await?;
    tracing::info!(user = %user, suggestion = id, link = %draft.link, "Suggestion submitted");

    services.reply(user, messages::SUGGESTION_SENT).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::Route;
    use crate::application::testing::{ADMIN, STAFF_ROOM, TestBot, test_config, unwritable_store};
    use crate::domain::traits::Store;
    use crate::infrastructure::store::MemoryStore;

    fn table() -> CommandTable {
        let mut table = CommandTable::new();
        register(&mut table).unwrap();
        table
    }

    #[tokio::test]
    async fn test_full_suggestion_dialog() {
        let bot = TestBot::new(table());
        let user = UserId::from("@u:x");

        bot.say("@u:x", ".send").await;
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::ASK_URL));
        assert_eq!(bot.services.sessions.list(&user), vec!["ask_url", "ask_note", "ask_tags"]);

        bot.say("@u:x", "not a link").await;
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::INVALID_URL));
        assert_eq!(bot.services.sessions.length(&user), 3);

        bot.say("@u:x", "https://example.org/post").await;
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::ASK_NOTE));

        bot.say("@u:x", "Great read #ignored").await;
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::ASK_TAGS));

        bot.say("@u:x", "I forgot the tags").await;
        let replies = bot.channel.sent_to("@u:x");
        assert_eq!(&replies[replies.len() - 2..], [messages::NO_HASHTAGS, messages::ASK_TAGS]);
        assert_eq!(bot.services.sessions.list(&user), vec!["ask_tags"]);

        bot.say("@u:x", "#Rust #wasm").await;
        assert!(bot.services.sessions.is_idle(&user));
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::SUGGESTION_SENT));

        let staff = bot.channel.last_sent_to(STAFF_ROOM).unwrap();
        assert!(staff.contains("https://example.org/post"));
        assert!(staff.contains("Great read"));
        assert!(staff.ends_with("Tags: #rust #wasm"));

        let stored = bot.store.suggestion(1).await.unwrap().unwrap();
        assert_eq!(stored.note, "Great read");
        assert_eq!(stored.tags, vec!["rust", "wasm"]);
        assert_eq!(stored.referencer, Some(user));
        assert_eq!(stored.staff_message.unwrap().channel.as_str(), STAFF_ROOM);
        assert!(bot.store.topic_by_name("wasm").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_on_submit_ends_the_dialog() {
        let bot = TestBot::with_store(table(), unwritable_store());
        let user = UserId::from("@u:x");

        bot.say("@u:x", ".send").await;
        bot.say("@u:x", "https://example.org/post").await;
        bot.say("@u:x", "Worth a look").await;
        let route = bot.say("@u:x", "#rust").await;

        assert!(matches!(route, Route::Failed(_)));
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::TRY_AGAIN));
        assert!(bot.services.sessions.is_idle(&user));
        assert!(bot.store.suggestion(1).await.unwrap().is_none());
        assert!(bot.channel.sent_to(STAFF_ROOM).is_empty());
    }

    #[tokio::test]
    async fn test_skip_leaves_the_note_empty() {
        let bot = TestBot::new(table());
        let user = UserId::from("@u:x");

        bot.say("@u:x", ".send").await;
        bot.press("@u:x", Namespace::Send, "skip", None).await;
        assert_eq!(bot.services.sessions.length(&user), 3);

        bot.say("@u:x", "https://example.org").await;
        bot.press("@u:x", Namespace::Send, "skip", None).await;
        assert_eq!(bot.services.sessions.list(&user), vec!["ask_tags"]);

        bot.say("@u:x", "#rust").await;
        let stored = bot.store.suggestion(1).await.unwrap().unwrap();
        assert_eq!(stored.note, "");
        assert_eq!(stored.tags, vec!["rust"]);
    }

    #[tokio::test]
    async fn test_banned_user_and_non_members_are_refused() {
        let mut config = test_config();
        config.channels.membership_room = Some("!members:x".into());
        let bot = TestBot::build(table(), Default::default(), Arc::new(MemoryStore::new()), config);

        bot.store.ban_user(&UserId::from("@bad:x")).await.unwrap();
        bot.say("@bad:x", ".send").await;
        assert_eq!(bot.channel.last_sent_to("@bad:x").as_deref(), Some(messages::BANNED_USER));
        assert!(bot.services.sessions.is_idle(&UserId::from("@bad:x")));

        bot.channel.deny_membership("@guest:x");
        bot.say("@guest:x", ".send").await;
        assert_eq!(bot.channel.last_sent_to("@guest:x").as_deref(), Some(messages::MEMBERS_ONLY));
        assert!(bot.services.sessions.is_idle(&UserId::from("@guest:x")));
    }

    #[tokio::test]
    async fn test_banned_site_aborts_the_dialog() {
        let bot = TestBot::new(table());
        let user = UserId::from("@u:x");
        bot.store.ban_site("spam.example").await.unwrap();

        bot.say("@u:x", ".send").await;
        bot.say("@u:x", "https://www.spam.example/win").await;
        assert_eq!(bot.channel.last_sent_to("@u:x").as_deref(), Some(messages::BANNED_SITE));
        assert!(bot.services.sessions.is_idle(&user));
    }

    #[tokio::test]
    async fn test_admin_confirms_duplicate_links() {
        let bot = TestBot::new(table());
        let admin = UserId::from(ADMIN);
        bot.store
            .add_suggestion(Suggestion {
                id: 0,
                link: "https://example.org/dup".into(),
                note: String::new(),
                tags: vec!["rust".into()],
                referencer: Some(UserId::from("@first:x")),
                interesting: false,
                staff_message: None,
            })
            .await
            .unwrap();

        for answer in ["No", "yes"] {
            bot.say(ADMIN, ".send").await;
            bot.say(ADMIN, "https://example.org/dup").await;
            bot.press(ADMIN, Namespace::Send, "skip", None).await;
            bot.say(ADMIN, "#rust").await;
            assert_eq!(bot.services.sessions.list(&admin), vec!["confirm_duplicate"]);
            assert!(bot.channel.last_sent_to(ADMIN).unwrap().contains("@first:x"));
            bot.say(ADMIN, answer).await;
            assert!(bot.services.sessions.is_idle(&admin));
        }

        assert_eq!(bot.channel.sent_to(STAFF_ROOM).len(), 1);
        let resent = bot.store.suggestion_by_link("https://example.org/dup").await.unwrap().unwrap();
        assert_eq!(resent.referencer, None);
        assert!(bot.channel.sent_to(ADMIN).contains(&messages::DISCARDED.to_string()));
    }
}
