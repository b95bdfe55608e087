//! # Feedback
//!
//! `.feedback` asks for a 1-10 vote and an optional message, stores one feedback per
//! user and reports it to the staff room. A user with a stored feedback is first
//! asked whether to replace it.

use anyhow::{Result, anyhow};
use chrono::Utc;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::flow::{FlowBuilder, Turn};
use crate::application::session::Continuation;
use crate::domain::error::CoreError;
use crate::domain::types::{ActionEvent, Event, Feedback, Menu, MenuButton, Namespace, SendOptions, TextEvent};
use crate::interface::commands::{is_yes, storage_failure};
use crate::strings::{menu, messages};

const LABEL: &str = "Feedback";

#[derive(Debug, Clone, Default)]
pub struct FeedbackDraft {
    pub vote: Option<u8>,
}

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register_text_pattern(r"(?i)^\.feedback\b", start)?;
    table.register(Namespace::Feedback, "vote", vote_action)?;
    table.register(Namespace::Feedback, "skip", skip)?;
    Ok(())
}

pub fn feedback_flow() -> FlowBuilder<FeedbackDraft> {
    FlowBuilder::new("feedback")
        .step("intro", intro)
        .step("vote", vote)
        .step("message", message)
}

fn vote_menu() -> Menu {
    let row = |range: RangeInclusive<u8>| -> Vec<MenuButton> {
        range
            .map(|n| menu::button(n.to_string(), Namespace::Feedback, "vote", Some(&n.to_string())))
            .collect()
    };
    Menu {
        rows: vec![row(1..=5), row(6..=10), vec![menu::cancel(LABEL)]],
    }
}

async fn start(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    let user = text.user;

    let existing = match services.store.feedback(&user).await {
        Ok(existing) => existing,
        Err(e) => return Err(storage_failure(services, &user, e).await),
    };

    services.sessions.clear(&user);
    feedback_flow().start(&dispatcher, &user, FeedbackDraft::default())?;
    services.reply(&user, &messages::hello(user.as_str())).await?;

    if existing.is_none() {
        dispatcher.resume(Event::synthetic(user, "")).await;
        return Ok(());
    }

    let confirm = Continuation::new("confirm_edit", {
        let dispatcher = Arc::clone(&dispatcher);
        move |answer: Event| confirm_edit(dispatcher, answer)
    });
    services.sessions.register(&user, [confirm])?.promote_last_to_first();
    services
        .reply_with(
            &user,
            messages::FEEDBACK_EDIT_PROMPT,
            &SendOptions::with_menu(menu::confirm("Yes ✅", "No ❌", LABEL)),
        )
        .await?;
    Ok(())
}

async fn confirm_edit(dispatcher: Arc<Dispatcher>, answer: Event) -> Result<()> {
    let user = answer.user().clone();
    if is_yes(&answer) {
        dispatcher.resume(Event::synthetic(user, "")).await;
        return Ok(());
    }
    let services = dispatcher.services();
    services.sessions.clear(&user);
    services.reply(&user, messages::FEEDBACK_CANCELLED).await?;
    Ok(())
}

/// `!feedback vote <n>` answers the vote step.
async fn vote_action(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    if dispatcher.services().sessions.list(&action.user).first() != Some(&"vote") {
        tracing::debug!(user = %action.user, "No vote pending");
        return Ok(());
    }
    dispatcher.resume(Event::Action(action)).await;
    Ok(())
}

/// `!feedback skip` sends the feedback without a message.
async fn skip(dispatcher: Arc<Dispatcher>, action: ActionEvent) -> Result<()> {
    if dispatcher.services().sessions.list(&action.user).first() != Some(&"message") {
        tracing::debug!(user = %action.user, "Nothing to skip");
        return Ok(());
    }
    dispatcher.resume(Event::synthetic(action.user, "")).await;
    Ok(())
}

async fn intro(turn: Turn<FeedbackDraft>) -> Result<()> {
    turn.services()
        .reply_with(turn.user(), messages::RATE_PROMPT, &SendOptions::with_menu(vote_menu()))
        .await?;
    Ok(())
}

async fn vote(turn: Turn<FeedbackDraft>) -> Result<()> {
    let services = turn.services();
    let user = turn.user();

    let Some(vote) = turn.text().trim().parse::<u8>().ok().filter(|v| (1..=10).contains(v)) else {
        turn.retry()?;
        services
            .reply_with(user, messages::INVALID_VOTE, &SendOptions::with_menu(vote_menu()))
            .await?;
        return Ok(());
    };

    turn.update(|draft| draft.vote = Some(vote)).await;
    services.reply(user, &messages::vote_chosen(vote)).await?;
    let options = SendOptions::with_menu(Menu {
        rows: vec![
            vec![menu::button("Skip", Namespace::Feedback, "skip", None)],
            vec![menu::cancel(LABEL)],
        ],
    });
    services.reply_with(user, messages::FEEDBACK_DETAILS_PROMPT, &options).await?;
    Ok(())
}

async fn message(turn: Turn<FeedbackDraft>) -> Result<()> {
    let services = turn.services();
    let user = turn.user();
    let vote = turn
        .context()
        .await
        .vote
        .ok_or_else(|| anyhow!("feedback message reached without a vote"))?;
    let text = turn
        .event()
        .as_text()
        .map(|t| t.text.trim().to_string())
        .unwrap_or_default();

    let registered = !services.is_admin(user) || services.config.feedback.allow_admin;
    if registered {
        let mut stored = format!("Vote {vote}/10");
        if !text.is_empty() {
            stored.push_str(&format!(" - Message: {text}"));
        }
        let feedback = Feedback {
            user: user.clone(),
            date: Utc::now().date_naive(),
            message: stored,
        };
        if let Err(e) = services.store.write_feedback(feedback).await {
            return Err(storage_failure(services, user, e).await);
        }
        tracing::info!(user = %user, vote, "Feedback recorded");
        services.reply(user, messages::FEEDBACK_THANKS).await?;
    } else {
        services.reply(user, messages::ADMIN_FEEDBACK_REFUSED).await?;
    }

    services
        .channel
        .send(
            services.staff_room(),
            &messages::staff_feedback(user.as_str(), vote, &text, registered),
            &SendOptions::default(),
        )
        .await?;
    Ok(())
}
