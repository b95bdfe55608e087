//! # Miscellaneous Commands
//!
//! `.start`, `.faq` and `.mydata`.

use anyhow::Result;
use std::sync::Arc;

use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::services::Services;
use crate::domain::error::CoreError;
use crate::domain::types::{TextEvent, UserId};
use crate::interface::commands::subscription;
use crate::strings::messages;

pub fn register(table: &mut CommandTable) -> Result<(), CoreError> {
    table.register_text_pattern(r"(?i)^\.start\b", start)?;
    table.register_text_pattern(r"(?i)^\.faq$", faq)?;
    table.register_text_pattern(r"(?i)^\.mydata$", my_data)?;
    Ok(())
}

/// Greets the user and hands over anything that piled up while they were away.
async fn start(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    services.reply(&text.user, messages::WELCOME).await?;
    subscription::replay_pending(services, &text.user).await?;
    Ok(())
}

async fn faq(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    dispatcher.services().reply(&text.user, messages::FAQ).await?;
    Ok(())
}

async fn my_data(dispatcher: Arc<Dispatcher>, text: TextEvent, _captures: Vec<String>) -> Result<()> {
    let services = dispatcher.services();
    let report = user_report(services, &text.user).await?;
    services.reply(&text.user, &report).await?;
    Ok(())
}

/// Everything the bot stores about `user`.
pub(crate) async fn user_report(services: &Services, user: &UserId) -> Result<String> {
    let mut topics = Vec::new();
    for id in services.store.topics_for_user(user).await? {
        if let Some(topic) = services.store.topic(id).await? {
            topics.push(topic.label().to_string());
        }
    }
    let backlog = services.store.list_backlog(user).await?.len();
    let feedback = services.store.feedback(user).await?;
    let banned = services.store.is_user_banned(user).await?;

    Ok(messages::user_data(
        user.as_str(),
        &topics,
        backlog,
        feedback.as_ref().map(|f| f.message.as_str()),
        banned,
    ))
}
