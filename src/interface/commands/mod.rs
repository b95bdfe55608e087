//! # Command Handlers
//!
//! Each feature module registers its text commands (`.send`, `.subscribe`, ...) and its
//! action handlers into the [`CommandTable`] at startup.

use crate::application::dispatcher::CommandTable;
use crate::application::services::Services;
use crate::domain::error::{CoreError, StorageError};
use crate::domain::types::{Event, UserId};
use crate::strings::messages;

pub mod admin;
pub mod common;
pub mod feedback;
pub mod misc;
pub mod moderation;
pub mod send;
pub mod subscription;

pub fn register_all(table: &mut CommandTable) -> Result<(), CoreError> {
    common::register(table)?;
    send::register(table)?;
    moderation::register(table)?;
    subscription::register(table)?;
    feedback::register(table)?;
    admin::register(table)?;
    misc::register(table)?;
    Ok(())
}

/// Whether an answer to a Yes/No question is affirmative.
pub(crate) fn is_yes(event: &Event) -> bool {
    let answer = event.text().unwrap_or_default().trim().to_lowercase();
    matches!(answer.as_str(), "yes" | "y" | "true" | "ok" | "sure")
        || answer.starts_with("yes,")
        || answer.starts_with("i'm sure")
}

/// Ends the user's dialog after a storage failure and asks them to try again later.
pub(crate) async fn storage_failure(services: &Services, user: &UserId, error: StorageError) -> anyhow::Error {
    services.sessions.clear(user);
    if let Err(e) = services.reply(user, messages::TRY_AGAIN).await {
        tracing::warn!(user = %user, "Failed to report storage failure: {}", e);
    }
    anyhow::Error::new(error)
}

/// Passes `result` through, ending the dialog via [`storage_failure`] when it failed.
pub(crate) async fn checked<T>(services: &Services, user: &UserId, result: Result<T, StorageError>) -> anyhow::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => Err(storage_failure(services, user, e).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;

    #[test]
    fn test_register_all_has_no_conflicts() {
        let mut table = CommandTable::new();
        register_all(&mut table).unwrap();
        assert_eq!(table.action_count(), 13);
        assert_eq!(table.pattern_count(), 15);
    }

    #[test]
    fn test_is_yes() {
        let user = UserId::from("@u:x");
        assert!(is_yes(&Event::synthetic(user.clone(), "Yes")));
        assert!(is_yes(&Event::synthetic(user.clone(), " yes ")));
        assert!(!is_yes(&Event::synthetic(user.clone(), "No")));
        assert!(!is_yes(&Event::synthetic(user, "")));
    }
}
