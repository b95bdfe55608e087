//! # Messages
//!
//! Constant strings and format functions for user-facing messages.

use crate::domain::types::Publication;

// Common
pub const TRY_AGAIN: &str = "⚠️ Something went wrong on our side. Please, try again later.";
pub const SESSION_EXPIRED: &str = "⌛ Your pending dialog expired. Start again whenever you want.";
pub const MEMBERS_ONLY: &str = "Sorry, only members of the community can use this function.";
pub const CANCELLED: &str = "Cancelled.";

pub fn cancelled(label: &str) -> String {
    format!("{label} cancelled.")
}

// Suggestions
pub const BANNED_USER: &str = "Sorry, you got banned from the using of this system.";
pub const ASK_URL: &str = "Send me a valid URI to be shared with the community. Please, share only English resources. \
Others will be rejected.\nUse Cancel at any moment to stop.";
pub const INVALID_URL: &str = "Sorry, invalid URI. Please, provide a valid one.";
pub const INVALID_CONTENT: &str = "This content is not valid. Please, provide a valid URI.";
pub const BANNED_SITE: &str = "I'm sorry but the resource you linked has been banned and cannot be sent.";
pub const ASK_NOTE: &str = "Now send me a message to be attached or press skip.\n*Hashtags will be ignored here.*";
pub const ASK_TAGS: &str = "Add now some hashtags to categorize this post.";
pub const NO_HASHTAGS: &str = "No hashtags found. Try again.";
pub const SUGGESTION_SENT: &str =
    "The suggestion has been sent and will be analyzed. Thanks for your contribution. 😉";
pub const DISCARDED: &str = "Discarded.";

pub fn already_proposed(referencer: Option<&str>) -> String {
    format!(
        "This link has been already proposed by {}. Do you want to send it anyway?",
        referencer.unwrap_or("one of the admins")
    )
}

pub fn staff_suggestion(user: &str, link: &str, note: &str, raw_tags: &[String]) -> String {
    let mut text = format!("{user} suggested the following content:\n{link}");
    if !note.is_empty() {
        text.push('\n');
        text.push_str(note);
    }
    text.push_str(&format!("\n\nTags: {}", raw_tags.join(" ")));
    text
}

/// A suggestion laid out as it is published.
pub fn package(link: &str, note: &str, tags: &[String], referencer: Option<&str>) -> String {
    let tags = tags.iter().map(|t| format!("#{t}")).collect::<Vec<_>>().join(" ");
    let mut text = link.to_string();
    if !note.is_empty() {
        text.push_str(&format!("\n\n{note}"));
    }
    text.push_str(&format!("\n\nTags: {tags}"));
    if let Some(user) = referencer {
        text.push_str(&format!("\nSent us by {user}"));
    }
    text
}

// Moderation
pub const POST_PREVIEW: &str = "*Post preview*:";
pub const CONFIRM_PUBLISH: &str = "Are you sure you want to post this immediately?";
pub const NO_VALID_HASHTAGS: &str = "No valid hashtags inserted.";
pub const NOTHING_FOUND: &str = "Nothing found for the provided arguments.";

pub fn suggestion_not_found(id: u64) -> String {
    format!("No suggestion found for id {id}.")
}

pub fn not_interesting(id: u64) -> String {
    format!("No posts found for id {id} among interesting posts.")
}

pub fn published(report: &str) -> String {
    format!("Done. Subscribers: {report}.")
}

pub fn interesting_list_header(tags: &[String]) -> String {
    format!("Here are the favorite posts matching your tag search:\n_{}_", tags.join(" | "))
}

pub fn interesting_list_line(id: u64, link: &str, note: &str) -> String {
    let short: String = link.chars().take(45).collect();
    let ellipsis = if link.chars().count() > 45 { "..." } else { "" };
    let note: String = note.chars().take(15).collect();
    format!("`.evoke {id}` - [{short}{ellipsis}]({link}) {note}")
}

pub fn publication_stats(publication: Option<&Publication>) -> String {
    match publication {
        None => "This post has never been published.".to_string(),
        Some(p) if p.times > 1 => format!(
            "This post has been sent *{} times*, first of which on *{}* and last time on *{}*.",
            p.times, p.first_time, p.last_time
        ),
        Some(p) => format!("This post has been sent *{} time* on *{}*.", p.times, p.first_time),
    }
}

// Subscriptions
pub const MAIN_MENU_INTRO: &str = "Use the options below to explore the categories or use \"Custom ✏️\" to write \
your own.\nUse \"My subscriptions\" to list them all.\n☑️ = subscribed | ✏️ = Manual insertion";
pub const CATEGORY_INTRO: &str =
    "Select the topic you are interested in.\nUse Custom ✏️ to insert your own topics.";
pub const MYSUBS_INTRO: &str = "Here are all the topics you are subscribed to.\nSelect one of them to unsubscribe.";
pub const NO_SUBSCRIPTIONS: &str = "You are not subscribed to any topic yet.";
pub const ASK_CUSTOM_TOPICS: &str = "Send me a category name which you want to subscribe to.\nUse commas (,) to \
subscribe to multiple categories.\nEach category with length _greater than 15 characters_ will be discarded.\n\
_Please note you will be_ *unsubscribed* _from already subscribed inserted categories._";
pub const NO_VALID_TOPICS: &str = "No valid topics inserted. Action cancelled.";
pub const CONFIRM_UNSUBSCRIBE_ALL: &str = "Are you sure you want to unsubscribe from all categories?";
pub const UNSUBSCRIBED_ALL: &str = "Done, you are subscribed to no categories now.";
pub const PENDING_POSTS: &str =
    "You have pending posts. To unsubscribe, use `.subscribe` and then open \"My subscriptions\".";
pub const NO_SUBSCRIBED_USERS: &str = "No subscribed users at the moment.";
pub const SETFORMATTED_USAGE: &str = "Usage: `.setformatted <name|id> <label>`";

pub fn greeting_subscribe(user: &str) -> String {
    format!("Hi, {user}.\n{MAIN_MENU_INTRO}")
}

pub fn unknown_menu(key: &str) -> String {
    format!("There is no menu called `{key}`.")
}

pub fn custom_subscription_done(names: &[String]) -> String {
    format!(
        "Custom subscription for _{}_ done.\nPlease note that if you were already subscribed to one of those topics, \
you just got unsubscribed from that.\nThank _you_! 😊",
        names.join(", ")
    )
}

pub fn topic_label_set(key: &str, label: &str) -> String {
    format!("{key} formatted name got set/updated successfully to _{label}_.")
}

pub fn topic_not_found(key: &str) -> String {
    format!("No topic called `{key}`.")
}

pub fn stats(rows: &[(String, usize)]) -> String {
    let width = rows.iter().map(|(name, _)| name.chars().count()).max().unwrap_or(4).max(4);
    let mut text = format!("Here the statistics:\n```\n{:<width$} | QT\n{}\n", "NAME", "-".repeat(width + 5));
    for (name, count) in rows {
        text.push_str(&format!("{name:<width$} | {count}\n"));
    }
    let total: usize = rows.iter().map(|(_, c)| c).sum();
    text.push_str(&format!(
        "```\nTotal: {} categories subscribed;\nTotal subscriptions: {}.",
        rows.len(),
        total
    ));
    text
}

// Feedback
pub const RATE_PROMPT: &str = "How would you rate the community and its posts? [1-10]";
pub const INVALID_VOTE: &str = "Please, choose a number between 1 and 10.";
pub const FEEDBACK_EDIT_PROMPT: &str = "It seems you already left us a feedback. Do you want to edit it?";
pub const FEEDBACK_CANCELLED: &str = "*Feedback creation has been cancelled.*";
pub const FEEDBACK_DETAILS_PROMPT: &str = "You can leave us a more detailed feedback, that includes such your \
favorite topics, when and how you discovered the community, or you can Skip.";
pub const FEEDBACK_THANKS: &str = "Great! Thank you for your feedback! We may contact you for more details. 😉";
pub const ADMIN_FEEDBACK_REFUSED: &str = "Admins cannot register feedbacks. To allow it, set \
`feedback.allow_admin` to *true* in the configuration (suggested for testing only).";

pub fn hello(user: &str) -> String {
    format!("Hi {user}.")
}

pub fn vote_chosen(vote: u8) -> String {
    format!("You chose: *{vote}*")
}

pub fn staff_feedback(user: &str, vote: u8, message: &str, registered: bool) -> String {
    let mut text = format!("{user} released a #feedback of *{vote}/10*");
    if !message.is_empty() {
        text.push_str(&format!("\n*Message*: {message}"));
    }
    if !registered {
        text.push_str("\n[ *not registered* ]");
    }
    text
}

// Admin
pub const ADMIN_COMMANDS: &str = "Here's the list of commands for admins:\n\
`.ban <user>` _Ban a user_\n\
`.unban <user>` _Unban a user_\n\
`.bansite <site>` _Ban permanently a resource_\n\
`.getuser <user>` _Shows what the bot knows about a user_\n\
`.list #hashtag [#hashtag ...]` _Interesting posts by topic_\n\
`.evoke <id>` _Shows one suggestion with its publication history_\n\
`.stats` _Subscriptions statistics_\n\
`.setformatted <name|id> <label>` _Sets the label shown for a topic_\n\
`.admins` _This list_";
pub const CANNOT_BAN_ADMIN: &str = "Admins cannot be banned.";

pub fn user_banned(user: &str) -> String {
    format!("{user} has been banned.")
}

pub fn user_unbanned(user: &str) -> String {
    format!("{user} has been unbanned.")
}

pub fn site_banned(domain: &str) -> String {
    format!("{domain} has been banned!")
}

pub fn invalid_site(site: &str) -> String {
    format!("`{site}` is not a valid site.")
}

// Misc
pub const WELCOME: &str = "Hi, I am the community bot. You can send me the following commands:\n\
• `.send` Share a resource with the community\n\
• `.feedback` Leave us a feedback\n\
• `.subscribe` Subscribe to your favourite topics and get updated when new posts are available\n\
I will lead you in every function. Happy tech!";
pub const FAQ: &str = "We wrote our FAQs here: https://telegra.ph/Syras-Techbinder-FAQs-05-20-2";

pub fn user_data(user: &str, topics: &[String], backlog: usize, feedback: Option<&str>, banned: bool) -> String {
    let topics = if topics.is_empty() {
        "none".to_string()
    } else {
        topics.join(", ")
    };
    let mut text = format!(
        "Here's what we know about {user}:\n• Subscriptions: {topics}\n• Pending posts: {backlog}\n• Feedback: {}",
        feedback.unwrap_or("none")
    );
    if banned {
        text.push_str("\n• Banned");
    }
    text
}
