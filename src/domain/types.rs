//! # Domain Types
//!
//! Data structures shared by the session engine, the dispatcher, the fan-out engine
//! and the feature commands. Inbound events are immutable once produced.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::DispatchError;

/// Opaque, stable identifier of a platform account (a Matrix user id such as `@alice:example.org`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub type TopicId = u32;

/// A room/channel on the platform (Matrix room id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRef(String);

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a message that lives in a channel.
///
/// `body` is a snapshot of the text, kept so that transports without a native
/// forward primitive can still re-post the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelRef,
    pub message_id: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl MessageRef {
    pub fn new(channel: ChannelRef, message_id: impl Into<String>) -> Self {
        Self {
            channel,
            message_id: message_id.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Two references point at the same message regardless of the cached body.
    pub fn same_message(&self, other: &MessageRef) -> bool {
        self.channel == other.channel && self.message_id == other.message_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Hashtag,
    Url,
}

/// A marked span inside a text message. Offsets are byte offsets into the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl Entity {
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.offset..self.offset + self.length).unwrap_or("")
    }
}

/// Closed set of action namespaces. Actions inside a namespace are registered at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Common,
    Send,
    Subs,
    Feedback,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Common,
        Namespace::Send,
        Namespace::Subs,
        Namespace::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Common => "common",
            Namespace::Send => "send",
            Namespace::Subs => "subs",
            Namespace::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DispatchError::UnknownNamespace(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEvent {
    pub user: UserId,
    pub text: String,
    pub entities: Vec<Entity>,
    /// Where the message was posted, when the transport knows it.
    pub origin: Option<MessageRef>,
}

impl TextEvent {
    pub fn new(user: UserId, text: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self {
            user,
            text: text.into(),
            entities,
            origin: None,
        }
    }

    pub fn first_entity(&self, kind: EntityKind) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.slice(&self.text))
    }
}

/// An explicit button/callback press: `(namespace, action, payload?)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvent {
    /// Platform identifier of the interaction, used for acknowledgement.
    pub id: String,
    pub user: UserId,
    pub namespace: Namespace,
    pub action: String,
    pub payload: Option<String>,
    pub origin: Option<MessageRef>,
}

/// Callback payload as carried by inline buttons: `{"src": .., "cmd": .., "content": ..}`.
#[derive(Debug, Deserialize)]
struct CallbackData {
    src: String,
    cmd: String,
    #[serde(default)]
    content: Option<serde_json::Value>,
}

impl ActionEvent {
    /// Parses the typed form `!<namespace> <action> [payload]`.
    pub fn parse_command(id: impl Into<String>, user: UserId, text: &str) -> Result<Self, DispatchError> {
        let body = text
            .trim()
            .strip_prefix(crate::strings::menu::ACTION_PREFIX)
            .ok_or_else(|| DispatchError::Malformed(text.to_string()))?;
        let mut parts = body.splitn(3, char::is_whitespace);
        let namespace: Namespace = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DispatchError::Malformed(text.to_string()))?
            .parse()?;
        let action = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DispatchError::Malformed(text.to_string()))?
            .to_ascii_lowercase();
        let payload = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        Ok(Self {
            id: id.into(),
            user,
            namespace,
            action,
            payload,
            origin: None,
        })
    }

    /// Parses a JSON callback payload.
    pub fn from_callback(id: impl Into<String>, user: UserId, data: &str) -> Result<Self, DispatchError> {
        let data: CallbackData =
            serde_json::from_str(data).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        let payload = match data.content {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        Ok(Self {
            id: id.into(),
            user,
            namespace: data.src.parse()?,
            action: data.cmd.to_ascii_lowercase(),
            payload,
            origin: None,
        })
    }

    pub fn with_origin(mut self, origin: MessageRef) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Normalized inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Text(TextEvent),
    Action(ActionEvent),
}

impl Event {
    /// Builds a synthetic text event, used to replay a dialog without real user input.
    pub fn synthetic(user: UserId, text: impl Into<String>) -> Self {
        Event::Text(TextEvent::new(user, text, Vec::new()))
    }

    pub fn user(&self) -> &UserId {
        match self {
            Event::Text(t) => &t.user,
            Event::Action(a) => &a.user,
        }
    }

    /// Free text of a text event, or the payload of an action.
    pub fn text(&self) -> Option<&str> {
        match self {
            Event::Text(t) => Some(t.text.as_str()),
            Event::Action(a) => a.payload.as_deref(),
        }
    }

    pub fn as_text(&self) -> Option<&TextEvent> {
        match self {
            Event::Text(t) => Some(t),
            Event::Action(_) => None,
        }
    }

    pub fn as_action(&self) -> Option<&ActionEvent> {
        match self {
            Event::Action(a) => Some(a),
            Event::Text(_) => None,
        }
    }

    pub fn origin(&self) -> Option<&MessageRef> {
        match self {
            Event::Text(t) => t.origin.as_ref(),
            Event::Action(a) => a.origin.as_ref(),
        }
    }
}

/// Last menu a subscriber was looking at (`first`, `mysubs`, or a category key).
pub const MAIN_MENU: &str = "first";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub user: UserId,
    pub topics: BTreeSet<TopicId>,
    pub menu_tag: String,
    pub joined: NaiveDate,
}

impl Subscriber {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            topics: BTreeSet::new(),
            menu_tag: MAIN_MENU.to_string(),
            joined: Utc::now().date_naive(),
        }
    }
}

/// An undelivered message waiting for its subscriber to become reachable again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub user: UserId,
    pub message: MessageRef,
    pub enqueued_at: DateTime<Utc>,
}

impl BacklogEntry {
    pub fn new(user: UserId, message: MessageRef) -> Self {
        Self {
            user,
            message,
            enqueued_at: Utc::now(),
        }
    }

    /// Identity of a backlog row: one entry per (user, message).
    pub fn same_entry(&self, other: &BacklogEntry) -> bool {
        self.user == other.user && self.message.same_message(&other.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    #[serde(default)]
    pub formatted: Option<String>,
}

impl Topic {
    pub fn label(&self) -> &str {
        self.formatted.as_deref().unwrap_or(&self.name)
    }
}

/// A group of topics shown together in the subscription menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub key: String,
    pub label: String,
    pub topics: Vec<TopicId>,
}

/// A resource suggested by a member and waiting for staff moderation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: u64,
    pub link: String,
    #[serde(default)]
    pub note: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub referencer: Option<UserId>,
    #[serde(default)]
    pub interesting: bool,
    #[serde(default)]
    pub staff_message: Option<MessageRef>,
}

/// How often a link has been published to the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub times: u32,
    pub first_time: NaiveDate,
    pub last_time: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub user: UserId,
    pub date: NaiveDate,
    pub message: String,
}

/// One selectable option offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    pub action: String,
}

/// Rows of options rendered under a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    pub rows: Vec<Vec<MenuButton>>,
}

/// Per-message delivery options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub markdown: bool,
    pub link_preview: bool,
    pub menu: Option<Menu>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            markdown: true,
            link_preview: true,
            menu: None,
        }
    }
}

impl SendOptions {
    pub fn plain() -> Self {
        Self {
            markdown: false,
            ..Self::default()
        }
    }

    pub fn with_menu(menu: Menu) -> Self {
        Self {
            menu: Some(menu),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_action() {
        let ev = ActionEvent::parse_command("$e1", UserId::from("@a:x"), "!subs topic 12:mysubs").unwrap();
        assert_eq!(ev.namespace, Namespace::Subs);
        assert_eq!(ev.action, "topic");
        assert_eq!(ev.payload.as_deref(), Some("12:mysubs"));

        let ev = ActionEvent::parse_command("$e2", UserId::from("@a:x"), "!Common Cancel").unwrap();
        assert_eq!(ev.namespace, Namespace::Common);
        assert_eq!(ev.action, "cancel");
        assert_eq!(ev.payload, None);
    }

    #[test]
    fn test_parse_command_errors() {
        let user = UserId::from("@a:x");
        assert_eq!(
            ActionEvent::parse_command("$e", user.clone(), "!nope go"),
            Err(DispatchError::UnknownNamespace("nope".into()))
        );
        assert!(matches!(
            ActionEvent::parse_command("$e", user.clone(), "!send"),
            Err(DispatchError::Malformed(_))
        ));
        assert!(matches!(
            ActionEvent::parse_command("$e", user, "hello"),
            Err(DispatchError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_callback() {
        let user = UserId::from("@a:x");
        let ev = ActionEvent::from_callback("q1", user.clone(), r#"{"src":"feedback","cmd":"vote","content":7}"#)
            .unwrap();
        assert_eq!(ev.namespace, Namespace::Feedback);
        assert_eq!(ev.payload.as_deref(), Some("7"));

        let ev = ActionEvent::from_callback("q2", user, r#"{"src":"send","cmd":"skip"}"#).unwrap();
        assert_eq!(ev.action, "skip");
        assert_eq!(ev.payload, None);
    }

    #[test]
    fn test_entity_slice_out_of_bounds() {
        let e = Entity {
            kind: EntityKind::Hashtag,
            offset: 3,
            length: 10,
        };
        assert_eq!(e.slice("#ab"), "");
    }
}
