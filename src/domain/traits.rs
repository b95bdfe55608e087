//! # Domain Traits
//!
//! Narrow contracts the core consumes from its collaborators: the outbound channel
//! client (Matrix in production) and the persistence store.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::domain::error::{DeliveryError, StorageError};
use crate::domain::types::{
    BacklogEntry, Category, ChannelRef, Feedback, MessageRef, Publication, SendOptions, Subscriber,
    Suggestion, Topic, TopicId, UserId,
};

/// Abstract interface for the outbound side of the chat platform.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Send a message. `target` is either a channel id or a user id (direct message).
    async fn send(&self, target: &str, content: &str, options: &SendOptions) -> Result<MessageRef, DeliveryError>;

    /// Replace the content of a previously sent message.
    async fn edit(&self, message: &MessageRef, content: &str, options: &SendOptions) -> Result<(), DeliveryError>;

    /// Forward an existing channel message to a target.
    async fn forward(&self, target: &str, source: &MessageRef) -> Result<MessageRef, DeliveryError>;

    /// Tell the platform an interaction has been received.
    async fn acknowledge(&self, action: &MessageRef) -> Result<(), DeliveryError>;

    /// Whether `user` currently belongs to `channel`.
    async fn is_member(&self, channel: &ChannelRef, user: &UserId) -> Result<bool, DeliveryError>;
}

/// Persistence contract. Implementations must make `evict_subscriber` atomic.
#[async_trait]
pub trait Store: Send + Sync {
    // Subscriptions
    async fn topics_for_user(&self, user: &UserId) -> Result<BTreeSet<TopicId>, StorageError>;
    async fn subscriber(&self, user: &UserId) -> Result<Option<Subscriber>, StorageError>;
    async fn add_subscription(&self, user: &UserId, topic: TopicId) -> Result<(), StorageError>;
    /// Removes one subscription; the subscriber record goes away with its last topic.
    async fn remove_subscription(&self, user: &UserId, topic: TopicId) -> Result<(), StorageError>;
    async fn is_subscribed(&self, user: &UserId, topic: TopicId) -> Result<bool, StorageError>;
    /// Subscribers of any of the named topics, each listed once.
    async fn subscribers_for_topics(&self, names: &[String]) -> Result<Vec<Subscriber>, StorageError>;
    async fn set_menu_tag(&self, user: &UserId, tag: &str) -> Result<(), StorageError>;
    async fn menu_tag(&self, user: &UserId) -> Result<Option<String>, StorageError>;
    /// Drops every subscription and the subscriber record, keeping the backlog.
    async fn unsubscribe_all(&self, user: &UserId) -> Result<(), StorageError>;

    // Backlog
    async fn enqueue_backlog(&self, entry: BacklogEntry) -> Result<(), StorageError>;
    /// Backlog of a user in enqueue order.
    async fn list_backlog(&self, user: &UserId) -> Result<Vec<BacklogEntry>, StorageError>;
    async fn remove_backlog_entry(&self, entry: &BacklogEntry) -> Result<(), StorageError>;
    /// Clears subscriptions, backlog and the subscriber record together.
    async fn evict_subscriber(&self, user: &UserId) -> Result<(), StorageError>;

    // Topic catalog
    async fn topics(&self) -> Result<Vec<Topic>, StorageError>;
    async fn topic(&self, id: TopicId) -> Result<Option<Topic>, StorageError>;
    async fn topic_by_name(&self, name: &str) -> Result<Option<Topic>, StorageError>;
    /// Returns the topic with this name, creating it if needed.
    async fn ensure_topic(&self, name: &str) -> Result<Topic, StorageError>;
    /// Sets the display label of a topic addressed by id or name. Returns false if no such topic.
    async fn set_topic_label(&self, key: &str, label: &str) -> Result<bool, StorageError>;
    async fn categories(&self) -> Result<Vec<Category>, StorageError>;
    /// Subscriber count per subscribed topic.
    async fn topic_stats(&self) -> Result<Vec<(Topic, usize)>, StorageError>;

    // Moderation
    async fn is_user_banned(&self, user: &UserId) -> Result<bool, StorageError>;
    async fn ban_user(&self, user: &UserId) -> Result<(), StorageError>;
    async fn unban_user(&self, user: &UserId) -> Result<(), StorageError>;
    async fn is_site_banned(&self, domain: &str) -> Result<bool, StorageError>;
    async fn ban_site(&self, domain: &str) -> Result<(), StorageError>;

    // Suggestions
    /// Stores a suggestion (assigning its id) and registers its tags as topics.
    async fn add_suggestion(&self, suggestion: Suggestion) -> Result<u64, StorageError>;
    async fn suggestion(&self, id: u64) -> Result<Option<Suggestion>, StorageError>;
    async fn suggestion_by_link(&self, link: &str) -> Result<Option<Suggestion>, StorageError>;
    /// Remembers the staff room post of a suggestion. Returns false if no such suggestion.
    async fn set_staff_message(&self, id: u64, message: MessageRef) -> Result<bool, StorageError>;
    async fn set_interesting(&self, id: u64, interesting: bool) -> Result<bool, StorageError>;
    /// Interesting suggestions tagged with any of the named topics.
    async fn interesting_by_topics(&self, names: &[String]) -> Result<Vec<Suggestion>, StorageError>;
    async fn record_publication(&self, link: &str) -> Result<Publication, StorageError>;
    async fn publication(&self, link: &str) -> Result<Option<Publication>, StorageError>;

    // Feedback
    async fn feedback(&self, user: &UserId) -> Result<Option<Feedback>, StorageError>;
    async fn write_feedback(&self, feedback: Feedback) -> Result<(), StorageError>;
}
