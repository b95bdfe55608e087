//! # Fan-out Engine
//!
//! Forwards one channel message to many subscribers concurrently (bounded by the
//! worker limit), keeps a durable per-subscriber backlog of failed deliveries, flushes
//! that backlog in enqueue order on the next successful contact, and evicts
//! subscribers whose backlog grows past the configured cap.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::application::audit::AuditLog;
use crate::application::lanes::KeyedLocks;
use crate::domain::error::StorageError;
use crate::domain::traits::{ChannelClient, Store};
use crate::domain::types::{BacklogEntry, MessageRef, Subscriber, UserId};

/// What to do with a backlog entry whose single flush attempt fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushFailure {
    /// Remove the entry; it is never retried.
    #[default]
    Drop,
    /// Stop flushing and keep the entry (and everything after it) for the next contact.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Eviction threshold: a subscriber whose backlog exceeds this is evicted.
    pub max_backlog: usize,
    /// Maximum concurrent deliveries.
    pub workers: usize,
    pub flush_failure: FlushFailure,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_BACKLOG: usize = 10;
    pub const DEFAULT_WORKERS: usize = 8;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backlog: Self::DEFAULT_MAX_BACKLOG,
            workers: Self::DEFAULT_WORKERS,
            flush_failure: FlushFailure::Drop,
        }
    }
}

/// Result of flushing one subscriber's backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub dropped: usize,
    pub kept: usize,
}

/// Outcome of delivering to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered(FlushReport),
    /// Delivery failed; the message was queued. `backlog` is the new backlog length.
    Backlogged { backlog: usize },
    /// Delivery failed and the backlog passed the cap; the subscriber is gone.
    Evicted { backlog: usize },
    /// Delivery failed and the backlog could not be updated.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub outcomes: Vec<(UserId, Delivery)>,
}

impl FanoutReport {
    pub fn delivered(&self) -> usize {
        self.count(|d| matches!(d, Delivery::Delivered(_)))
    }

    pub fn backlogged(&self) -> usize {
        self.count(|d| matches!(d, Delivery::Backlogged { .. }))
    }

    pub fn evicted(&self) -> usize {
        self.count(|d| matches!(d, Delivery::Evicted { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|d| matches!(d, Delivery::Failed(_)))
    }

    pub fn outcome(&self, user: &UserId) -> Option<&Delivery> {
        self.outcomes.iter().find(|(u, _)| u == user).map(|(_, d)| d)
    }

    fn count(&self, pred: impl Fn(&Delivery) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, d)| pred(d)).count()
    }
}

impl fmt::Display for FanoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} delivered, {} queued, {} evicted, {} failed",
            self.delivered(),
            self.backlogged(),
            self.evicted(),
            self.failed()
        )
    }
}

pub struct FanoutEngine {
    channel: Arc<dyn ChannelClient>,
    store: Arc<dyn Store>,
    policy: RetryPolicy,
    lanes: KeyedLocks<UserId>,
    audit: AuditLog,
}

impl FanoutEngine {
    pub fn new(channel: Arc<dyn ChannelClient>, store: Arc<dyn Store>, policy: RetryPolicy, audit: AuditLog) -> Self {
        Self {
            channel,
            store,
            policy,
            lanes: KeyedLocks::new(),
            audit,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Forgets per-subscriber lanes that are no longer in use.
    pub fn prune_lanes(&self) -> usize {
        self.lanes.prune()
    }

    /// Resolves the subscribers of `topics` and broadcasts `message` to them.
    pub async fn publish(&self, message: &MessageRef, topics: &[String]) -> Result<FanoutReport, StorageError> {
        let subscribers = self.store.subscribers_for_topics(topics).await?;
        tracing::info!(
            topics = ?topics,
            subscribers = subscribers.len(),
            "Publishing {} to subscribers",
            message.message_id
        );
        Ok(self.broadcast(message, subscribers).await)
    }

    /// Delivers `message` to every subscriber. One subscriber's outcome never affects another's.
    pub async fn broadcast(&self, message: &MessageRef, subscribers: Vec<Subscriber>) -> FanoutReport {
        let mut seen = HashSet::new();
        let users: Vec<UserId> = subscribers
            .into_iter()
            .map(|s| s.user)
            .filter(|u| seen.insert(u.clone()))
            .collect();

        let outcomes: Vec<(UserId, Delivery)> = stream::iter(users.into_iter().map(|user| async move {
            let outcome = self.deliver(&user, message).await;
            (user, outcome)
        }))
        .buffer_unordered(self.policy.workers.max(1))
        .collect()
        .await;

        let report = FanoutReport { outcomes };
        tracing::info!("Fan-out of {} finished: {}", message.message_id, report);
        report
    }

    /// Flushes a subscriber's backlog without a new message (e.g. when they come back).
    pub async fn replay_backlog(&self, user: &UserId) -> Result<FlushReport, StorageError> {
        let _lane = self.lanes.lock(user).await;
        self.flush(user).await
    }

    async fn deliver(&self, user: &UserId, message: &MessageRef) -> Delivery {
        let _lane = self.lanes.lock(user).await;

        match self.channel.forward(user.as_str(), message).await {
            Ok(_) => match self.flush(user).await {
                Ok(report) => Delivery::Delivered(report),
                Err(e) => {
                    tracing::error!(user = %user, "Backlog flush aborted: {}", e);
                    Delivery::Delivered(FlushReport::default())
                }
            },
            Err(e) => {
                tracing::warn!(user = %user, "Delivery of {} failed: {}", message.message_id, e);
                match self.queue(user, message).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(user = %user, "Failed to record backlog entry: {}", e);
                        Delivery::Failed(e.to_string())
                    }
                }
            }
        }
    }

    async fn queue(&self, user: &UserId, message: &MessageRef) -> Result<Delivery, StorageError> {
        self.store
            .enqueue_backlog(BacklogEntry::new(user.clone(), message.clone()))
            .await?;
        let backlog = self.store.list_backlog(user).await?.len();

        if backlog > self.policy.max_backlog {
            self.store.evict_subscriber(user).await?;
            tracing::warn!(user = %user, backlog, "Evicted unreachable subscriber");
            self.audit
                .record(format!("Evicted {} after {} undelivered messages", user, backlog));
            return Ok(Delivery::Evicted { backlog });
        }
        Ok(Delivery::Backlogged { backlog })
    }

    /// Each entry gets exactly one attempt, in enqueue order. Caller holds the user's lane.
    async fn flush(&self, user: &UserId) -> Result<FlushReport, StorageError> {
        let entries = self.store.list_backlog(user).await?;
        let mut report = FlushReport::default();

        for (i, entry) in entries.iter().enumerate() {
            match self.channel.forward(user.as_str(), &entry.message).await {
                Ok(_) => {
                    self.store.remove_backlog_entry(entry).await?;
                    report.flushed += 1;
                }
                Err(e) => match self.policy.flush_failure {
                    FlushFailure::Drop => {
                        tracing::warn!(user = %user, "Dropping backlog entry {}: {}", entry.message.message_id, e);
                        self.store.remove_backlog_entry(entry).await?;
                        report.dropped += 1;
                    }
                    FlushFailure::Keep => {
                        tracing::warn!(user = %user, "Backlog flush stopped at {}: {}", entry.message.message_id, e);
                        report.kept = entries.len() - i;
                        break;
                    }
                },
            }
        }

        if report.flushed + report.dropped > 0 {
            tracing::info!(
                user = %user,
                flushed = report.flushed,
                dropped = report.dropped,
                "Flushed backlog"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::RecordingChannel;
    use crate::domain::types::ChannelRef;
    use crate::infrastructure::store::MemoryStore;
    use std::time::Duration;

    fn post(id: &str) -> MessageRef {
        MessageRef::new(ChannelRef::new("!news:x"), id).with_body(format!("post {id}"))
    }

    fn engine(channel: &Arc<RecordingChannel>, store: &Arc<MemoryStore>, policy: RetryPolicy) -> FanoutEngine {
        FanoutEngine::new(channel.clone(), store.clone(), policy, AuditLog::disabled())
    }

    async fn subscribe(store: &MemoryStore, user: &str) -> Subscriber {
        let user = UserId::from(user);
        let topic = store.ensure_topic("rust").await.unwrap();
        store.add_subscription(&user, topic.id).await.unwrap();
        store.subscriber(&user).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_failure_of_one_subscriber_backlogs_only_that_subscriber() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let a = subscribe(&store, "@a:x").await;
        let b = subscribe(&store, "@b:x").await;
        channel.set_unreachable("@b:x");

        let report = engine(&channel, &store, RetryPolicy::default())
            .broadcast(&post("$1"), vec![a.clone(), b.clone()])
            .await;

        assert_eq!(report.delivered(), 1);
        assert_eq!(report.backlogged(), 1);
        assert_eq!(report.outcome(&b.user), Some(&Delivery::Backlogged { backlog: 1 }));
        assert_eq!(channel.forwards_to("@a:x").len(), 1);

        let backlog = store.list_backlog(&b.user).await.unwrap();
        assert_eq!(backlog.len(), 1);
        assert!(backlog[0].message.same_message(&post("$1")));
        assert!(store.list_backlog(&a.user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lanes_are_pruned_after_delivery() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let a = subscribe(&store, "@a:x").await;
        let b = subscribe(&store, "@b:x").await;
        channel.set_unreachable("@b:x");

        let engine = engine(&channel, &store, RetryPolicy::default());
        engine.broadcast(&post("$1"), vec![a, b]).await;
        assert_eq!(engine.prune_lanes(), 2);
        assert_eq!(engine.prune_lanes(), 0);
    }

    #[tokio::test]
    async fn test_backlog_over_cap_evicts_subscriber() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let b = subscribe(&store, "@b:x").await;
        for i in 0..10 {
            store
                .enqueue_backlog(BacklogEntry::new(b.user.clone(), post(&format!("$old{i}"))))
                .await
                .unwrap();
        }
        channel.set_unreachable("@b:x");

        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("audit.log"));
        let engine = FanoutEngine::new(channel.clone(), store.clone(), RetryPolicy::default(), audit);
        let report = engine.broadcast(&post("$new"), vec![b.clone()]).await;

        assert_eq!(report.outcome(&b.user), Some(&Delivery::Evicted { backlog: 11 }));
        assert!(store.topics_for_user(&b.user).await.unwrap().is_empty());
        assert!(store.list_backlog(&b.user).await.unwrap().is_empty());
        assert!(store.subscriber(&b.user).await.unwrap().is_none());

        let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert!(audit.contains("Evicted @b:x"));
    }

    #[tokio::test]
    async fn test_backlog_at_cap_is_kept() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let b = subscribe(&store, "@b:x").await;
        for i in 0..9 {
            store
                .enqueue_backlog(BacklogEntry::new(b.user.clone(), post(&format!("$old{i}"))))
                .await
                .unwrap();
        }
        channel.set_unreachable("@b:x");

        let report = engine(&channel, &store, RetryPolicy::default())
            .broadcast(&post("$new"), vec![b.clone()])
            .await;
        assert_eq!(report.outcome(&b.user), Some(&Delivery::Backlogged { backlog: 10 }));
        assert_eq!(store.topics_for_user(&b.user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_successful_delivery_flushes_backlog_in_order() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let b = subscribe(&store, "@b:x").await;
        for id in ["$q1", "$q2", "$q3"] {
            store
                .enqueue_backlog(BacklogEntry::new(b.user.clone(), post(id)))
                .await
                .unwrap();
        }

        let report = engine(&channel, &store, RetryPolicy::default())
            .broadcast(&post("$new"), vec![b.clone()])
            .await;

        assert_eq!(
            report.outcome(&b.user),
            Some(&Delivery::Delivered(FlushReport {
                flushed: 3,
                dropped: 0,
                kept: 0
            }))
        );
        let ids: Vec<String> = channel
            .forwards_to("@b:x")
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec!["$new", "$q1", "$q2", "$q3"]);
        assert!(store.list_backlog(&b.user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_drop_removes_entry() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let b = subscribe(&store, "@b:x").await;
        for id in ["$q1", "$q2", "$q3"] {
            store
                .enqueue_backlog(BacklogEntry::new(b.user.clone(), post(id)))
                .await
                .unwrap();
        }
        channel.fail_message("$q2");

        let report = engine(&channel, &store, RetryPolicy::default())
            .broadcast(&post("$new"), vec![b.clone()])
            .await;

        assert_eq!(
            report.outcome(&b.user),
            Some(&Delivery::Delivered(FlushReport {
                flushed: 2,
                dropped: 1,
                kept: 0
            }))
        );
        assert!(store.list_backlog(&b.user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_keep_stops_and_keeps_rest() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let b = subscribe(&store, "@b:x").await;
        for id in ["$q1", "$q2", "$q3"] {
            store
                .enqueue_backlog(BacklogEntry::new(b.user.clone(), post(id)))
                .await
                .unwrap();
        }
        channel.fail_message("$q2");
        let policy = RetryPolicy {
            flush_failure: FlushFailure::Keep,
            ..RetryPolicy::default()
        };

        let report = engine(&channel, &store, policy)
            .broadcast(&post("$new"), vec![b.clone()])
            .await;

        assert_eq!(
            report.outcome(&b.user),
            Some(&Delivery::Delivered(FlushReport {
                flushed: 1,
                dropped: 0,
                kept: 2
            }))
        );
        let left: Vec<String> = store
            .list_backlog(&b.user)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message.message_id)
            .collect();
        assert_eq!(left, vec!["$q2", "$q3"]);
    }

    #[tokio::test]
    async fn test_worker_bound_limits_concurrency() {
        let channel = Arc::new(RecordingChannel::new().with_latency(Duration::from_millis(20)));
        let store = Arc::new(MemoryStore::new());
        let mut subscribers = Vec::new();
        for i in 0..6 {
            subscribers.push(subscribe(&store, &format!("@u{i}:x")).await);
        }
        let policy = RetryPolicy {
            workers: 2,
            ..RetryPolicy::default()
        };

        let report = engine(&channel, &store, policy).broadcast(&post("$1"), subscribers).await;
        assert_eq!(report.delivered(), 6);
        assert!(channel.max_in_flight() <= 2);
        assert!(channel.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_publish_resolves_subscribers_by_topic() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        subscribe(&store, "@a:x").await;
        let web = store.ensure_topic("webdev").await.unwrap();
        store.add_subscription(&UserId::from("@c:x"), web.id).await.unwrap();

        let report = engine(&channel, &store, RetryPolicy::default())
            .publish(&post("$1"), &["rust".to_string()])
            .await
            .unwrap();
        assert_eq!(report.delivered(), 1);
        assert!(channel.forwards_to("@c:x").is_empty());
    }

    #[tokio::test]
    async fn test_replay_backlog() {
        let channel = Arc::new(RecordingChannel::new());
        let store = Arc::new(MemoryStore::new());
        let user = UserId::from("@b:x");
        store
            .enqueue_backlog(BacklogEntry::new(user.clone(), post("$q1")))
            .await
            .unwrap();

        let report = engine(&channel, &store, RetryPolicy::default())
            .replay_backlog(&user)
            .await
            .unwrap();
        assert_eq!(report.flushed, 1);
        assert_eq!(channel.forwards_to("@b:x").len(), 1);
    }
}
