//! # Memory Store
//!
//! `Store` implementation keeping everything in memory behind one mutex, optionally
//! persisted as a JSON snapshot after every mutation. A mutation that cannot be
//! persisted is rolled back, so memory and disk never disagree.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::error::StorageError;
use crate::domain::traits::Store;
use crate::domain::types::{
    BacklogEntry, Category, Feedback, MAIN_MENU, MessageRef, Publication, Subscriber, Suggestion, Topic, TopicId, UserId,
};
use crate::infrastructure::seed;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    subscribers: BTreeMap<UserId, Subscriber>,
    #[serde(default)]
    menu_tags: BTreeMap<UserId, String>,
    #[serde(default)]
    backlog: Vec<BacklogEntry>,
    #[serde(default)]
    topics: Vec<Topic>,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    banned_users: BTreeSet<UserId>,
    #[serde(default)]
    banned_sites: BTreeSet<String>,
    #[serde(default)]
    suggestions: Vec<Suggestion>,
    #[serde(default)]
    next_suggestion_id: u64,
    #[serde(default)]
    publications: BTreeMap<String, Publication>,
    #[serde(default)]
    feedback: BTreeMap<UserId, Feedback>,
}

impl StoreData {
    fn topic_id(&self, name: &str) -> Option<TopicId> {
        self.topics
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.id)
    }

    fn ensure_topic(&mut self, name: &str) -> Topic {
        let name = name.trim().to_lowercase();
        if let Some(topic) = self.topics.iter().find(|t| t.name == name) {
            return topic.clone();
        }
        let id = self.topics.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let topic = Topic {
            id,
            name,
            formatted: None,
        };
        self.topics.push(topic.clone());
        topic
    }

    fn with_menu_tag(&self, mut subscriber: Subscriber) -> Subscriber {
        subscriber.menu_tag = self
            .menu_tags
            .get(&subscriber.user)
            .cloned()
            .unwrap_or_else(|| MAIN_MENU.to_string());
        subscriber
    }
}

pub struct MemoryStore {
    data: Mutex<StoreData>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty, memory-only store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(StoreData::default()),
            path: None,
        }
    }

    /// Memory-only store holding the default topic catalog and banned sites.
    pub fn seeded() -> Self {
        Self {
            data: Mutex::new(seeded_data()),
            path: None,
        }
    }

    /// Loads the snapshot at `path`, or starts from the default catalog when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            tracing::info!("No store at {}, seeding default catalog", path.display());
            seeded_data()
        };
        let store = Self {
            data: Mutex::new(data),
            path: Some(path),
        };
        store.persist(&store.lock())?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> R {
        f(&self.lock())
    }

    fn mutate<R>(&self, operation: &'static str, f: impl FnOnce(&mut StoreData) -> R) -> Result<R, StorageError> {
        let mut data = self.lock();
        if self.path.is_none() {
            return Ok(f(&mut data));
        }

        let backup = data.clone();
        let result = f(&mut data);
        if let Err(e) = self.persist(&data) {
            *data = backup;
            tracing::error!("Store operation `{}` rolled back: {}", operation, e);
            return Err(StorageError::Operation {
                operation,
                reason: e.to_string(),
            });
        }
        Ok(result)
    }

    fn persist(&self, data: &StoreData) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_vec_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn seeded_data() -> StoreData {
    let mut data = StoreData::default();
    for (key, label, topics) in seed::CATEGORIES {
        let mut ids = Vec::new();
        for (name, formatted) in topics.iter() {
            let id = data.ensure_topic(name).id;
            if let Some(topic) = data.topics.iter_mut().find(|t| t.id == id) {
                topic.formatted = Some(formatted.to_string());
            }
            ids.push(id);
        }
        data.categories.push(Category {
            key: key.to_string(),
            label: label.to_string(),
            topics: ids,
        });
    }
    data.banned_sites = seed::BANNED_SITES.iter().map(|s| s.to_string()).collect();
    data
}

#[async_trait]
impl Store for MemoryStore {
    async fn topics_for_user(&self, user: &UserId) -> Result<BTreeSet<TopicId>, StorageError> {
        Ok(self.read(|d| d.subscribers.get(user).map(|s| s.topics.clone()).unwrap_or_default()))
    }

    async fn subscriber(&self, user: &UserId) -> Result<Option<Subscriber>, StorageError> {
        Ok(self.read(|d| d.subscribers.get(user).cloned().map(|s| d.with_menu_tag(s))))
    }

    async fn add_subscription(&self, user: &UserId, topic: TopicId) -> Result<(), StorageError> {
        self.mutate("add_subscription", |d| {
            d.subscribers
                .entry(user.clone())
                .or_insert_with(|| Subscriber::new(user.clone()))
                .topics
                .insert(topic);
        })
    }

    async fn remove_subscription(&self, user: &UserId, topic: TopicId) -> Result<(), StorageError> {
        self.mutate("remove_subscription", |d| {
            if let Some(subscriber) = d.subscribers.get_mut(user) {
                subscriber.topics.remove(&topic);
                if subscriber.topics.is_empty() {
                    d.subscribers.remove(user);
                }
            }
        })
    }

    async fn is_subscribed(&self, user: &UserId, topic: TopicId) -> Result<bool, StorageError> {
        Ok(self.read(|d| d.subscribers.get(user).is_some_and(|s| s.topics.contains(&topic))))
    }

    async fn subscribers_for_topics(&self, names: &[String]) -> Result<Vec<Subscriber>, StorageError> {
        Ok(self.read(|d| {
            let ids: BTreeSet<TopicId> = names.iter().filter_map(|n| d.topic_id(n)).collect();
            d.subscribers
                .values()
                .filter(|s| !s.topics.is_disjoint(&ids))
                .cloned()
                .map(|s| d.with_menu_tag(s))
                .collect()
        }))
    }

    async fn set_menu_tag(&self, user: &UserId, tag: &str) -> Result<(), StorageError> {
        self.mutate("set_menu_tag", |d| {
            d.menu_tags.insert(user.clone(), tag.to_string());
        })
    }

    async fn menu_tag(&self, user: &UserId) -> Result<Option<String>, StorageError> {
        Ok(self.read(|d| d.menu_tags.get(user).cloned()))
    }

    async fn unsubscribe_all(&self, user: &UserId) -> Result<(), StorageError> {
        self.mutate("unsubscribe_all", |d| {
            d.subscribers.remove(user);
            d.menu_tags.remove(user);
        })
    }

    async fn enqueue_backlog(&self, entry: BacklogEntry) -> Result<(), StorageError> {
        self.mutate("enqueue_backlog", |d| {
            if !d.backlog.iter().any(|e| e.same_entry(&entry)) {
                d.backlog.push(entry);
            }
        })
    }

    async fn list_backlog(&self, user: &UserId) -> Result<Vec<BacklogEntry>, StorageError> {
        Ok(self.read(|d| d.backlog.iter().filter(|e| &e.user == user).cloned().collect()))
    }

    async fn remove_backlog_entry(&self, entry: &BacklogEntry) -> Result<(), StorageError> {
        self.mutate("remove_backlog_entry", |d| d.backlog.retain(|e| !e.same_entry(entry)))
    }

    async fn evict_subscriber(&self, user: &UserId) -> Result<(), StorageError> {
        self.mutate("evict_subscriber", |d| {
            d.subscribers.remove(user);
            d.menu_tags.remove(user);
            d.backlog.retain(|e| &e.user != user);
        })
    }

    async fn topics(&self) -> Result<Vec<Topic>, StorageError> {
        Ok(self.read(|d| d.topics.clone()))
    }

    async fn topic(&self, id: TopicId) -> Result<Option<Topic>, StorageError> {
        Ok(self.read(|d| d.topics.iter().find(|t| t.id == id).cloned()))
    }

    async fn topic_by_name(&self, name: &str) -> Result<Option<Topic>, StorageError> {
        Ok(self.read(|d| {
            d.topics
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
                .cloned()
        }))
    }

    async fn ensure_topic(&self, name: &str) -> Result<Topic, StorageError> {
        if name.trim().is_empty() {
            return Err(StorageError::Operation {
                operation: "ensure_topic",
                reason: "empty topic name".into(),
            });
        }
        self.mutate("ensure_topic", |d| d.ensure_topic(name))
    }

    async fn set_topic_label(&self, key: &str, label: &str) -> Result<bool, StorageError> {
        self.mutate("set_topic_label", |d| {
            let by_id = key.parse::<TopicId>().ok();
            let topic = d
                .topics
                .iter_mut()
                .find(|t| Some(t.id) == by_id || t.name.eq_ignore_ascii_case(key));
            match topic {
                Some(topic) => {
                    topic.formatted = Some(label.to_string());
                    true
                }
                None => false,
            }
        })
    }

    async fn categories(&self) -> Result<Vec<Category>, StorageError> {
        Ok(self.read(|d| d.categories.clone()))
    }

    async fn topic_stats(&self) -> Result<Vec<(Topic, usize)>, StorageError> {
        Ok(self.read(|d| {
            let mut stats: Vec<(Topic, usize)> = d
                .topics
                .iter()
                .map(|t| {
                    let count = d.subscribers.values().filter(|s| s.topics.contains(&t.id)).count();
                    (t.clone(), count)
                })
                .filter(|(_, count)| *count > 0)
                .collect();
            stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
            stats
        }))
    }

    async fn is_user_banned(&self, user: &UserId) -> Result<bool, StorageError> {
        Ok(self.read(|d| d.banned_users.contains(user)))
    }

    async fn ban_user(&self, user: &UserId) -> Result<(), StorageError> {
        self.mutate("ban_user", |d| {
            d.banned_users.insert(user.clone());
        })
    }

    async fn unban_user(&self, user: &UserId) -> Result<(), StorageError> {
        self.mutate("unban_user", |d| {
            d.banned_users.remove(user);
        })
    }

    async fn is_site_banned(&self, domain: &str) -> Result<bool, StorageError> {
        let domain = domain.trim().to_lowercase();
        Ok(self.read(|d| {
            d.banned_sites
                .iter()
                .any(|site| domain == *site || domain.ends_with(&format!(".{site}")))
        }))
    }

    async fn ban_site(&self, domain: &str) -> Result<(), StorageError> {
        self.mutate("ban_site", |d| {
            d.banned_sites.insert(domain.trim().to_lowercase());
        })
    }

    async fn add_suggestion(&self, mut suggestion: Suggestion) -> Result<u64, StorageError> {
        self.mutate("add_suggestion", |d| {
            d.next_suggestion_id += 1;
            suggestion.id = d.next_suggestion_id;
            for tag in &suggestion.tags {
                d.ensure_topic(tag);
            }
            d.suggestions.retain(|s| s.link != suggestion.link);
            let id = suggestion.id;
            d.suggestions.push(suggestion);
            id
        })
    }

    async fn suggestion(&self, id: u64) -> Result<Option<Suggestion>, StorageError> {
        Ok(self.read(|d| d.suggestions.iter().find(|s| s.id == id).cloned()))
    }

    async fn suggestion_by_link(&self, link: &str) -> Result<Option<Suggestion>, StorageError> {
        Ok(self.read(|d| d.suggestions.iter().find(|s| s.link == link).cloned()))
    }

    async fn set_staff_message(&self, id: u64, message: MessageRef) -> Result<bool, StorageError> {
        self.mutate("set_staff_message", |d| match d.suggestions.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.staff_message = Some(message);
                true
            }
            None => false,
        })
    }

    async fn set_interesting(&self, id: u64, interesting: bool) -> Result<bool, StorageError> {
        self.mutate("set_interesting", |d| match d.suggestions.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.interesting = interesting;
                true
            }
            None => false,
        })
    }

    async fn interesting_by_topics(&self, names: &[String]) -> Result<Vec<Suggestion>, StorageError> {
        Ok(self.read(|d| {
            d.suggestions
                .iter()
                .filter(|s| s.interesting && s.tags.iter().any(|t| names.contains(t)))
                .cloned()
                .collect()
        }))
    }

    async fn record_publication(&self, link: &str) -> Result<Publication, StorageError> {
        self.mutate("record_publication", |d| {
            let today = Utc::now().date_naive();
            let publication = d
                .publications
                .entry(link.to_string())
                .and_modify(|p| {
                    p.times += 1;
                    p.last_time = today;
                })
                .or_insert(Publication {
                    times: 1,
                    first_time: today,
                    last_time: today,
                });
            publication.clone()
        })
    }

    async fn publication(&self, link: &str) -> Result<Option<Publication>, StorageError> {
        Ok(self.read(|d| d.publications.get(link).cloned()))
    }

    async fn feedback(&self, user: &UserId) -> Result<Option<Feedback>, StorageError> {
        Ok(self.read(|d| d.feedback.get(user).cloned()))
    }

    async fn write_feedback(&self, feedback: Feedback) -> Result<(), StorageError> {
        self.mutate("write_feedback", |d| {
            d.feedback.insert(feedback.user.clone(), feedback);
        })
    }
}
