//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::audit::AuditLog;
use crate::application::dispatcher::{CommandTable, Dispatcher};
use crate::application::entities;
use crate::application::services::Services;
use crate::domain::config::AppConfig;
use crate::domain::error::DeliveryError;
use crate::domain::traits::ChannelClient;
use crate::domain::types::{
    ActionEvent, ChannelRef, Event, Menu, MessageRef, Namespace, SendOptions, TextEvent, UserId,
};
use crate::infrastructure::store::MemoryStore;

pub const ADMIN: &str = "@admin:x";
pub const STAFF_ROOM: &str = "!staff:x";
pub const BROADCAST_ROOM: &str = "!news:x";

pub fn test_config() -> AppConfig {
    let yaml = format!(
        r#"
services:
  matrix:
    username: bot
    password: secret
    homeserver: https://matrix.example.org
channels:
  staff: "{STAFF_ROOM}"
  broadcast: "{BROADCAST_ROOM}"
  affiliated: ["!partner:x"]
system:
  admin: ["{ADMIN}"]
"#
    );
    AppConfig::from_yaml(&yaml).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub target: String,
    pub content: String,
    pub options: SendOptions,
}

#[derive(Default)]
struct Recorded {
    sent: Vec<Sent>,
    edits: Vec<(MessageRef, String)>,
    forwards: Vec<(String, MessageRef)>,
    acks: Vec<MessageRef>,
    unreachable: HashSet<String>,
    failing_messages: HashSet<String>,
    non_members: HashSet<String>,
}

/// `ChannelClient` that records every call.
#[derive(Default)]
pub struct RecordingChannel {
    state: Mutex<Recorded>,
    next_id: AtomicUsize,
    latency: Option<Duration>,
    ack_latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every `acknowledge` takes this long.
    pub fn with_ack_latency(mut self, latency: Duration) -> Self {
        self.ack_latency = Some(latency);
        self
    }

    pub fn set_unreachable(&self, target: &str) {
        self.state.lock().unwrap().unreachable.insert(target.to_string());
    }

    pub fn set_reachable(&self, target: &str) {
        self.state.lock().unwrap().unreachable.remove(target);
    }

    /// Every forward of the message with this id fails.
    pub fn fail_message(&self, message_id: &str) {
        self.state.lock().unwrap().failing_messages.insert(message_id.to_string());
    }

    pub fn deny_membership(&self, user: &str) {
        self.state.lock().unwrap().non_members.insert(user.to_string());
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.target == target)
            .map(|s| s.content)
            .collect()
    }

    pub fn last_sent_to(&self, target: &str) -> Option<String> {
        self.sent_to(target).pop()
    }

    /// Menu attached to the last message sent to `target`.
    pub fn last_menu_to(&self, target: &str) -> Option<Menu> {
        self.sent()
            .into_iter()
            .rev()
            .find(|s| s.target == target)
            .and_then(|s| s.options.menu)
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.state.lock().unwrap().edits.clone()
    }

    pub fn forwards_to(&self, target: &str) -> Vec<MessageRef> {
        self.state
            .lock()
            .unwrap()
            .forwards
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn acks(&self) -> Vec<MessageRef> {
        self.state.lock().unwrap().acks.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_target(&self, target: &str) -> Result<(), DeliveryError> {
        if self.state.lock().unwrap().unreachable.contains(target) {
            return Err(DeliveryError::Unreachable {
                target: target.to_string(),
                reason: "blocked".into(),
            });
        }
        Ok(())
    }

    fn message_ref(&self, target: &str, body: &str) -> MessageRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        MessageRef::new(ChannelRef::new(target), format!("$m{id}")).with_body(body)
    }
}

#[async_trait]
impl ChannelClient for RecordingChannel {
    async fn send(&self, target: &str, content: &str, options: &SendOptions) -> Result<MessageRef, DeliveryError> {
        self.check_target(target)?;
        self.state.lock().unwrap().sent.push(Sent {
            target: target.to_string(),
            content: content.to_string(),
            options: options.clone(),
        });
        Ok(self.message_ref(target, content))
    }

    async fn edit(&self, message: &MessageRef, content: &str, _options: &SendOptions) -> Result<(), DeliveryError> {
        self.state
            .lock()
            .unwrap()
            .edits
            .push((message.clone(), content.to_string()));
        Ok(())
    }

    async fn forward(&self, target: &str, source: &MessageRef) -> Result<MessageRef, DeliveryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_target(target)?;
        if self.state.lock().unwrap().failing_messages.contains(&source.message_id) {
            return Err(DeliveryError::Transport("message gone".into()));
        }
        self.state
            .lock()
            .unwrap()
            .forwards
            .push((target.to_string(), source.clone()));
        Ok(self.message_ref(target, source.body.as_deref().unwrap_or_default()))
    }

    async fn acknowledge(&self, action: &MessageRef) -> Result<(), DeliveryError> {
        if let Some(latency) = self.ack_latency {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().unwrap().acks.push(action.clone());
        Ok(())
    }

    async fn is_member(&self, _channel: &ChannelRef, user: &UserId) -> Result<bool, DeliveryError> {
        Ok(!self.state.lock().unwrap().non_members.contains(user.as_str()))
    }
}

/// A dispatcher wired to a recording channel and an in-memory store.
pub struct TestBot {
    pub channel: Arc<RecordingChannel>,
    pub store: Arc<MemoryStore>,
    pub services: Arc<Services>,
    pub dispatcher: Arc<Dispatcher>,
}

impl TestBot {
    pub fn new(table: CommandTable) -> Self {
        Self::with_channel(table, Arc::new(RecordingChannel::new()))
    }

    /// Bot whose store holds the default topic catalog.
    pub fn seeded(table: CommandTable) -> Self {
        Self::build(table, Arc::new(RecordingChannel::new()), Arc::new(MemoryStore::seeded()), test_config())
    }

    pub fn with_store(table: CommandTable, store: Arc<MemoryStore>) -> Self {
        Self::build(table, Arc::new(RecordingChannel::new()), store, test_config())
    }

    pub fn with_channel(table: CommandTable, channel: Arc<RecordingChannel>) -> Self {
        Self::build(table, channel, Arc::new(MemoryStore::new()), test_config())
    }

    pub fn build(table: CommandTable, channel: Arc<RecordingChannel>, store: Arc<MemoryStore>, config: AppConfig) -> Self {
        let services = Arc::new(Services::new(config, channel.clone(), store.clone(), AuditLog::disabled()));
        let dispatcher = Dispatcher::new(services.clone(), table);
        Self {
            channel,
            store,
            services,
            dispatcher,
        }
    }

    pub async fn say(&self, user: &str, text: &str) -> crate::application::dispatcher::Route {
        self.dispatcher.dispatch(text_event(user, text)).await
    }

    pub async fn press(
        &self,
        user: &str,
        namespace: Namespace,
        action: &str,
        payload: Option<&str>,
    ) -> crate::application::dispatcher::Route {
        self.dispatcher
            .dispatch(action_event(user, namespace, action, payload))
            .await
    }
}

/// Seeded store whose snapshot directory is gone: reads work, every write fails.
pub fn unwritable_store() -> Arc<MemoryStore> {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(dir.path().join("store.json")).unwrap();
    dir.close().unwrap();
    Arc::new(store)
}

pub fn text_event(user: &str, text: &str) -> Event {
    Event::Text(TextEvent::new(UserId::from(user), text, entities::scan(text)))
}

pub fn action_event(user: &str, namespace: Namespace, action: &str, payload: Option<&str>) -> Event {
    let id = format!("$action-{action}");
    Event::Action(ActionEvent {
        id: id.clone(),
        user: UserId::from(user),
        namespace,
        action: action.to_string(),
        payload: payload.map(String::from),
        origin: Some(MessageRef::new(ChannelRef::new(format!("!dm-{user}")), id)),
    })
}
