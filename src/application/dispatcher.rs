//! # Dispatcher
//!
//! Routes inbound events. Structured actions are acknowledged to the platform and
//! looked up in a two-level `namespace -> action -> handler` table; free text is
//! matched against the command patterns and otherwise fed to the user's session.
//!
//! The command table is populated once at startup by the feature modules and frozen
//! inside the dispatcher. Handler failures are logged and swallowed here.

use futures::future::BoxFuture;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::application::lanes::KeyedLocks;
use crate::application::services::Services;
use crate::domain::error::{CoreError, DispatchError};
use crate::domain::types::{ActionEvent, Event, Namespace, TextEvent, UserId};

pub type ActionHandler =
    Arc<dyn Fn(Arc<Dispatcher>, ActionEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub type TextHandler =
    Arc<dyn Fn(Arc<Dispatcher>, TextEvent, Vec<String>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct TextPattern {
    pattern: Regex,
    handler: TextHandler,
}

/// Registration surface exposed to the feature modules.
#[derive(Default)]
pub struct CommandTable {
    actions: HashMap<Namespace, HashMap<&'static str, ActionHandler>>,
    patterns: Vec<TextPattern>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler of `namespace/action`. Registering a pair twice is an error.
    pub fn register<F, Fut>(&mut self, namespace: Namespace, action: &'static str, handler: F) -> Result<(), CoreError>
    where
        F: Fn(Arc<Dispatcher>, ActionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if action.is_empty() || action.chars().any(|c| c.is_whitespace() || c.is_ascii_uppercase()) {
            return Err(CoreError::validation(
                "register",
                format!("action name `{action}` must be a lowercase word"),
            ));
        }
        let actions = self.actions.entry(namespace).or_default();
        if actions.contains_key(action) {
            return Err(CoreError::validation(
                "register",
                format!("duplicate handler for `{namespace}/{action}`"),
            ));
        }
        actions.insert(action, Arc::new(move |d, a| Box::pin(handler(d, a))));
        Ok(())
    }

    /// Registers an explicit text command. Patterns are tried in registration order.
    pub fn register_text_pattern<F, Fut>(&mut self, pattern: &str, handler: F) -> Result<(), CoreError>
    where
        F: Fn(Arc<Dispatcher>, TextEvent, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pattern = Regex::new(pattern)
            .map_err(|e| CoreError::validation("register_text_pattern", e.to_string()))?;
        self.patterns.push(TextPattern {
            pattern,
            handler: Arc::new(move |d, t, caps| Box::pin(handler(d, t, caps))),
        });
        Ok(())
    }

    pub fn lookup(&self, namespace: Namespace, action: &str) -> Result<&ActionHandler, DispatchError> {
        self.actions
            .get(&namespace)
            .and_then(|actions| actions.get(action))
            .ok_or_else(|| DispatchError::UnknownAction {
                namespace,
                action: action.to_string(),
            })
    }

    /// First command pattern matching `text`, with its capture groups (group 0 first).
    fn match_text(&self, text: &str) -> Option<(String, TextHandler, Vec<String>)> {
        self.patterns.iter().find_map(|p| {
            p.pattern.captures(text).map(|caps| {
                let groups = caps
                    .iter()
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                (p.pattern.as_str().to_string(), p.handler.clone(), groups)
            })
        })
    }

    pub fn action_count(&self) -> usize {
        self.actions.values().map(HashMap::len).sum()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Outcome of routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// An action handler ran (`namespace/action`).
    Action(String),
    /// A text command ran (its pattern).
    Command(String),
    /// The user's next continuation ran.
    Continuation(&'static str),
    /// Nothing handled the event.
    Dropped(DispatchError),
    /// A handler ran and failed; the failure was logged.
    Failed(String),
}

pub struct Dispatcher {
    services: Arc<Services>,
    table: CommandTable,
    lanes: KeyedLocks<UserId>,
}

impl Dispatcher {
    pub fn new(services: Arc<Services>, table: CommandTable) -> Arc<Self> {
        tracing::info!(
            actions = table.action_count(),
            patterns = table.pattern_count(),
            "Dispatcher ready"
        );
        Arc::new(Self {
            services,
            table,
            lanes: KeyedLocks::new(),
        })
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Entry point for platform events. Serialized per user: the lane is taken first,
    /// then an action is acknowledged and only then handed to its handler.
    pub async fn dispatch(self: &Arc<Self>, event: Event) -> Route {
        let _lane = self.lanes.lock(event.user()).await;

        if let Event::Action(action) = &event {
            if let Some(origin) = &action.origin {
                if let Err(e) = self.services.channel.acknowledge(origin).await {
                    tracing::warn!(user = %action.user, "Failed to acknowledge action {}: {}", action.id, e);
                }
            }
        }
        self.route(event).await
    }

    /// Re-runs the routing path for `event` from inside a handler that already holds the
    /// user's lane, so the next queued continuation fires without waiting for new input.
    pub fn replay(self: &Arc<Self>, event: Event) -> BoxFuture<'static, Route> {
        let this = Arc::clone(self);
        Box::pin(async move {
            tracing::debug!(user = %event.user(), "Replaying event");
            this.route(event).await
        })
    }

    /// Feeds `event` straight to the user's next continuation, bypassing command matching.
    pub fn resume(self: &Arc<Self>, event: Event) -> BoxFuture<'static, Route> {
        let this = Arc::clone(self);
        Box::pin(async move { this.advance(event).await })
    }

    async fn route(self: &Arc<Self>, event: Event) -> Route {
        match event {
            Event::Action(action) => self.route_action(action).await,
            Event::Text(text) => match self.table.match_text(text.text.trim()) {
                Some((pattern, handler, groups)) => {
                    tracing::info!(user = %text.user, pattern = %pattern, "Router dispatching command");
                    let user = text.user.clone();
                    match handler(Arc::clone(self), text, groups).await {
                        Ok(()) => Route::Command(pattern),
                        Err(e) => {
                            tracing::error!(user = %user, pattern = %pattern, "Command failed: {:#}", e);
                            Route::Failed(e.to_string())
                        }
                    }
                }
                None => self.advance(Event::Text(text)).await,
            },
        }
    }

    async fn route_action(self: &Arc<Self>, action: ActionEvent) -> Route {
        let key = format!("{}/{}", action.namespace, action.action);
        let handler = match self.table.lookup(action.namespace, &action.action) {
            Ok(handler) => handler.clone(),
            Err(e) => {
                tracing::warn!(user = %action.user, "Dropping action: {}", e);
                return Route::Dropped(e);
            }
        };

        tracing::info!(user = %action.user, action = %key, "Router dispatching action");
        let user = action.user.clone();
        match handler(Arc::clone(self), action).await {
            Ok(()) => Route::Action(key),
            Err(e) => {
                tracing::error!(user = %user, action = %key, "Action handler failed: {:#}", e);
                Route::Failed(e.to_string())
            }
        }
    }

    async fn advance(self: &Arc<Self>, event: Event) -> Route {
        let user = event.user().clone();
        match self.services.sessions.advance(&user, event).await {
            Ok(Some(step)) => Route::Continuation(step),
            Ok(None) => {
                let e = DispatchError::NoPendingContinuation(user);
                tracing::debug!("Dropping free text: {}", e);
                Route::Dropped(e)
            }
            Err(e) => {
                tracing::error!(user = %user, "Continuation failed: {:#}", e);
                Route::Failed(e.to_string())
            }
        }
    }

    /// Clears the sessions untouched for longer than `ttl` and returns their users.
    /// Each one is re-checked inside the user's lane, so an event being handled wins.
    pub async fn expire_idle(&self, ttl: Duration) -> Vec<UserId> {
        let mut expired = Vec::new();
        for user in self.services.sessions.stale_users(ttl) {
            let _lane = self.lanes.lock(&user).await;
            if self.services.sessions.expire(&user, ttl) {
                expired.push(user);
            }
        }
        expired
    }

    /// Forgets per-user lanes that are no longer in use.
    pub fn prune_lanes(&self) -> usize {
        self.lanes.prune()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::Continuation;
    use crate::application::testing::{RecordingChannel, TestBot, action_event, text_event};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_unknown_action_is_dropped() {
        let bot = TestBot::new(CommandTable::new());
        let route = bot
            .dispatcher
            .dispatch(action_event("@u:x", Namespace::Subs, "nav", None))
            .await;
        assert_eq!(
            route,
            Route::Dropped(DispatchError::UnknownAction {
                namespace: Namespace::Subs,
                action: "nav".into()
            })
        );
    }

    #[tokio::test]
    async fn test_action_is_acknowledged_before_handler() {
        let channel = Arc::new(RecordingChannel::new());
        let mut table = CommandTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let recorder = channel.clone();
        table
            .register(Namespace::Common, "ping", move |_d: Arc<Dispatcher>, _a: ActionEvent| {
                let record = record.clone();
                let recorder = recorder.clone();
                async move {
                    record.lock().unwrap().push(recorder.acks().len());
                    Ok(())
                }
            })
            .unwrap();
        let bot = TestBot::with_channel(table, channel);

        let route = bot
            .dispatcher
            .dispatch(action_event("@u:x", Namespace::Common, "ping", None))
            .await;
        assert_eq!(route, Route::Action("common/ping".into()));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_failing_handler_is_swallowed() {
        let mut table = CommandTable::new();
        table
            .register(Namespace::Common, "boom", |_d: Arc<Dispatcher>, _a: ActionEvent| async {
                Err(anyhow::anyhow!("handler exploded"))
            })
            .unwrap();
        let bot = TestBot::new(table);
        let route = bot
            .dispatcher
            .dispatch(action_event("@u:x", Namespace::Common, "boom", None))
            .await;
        assert_eq!(route, Route::Failed("handler exploded".into()));
    }

    #[test]
    fn test_duplicate_and_invalid_registrations() {
        let mut table = CommandTable::new();
        let noop = |_d: Arc<Dispatcher>, _a: ActionEvent| async { Ok(()) };
        table.register(Namespace::Send, "skip", noop).unwrap();
        assert!(table.register(Namespace::Send, "skip", noop).is_err());
        assert!(table.register(Namespace::Send, "two words", noop).is_err());
        assert!(
            table
                .register_text_pattern("^\\.broken(", |_d: Arc<Dispatcher>, _t: TextEvent, _c: Vec<String>| async {
                    Ok(())
                })
                .is_err()
        );
        assert_eq!(table.action_count(), 1);
    }

    #[tokio::test]
    async fn test_free_text_without_session_is_dropped() {
        let bot = TestBot::new(CommandTable::new());
        let user = UserId::from("@u:x");
        let route = bot.dispatcher.dispatch(text_event("@u:x", "hello")).await;
        assert_eq!(route, Route::Dropped(DispatchError::NoPendingContinuation(user.clone())));
        assert!(bot.services.sessions.is_idle(&user));
    }

    #[tokio::test]
    async fn test_command_pattern_wins_over_session() {
        let mut table = CommandTable::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let record = hits.clone();
        table
            .register_text_pattern(r"^\.echo\s+(.+)$", move |_d: Arc<Dispatcher>, _t: TextEvent, caps: Vec<String>| {
                let record = record.clone();
                async move {
                    record.lock().unwrap().push(caps[1].clone());
                    Ok(())
                }
            })
            .unwrap();
        let bot = TestBot::new(table);
        let user = UserId::from("@u:x");
        bot.services
            .sessions
            .register(&user, [Continuation::new("pending", |_e: Event| async { Ok(()) })])
            .unwrap();

        let route = bot.dispatcher.dispatch(text_event("@u:x", ".echo hi there")).await;
        assert_eq!(route, Route::Command(r"^\.echo\s+(.+)$".into()));
        assert_eq!(*hits.lock().unwrap(), vec!["hi there".to_string()]);
        assert_eq!(bot.services.sessions.length(&user), 1);

        let route = bot.dispatcher.dispatch(text_event("@u:x", "plain answer")).await;
        assert_eq!(route, Route::Continuation("pending"));
        assert!(bot.services.sessions.is_idle(&user));
    }

    #[tokio::test]
    async fn test_replay_reaches_next_continuation() {
        let bot = TestBot::new(CommandTable::new());
        let user = UserId::from("@u:x");
        let log = Arc::new(Mutex::new(Vec::new()));

        let dispatcher = bot.dispatcher.clone();
        let first_log = log.clone();
        let second_log = log.clone();
        let replay_user = user.clone();
        bot.services
            .sessions
            .register(
                &user,
                [
                    Continuation::new("first", move |e: Event| async move {
                        first_log.lock().unwrap().push(format!("first:{}", e.text().unwrap_or_default()));
                        dispatcher.replay(Event::synthetic(replay_user, "")).await;
                        Ok(())
                    }),
                    Continuation::new("second", move |e: Event| async move {
                        second_log.lock().unwrap().push(format!("second:{}", e.text().unwrap_or_default()));
                        Ok(())
                    }),
                ],
            )
            .unwrap();

        bot.dispatcher.dispatch(text_event("@u:x", "real")).await;
        assert_eq!(*log.lock().unwrap(), vec!["first:real", "second:"]);
        assert!(bot.services.sessions.is_idle(&user));
    }

    #[tokio::test]
    async fn test_same_user_events_do_not_interleave() {
        let bot = TestBot::new(CommandTable::new());
        let user = UserId::from("@u:x");
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = log.clone();
        let fast_log = log.clone();
        bot.services
            .sessions
            .register(
                &user,
                [
                    Continuation::new("slow", move |_e: Event| async move {
                        slow_log.lock().unwrap().push("slow:start");
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        slow_log.lock().unwrap().push("slow:end");
                        Ok(())
                    }),
                    Continuation::new("fast", move |_e: Event| async move {
                        fast_log.lock().unwrap().push("fast");
                        Ok(())
                    }),
                ],
            )
            .unwrap();

        let first = tokio::spawn({
            let d = bot.dispatcher.clone();
            async move { d.dispatch(text_event("@u:x", "one")).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = tokio::spawn({
            let d = bot.dispatcher.clone();
            async move { d.dispatch(text_event("@u:x", "two")).await }
        });
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["slow:start", "slow:end", "fast"]);
    }

    #[tokio::test]
    async fn test_slow_ack_keeps_action_before_later_text() {
        let channel = Arc::new(RecordingChannel::new().with_ack_latency(Duration::from_millis(50)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = CommandTable::new();
        let action_log = log.clone();
        table
            .register(Namespace::Send, "skip", move |_d: Arc<Dispatcher>, _a: ActionEvent| {
                let action_log = action_log.clone();
                async move {
                    action_log.lock().unwrap().push("skip".to_string());
                    Ok(())
                }
            })
            .unwrap();
        let bot = TestBot::with_channel(table, channel);
        let user = UserId::from("@u:x");
        let text_log = log.clone();
        bot.services
            .sessions
            .register(
                &user,
                [Continuation::new("ask_note", move |e: Event| async move {
                    text_log.lock().unwrap().push(format!("note:{}", e.text().unwrap_or_default()));
                    Ok(())
                })],
            )
            .unwrap();

        let action = tokio::spawn({
            let d = bot.dispatcher.clone();
            async move { d.dispatch(action_event("@u:x", Namespace::Send, "skip", None)).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let text = tokio::spawn({
            let d = bot.dispatcher.clone();
            async move { d.dispatch(text_event("@u:x", "#rust")).await }
        });

        assert_eq!(action.await.unwrap(), Route::Action("send/skip".into()));
        assert_eq!(text.await.unwrap(), Route::Continuation("ask_note"));
        assert_eq!(*log.lock().unwrap(), vec!["skip", "note:#rust"]);
    }

    #[tokio::test]
    async fn test_expire_idle() {
        let bot = TestBot::new(CommandTable::new());
        let user = UserId::from("@u:x");
        bot.services
            .sessions
            .register(&user, [Continuation::new("pending", |_e: Event| async { Ok(()) })])
            .unwrap();

        assert!(bot.dispatcher.expire_idle(Duration::from_secs(60)).await.is_empty());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(bot.dispatcher.expire_idle(Duration::ZERO).await, vec![user.clone()]);
        assert!(bot.services.sessions.is_idle(&user));
    }

    #[tokio::test]
    async fn test_expiry_waits_for_the_running_event() {
        let bot = TestBot::new(CommandTable::new());
        let user = UserId::from("@u:x");
        let services = bot.services.clone();
        let again_user = user.clone();
        bot.services
            .sessions
            .register(
                &user,
                [
                    Continuation::new("slow", move |_e: Event| async move {
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        services
                            .sessions
                            .register(&again_user, [Continuation::new("again", |_e: Event| async { Ok(()) })])
                            .unwrap();
                        Ok(())
                    }),
                    Continuation::new("other", |_e: Event| async { Ok(()) }),
                ],
            )
            .unwrap();

        let running = tokio::spawn({
            let d = bot.dispatcher.clone();
            async move { d.dispatch(text_event("@u:x", "go")).await }
        });
        tokio::time::sleep(Duration::from_millis(25)).await;
        let expired = bot.dispatcher.expire_idle(Duration::from_millis(15)).await;
        running.await.unwrap();

        assert!(expired.is_empty());
        assert_eq!(bot.services.sessions.list(&user), vec!["other", "again"]);
    }
}
