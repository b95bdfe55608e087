//! # Session Registry
//!
//! Per-user ordered queue of one-shot continuations. A user with no entry is Idle;
//! an entry, when present, always holds at least one continuation.
//!
//! The registry itself does not serialize execution: the dispatcher holds the user's
//! lane while a continuation runs, so `register`/`advance` for one user never interleave.

use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::error::CoreError;
use crate::domain::types::{Event, UserId};

type ContinuationFn = Box<dyn FnOnce(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A handler consumed by exactly one future event of its user.
pub struct Continuation {
    name: &'static str,
    run: ContinuationFn,
}

impl Continuation {
    pub fn new<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(Event) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            run: Box::new(move |event| Box::pin(f(event))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn invoke(self, event: Event) -> anyhow::Result<()> {
        (self.run)(event).await
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Continuation").field(&self.name).finish()
    }
}

struct Session {
    queue: VecDeque<Continuation>,
    touched: Instant,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, Session>>,
}

/// Handle returned by [`SessionRegistry::register`].
pub struct Registration<'a> {
    registry: &'a SessionRegistry,
    user: UserId,
}

impl Registration<'_> {
    /// Moves the most recently appended continuation to the front of the queue.
    pub fn promote_last_to_first(self) {
        let mut sessions = self.registry.sessions();
        if let Some(session) = sessions.get_mut(&self.user) {
            if let Some(last) = session.queue.pop_back() {
                session.queue.push_front(last);
            }
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends continuations to the user's queue, creating it if absent.
    pub fn register<I>(&self, user: &UserId, continuations: I) -> Result<Registration<'_>, CoreError>
    where
        I: IntoIterator<Item = Continuation>,
    {
        if user.is_empty() {
            return Err(CoreError::validation("register", "missing user id"));
        }
        let mut incoming = continuations.into_iter().peekable();
        if incoming.peek().is_none() {
            return Err(CoreError::validation("register", "no continuation given"));
        }

        let mut sessions = self.sessions();
        let session = sessions.entry(user.clone()).or_insert_with(|| Session {
            queue: VecDeque::new(),
            touched: Instant::now(),
        });
        session.queue.extend(incoming);
        session.touched = Instant::now();
        tracing::debug!(user = %user, pending = session.queue.len(), "Registered continuations");

        Ok(Registration {
            registry: self,
            user: user.clone(),
        })
    }

    /// Pops the head continuation and runs it with `event`.
    ///
    /// Returns `Ok(None)` when the user is Idle (the event is dropped), otherwise the
    /// name of the continuation that ran along with its result.
    pub async fn advance(&self, user: &UserId, event: Event) -> anyhow::Result<Option<&'static str>> {
        let continuation = {
            let mut sessions = self.sessions();
            let Some(session) = sessions.get_mut(user) else {
                return Ok(None);
            };
            let next = session.queue.pop_front();
            session.touched = Instant::now();
            if session.queue.is_empty() {
                sessions.remove(user);
            }
            next
        };

        let Some(continuation) = continuation else {
            return Ok(None);
        };
        let name = continuation.name();
        tracing::debug!(user = %user, step = name, "Advancing session");
        continuation.invoke(event).await?;
        Ok(Some(name))
    }

    /// Deletes the whole queue. Returns how many continuations were discarded.
    pub fn clear(&self, user: &UserId) -> usize {
        self.sessions().remove(user).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Removes the head continuation without running it.
    pub fn drop_next(&self, user: &UserId) -> Option<&'static str> {
        self.remove_with(user, VecDeque::pop_front)
    }

    /// Removes the tail continuation without running it.
    pub fn drop_last(&self, user: &UserId) -> Option<&'static str> {
        self.remove_with(user, VecDeque::pop_back)
    }

    fn remove_with(
        &self,
        user: &UserId,
        take: fn(&mut VecDeque<Continuation>) -> Option<Continuation>,
    ) -> Option<&'static str> {
        let mut sessions = self.sessions();
        let session = sessions.get_mut(user)?;
        let removed = take(&mut session.queue).map(|c| c.name());
        if session.queue.is_empty() {
            sessions.remove(user);
        }
        removed
    }

    pub fn length(&self, user: &UserId) -> usize {
        self.sessions().get(user).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Names of the pending continuations, head first.
    pub fn list(&self, user: &UserId) -> Vec<&'static str> {
        self.sessions()
            .get(user)
            .map(|s| s.queue.iter().map(Continuation::name).collect())
            .unwrap_or_default()
    }

    pub fn is_idle(&self, user: &UserId) -> bool {
        !self.sessions().contains_key(user)
    }

    pub fn active_users(&self) -> usize {
        self.sessions().len()
    }

    /// Users whose session has been untouched for longer than `ttl`.
    pub fn stale_users(&self, ttl: Duration) -> Vec<UserId> {
        self.stale_users_at(Instant::now(), ttl)
    }

    pub fn stale_users_at(&self, now: Instant, ttl: Duration) -> Vec<UserId> {
        self.sessions()
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.touched) > ttl)
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Clears the session of `user` if it is still untouched for longer than `ttl`.
    pub fn expire(&self, user: &UserId, ttl: Duration) -> bool {
        self.expire_at(Instant::now(), user, ttl)
    }

    pub fn expire_at(&self, now: Instant, user: &UserId, ttl: Duration) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(user) {
            Some(session) if now.saturating_duration_since(session.touched) > ttl => {
                sessions.remove(user);
                true
            }
            _ => false,
        }
    }
}
