//! # Inbox
//!
//! Per-user event queues in front of the [`Dispatcher`]. One user's events are
//! dispatched one after another in arrival order, different users are drained in
//! parallel. A queue's worker exits as soon as its queue is empty.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::application::dispatcher::Dispatcher;
use crate::domain::types::{Event, UserId};

pub struct Inbox {
    dispatcher: Arc<Dispatcher>,
    queues: Mutex<HashMap<UserId, mpsc::UnboundedSender<Event>>>,
}

impl Inbox {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            queues: Mutex::new(HashMap::new()),
        })
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<UserId, mpsc::UnboundedSender<Event>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `event` behind the user's earlier events.
    pub fn push(self: &Arc<Self>, event: Event) {
        let user = event.user().clone();
        let mut queues = self.queues();
        let event = match queues.get(&user) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            return;
        }
        queues.insert(user.clone(), tx);
        drop(queues);
        tokio::spawn(Arc::clone(self).drain(user, rx));
    }

    /// Number of users with a running queue.
    pub fn active_users(&self) -> usize {
        self.queues().len()
    }

    async fn drain(self: Arc<Self>, user: UserId, mut rx: mpsc::UnboundedReceiver<Event>) {
        loop {
            // The queue is only retired under the map lock, so `push` never feeds a dead one.
            let next = {
                let mut queues = self.queues();
                match rx.try_recv() {
                    Ok(event) => Some(event),
                    Err(_) => {
                        queues.remove(&user);
                        None
                    }
                }
            };
            let Some(event) = next else {
                tracing::debug!(user = %user, "Inbox drained");
                return;
            };

            // One task per event; a panic stays inside it.
            let dispatcher = Arc::clone(&self.dispatcher);
            match tokio::spawn(async move { dispatcher.dispatch(event).await }).await {
                Ok(route) => tracing::debug!(user = %user, ?route, "Event routed"),
                Err(e) => tracing::error!(user = %user, "Event task panicked: {}", e),
            }
        }
    }
}
