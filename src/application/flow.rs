//! # Flow Builder
//!
//! Multi-step dialogs authored as an ordered list of steps. Starting a flow registers
//! one continuation per step into the user's session, and every step receives a
//! [`Turn`]: the event that woke it, the flow's shared context, and the controls to
//! loop, rewind, skip ahead or replay.
//!
//! The context lives as long as any step of the flow instance is still queued.
//! Steps must not hold the context guard while replaying, since the replayed step
//! will lock it too.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::application::dispatcher::{Dispatcher, Route};
use crate::application::services::Services;
use crate::application::session::Continuation;
use crate::domain::error::CoreError;
use crate::domain::types::{Event, UserId};

/// Mutable state shared by the steps of one flow instance.
pub type FlowContext<S> = Arc<Mutex<S>>;

type StepFn<S> = Arc<dyn Fn(Turn<S>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Step<S> {
    name: &'static str,
    run: StepFn<S>,
}

pub struct FlowBuilder<S> {
    name: &'static str,
    steps: Vec<Step<S>>,
}

impl<S: Send + 'static> FlowBuilder<S> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step<F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        F: Fn(Turn<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(Step {
            name,
            run: Arc::new(move |turn| Box::pin(f(turn))),
        });
        self
    }

    /// Registers every step, in order, at the tail of the user's session.
    pub fn start(self, dispatcher: &Arc<Dispatcher>, user: &UserId, initial: S) -> Result<Flow<S>, CoreError> {
        if self.steps.is_empty() {
            return Err(CoreError::validation("start", format!("flow `{}` has no steps", self.name)));
        }

        let inner = Arc::new(FlowInner {
            name: self.name,
            user: user.clone(),
            steps: self.steps,
            context: Arc::new(Mutex::new(initial)),
            dispatcher: Arc::clone(dispatcher),
        });
        let continuations: Vec<Continuation> = (0..inner.steps.len()).map(|i| inner.continuation(i)).collect();
        dispatcher.services().sessions.register(user, continuations)?;
        tracing::debug!(user = %user, flow = inner.name, steps = inner.steps.len(), "Flow started");

        Ok(Flow {
            context: inner.context.clone(),
        })
    }
}

/// Handle on a started flow.
pub struct Flow<S> {
    context: FlowContext<S>,
}

impl<S> Flow<S> {
    pub fn context(&self) -> FlowContext<S> {
        self.context.clone()
    }
}

struct FlowInner<S> {
    name: &'static str,
    user: UserId,
    steps: Vec<Step<S>>,
    context: FlowContext<S>,
    dispatcher: Arc<Dispatcher>,
}

impl<S: Send + 'static> FlowInner<S> {
    fn continuation(self: &Arc<Self>, index: usize) -> Continuation {
        let flow = Arc::clone(self);
        let step = &self.steps[index];
        let run = step.run.clone();
        Continuation::new(step.name, move |event| run(Turn { flow, index, event }))
    }
}

/// One step invocation.
pub struct Turn<S> {
    flow: Arc<FlowInner<S>>,
    index: usize,
    event: Event,
}

impl<S: Send + 'static> Turn<S> {
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Text of the event (or action payload); empty for synthetic skips.
    pub fn text(&self) -> &str {
        self.event.text().unwrap_or_default()
    }

    pub fn user(&self) -> &UserId {
        &self.flow.user
    }

    pub fn step_name(&self) -> &'static str {
        self.flow.steps[self.index].name
    }

    pub fn services(&self) -> &Arc<Services> {
        self.flow.dispatcher.services()
    }

    pub async fn context(&self) -> MutexGuard<'_, S> {
        self.flow.context.lock().await
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.flow.context.lock().await;
        f(&mut guard)
    }

    pub async fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.flow.context.lock().await.clone()
    }

    /// Loops: queues this step again ahead of everything still pending.
    pub fn retry(&self) -> Result<(), CoreError> {
        self.rewind(0)
    }

    /// Queues the `n` steps preceding this one, and this one, ahead of everything still pending.
    pub fn rewind(&self, n: usize) -> Result<(), CoreError> {
        let first = self.index.checked_sub(n).ok_or_else(|| {
            CoreError::validation(
                "rewind",
                format!("step `{}` has fewer than {} predecessors", self.step_name(), n),
            )
        })?;
        let sessions = &self.services().sessions;
        for i in (first..=self.index).rev() {
            sessions
                .register(&self.flow.user, [self.flow.continuation(i)])?
                .promote_last_to_first();
        }
        tracing::debug!(user = %self.flow.user, flow = self.flow.name, step = self.step_name(), n, "Flow rewound");
        Ok(())
    }

    /// Drops the next pending step without running it.
    pub fn skip_next(&self) -> Option<&'static str> {
        self.services().sessions.drop_next(&self.flow.user)
    }

    /// Ends the whole session, including anything queued outside this flow.
    pub fn abort(&self) -> usize {
        self.services().sessions.clear(&self.flow.user)
    }

    /// Feeds `event` through the dispatcher right away, inside the caller's lane.
    pub async fn replay(&self, event: Event) -> Route {
        self.flow.dispatcher.replay(event).await
    }

    /// Replays an empty synthetic message, forcing the next step's default branch.
    pub async fn replay_empty(&self) -> Route {
        self.replay(Event::synthetic(self.flow.user.clone(), "")).await
    }
}
