//! Step handlers and their registration options.

use super::context::Context;
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::workflow::{Event, RetryPolicy};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Events produced by one handler invocation.
pub type HandlerResult = KernelResult<Vec<Event>>;

/// A workflow step.
///
/// Receives the run context and one event; returns the events to enqueue.
/// An `Err` becomes an error event attached to the offending event.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult;
}

pub type BoxedHandler = Arc<dyn Handler>;

/// Handler backed by an async closure.
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Context, Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult {
        (self.f)(ctx, event).await
    }
}

/// Wrap an async closure as a [`BoxedHandler`].
///
/// ```rust,ignore
/// let echo = handler_fn(|_ctx, event| async move { Ok(vec![event]) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _fut: PhantomData,
    })
}

/// Per-registration options.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Step name used in logs, error events and callback payloads.
    pub name: Option<String>,
    /// Retry policy for one invocation; falls back to the workflow default.
    pub retry: Option<RetryPolicy>,
    /// Drop failures (after retries) instead of emitting error events.
    pub suppress_errors: bool,
}

impl StepOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }
}
