//! 处理器中间件
//! Handler middleware
//!
//! A middleware wraps a handler in another handler. [`apply`] composes them
//! right to left, so the first middleware listed is the outermost:
//!
//! ```rust,ignore
//! let step = apply(handler, vec![
//!     Arc::new(LoggingMiddleware::new("retrieve")),
//!     Arc::new(PanicRecoveryMiddleware),
//! ]);
//! ```

use super::context::Context;
use super::handler::{BoxedHandler, Handler, HandlerResult};
use async_trait::async_trait;
use futures::FutureExt;
use ragloom_kernel::error::KernelError;
use ragloom_kernel::workflow::Event;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub trait Middleware: Send + Sync {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// Wrap `handler` with `middlewares`, outermost first.
pub fn apply(handler: BoxedHandler, middlewares: Vec<Arc<dyn Middleware>>) -> BoxedHandler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |inner, middleware| middleware.wrap(inner))
}

/// Chain handlers: every event one stage returns is fed, in order, to the
/// next stage. The last stage's events are the pipeline's output.
pub fn pipeline(stages: Vec<BoxedHandler>) -> BoxedHandler {
    Arc::new(Pipeline { stages })
}

struct Pipeline {
    stages: Vec<BoxedHandler>,
}

#[async_trait]
impl Handler for Pipeline {
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult {
        let mut events = vec![event];
        for stage in &self.stages {
            let mut next = Vec::new();
            for event in events {
                next.extend(stage.handle(ctx.clone(), event).await?);
            }
            events = next;
        }
        Ok(events)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logs entry, exit and failures of the wrapped handler.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    name: String,
}

impl LoggingMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

struct Logged {
    name: String,
    inner: BoxedHandler,
}

#[async_trait]
impl Handler for Logged {
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult {
        let event_type = event.type_tag().to_string();
        debug!(step = %self.name, run_id = ctx.run_id(), %event_type, "step entered");
        let result = self.inner.handle(ctx.clone(), event).await;
        match &result {
            Ok(events) => info!(step = %self.name, %event_type, emitted = events.len(), "step finished"),
            Err(err) => warn!(step = %self.name, %event_type, error = %err, "step failed"),
        }
        result
    }
}

impl Middleware for LoggingMiddleware {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Logged {
            name: self.name.clone(),
            inner: next,
        })
    }
}

// ============================================================================
// Timing
// ============================================================================

type TimingObserver = Arc<dyn Fn(&str, Duration) + Send + Sync>;

/// Measures the wrapped handler. Durations go to the observer when one is
/// set, and to a debug log either way.
#[derive(Clone)]
pub struct TimingMiddleware {
    name: String,
    observer: Option<TimingObserver>,
}

impl TimingMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl Fn(&str, Duration) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }
}

struct Timed {
    name: String,
    observer: Option<TimingObserver>,
    inner: BoxedHandler,
}

#[async_trait]
impl Handler for Timed {
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult {
        let started = Instant::now();
        let result = self.inner.handle(ctx, event).await;
        let elapsed = started.elapsed();
        debug!(step = %self.name, elapsed_ms = elapsed.as_millis() as u64, "step timed");
        if let Some(observer) = &self.observer {
            observer(&self.name, elapsed);
        }
        result
    }
}

impl Middleware for TimingMiddleware {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Timed {
            name: self.name.clone(),
            observer: self.observer.clone(),
            inner: next,
        })
    }
}

// ============================================================================
// Panic recovery
// ============================================================================

/// Turns a panic inside the wrapped handler into a `Panic` error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicRecoveryMiddleware;

struct Recovering {
    inner: BoxedHandler,
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[async_trait]
impl Handler for Recovering {
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult {
        match AssertUnwindSafe(self.inner.handle(ctx, event)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(KernelError::Panic(panic_message(payload.as_ref()))),
        }
    }
}

impl Middleware for PanicRecoveryMiddleware {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Recovering { inner: next })
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// On failure, hands the original event to a secondary handler.
#[derive(Clone)]
pub struct FallbackMiddleware {
    fallback: BoxedHandler,
}

impl FallbackMiddleware {
    pub fn new(fallback: BoxedHandler) -> Self {
        Self { fallback }
    }
}

struct WithFallback {
    inner: BoxedHandler,
    fallback: BoxedHandler,
}

#[async_trait]
impl Handler for WithFallback {
    async fn handle(&self, ctx: Context, event: Event) -> HandlerResult {
        match self.inner.handle(ctx.clone(), event.clone()).await {
            Ok(events) => Ok(events),
            Err(err) => {
                warn!(event_type = event.type_tag(), error = %err, "primary handler failed; using fallback");
                self.fallback.handle(ctx, event).await
            }
        }
    }
}

impl Middleware for FallbackMiddleware {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(WithFallback {
            inner: next,
            fallback: self.fallback.clone(),
        })
    }
}
