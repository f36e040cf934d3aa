//! 工作流引擎
//! Workflow engine
//!
//! Event types and retry policies come from `ragloom_kernel::workflow`; this
//! module provides the per-run context, handlers, middleware and the
//! dispatcher.

pub mod context;
pub mod engine;
pub mod handler;
pub mod middleware;

pub use context::Context;
pub use engine::{EventStream, RunHandle, Workflow};
pub use handler::{BoxedHandler, FnHandler, Handler, HandlerResult, StepOptions, handler_fn};
pub use middleware::{
    FallbackMiddleware, LoggingMiddleware, Middleware, PanicRecoveryMiddleware, TimingMiddleware,
    apply, pipeline,
};
pub use ragloom_kernel::workflow::{
    ERROR_EVENT, ErrorEvent, Event, EventFactory, HUMAN_RESPONSE_EVENT, HumanResponseEvent,
    INPUT_REQUIRED_EVENT, InputRequiredEvent, RetryPolicy, START_EVENT, STOP_EVENT, StartEvent,
    StopEvent,
};
