//! Callback manager and built-in sinks.

pub mod debug;
pub mod manager;
pub mod tracing_handler;

pub use debug::{CBEvent, DebugCallbackHandler, EventStats, render_trace_tree};
pub use manager::{CallbackManager, DEFAULT_TRACE_ID, EventScope, ROOT_EVENT_ID};
pub use tracing_handler::TracingCallbackHandler;
