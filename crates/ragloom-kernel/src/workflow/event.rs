//! Workflow events.
//!
//! An [`Event`] pairs a string type tag with a type-erased payload. Handlers
//! never downcast by hand; they go through an [`EventFactory`], which pins one
//! tag to one payload type:
//!
//! ```rust,ignore
//! use ragloom_kernel::workflow::EventFactory;
//!
//! #[derive(Clone)]
//! struct Retrieved { hits: usize }
//!
//! let retrieved = EventFactory::<Retrieved>::new("retrieved");
//! let event = retrieved.with(Retrieved { hits: 3 });
//! assert_eq!(retrieved.extract(&event).map(|r| r.hits), Some(3));
//! ```

use crate::error::KernelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub const START_EVENT: &str = "start";
pub const STOP_EVENT: &str = "stop";
pub const ERROR_EVENT: &str = "error";
pub const INPUT_REQUIRED_EVENT: &str = "input_required";
pub const HUMAN_RESPONSE_EVENT: &str = "human_response";

/// Tags owned by the engine. Applications pick other tags for their own events.
pub const RESERVED_TAGS: [&str; 5] = [
    START_EVENT,
    STOP_EVENT,
    ERROR_EVENT,
    INPUT_REQUIRED_EVENT,
    HUMAN_RESPONSE_EVENT,
];

type Payload = Arc<dyn Any + Send + Sync>;

/// A dispatched message.
///
/// `seq` is assigned by the dispatcher when the event is enqueued and is
/// monotonic within one run; `parent` is the seq of the event whose handler
/// emitted this one. Both are `None` until the event enters a run.
#[derive(Clone)]
pub struct Event {
    type_tag: Arc<str>,
    seq: Option<u64>,
    parent: Option<u64>,
    payload: Payload,
}

impl Event {
    /// Build an event directly. Prefer an [`EventFactory`].
    pub fn new<T: Any + Send + Sync>(type_tag: impl Into<Arc<str>>, payload: T) -> Self {
        Self {
            type_tag: type_tag.into(),
            seq: None,
            parent: None,
            payload: Arc::new(payload),
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn parent(&self) -> Option<u64> {
        self.parent
    }

    pub fn is(&self, type_tag: &str) -> bool {
        &*self.type_tag == type_tag
    }

    /// Borrow the payload as `T`, if it is one.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Stamp dispatcher bookkeeping. Called once per event by the engine.
    pub fn sealed(mut self, seq: u64, parent: Option<u64>) -> Self {
        self.seq = Some(seq);
        self.parent = parent;
        self
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("type_tag", &self.type_tag)
            .field("seq", &self.seq)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

/// Typed constructor/extractor for one event tag.
pub struct EventFactory<T> {
    type_tag: Arc<str>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for EventFactory<T> {
    fn clone(&self) -> Self {
        Self {
            type_tag: self.type_tag.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for EventFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFactory")
            .field("type_tag", &self.type_tag)
            .finish()
    }
}

impl<T: Any + Send + Sync + Clone> EventFactory<T> {
    pub fn new(type_tag: impl Into<Arc<str>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            _payload: PhantomData,
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn with(&self, payload: T) -> Event {
        Event {
            type_tag: self.type_tag.clone(),
            seq: None,
            parent: None,
            payload: Arc::new(payload),
        }
    }

    /// The payload, when `event` carries this factory's tag and type.
    pub fn extract(&self, event: &Event) -> Option<T> {
        if !event.is(&self.type_tag) {
            return None;
        }
        event.payload::<T>().cloned()
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.is(&self.type_tag) && event.payload::<T>().is_some()
    }
}

// ============================================================================
// Built-in payloads
// ============================================================================

/// Seeds a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartEvent {
    pub input: Value,
    #[serde(default)]
    pub metadata: Value,
}

impl StartEvent {
    pub fn new(input: impl Into<Value>) -> Self {
        Self {
            input: input.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn factory() -> EventFactory<StartEvent> {
        EventFactory::new(START_EVENT)
    }

    pub fn into_event(self) -> Event {
        Self::factory().with(self)
    }
}

/// Terminates a run; `result` becomes the run's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    pub result: Value,
    #[serde(default)]
    pub reason: String,
}

impl StopEvent {
    pub fn new(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            reason: "completed".to_string(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn factory() -> EventFactory<StopEvent> {
        EventFactory::new(STOP_EVENT)
    }

    pub fn into_event(self) -> Event {
        Self::factory().with(self)
    }
}

/// A handler failure, attached to the event that triggered it.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub event: Event,
    pub step: String,
    pub cause: KernelError,
}

impl ErrorEvent {
    pub fn new(event: Event, step: impl Into<String>, cause: KernelError) -> Self {
        Self {
            event,
            step: step.into(),
            cause,
        }
    }

    pub fn factory() -> EventFactory<ErrorEvent> {
        EventFactory::new(ERROR_EVENT)
    }

    pub fn into_event(self) -> Event {
        Self::factory().with(self)
    }
}

/// Emitted by a handler that needs a human before it can continue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRequiredEvent {
    pub prompt: String,
    #[serde(default)]
    pub metadata: Value,
}

impl InputRequiredEvent {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            metadata: Value::Null,
        }
    }

    pub fn factory() -> EventFactory<InputRequiredEvent> {
        EventFactory::new(INPUT_REQUIRED_EVENT)
    }

    pub fn into_event(self) -> Event {
        Self::factory().with(self)
    }
}

/// Injected by the caller to resume a suspended run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanResponseEvent {
    pub response: String,
    #[serde(default)]
    pub metadata: Value,
}

impl HumanResponseEvent {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            metadata: Value::Null,
        }
    }

    pub fn factory() -> EventFactory<HumanResponseEvent> {
        EventFactory::new(HUMAN_RESPONSE_EVENT)
    }

    pub fn into_event(self) -> Event {
        Self::factory().with(self)
    }
}
