//! Workflow event model and step policies.
//!
//! The dispatcher that runs handlers lives in `ragloom-foundation`.

pub mod event;
pub mod policy;

pub use event::{
    ERROR_EVENT, ErrorEvent, Event, EventFactory, HUMAN_RESPONSE_EVENT, HumanResponseEvent,
    INPUT_REQUIRED_EVENT, InputRequiredEvent, RESERVED_TAGS, START_EVENT, STOP_EVENT, StartEvent,
    StopEvent,
};
pub use policy::RetryPolicy;
