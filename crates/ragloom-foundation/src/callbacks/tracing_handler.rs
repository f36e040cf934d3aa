//! Sink that mirrors callback traffic into `tracing`.

use ragloom_kernel::callbacks::{CBEventType, CallbackHandler, EventPayload, EventPayloadKey, TraceMap};
use tracing::{debug, info, warn};

/// Emits one `tracing` event per callback start/end and per trace boundary.
///
/// Starts and ends log at `debug`; ends carrying an `exception` log at `warn`.
#[derive(Debug, Default, Clone)]
pub struct TracingCallbackHandler {
    starts_to_ignore: Vec<CBEventType>,
    ends_to_ignore: Vec<CBEventType>,
}

impl TracingCallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored(mut self, starts: Vec<CBEventType>, ends: Vec<CBEventType>) -> Self {
        self.starts_to_ignore = starts;
        self.ends_to_ignore = ends;
        self
    }
}

impl CallbackHandler for TracingCallbackHandler {
    fn name(&self) -> &str {
        "tracing"
    }

    fn event_starts_to_ignore(&self) -> Vec<CBEventType> {
        self.starts_to_ignore.clone()
    }

    fn event_ends_to_ignore(&self) -> Vec<CBEventType> {
        self.ends_to_ignore.clone()
    }

    fn on_event_start(&self, kind: CBEventType, payload: &EventPayload, event_id: &str, parent_id: &str) {
        debug!(event_type = %kind, event_id, parent_id, keys = payload.len(), "callback event start");
    }

    fn on_event_end(&self, kind: CBEventType, payload: &EventPayload, event_id: &str) {
        let duration = payload
            .get(EventPayloadKey::Duration)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        match payload.get(EventPayloadKey::Exception) {
            Some(exception) => {
                warn!(event_type = %kind, event_id, duration, %exception, "callback event failed")
            }
            None => debug!(event_type = %kind, event_id, duration, "callback event end"),
        }
    }

    fn start_trace(&self, trace_id: &str) {
        info!(trace_id, "trace started");
    }

    fn end_trace(&self, trace_id: &str, trace_map: &TraceMap) {
        let events: usize = trace_map.values().map(Vec::len).sum();
        info!(trace_id, events, "trace ended");
    }
}
