//! In-memory debugging sink.
//!
//! Records every start/end it receives so tests and notebooks can inspect
//! event pairs, per-kind timings and LLM prompt/completion pairs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ragloom_kernel::callbacks::{CBEventType, CallbackHandler, EventPayload, TraceMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct CBEvent {
    pub event_type: CBEventType,
    pub event_id: String,
    pub payload: EventPayload,
    pub time: DateTime<Utc>,
}

/// Aggregate timing for one event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventStats {
    pub total_secs: f64,
    pub average_secs: f64,
    pub total_count: usize,
}

#[derive(Default)]
struct DebugState {
    /// Start or end events, in arrival order.
    events: Vec<(bool, CBEvent)>,
    last_trace_map: Option<TraceMap>,
}

/// Collects callback events for inspection.
#[derive(Default)]
pub struct DebugCallbackHandler {
    state: Mutex<DebugState>,
    starts_to_ignore: Vec<CBEventType>,
    ends_to_ignore: Vec<CBEventType>,
    print_trace_on_end: bool,
}

impl DebugCallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored(mut self, starts: Vec<CBEventType>, ends: Vec<CBEventType>) -> Self {
        self.starts_to_ignore = starts;
        self.ends_to_ignore = ends;
        self
    }

    /// Log the trace tree at `debug` level when the outermost trace ends.
    pub fn with_print_trace_on_end(mut self, print: bool) -> Self {
        self.print_trace_on_end = print;
        self
    }

    /// Recorded events, optionally of one kind, in arrival order.
    pub fn events(&self, kind: Option<CBEventType>) -> Vec<CBEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|(_, e)| kind.is_none_or(|k| e.event_type == k))
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Start/end pairs of one kind, ordered by start.
    pub fn event_pairs(&self, kind: CBEventType) -> Vec<(CBEvent, CBEvent)> {
        let state = self.state.lock();
        let mut pairs = Vec::new();
        for (is_start, start) in state.events.iter() {
            if !*is_start || start.event_type != kind {
                continue;
            }
            let end = state
                .events
                .iter()
                .find(|(s, e)| !*s && e.event_id == start.event_id);
            if let Some((_, end)) = end {
                pairs.push((start.clone(), end.clone()));
            }
        }
        pairs
    }

    /// `(start payload, end payload)` of every completed LLM call.
    pub fn llm_inputs_outputs(&self) -> Vec<(EventPayload, EventPayload)> {
        self.event_pairs(CBEventType::Llm)
            .into_iter()
            .map(|(start, end)| (start.payload, end.payload))
            .collect()
    }

    pub fn event_time_info(&self, kind: CBEventType) -> EventStats {
        let pairs = self.event_pairs(kind);
        let total_count = pairs.len();
        let total_secs: f64 = pairs
            .iter()
            .map(|(start, end)| {
                (end.time - start.time).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
            })
            .sum();
        EventStats {
            total_secs,
            average_secs: if total_count == 0 {
                0.0
            } else {
                total_secs / total_count as f64
            },
            total_count,
        }
    }

    pub fn last_trace_map(&self) -> Option<TraceMap> {
        self.state.lock().last_trace_map.clone()
    }

    /// Drop everything recorded so far.
    pub fn flush_event_logs(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.last_trace_map = None;
    }

    fn record(&self, is_start: bool, event_type: CBEventType, payload: &EventPayload, event_id: &str) {
        self.state.lock().events.push((
            is_start,
            CBEvent {
                event_type,
                event_id: event_id.to_string(),
                payload: payload.clone(),
                time: Utc::now(),
            },
        ));
    }
}

/// Render a trace map as an indented tree rooted at `root`.
pub fn render_trace_tree(trace_map: &TraceMap, root: &str) -> String {
    fn walk(map: &TraceMap, id: &str, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{}", "  ".repeat(depth), id));
        if let Some(children) = map.get(id) {
            for child in children {
                walk(map, child, depth + 1, out);
            }
        }
    }
    let mut lines = Vec::new();
    walk(trace_map, root, 0, &mut lines);
    lines.join("\n")
}

impl CallbackHandler for DebugCallbackHandler {
    fn name(&self) -> &str {
        "debug"
    }

    fn event_starts_to_ignore(&self) -> Vec<CBEventType> {
        self.starts_to_ignore.clone()
    }

    fn event_ends_to_ignore(&self) -> Vec<CBEventType> {
        self.ends_to_ignore.clone()
    }

    fn on_event_start(&self, kind: CBEventType, payload: &EventPayload, event_id: &str, _parent_id: &str) {
        self.record(true, kind, payload, event_id);
    }

    fn on_event_end(&self, kind: CBEventType, payload: &EventPayload, event_id: &str) {
        self.record(false, kind, payload, event_id);
    }

    fn start_trace(&self, _trace_id: &str) {}

    fn end_trace(&self, trace_id: &str, trace_map: &TraceMap) {
        self.state.lock().last_trace_map = Some(trace_map.clone());
        if self.print_trace_on_end {
            let root = trace_map
                .keys()
                .find(|k| !trace_map.values().any(|children| children.contains(k)))
                .cloned()
                .unwrap_or_default();
            debug!(trace_id, tree = %render_trace_tree(trace_map, &root), "trace finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackManager;
    use ragloom_kernel::callbacks::EventPayloadKey;
    use std::sync::Arc;

    #[test]
    fn records_pairs_and_llm_io() {
        let debug = Arc::new(DebugCallbackHandler::new().with_print_trace_on_end(true));
        let manager = CallbackManager::new().with_handler(debug.clone());

        manager.start_trace(Some("t"));
        let q = manager.on_event_start(CBEventType::Query, EventPayload::new(), None, None);
        let l = manager.on_event_start(
            CBEventType::Llm,
            EventPayload::new().with(EventPayloadKey::Prompt, "hi"),
            None,
            None,
        );
        manager.on_event_end(
            CBEventType::Llm,
            EventPayload::new().with(EventPayloadKey::Completion, "hello"),
            &l,
        );
        manager.on_event_end(CBEventType::Query, EventPayload::new(), &q);
        manager.end_trace(Some("t"));

        assert_eq!(debug.events(None).len(), 4);
        assert_eq!(debug.events(Some(CBEventType::Llm)).len(), 2);
        assert_eq!(debug.event_pairs(CBEventType::Query).len(), 1);

        let io = debug.llm_inputs_outputs();
        assert_eq!(io.len(), 1);
        assert_eq!(io[0].0.get(EventPayloadKey::Prompt).unwrap(), "hi");
        assert_eq!(io[0].1.get(EventPayloadKey::Completion).unwrap(), "hello");

        let stats = debug.event_time_info(CBEventType::Llm);
        assert_eq!(stats.total_count, 1);
        assert!(stats.total_secs >= 0.0);
        assert_eq!(debug.event_time_info(CBEventType::Embedding), EventStats::default());

        let map = debug.last_trace_map().unwrap();
        assert_eq!(render_trace_tree(&map, "root"), format!("root\n  {q}\n    {l}"));

        debug.flush_event_logs();
        assert!(debug.events(None).is_empty());
        assert!(debug.last_trace_map().is_none());
    }

    #[test]
    fn respects_ignore_sets() {
        let debug = Arc::new(
            DebugCallbackHandler::new().with_ignored(vec![CBEventType::Chunking], vec![]),
        );
        let manager = CallbackManager::new().with_handler(debug.clone());
        let id = manager.on_event_start(CBEventType::Chunking, EventPayload::new(), None, None);
        manager.on_event_end(CBEventType::Chunking, EventPayload::new(), &id);
        let events = debug.events(None);
        assert_eq!(events.len(), 1);
        assert!(debug.event_pairs(CBEventType::Chunking).is_empty());
    }
}
