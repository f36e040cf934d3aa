//! Callback manager: trace tree bookkeeping and sink broadcast.
//!
//! Sinks and their ignore sets are shared by every clone of a manager. The
//! trace map is owned by a trace tree; [`CallbackManager::for_run`] derives a
//! manager with a fresh tree so concurrent runs never interleave. The stack
//! of open events that picks implicit parents belongs to one scope:
//! [`CallbackManager::child_scope`] shares the tree but starts its own stack,
//! so concurrent tasks of one run each attach to their own parent.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use ragloom_kernel::callbacks::{
    CBEventType, CallbackHandler, EventPayload, EventPayloadKey, TraceFrame, TraceMap,
    iso8601_duration,
};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::{EmbeddingModel, LLM, Tool, ToolOutput};
use ragloom_kernel::settings::CallbackSettings;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_TRACE_ID: &str = "llama-index";
pub const ROOT_EVENT_ID: &str = "root";

struct RegisteredHandler {
    handler: Arc<dyn CallbackHandler>,
    starts_to_ignore: HashSet<CBEventType>,
    ends_to_ignore: HashSet<CBEventType>,
}

#[derive(Default)]
struct TraceTree {
    /// Nested trace ids; sinks only see the outermost.
    trace_ids: Vec<String>,
    trace_map: TraceMap,
    frames: Vec<TraceFrame>,
    /// Open leaf events and the parent each attached to.
    open_leaves: HashMap<String, String>,
}

impl TraceTree {
    fn reset(&mut self) {
        self.trace_map = TraceMap::new();
        self.frames.clear();
        self.open_leaves.clear();
    }
}

#[derive(Clone)]
pub struct CallbackManager {
    handlers: Arc<RwLock<Vec<Arc<RegisteredHandler>>>>,
    leaf_events: Arc<RwLock<HashSet<CBEventType>>>,
    default_trace_id: Arc<str>,
    root_event_id: Arc<str>,
    tree: Arc<Mutex<TraceTree>>,
    /// Open non-leaf events of this scope, innermost last.
    stack: Arc<Mutex<Vec<String>>>,
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackManager")
            .field("handlers", &self.handlers.read().len())
            .field("default_trace_id", &self.default_trace_id)
            .finish_non_exhaustive()
    }
}

impl CallbackManager {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            leaf_events: Arc::new(RwLock::new(CBEventType::DEFAULT_LEAVES.into_iter().collect())),
            default_trace_id: Arc::from(DEFAULT_TRACE_ID),
            root_event_id: Arc::from(ROOT_EVENT_ID),
            tree: Arc::new(Mutex::new(TraceTree::default())),
            stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build from settings. Unknown leaf event names are `ConfigInvalid`.
    pub fn from_settings(settings: &CallbackSettings) -> KernelResult<Self> {
        let leaves = settings
            .leaf_events
            .iter()
            .map(|name| name.parse::<CBEventType>())
            .collect::<KernelResult<Vec<_>>>()?;
        Ok(Self::new()
            .with_default_trace_id(settings.default_trace_id.clone())
            .with_root_event_id(settings.root_event_id.clone())
            .with_leaf_events(leaves))
    }

    pub fn with_handler(self, handler: Arc<dyn CallbackHandler>) -> Self {
        self.add_handler(handler);
        self
    }

    pub fn with_leaf_events(self, leaves: impl IntoIterator<Item = CBEventType>) -> Self {
        *self.leaf_events.write() = leaves.into_iter().collect();
        self
    }

    pub fn with_default_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.default_trace_id = Arc::from(trace_id.into());
        self
    }

    pub fn with_root_event_id(mut self, root: impl Into<String>) -> Self {
        self.root_event_id = Arc::from(root.into());
        self
    }

    /// A manager sharing this one's sinks and leaf set with a fresh trace tree.
    pub fn for_run(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            leaf_events: self.leaf_events.clone(),
            default_trace_id: self.default_trace_id.clone(),
            root_event_id: self.root_event_id.clone(),
            tree: Arc::new(Mutex::new(TraceTree::default())),
            stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A manager recording into the same trace tree whose events without an
    /// explicit parent attach under `parent_id` (or under events it opens
    /// itself). Give one to each concurrently running task.
    pub fn child_scope(&self, parent_id: &str) -> Self {
        Self {
            handlers: self.handlers.clone(),
            leaf_events: self.leaf_events.clone(),
            default_trace_id: self.default_trace_id.clone(),
            root_event_id: self.root_event_id.clone(),
            tree: self.tree.clone(),
            stack: Arc::new(Mutex::new(vec![parent_id.to_string()])),
        }
    }

    // ---- sinks -------------------------------------------------------------

    pub fn add_handler(&self, handler: Arc<dyn CallbackHandler>) {
        let registered = Arc::new(RegisteredHandler {
            starts_to_ignore: handler.event_starts_to_ignore().into_iter().collect(),
            ends_to_ignore: handler.event_ends_to_ignore().into_iter().collect(),
            handler,
        });
        self.handlers.write().push(registered);
    }

    /// Remove a previously added sink. Returns whether it was registered.
    pub fn remove_handler(&self, handler: &Arc<dyn CallbackHandler>) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| Arc::as_ptr(&h.handler) as *const () != target);
        handlers.len() != before
    }

    pub fn set_handlers(&self, handlers: Vec<Arc<dyn CallbackHandler>>) {
        self.handlers.write().clear();
        for handler in handlers {
            self.add_handler(handler);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Sinks are called on a snapshot, so a sink may add or remove sinks
    /// from inside its callbacks.
    fn sinks(&self) -> Vec<Arc<RegisteredHandler>> {
        self.handlers.read().clone()
    }

    pub fn is_leaf(&self, kind: CBEventType) -> bool {
        self.leaf_events.read().contains(&kind)
    }

    pub fn root_event_id(&self) -> &str {
        &self.root_event_id
    }

    // ---- events ------------------------------------------------------------

    /// Open an event and notify sinks. Returns the event id.
    ///
    /// Without an explicit parent the innermost open event of this scope is
    /// used; if no trace is running the default trace is started first. A
    /// parent that is an open leaf event is replaced by that leaf's parent.
    pub fn on_event_start(
        &self,
        kind: CBEventType,
        payload: EventPayload,
        event_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> String {
        let event_id = event_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let needs_trace = self.tree.lock().trace_ids.is_empty();
        if needs_trace {
            let default = self.default_trace_id.to_string();
            self.start_trace(Some(&default));
        }

        let leaf = self.is_leaf(kind);
        let parent_id = {
            let mut tree = self.tree.lock();
            let mut stack = self.stack.lock();
            let mut parent = parent_id
                .map(str::to_string)
                .or_else(|| stack.last().cloned())
                .unwrap_or_else(|| self.root_event_id.to_string());
            if let Some(leaf_parent) = tree.open_leaves.get(&parent) {
                debug!(
                    event_id = %event_id,
                    leaf = %parent,
                    "leaf events take no children; attaching to the leaf's parent"
                );
                parent = leaf_parent.clone();
            }
            tree.trace_map
                .entry(parent.clone())
                .or_default()
                .push(event_id.clone());
            if leaf {
                tree.open_leaves.insert(event_id.clone(), parent.clone());
            } else {
                stack.push(event_id.clone());
            }
            tree.frames.push(TraceFrame {
                id: event_id.clone(),
                parent_id: parent.clone(),
                event_type: kind,
                start_payload: payload.clone(),
                end_payload: None,
                started_at: Utc::now(),
                ended_at: None,
            });
            parent
        };

        for registered in self.sinks() {
            if !registered.starts_to_ignore.contains(&kind) {
                registered
                    .handler
                    .on_event_start(kind, &payload, &event_id, &parent_id);
            }
        }
        event_id
    }

    /// Close an event and notify sinks.
    pub fn on_event_end(&self, kind: CBEventType, payload: EventPayload, event_id: &str) {
        for registered in self.sinks() {
            if !registered.ends_to_ignore.contains(&kind) {
                registered.handler.on_event_end(kind, &payload, event_id);
            }
        }

        let mut tree = self.tree.lock();
        if self.is_leaf(kind) {
            tree.open_leaves.remove(event_id);
        } else {
            let mut stack = self.stack.lock();
            if let Some(pos) = stack.iter().rposition(|id| id == event_id) {
                stack.remove(pos);
            } else {
                debug!(event_id, event_type = %kind, "event end without matching start on stack");
            }
        }
        if let Some(frame) = tree.frames.iter_mut().rev().find(|f| f.id == event_id) {
            frame.end_payload = Some(payload);
            frame.ended_at = Some(Utc::now());
        }
    }

    // ---- traces ------------------------------------------------------------

    /// Begin a trace. Only the outermost trace resets the tree and reaches sinks.
    pub fn start_trace(&self, trace_id: Option<&str>) {
        let Some(trace_id) = trace_id else {
            return;
        };
        let outermost = {
            let mut tree = self.tree.lock();
            let outermost = tree.trace_ids.is_empty();
            if outermost {
                tree.reset();
                *self.stack.lock() = vec![self.root_event_id.to_string()];
            }
            tree.trace_ids.push(trace_id.to_string());
            outermost
        };
        if outermost {
            for registered in self.sinks() {
                registered.handler.start_trace(trace_id);
            }
        }
    }

    /// End a trace. Sinks receive the trace map when the outermost trace ends.
    pub fn end_trace(&self, trace_id: Option<&str>) {
        let Some(trace_id) = trace_id else {
            return;
        };
        let finished = {
            let mut tree = self.tree.lock();
            if tree.trace_ids.pop().is_none() {
                warn!(trace_id, "end_trace without an open trace");
                return;
            }
            tree.trace_ids.is_empty().then(|| tree.trace_map.clone())
        };
        if let Some(trace_map) = finished {
            for registered in self.sinks() {
                registered.handler.end_trace(trace_id, &trace_map);
            }
        }
    }

    /// Run `f` inside a trace; the trace is ended on every exit path.
    pub async fn with_trace<F, Fut, T>(&self, trace_id: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.start_trace(Some(trace_id));
        let _guard = TraceGuard {
            manager: self.clone(),
            trace_id: trace_id.to_string(),
        };
        f().await
    }

    /// Run `f` between an event start and end.
    ///
    /// The end payload carries whatever `f` stored through its [`EventScope`]
    /// plus `duration`; a failure also sets `exception` and is returned
    /// unchanged. If the future is dropped or panics the event is still ended.
    pub async fn with_event<F, Fut, T>(
        &self,
        kind: CBEventType,
        payload: EventPayload,
        f: F,
    ) -> KernelResult<T>
    where
        F: FnOnce(EventScope) -> Fut,
        Fut: Future<Output = KernelResult<T>>,
    {
        self.with_event_under(kind, payload, None, f).await
    }

    /// [`CallbackManager::with_event`] with an explicit parent event.
    pub async fn with_event_under<F, Fut, T>(
        &self,
        kind: CBEventType,
        payload: EventPayload,
        parent_id: Option<&str>,
        f: F,
    ) -> KernelResult<T>
    where
        F: FnOnce(EventScope) -> Fut,
        Fut: Future<Output = KernelResult<T>>,
    {
        let event_id = self.on_event_start(kind, payload, None, parent_id);
        let scope = EventScope {
            manager: self.clone(),
            kind,
            event_id,
            end_payload: Arc::new(Mutex::new(EventPayload::new())),
        };
        let mut guard = EventGuard {
            scope: scope.clone(),
            started: Instant::now(),
            done: false,
        };

        let result = f(scope).await;
        if let Err(err) = &result {
            guard
                .scope
                .set_end_payload(EventPayloadKey::Exception, err.to_string());
        }
        guard.finish();
        result
    }

    // ---- instrumented collaborator calls ----------------------------------

    /// `LLM::complete` wrapped in an `llm` event.
    pub async fn complete(&self, llm: &dyn LLM, prompt: &str) -> KernelResult<String> {
        let payload = EventPayload::new()
            .with(EventPayloadKey::Prompt, prompt)
            .with(EventPayloadKey::ModelName, llm.model_name());
        self.with_event(CBEventType::Llm, payload, |scope| async move {
            let completion = llm.complete(prompt).await?;
            scope.set_end_payload(EventPayloadKey::Completion, completion.clone());
            Ok(completion)
        })
        .await
    }

    /// `EmbeddingModel::embed_text` wrapped in an `embedding` event.
    pub async fn embed_text(&self, model: &dyn EmbeddingModel, text: &str) -> KernelResult<Vec<f32>> {
        let payload = EventPayload::new()
            .with(EventPayloadKey::EmbeddingStrs, vec![text])
            .with(EventPayloadKey::ModelName, model.model_name());
        self.with_event(CBEventType::Embedding, payload, |scope| async move {
            let vector = model.embed_text(text).await?;
            scope.set_end_payload(EventPayloadKey::Embeddings, vector.len());
            Ok(vector)
        })
        .await
    }

    /// `EmbeddingModel::embed_query` wrapped in an `embedding` event.
    pub async fn embed_query(&self, model: &dyn EmbeddingModel, query: &str) -> KernelResult<Vec<f32>> {
        let payload = EventPayload::new()
            .with(EventPayloadKey::QueryStr, query)
            .with(EventPayloadKey::ModelName, model.model_name());
        self.with_event(CBEventType::Embedding, payload, |scope| async move {
            let vector = model.embed_query(query).await?;
            scope.set_end_payload(EventPayloadKey::Embeddings, vector.len());
            Ok(vector)
        })
        .await
    }

    /// `Tool::call` wrapped in a `function_call` event.
    pub async fn call_tool(&self, tool: &dyn Tool, input: Value) -> KernelResult<ToolOutput> {
        let metadata = tool.metadata();
        let payload = EventPayload::new()
            .with(EventPayloadKey::FunctionCall, input.clone())
            .with(EventPayloadKey::Tool, metadata.name.clone());
        self.with_event(CBEventType::FunctionCall, payload, |scope| async move {
            let output = tool.call(input).await?;
            scope.set_end_payload(EventPayloadKey::FunctionOutput, output.content.clone());
            Ok(output)
        })
        .await
    }

    // ---- snapshots ---------------------------------------------------------

    pub fn trace_map(&self) -> TraceMap {
        self.tree.lock().trace_map.clone()
    }

    /// Frames of the current trace, in start order.
    pub fn frames(&self) -> Vec<TraceFrame> {
        self.tree.lock().frames.clone()
    }

    /// Innermost open event of this scope.
    pub fn current_parent(&self) -> Option<String> {
        self.stack.lock().last().cloned()
    }

    pub fn current_trace_id(&self) -> Option<String> {
        self.tree.lock().trace_ids.first().cloned()
    }
}

/// Handle passed to the body of [`CallbackManager::with_event`].
#[derive(Clone)]
pub struct EventScope {
    manager: CallbackManager,
    kind: CBEventType,
    event_id: String,
    end_payload: Arc<Mutex<EventPayload>>,
}

impl EventScope {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn kind(&self) -> CBEventType {
        self.kind
    }

    pub fn manager(&self) -> &CallbackManager {
        &self.manager
    }

    pub fn set_end_payload(&self, key: EventPayloadKey, value: impl Into<Value>) {
        self.end_payload.lock().set(key, value);
    }

    pub fn set_end_payload_custom(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.end_payload.lock().set_custom(key, value);
    }
}

struct EventGuard {
    scope: EventScope,
    started: Instant,
    done: bool,
}

impl EventGuard {
    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let mut payload = std::mem::take(&mut *self.scope.end_payload.lock());
        payload.set(
            EventPayloadKey::Duration,
            iso8601_duration(self.started.elapsed()),
        );
        self.scope
            .manager
            .on_event_end(self.scope.kind, payload, &self.scope.event_id);
    }
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        if !self.done {
            self.scope.set_end_payload(
                EventPayloadKey::Exception,
                KernelError::Cancelled.to_string(),
            );
            self.finish();
        }
    }
}

struct TraceGuard {
    manager: CallbackManager,
    trace_id: String,
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        self.manager.end_trace(Some(&self.trace_id));
    }
}
