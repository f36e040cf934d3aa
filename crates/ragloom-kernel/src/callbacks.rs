//! Callback event vocabulary and the sink contract.
//!
//! The manager that builds trace trees and broadcasts to sinks lives in the
//! foundation crate; this module only fixes the shared types.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::KernelError;

/// Kinds of callback events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CBEventType {
    Chunking,
    NodeParsing,
    Embedding,
    Llm,
    Query,
    Retrieve,
    Synthesize,
    Tree,
    SubQuestion,
    Templating,
    FunctionCall,
    Reranking,
    Exception,
    AgentStep,
    WorkflowStep,
    Extraction,
    Postprocess,
}

impl CBEventType {
    pub const ALL: [CBEventType; 17] = [
        Self::Chunking,
        Self::NodeParsing,
        Self::Embedding,
        Self::Llm,
        Self::Query,
        Self::Retrieve,
        Self::Synthesize,
        Self::Tree,
        Self::SubQuestion,
        Self::Templating,
        Self::FunctionCall,
        Self::Reranking,
        Self::Exception,
        Self::AgentStep,
        Self::WorkflowStep,
        Self::Extraction,
        Self::Postprocess,
    ];

    /// Kinds that never have children unless configured otherwise.
    pub const DEFAULT_LEAVES: [CBEventType; 3] = [Self::Chunking, Self::Llm, Self::Embedding];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chunking => "chunking",
            Self::NodeParsing => "node_parsing",
            Self::Embedding => "embedding",
            Self::Llm => "llm",
            Self::Query => "query",
            Self::Retrieve => "retrieve",
            Self::Synthesize => "synthesize",
            Self::Tree => "tree",
            Self::SubQuestion => "sub_question",
            Self::Templating => "templating",
            Self::FunctionCall => "function_call",
            Self::Reranking => "reranking",
            Self::Exception => "exception",
            Self::AgentStep => "agent_step",
            Self::WorkflowStep => "workflow_step",
            Self::Extraction => "extraction",
            Self::Postprocess => "postprocess",
        }
    }
}

impl fmt::Display for CBEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CBEventType {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| KernelError::ConfigInvalid(format!("unknown callback event type '{s}'")))
    }
}

/// Well-known payload keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPayloadKey {
    Documents,
    Chunks,
    Nodes,
    Prompt,
    Messages,
    Completion,
    Response,
    QueryStr,
    SubQuestion,
    EmbeddingStrs,
    Embeddings,
    TopK,
    Template,
    TemplateVars,
    Serialized,
    FunctionCall,
    FunctionOutput,
    Tool,
    ModelName,
    Exception,
    Duration,
    Step,
    EventTag,
    RunId,
    Extractor,
}

impl EventPayloadKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Chunks => "chunks",
            Self::Nodes => "nodes",
            Self::Prompt => "formatted_prompt",
            Self::Messages => "messages",
            Self::Completion => "completion",
            Self::Response => "response",
            Self::QueryStr => "query_str",
            Self::SubQuestion => "sub_question",
            Self::EmbeddingStrs => "chunks_to_embed",
            Self::Embeddings => "embeddings",
            Self::TopK => "top_k",
            Self::Template => "template",
            Self::TemplateVars => "template_vars",
            Self::Serialized => "serialized",
            Self::FunctionCall => "function_call",
            Self::FunctionOutput => "function_call_response",
            Self::Tool => "tool",
            Self::ModelName => "model_name",
            Self::Exception => "exception",
            Self::Duration => "duration",
            Self::Step => "step",
            Self::EventTag => "event_type",
            Self::RunId => "run_id",
            Self::Extractor => "extractor",
        }
    }
}

/// String-keyed event payload crossing sink boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload(BTreeMap<String, Value>);

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: EventPayloadKey, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_custom(key, value);
        self
    }

    pub fn set(&mut self, key: EventPayloadKey, value: impl Into<Value>) {
        self.0.insert(key.as_str().to_string(), value.into());
    }

    pub fn set_custom(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: EventPayloadKey) -> Option<&Value> {
        self.0.get(key.as_str())
    }

    pub fn get_custom(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: EventPayloadKey) -> bool {
        self.0.contains_key(key.as_str())
    }

    /// Merge `other` into this payload; `other` wins on collisions.
    pub fn merge(&mut self, other: EventPayload) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

/// Parent event id to ordered child event ids.
pub type TraceMap = BTreeMap<String, Vec<String>>;

/// One node of the trace tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub id: String,
    pub parent_id: String,
    pub event_type: CBEventType,
    pub start_payload: EventPayload,
    pub end_payload: Option<EventPayload>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TraceFrame {
    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn elapsed(&self) -> Option<TimeDelta> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Render a duration as ISO-8601 (`PT0.125S`).
pub fn iso8601_duration(duration: std::time::Duration) -> String {
    match TimeDelta::from_std(duration) {
        Ok(delta) => delta.to_string(),
        Err(_) => format!("PT{}S", duration.as_secs()),
    }
}

/// A callback sink.
///
/// Sinks are invoked synchronously on the caller's task, so they should
/// record and return quickly. The manager holds no lock while calling them;
/// a sink may register or remove sinks from inside a callback.
pub trait CallbackHandler: Send + Sync {
    fn name(&self) -> &str {
        "callback_handler"
    }

    /// Kinds whose start is not delivered to this sink.
    fn event_starts_to_ignore(&self) -> Vec<CBEventType> {
        Vec::new()
    }

    /// Kinds whose end is not delivered to this sink.
    fn event_ends_to_ignore(&self) -> Vec<CBEventType> {
        Vec::new()
    }

    fn on_event_start(
        &self,
        event_type: CBEventType,
        payload: &EventPayload,
        event_id: &str,
        parent_id: &str,
    );

    fn on_event_end(&self, event_type: CBEventType, payload: &EventPayload, event_id: &str);

    fn start_trace(&self, trace_id: &str);

    fn end_trace(&self, trace_id: &str, trace_map: &TraceMap);
}
