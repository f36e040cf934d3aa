//! Collaborator contracts
//!
//! The toolkit never talks to a model provider directly. It consumes these
//! traits, and integrators plug in concrete clients. Implementations must be
//! safe for concurrent callers.

use crate::error::{KernelError, KernelResult};
use crate::memory::ChatMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// Lazy sequence of completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = KernelResult<String>> + Send>>;

// ============================================================================
// LLM
// ============================================================================

/// Text-generation collaborator.
#[async_trait]
pub trait LLM: Send + Sync {
    /// Model name, reported on `llm` callback payloads.
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// Complete a single prompt.
    async fn complete(&self, prompt: &str) -> KernelResult<String>;

    /// Chat over a message list.
    ///
    /// The default flattens the conversation into one prompt, one
    /// `role: content` line per message, and ends with `assistant: `.
    async fn chat(&self, messages: &[ChatMessage]) -> KernelResult<String> {
        let mut prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str("\nassistant: ");
        self.complete(&prompt).await
    }

    /// Stream a completion. The default yields the whole completion as one chunk.
    async fn stream(&self, prompt: &str) -> KernelResult<CompletionStream> {
        let text = self.complete(prompt).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Context window in tokens, when known.
    fn context_window(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// Embedding model
// ============================================================================

/// Dense-vector collaborator. Every vector from one instance shares a dimension.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str {
        "unknown"
    }

    async fn embed_text(&self, text: &str) -> KernelResult<Vec<f32>>;

    /// Embed a retrieval query. Defaults to [`EmbeddingModel::embed_text`].
    async fn embed_query(&self, query: &str) -> KernelResult<Vec<f32>> {
        self.embed_text(query).await
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Length function: text to a non-negative unit count.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Counts whitespace-separated words.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Counts Unicode scalar values. The default length function for splitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

// ============================================================================
// Clock
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Tool
// ============================================================================

/// 工具元数据
/// Tool metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    /// Parameters JSON schema
    pub parameters: Value,
    /// 结果直接返回给调用方，不再经过 LLM
    /// Return the output to the caller without another LLM turn
    #[serde(default)]
    pub return_direct: bool,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            return_direct: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_return_direct(mut self, return_direct: bool) -> Self {
        self.return_direct = return_direct;
        self
    }
}

/// 工具输出
/// Tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_name: String,
    /// 文本形式的结果
    /// Output rendered as text
    pub content: String,
    pub raw_input: Value,
    pub raw_output: Value,
    #[serde(default)]
    pub is_error: bool,
}

/// 工具 Trait
/// Tool trait
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;

    async fn call(&self, input: Value) -> KernelResult<ToolOutput>;
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, KernelResult<Value>> + Send + Sync>;

/// 由异步闭包构造的工具
/// Tool backed by an async closure
#[derive(Clone)]
pub struct FunctionTool {
    metadata: ToolMetadata,
    func: ToolFn,
}

impl FunctionTool {
    pub fn new<F, Fut>(metadata: ToolMetadata, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = KernelResult<Value>> + Send + 'static,
    {
        Self {
            metadata,
            func: Arc::new(move |input| Box::pin(func(input))),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    async fn call(&self, input: Value) -> KernelResult<ToolOutput> {
        let raw_output = (self.func)(input.clone()).await?;
        let content = crate::schema::render_value(&raw_output);
        Ok(ToolOutput {
            tool_name: self.metadata.name.clone(),
            content,
            raw_input: input,
            raw_output,
            is_error: false,
        })
    }
}

/// Reject calls to a tool that was handed the wrong argument shape.
pub fn require_object(tool: &str, input: &Value) -> KernelResult<()> {
    if input.is_object() {
        Ok(())
    } else {
        Err(KernelError::ConfigInvalid(format!(
            "tool '{tool}' expects an object argument, got {input}"
        )))
    }
}
