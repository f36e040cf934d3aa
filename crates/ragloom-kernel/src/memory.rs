//! 对话记忆
//! Chat memory
//!
//! 定义聊天消息模型与记忆缓冲区接口
//! Defines the chat message model and the memory buffer contract

use crate::error::KernelResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 消息角色
/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 聊天消息
/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// 工具名或参与者名 (可选)
    /// Tool or participant name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content).with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 聊天记忆 Trait
/// Chat memory trait
///
/// 所有实现都必须支持并发调用
/// Every implementation must be safe under concurrent callers
///
/// # 示例
/// # Example
///
/// ```rust,ignore
/// use ragloom_kernel::memory::{ChatMemory, ChatMessage};
///
/// memory.put(ChatMessage::user("hello")).await?;
/// let window = memory.get(Some("next question")).await?;
/// ```
#[async_trait]
pub trait ChatMemory: Send + Sync {
    /// 追加一条消息
    /// Append one message
    async fn put(&self, message: ChatMessage) -> KernelResult<()>;

    /// 追加多条消息
    /// Append several messages
    async fn put_messages(&self, messages: Vec<ChatMessage>) -> KernelResult<()> {
        for message in messages {
            self.put(message).await?;
        }
        Ok(())
    }

    /// 获取当前窗口 (可能省略旧消息)
    /// Current window; may elide older messages
    async fn get(&self, input: Option<&str>) -> KernelResult<Vec<ChatMessage>>;

    /// 获取全部消息 (不省略)
    /// Every stored message, never elided
    async fn get_all(&self) -> KernelResult<Vec<ChatMessage>>;

    /// 替换全部消息
    /// Replace the stored messages
    async fn set(&self, messages: Vec<ChatMessage>) -> KernelResult<()>;

    /// 清空
    /// Clear
    async fn reset(&self) -> KernelResult<()>;

    /// 记忆类型名称
    /// Memory type name
    fn memory_type(&self) -> &str {
        "memory"
    }
}
