//! Token-bounded chat buffer.

use super::{DEFAULT_TOKEN_LIMIT, fitting_suffix_start};
use async_trait::async_trait;
use parking_lot::Mutex;
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::{Tokenizer, WhitespaceTokenizer};
use ragloom_kernel::memory::{ChatMemory, ChatMessage};
use ragloom_kernel::settings::MemorySettings;
use std::sync::Arc;
use tracing::debug;

/// Stores every message; `get` returns the newest ones that fit
/// `token_limit` minus the tokens of the pending input.
pub struct TokenBufferMemory {
    token_limit: usize,
    tokenizer: Arc<dyn Tokenizer>,
    messages: Mutex<Vec<ChatMessage>>,
}

impl std::fmt::Debug for TokenBufferMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBufferMemory")
            .field("token_limit", &self.token_limit)
            .field("messages", &self.messages.lock().len())
            .finish()
    }
}

impl Default for TokenBufferMemory {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LIMIT)
    }
}

impl TokenBufferMemory {
    pub fn new(token_limit: usize) -> Self {
        Self {
            token_limit,
            tokenizer: Arc::new(WhitespaceTokenizer),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn from_settings(settings: &MemorySettings) -> Self {
        Self::new(settings.token_limit)
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }
}

#[async_trait]
impl ChatMemory for TokenBufferMemory {
    async fn put(&self, message: ChatMessage) -> KernelResult<()> {
        self.messages.lock().push(message);
        Ok(())
    }

    async fn put_messages(&self, messages: Vec<ChatMessage>) -> KernelResult<()> {
        self.messages.lock().extend(messages);
        Ok(())
    }

    async fn get(&self, input: Option<&str>) -> KernelResult<Vec<ChatMessage>> {
        let initial = input.map(|text| self.tokenizer.count(text)).unwrap_or(0);
        if initial > self.token_limit {
            return Err(KernelError::ConfigInvalid(format!(
                "input uses {initial} tokens, over the memory limit of {}",
                self.token_limit
            )));
        }
        let messages = self.messages.lock();
        let start = fitting_suffix_start(self.tokenizer.as_ref(), &messages, self.token_limit - initial);
        if start > 0 {
            debug!(elided = start, kept = messages.len() - start, "memory window trimmed");
        }
        Ok(messages[start..].to_vec())
    }

    async fn get_all(&self) -> KernelResult<Vec<ChatMessage>> {
        Ok(self.messages.lock().clone())
    }

    async fn set(&self, messages: Vec<ChatMessage>) -> KernelResult<()> {
        *self.messages.lock() = messages;
        Ok(())
    }

    async fn reset(&self) -> KernelResult<()> {
        self.messages.lock().clear();
        Ok(())
    }

    fn memory_type(&self) -> &str {
        "token_buffer"
    }
}
