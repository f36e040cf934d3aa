use async_trait::async_trait;
use parking_lot::Mutex;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::memory::{ChatMemory, ChatMessage};

/// 无界消息列表
/// Unbounded, ordered message list
#[derive(Debug, Default)]
pub struct SimpleMemory {
    messages: Mutex<Vec<ChatMessage>>,
}

impl SimpleMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl ChatMemory for SimpleMemory {
    async fn put(&self, message: ChatMessage) -> KernelResult<()> {
        self.messages.lock().push(message);
        Ok(())
    }

    async fn put_messages(&self, messages: Vec<ChatMessage>) -> KernelResult<()> {
        self.messages.lock().extend(messages);
        Ok(())
    }

    async fn get(&self, _input: Option<&str>) -> KernelResult<Vec<ChatMessage>> {
        Ok(self.messages.lock().clone())
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
        "simple"
    }
}
