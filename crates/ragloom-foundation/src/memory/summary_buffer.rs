//! Summarising chat buffer.
//!
//! When the retained messages no longer fit the budget, the oldest ones are
//! folded (together with any earlier summary) into a new summary by the LLM.
//! Later calls to `get` return that summary as a leading system message.

use super::{DEFAULT_TOKEN_LIMIT, count_messages, fitting_suffix_start};
use crate::callbacks::CallbackManager;
use async_trait::async_trait;
use parking_lot::Mutex;
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::{LLM, Tokenizer, WhitespaceTokenizer};
use ragloom_kernel::memory::{ChatMemory, ChatMessage};
use ragloom_kernel::prompt::format_template;
use ragloom_kernel::settings::MemorySettings;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_SUMMARIZE_TEMPLATE: &str = "Summarise the following conversation concisely, \
preserving all important facts, decisions, and context. Write in third person.\n\n\
{previous_summary}---\n{history}\n---";

#[derive(Debug, Default)]
struct SummaryState {
    messages: Vec<ChatMessage>,
    /// Messages before this index are covered by `summary`.
    summarized: usize,
    summary: Option<String>,
    /// Bumped by every write; a summary computed against an older
    /// version is returned but not stored.
    version: u64,
}

impl SummaryState {
    fn touch(&mut self) {
        self.version += 1;
    }

    fn clear_summary(&mut self) {
        self.summarized = 0;
        self.summary = None;
    }
}

pub struct SummaryBufferMemory {
    llm: Arc<dyn LLM>,
    token_limit: usize,
    tokenizer: Arc<dyn Tokenizer>,
    template: String,
    callback_manager: CallbackManager,
    state: Mutex<SummaryState>,
}

impl std::fmt::Debug for SummaryBufferMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SummaryBufferMemory")
            .field("token_limit", &self.token_limit)
            .field("messages", &state.messages.len())
            .field("summarized", &state.summarized)
            .finish_non_exhaustive()
    }
}

impl SummaryBufferMemory {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self {
            llm,
            token_limit: DEFAULT_TOKEN_LIMIT,
            tokenizer: Arc::new(WhitespaceTokenizer),
            template: DEFAULT_SUMMARIZE_TEMPLATE.to_string(),
            callback_manager: CallbackManager::new(),
            state: Mutex::new(SummaryState::default()),
        }
    }

    pub fn from_settings(llm: Arc<dyn LLM>, settings: &MemorySettings) -> Self {
        Self::new(llm).with_token_limit(settings.token_limit)
    }

    pub fn with_token_limit(mut self, token_limit: usize) -> Self {
        self.token_limit = token_limit;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Prompt with `{history}` and `{previous_summary}` placeholders.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    /// Current summary, if one has been written.
    pub fn summary(&self) -> Option<String> {
        self.state.lock().summary.clone()
    }

    fn build_prompt(&self, previous: Option<&str>, messages: &[ChatMessage]) -> String {
        let history = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let previous = previous
            .map(|s| format!("Summary so far:\n{s}\n\n"))
            .unwrap_or_default();
        format_template(
            &self.template,
            &[("history", history.as_str()), ("previous_summary", previous.as_str())],
        )
    }

    fn window(summary: Option<&str>, retained: &[ChatMessage]) -> Vec<ChatMessage> {
        summary
            .map(ChatMessage::system)
            .into_iter()
            .chain(retained.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl ChatMemory for SummaryBufferMemory {
    async fn put(&self, message: ChatMessage) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.messages.push(message);
        state.touch();
        Ok(())
    }

    async fn put_messages(&self, messages: Vec<ChatMessage>) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.messages.extend(messages);
        state.touch();
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
        let budget = self.token_limit - initial;

        let (version, summarized, previous, retained) = {
            let state = self.state.lock();
            let retained = state.messages[state.summarized..].to_vec();
            let summary_tokens = state.summary.as_deref().map_or(0, |s| self.tokenizer.count(s));
            if summary_tokens + count_messages(self.tokenizer.as_ref(), &retained) <= budget {
                return Ok(Self::window(state.summary.as_deref(), &retained));
            }
            (state.version, state.summarized, state.summary.clone(), retained)
        };

        let split = fitting_suffix_start(self.tokenizer.as_ref(), &retained, budget);
        let (to_fold, kept) = retained.split_at(split);
        let summary = if to_fold.is_empty() {
            previous
        } else {
            let prompt = self.build_prompt(previous.as_deref(), to_fold);
            let text = self
                .callback_manager
                .complete(self.llm.as_ref(), &prompt)
                .await
                .map_err(|err| match err {
                    KernelError::LlmFailed(_) | KernelError::Cancelled => err,
                    other => KernelError::llm_failed(format!("summary memory: {other}")),
                })?;
            debug!(folded = to_fold.len(), kept = kept.len(), "conversation summarised");
            Some(text.trim().to_string())
        };

        let mut state = self.state.lock();
        if state.version == version {
            state.summarized = summarized + split;
            state.summary = summary.clone();
        } else {
            warn!("memory changed while summarising; summary not stored");
        }
        Ok(Self::window(summary.as_deref(), kept))
    }

    async fn get_all(&self) -> KernelResult<Vec<ChatMessage>> {
        Ok(self.state.lock().messages.clone())
    }

    async fn set(&self, messages: Vec<ChatMessage>) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.messages = messages;
        state.clear_summary();
        state.touch();
        Ok(())
    }

    async fn reset(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.messages.clear();
        state.clear_summary();
        state.touch();
        Ok(())
    }

    fn memory_type(&self) -> &str {
        "summary_buffer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloom_kernel::memory::MessageRole;
    use std::sync::Mutex as StdMutex;

    /// Returns "S<n>" and records prompts.
    #[derive(Default)]
    struct Summariser {
        prompts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl LLM for Summariser {
        async fn complete(&self, prompt: &str) -> KernelResult<String> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok(format!("S{}", prompts.len()))
        }
    }

    fn memory(llm: Arc<Summariser>, limit: usize) -> SummaryBufferMemory {
        SummaryBufferMemory::new(llm).with_token_limit(limit)
    }

    #[tokio::test]
    async fn under_budget_returns_everything() {
        let llm = Arc::new(Summariser::default());
        let memory = memory(llm.clone(), 10);
        memory.put(ChatMessage::user("a b c")).await.unwrap();
        assert_eq!(memory.get(None).await.unwrap().len(), 1);
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oldest_messages_are_folded() {
        let llm = Arc::new(Summariser::default());
        let memory = memory(llm.clone(), 6);
        memory
            .put_messages(vec![
                ChatMessage::user("one two three"),
                ChatMessage::assistant("four five"),
                ChatMessage::user("six seven eight"),
            ])
            .await
            .unwrap();

        let window = memory.get(None).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].role, MessageRole::System);
        assert_eq!(window[0].content, "S1");
        assert_eq!(window[1].content, "four five");
        assert!(llm.prompts.lock().unwrap()[0].contains("---\nuser: one two three\n---"));

        // The summary stays as a prefix without another LLM call.
        assert_eq!(memory.get(None).await.unwrap(), window);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
        assert_eq!(memory.get_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn previous_summary_is_folded_forward() {
        let llm = Arc::new(Summariser::default());
        let memory = memory(llm.clone(), 4);
        memory.put(ChatMessage::user("a b c")).await.unwrap();
        memory.put(ChatMessage::user("d e")).await.unwrap();
        memory.get(None).await.unwrap();
        memory.put(ChatMessage::user("f g h")).await.unwrap();

        let window = memory.get(None).await.unwrap();
        assert_eq!(window[0].content, "S2");
        assert!(llm.prompts.lock().unwrap()[1].contains("Summary so far:\nS1"));
    }

    #[tokio::test]
    async fn reset_drops_summary() {
        let llm = Arc::new(Summariser::default());
        let memory = memory(llm, 1);
        memory.put(ChatMessage::user("a b")).await.unwrap();
        memory.get(None).await.unwrap();
        assert!(memory.summary().is_some());
        memory.reset().await.unwrap();
        assert!(memory.summary().is_none());
        assert!(memory.get(None).await.unwrap().is_empty());
    }
}
