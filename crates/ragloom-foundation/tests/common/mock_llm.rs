//! Scripted LLM for integration tests.
//!
//! [`MockLLM`] answers `complete` calls from, in order of precedence:
//!
//! | Source | Set with |
//! |--------|----------|
//! | forced errors (FIFO) | `fail_next` |
//! | prompt substring match | `respond_to` |
//! | canned responses (FIFO) | `respond_with` |
//! | fallback | `with_fallback` (default `"ok"`) |
//!
//! Every prompt is recorded and can be read back with [`MockLLM::calls`].
//!
//! ```rust,ignore
//! let llm = MockLLM::new()
//!     .respond_to("Keywords:", "rust, async")
//!     .respond_with("first")
//!     .fail_next(KernelError::llm_failed("503"));
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::LLM;
use std::collections::VecDeque;

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    queued: VecDeque<String>,
    keyed: Vec<(String, String)>,
    errors: VecDeque<KernelError>,
}

pub struct MockLLM {
    state: Mutex<MockState>,
    fallback: String,
}

impl Default for MockLLM {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLLM {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            fallback: "ok".to_string(),
        }
    }

    /// Queue a response, returned once in FIFO order.
    pub fn respond_with(self, response: impl Into<String>) -> Self {
        self.state.lock().queued.push_back(response.into());
        self
    }

    /// Answer every prompt containing `needle` with `response`.
    pub fn respond_to(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.state.lock().keyed.push((needle.into(), response.into()));
        self
    }

    /// Fail the next call with `err`.
    pub fn fail_next(self, err: KernelError) -> Self {
        self.state.lock().errors.push_back(err);
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }
}

#[async_trait]
impl LLM for MockLLM {
    async fn complete(&self, prompt: &str) -> KernelResult<String> {
        let mut state = self.state.lock();
        state.calls.push(prompt.to_string());
        if let Some(err) = state.errors.pop_front() {
            return Err(err);
        }
        if let Some((_, response)) = state.keyed.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            return Ok(response.clone());
        }
        Ok(state.queued.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}
