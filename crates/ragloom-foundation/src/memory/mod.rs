//! 对话记忆缓冲区
//! Chat memory buffers
//!
//! Three [`ChatMemory`] implementations:
//!
//! - [`SimpleMemory`] keeps everything and returns everything.
//! - [`TokenBufferMemory`] keeps everything but returns only the newest
//!   messages that fit a token budget.
//! - [`SummaryBufferMemory`] folds messages that no longer fit into an
//!   LLM-written summary that is returned as a leading system message.
//!
//! State sits behind a `parking_lot::Mutex`; no lock is held across an
//! `.await`.

pub mod simple;
pub mod summary_buffer;
pub mod token_buffer;

pub use ragloom_kernel::memory::{ChatMemory, ChatMessage, MessageRole};
pub use simple::SimpleMemory;
pub use summary_buffer::SummaryBufferMemory;
pub use token_buffer::TokenBufferMemory;

use ragloom_kernel::llm::Tokenizer;

/// Default token budget for bounded buffers.
pub const DEFAULT_TOKEN_LIMIT: usize = 3000;

/// Start index of the longest suffix of `messages` whose token total is at
/// most `budget`.
pub(crate) fn fitting_suffix_start(
    tokenizer: &dyn Tokenizer,
    messages: &[ChatMessage],
    budget: usize,
) -> usize {
    let mut used = 0usize;
    for (i, message) in messages.iter().enumerate().rev() {
        used += tokenizer.count(&message.content);
        if used > budget {
            return i + 1;
        }
    }
    0
}

pub(crate) fn count_messages(tokenizer: &dyn Tokenizer, messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| tokenizer.count(&m.content)).sum()
}
