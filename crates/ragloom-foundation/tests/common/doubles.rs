//! Deterministic embedders, clock and tokenizer.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::{EmbeddingModel, FixedClock, Tokenizer, WhitespaceTokenizer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// `embed(s)` is one-hot at `s[0] mod 8`; the empty string embeds to zeros.
#[derive(Debug, Default)]
pub struct OneHotEmbedder {
    calls: AtomicUsize,
}

impl OneHotEmbedder {
    pub const DIM: usize = 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingModel for OneHotEmbedder {
    fn model_name(&self) -> &str {
        "one-hot"
    }

    async fn embed_text(&self, text: &str) -> KernelResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0; Self::DIM];
        if let Some(first) = text.bytes().next() {
            v[first as usize % Self::DIM] = 1.0;
        }
        Ok(v)
    }
}

/// Hashes lowercase words into a fixed number of buckets. Texts sharing
/// words end up close; `fail_on` makes any text containing it fail.
#[derive(Debug, Clone)]
pub struct BagOfWordsEmbedder {
    dim: usize,
    fail_on: Option<String>,
}

impl BagOfWordsEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1), fail_on: None }
    }

    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a; stable across runs and platforms.
        let hash = word
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
        (hash % self.dim as u64) as usize
    }
}

#[async_trait]
impl EmbeddingModel for BagOfWordsEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    async fn embed_text(&self, text: &str) -> KernelResult<Vec<f32>> {
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(KernelError::llm_failed(format!("refusing to embed '{needle}'")));
            }
        }
        let mut v = vec![0.0; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[self.bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(v)
    }
}

/// 2024-03-11T00:00:00Z.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(fixed_now()))
}

pub fn whitespace() -> Arc<dyn Tokenizer> {
    Arc::new(WhitespaceTokenizer)
}
