//! Sentence-level pruning of retrieved nodes.
//!
//! Each node is split into sentences, every sentence is embedded and scored
//! against the query, and only the best sentences (plus optional context
//! around them) are kept, in their original order.

use super::NodePostprocessor;
use crate::callbacks::CallbackManager;
use crate::node_parser::SentenceTokenizer;
use crate::node_parser::split::SENTENCE_REGEX;
use crate::similarity::cosine_similarity;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::EmbeddingModel;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Splits on the default sentence pattern, trimming each sentence.
#[derive(Debug, Clone)]
pub struct RegexSentenceTokenizer {
    pattern: Regex,
}

impl RegexSentenceTokenizer {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            pattern: crate::node_parser::split::compile(SENTENCE_REGEX)?,
        })
    }
}

impl SentenceTokenizer for RegexSentenceTokenizer {
    fn sentences(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub struct SentenceEmbeddingOptimizer {
    embed_model: Arc<dyn EmbeddingModel>,
    tokenizer: Option<Arc<dyn SentenceTokenizer>>,
    top_n: Option<usize>,
    threshold: Option<f32>,
    context_before: usize,
    context_after: usize,
    num_workers: usize,
    callback_manager: CallbackManager,
}

impl std::fmt::Debug for SentenceEmbeddingOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceEmbeddingOptimizer")
            .field("top_n", &self.top_n)
            .field("threshold", &self.threshold)
            .field("context_before", &self.context_before)
            .field("context_after", &self.context_after)
            .finish_non_exhaustive()
    }
}

impl SentenceEmbeddingOptimizer {
    pub fn new(embed_model: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            embed_model,
            tokenizer: None,
            top_n: None,
            threshold: None,
            context_before: 0,
            context_after: 0,
            num_workers: DEFAULT_NUM_WORKERS,
            callback_manager: CallbackManager::new(),
        }
    }

    /// Keep at most `n` sentences per node.
    pub fn with_top_n(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    /// Keep only sentences scoring at least `threshold`.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Also keep this many neighbouring sentences around each kept one.
    pub fn with_context(mut self, before: usize, after: usize) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }

    pub fn with_sentence_tokenizer(mut self, tokenizer: Arc<dyn SentenceTokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    /// Indices of the sentences to keep, ascending.
    fn select(&self, similarities: &[f32]) -> BTreeSet<usize> {
        let mut ranked: Vec<(usize, f32)> = similarities
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| self.threshold.is_none_or(|t| *s >= t))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        if let Some(n) = self.top_n {
            ranked.truncate(n);
        }

        let last = similarities.len().saturating_sub(1);
        ranked
            .into_iter()
            .flat_map(|(i, _)| i.saturating_sub(self.context_before)..=(i + self.context_after).min(last))
            .collect()
    }

    async fn optimize(
        &self,
        tokenizer: &dyn SentenceTokenizer,
        query: &[f32],
        mut scored: NodeWithScore,
    ) -> KernelResult<NodeWithScore> {
        let sentences = tokenizer.sentences(scored.content());
        if sentences.is_empty() {
            return Ok(scored);
        }
        let mut similarities = Vec::with_capacity(sentences.len());
        for sentence in &sentences {
            let embedding = self
                .callback_manager
                .embed_text(self.embed_model.as_ref(), sentence)
                .await
                .map_err(|err| match err {
                    KernelError::Cancelled => err,
                    other => KernelError::embed_failed(scored.node_id(), other),
                })?;
            similarities.push(cosine_similarity(query, &embedding)?);
        }

        let keep = self.select(&similarities);
        if keep.is_empty() {
            debug!(node_id = scored.node_id(), "no sentence qualified; content kept");
            return Ok(scored);
        }
        let text = keep
            .iter()
            .map(|&i| sentences[i].as_str())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(
            node_id = scored.node_id(),
            kept = keep.len(),
            total = sentences.len(),
            "sentences pruned"
        );
        scored.node.set_content(text);
        Ok(scored)
    }
}

#[async_trait]
impl NodePostprocessor for SentenceEmbeddingOptimizer {
    fn name(&self) -> &str {
        "sentence_embedding_optimizer"
    }

    async fn postprocess_nodes(
        &self,
        nodes: Vec<NodeWithScore>,
        query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        let query = query.ok_or_else(|| {
            KernelError::ConfigInvalid("sentence optimizer needs a query".into())
        })?;
        if nodes.is_empty() {
            return Ok(nodes);
        }
        let query_embedding = match &query.embedding {
            Some(embedding) => embedding.clone(),
            None => {
                self.callback_manager
                    .embed_query(self.embed_model.as_ref(), &query.query_str)
                    .await?
            }
        };
        let tokenizer: Arc<dyn SentenceTokenizer> = match &self.tokenizer {
            Some(tokenizer) => tokenizer.clone(),
            None => Arc::new(RegexSentenceTokenizer::new()?),
        };

        futures::stream::iter(nodes)
            .map(|node| self.optimize(tokenizer.as_ref(), &query_embedding, node))
            .buffered(self.num_workers)
            .try_collect()
            .await
    }
}
