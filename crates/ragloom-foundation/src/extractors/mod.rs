//! Metadata extractors.
//!
//! An extractor reads a batch of nodes and produces one metadata map per
//! node, in input order. Merging the maps back into nodes is done by the
//! provided `process_nodes*` methods, so a failed batch never leaves nodes
//! half-written.

pub mod chain;
pub mod keywords;
pub mod questions;
pub mod summary;
pub mod title;

pub use chain::ExtractorChain;
pub use keywords::KeywordsExtractor;
pub use questions::QuestionsAnsweredExtractor;
pub use summary::{SummaryExtractor, SummaryKind};
pub use title::TitleExtractor;

use crate::callbacks::CallbackManager;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ragloom_kernel::callbacks::{CBEventType, EventPayload, EventPayloadKey};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::LLM;
use ragloom_kernel::schema::{Metadata, MetadataMode, Node};
use ragloom_kernel::settings::ExtractorSettings;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Produces metadata for a batch of nodes.
///
/// ```rust,ignore
/// use ragloom_foundation::extractors::{ExtractorCore, KeywordsExtractor, MetadataExtractor};
///
/// let extractor = KeywordsExtractor::new(ExtractorCore::new(llm));
/// let enriched = extractor.process_nodes(&nodes).await?;
/// ```
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// One metadata map per input node, in input order.
    async fn extract(&self, nodes: &[Node]) -> KernelResult<Vec<Metadata>>;

    /// Enriched copies of `nodes`; the input is never touched.
    async fn process_nodes(&self, nodes: &[Node]) -> KernelResult<Vec<Node>> {
        let metadata = self.extract(nodes).await?;
        let mut out = nodes.to_vec();
        merge_metadata(&mut out, metadata);
        Ok(out)
    }

    /// Enrich `nodes` in place. Nothing is written unless extraction succeeds.
    async fn process_nodes_in_place(&self, nodes: &mut [Node]) -> KernelResult<()> {
        let metadata = self.extract(nodes).await?;
        merge_metadata(nodes, metadata);
        Ok(())
    }
}

/// Merge extracted maps into nodes pairwise; extracted keys win.
pub fn merge_metadata(nodes: &mut [Node], metadata: Vec<Metadata>) {
    for (node, entries) in nodes.iter_mut().zip(metadata) {
        node.extend_metadata(entries);
    }
}

/// LLM access, worker pool and instrumentation shared by the built-in extractors.
#[derive(Clone)]
pub struct ExtractorCore {
    llm: Option<Arc<dyn LLM>>,
    num_workers: usize,
    metadata_mode: MetadataMode,
    callback_manager: CallbackManager,
    cancel: Option<CancellationToken>,
}

impl Default for ExtractorCore {
    fn default() -> Self {
        Self {
            llm: None,
            num_workers: DEFAULT_NUM_WORKERS,
            metadata_mode: MetadataMode::All,
            callback_manager: CallbackManager::new(),
            cancel: None,
        }
    }
}

impl std::fmt::Debug for ExtractorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorCore")
            .field("llm", &self.llm.as_ref().map(|l| l.model_name().to_string()))
            .field("num_workers", &self.num_workers)
            .field("metadata_mode", &self.metadata_mode)
            .finish_non_exhaustive()
    }
}

impl ExtractorCore {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self::default().with_llm(llm)
    }

    pub fn from_settings(settings: &ExtractorSettings) -> Self {
        Self::default().with_num_workers(settings.num_workers)
    }

    pub fn with_llm(mut self, llm: Arc<dyn LLM>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Concurrent LLM calls per batch; clamped to at least one.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Rendering used for `{context_str}`. `All` by default.
    pub fn with_metadata_mode(mut self, mode: MetadataMode) -> Self {
        self.metadata_mode = mode;
        self
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn metadata_mode(&self) -> MetadataMode {
        self.metadata_mode
    }

    pub fn callback_manager(&self) -> &CallbackManager {
        &self.callback_manager
    }

    /// Node content as the extractor prompt sees it.
    pub fn context_of(&self, node: &Node) -> String {
        node.get_content(self.metadata_mode)
    }

    /// The configured LLM, or `LlmRequired`.
    pub fn require_llm(&self, extractor: &str) -> KernelResult<Arc<dyn LLM>> {
        self.llm
            .clone()
            .ok_or_else(|| KernelError::LlmRequired(format!("{extractor} needs an LLM")))
    }

    /// Instrumented completion; provider errors surface as `LlmFailed`.
    pub async fn complete(&self, llm: &dyn LLM, extractor: &str, prompt: &str) -> KernelResult<String> {
        self.callback_manager
            .complete(llm, prompt)
            .await
            .map_err(|err| match err {
                KernelError::LlmFailed(_) | KernelError::Cancelled => err,
                other => KernelError::llm_failed(format!("{extractor}: {other}")),
            })
    }

    /// Map `items` through `f` with at most `num_workers` in flight.
    /// Output order follows input order; the first error wins.
    pub async fn map_ordered<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> KernelResult<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Fut + Send,
        Fut: Future<Output = KernelResult<R>> + Send,
    {
        let work = futures::stream::iter(items.into_iter().map(f))
            .buffered(self.num_workers)
            .try_collect::<Vec<R>>();
        self.cancellable(work).await
    }

    /// Race `fut` against the cancellation token, if one is set.
    pub async fn cancellable<R>(&self, fut: impl Future<Output = KernelResult<R>>) -> KernelResult<R> {
        match &self.cancel {
            Some(token) => {
                if token.is_cancelled() {
                    return Err(KernelError::Cancelled);
                }
                tokio::select! {
                    _ = token.cancelled() => Err(KernelError::Cancelled),
                    result = fut => result,
                }
            }
            None => fut.await,
        }
    }

    /// Run one extraction pass inside an `extraction` event.
    pub async fn instrument<R, F, Fut>(&self, extractor: &str, nodes: &[Node], f: F) -> KernelResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = KernelResult<R>>,
    {
        let ids: Vec<&str> = nodes.iter().map(Node::id).collect();
        let payload = EventPayload::new()
            .with(EventPayloadKey::Extractor, extractor)
            .with(EventPayloadKey::Nodes, ids);
        self.callback_manager
            .with_event(CBEventType::Extraction, payload, |_scope| f())
            .await
    }
}

/// A single-key metadata map.
pub(crate) fn single(key: &str, value: impl Into<serde_json::Value>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(key.to_string(), value.into());
    metadata
}
