//! Node postprocessors
//!
//! A postprocessor rewrites a retrieved `Vec<NodeWithScore>` under an
//! optional query: filtering, re-scoring, reordering or rewriting content.
//! [`PostprocessorChain`] composes them left to right.

pub mod keyword;
pub mod metadata_replacement;
pub mod recency;
pub mod reorder;
pub mod sentence_optimizer;
pub mod similarity_cutoff;
pub mod top_k;

pub use keyword::KeywordNodePostprocessor;
pub use metadata_replacement::MetadataReplacementPostprocessor;
pub use recency::{RecencyMode, RecencyPostprocessor};
pub use reorder::LongContextReorder;
pub use sentence_optimizer::SentenceEmbeddingOptimizer;
pub use similarity_cutoff::SimilarityCutoffPostprocessor;
pub use top_k::TopKPostprocessor;

use crate::callbacks::CallbackManager;
use crate::similarity::rank_order;
use async_trait::async_trait;
use ragloom_kernel::callbacks::{CBEventType, EventPayload, EventPayloadKey};
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait NodePostprocessor: Send + Sync {
    fn name(&self) -> &str;

    async fn postprocess_nodes(
        &self,
        nodes: Vec<NodeWithScore>,
        query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>>;
}

/// Sort by score descending, ties by node id ascending.
pub fn sort_by_score(nodes: &mut [NodeWithScore]) {
    nodes.sort_by(|a, b| rank_order(a.score, a.node_id(), b.score, b.node_id()));
}

/// Passes nodes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPostprocessor;

#[async_trait]
impl NodePostprocessor for IdentityPostprocessor {
    fn name(&self) -> &str {
        "identity"
    }

    async fn postprocess_nodes(
        &self,
        nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        Ok(nodes)
    }
}

/// Runs postprocessors in order, each on the previous one's output.
///
/// Every stage is reported as a `postprocess` callback event.
#[derive(Clone, Default)]
pub struct PostprocessorChain {
    stages: Vec<Arc<dyn NodePostprocessor>>,
    callback_manager: CallbackManager,
}

impl std::fmt::Debug for PostprocessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("PostprocessorChain").field("stages", &names).finish()
    }
}

impl PostprocessorChain {
    pub fn new(stages: Vec<Arc<dyn NodePostprocessor>>) -> Self {
        Self {
            stages,
            callback_manager: CallbackManager::new(),
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn NodePostprocessor>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl NodePostprocessor for PostprocessorChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn postprocess_nodes(
        &self,
        nodes: Vec<NodeWithScore>,
        query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        let mut nodes = nodes;
        for stage in &self.stages {
            if nodes.is_empty() {
                break;
            }
            let before = nodes.len();
            let mut payload = EventPayload::new()
                .with_custom("postprocessor", stage.name())
                .with(EventPayloadKey::Nodes, ids(&nodes));
            if let Some(query) = query {
                payload.set(EventPayloadKey::QueryStr, query.query_str.as_str());
            }
            nodes = self
                .callback_manager
                .with_event(CBEventType::Postprocess, payload, |scope| async move {
                    let out = stage.postprocess_nodes(nodes, query).await?;
                    scope.set_end_payload(EventPayloadKey::Nodes, ids(&out));
                    Ok(out)
                })
                .await?;
            debug!(stage = stage.name(), before, after = nodes.len(), "postprocessed");
        }
        Ok(nodes)
    }
}

fn ids(nodes: &[NodeWithScore]) -> Vec<String> {
    nodes.iter().map(|n| n.node_id().to_string()).collect()
}
