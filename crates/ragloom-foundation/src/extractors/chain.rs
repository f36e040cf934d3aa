//! Sequential composition of extractors.

use super::MetadataExtractor;
use async_trait::async_trait;
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::schema::{Metadata, Node};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs extractors one after another on a working copy of the batch.
///
/// Later extractors see (and may override) what earlier ones wrote. Caller
/// nodes are only updated once every extractor has succeeded.
#[derive(Clone, Default)]
pub struct ExtractorChain {
    extractors: Vec<Arc<dyn MetadataExtractor>>,
    cancel: Option<CancellationToken>,
}

impl ExtractorChain {
    pub fn new(extractors: Vec<Arc<dyn MetadataExtractor>>) -> Self {
        Self {
            extractors,
            cancel: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    async fn run(&self, nodes: &[Node]) -> KernelResult<Vec<Node>> {
        let mut working = nodes.to_vec();
        for extractor in &self.extractors {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(KernelError::Cancelled);
            }
            let pass = extractor.extract(&working);
            let metadata = match &self.cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(KernelError::Cancelled),
                    result = pass => result?,
                },
                None => pass.await?,
            };
            debug!(extractor = extractor.name(), nodes = working.len(), "extractor pass complete");
            super::merge_metadata(&mut working, metadata);
        }
        Ok(working)
    }
}

#[async_trait]
impl MetadataExtractor for ExtractorChain {
    fn name(&self) -> &str {
        "extractor_chain"
    }

    /// Final metadata of each node after the whole chain.
    async fn extract(&self, nodes: &[Node]) -> KernelResult<Vec<Metadata>> {
        Ok(self
            .run(nodes)
            .await?
            .into_iter()
            .map(|node| node.metadata().clone())
            .collect())
    }

    async fn process_nodes(&self, nodes: &[Node]) -> KernelResult<Vec<Node>> {
        self.run(nodes).await
    }

    async fn process_nodes_in_place(&self, nodes: &mut [Node]) -> KernelResult<()> {
        let enriched = self.run(nodes).await?;
        for (node, done) in nodes.iter_mut().zip(enriched) {
            node.replace_metadata(done.metadata().clone());
        }
        Ok(())
    }
}
