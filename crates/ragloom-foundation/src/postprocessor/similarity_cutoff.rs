use super::NodePostprocessor;
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};

/// Drops nodes scoring below `cutoff`. Order is preserved.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityCutoffPostprocessor {
    pub cutoff: f32,
}

impl SimilarityCutoffPostprocessor {
    pub fn new(cutoff: f32) -> Self {
        Self { cutoff }
    }
}

#[async_trait]
impl NodePostprocessor for SimilarityCutoffPostprocessor {
    fn name(&self) -> &str {
        "similarity_cutoff"
    }

    async fn postprocess_nodes(
        &self,
        mut nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        nodes.retain(|n| n.score >= self.cutoff);
        Ok(nodes)
    }
}
