use super::NodePostprocessor;
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};

/// Keep the first `k` nodes in their current order.
#[derive(Debug, Clone, Copy)]
pub struct TopKPostprocessor {
    pub k: usize,
}

impl TopKPostprocessor {
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

#[async_trait]
impl NodePostprocessor for TopKPostprocessor {
    fn name(&self) -> &str {
        "top_k"
    }

    async fn postprocess_nodes(
        &self,
        mut nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        nodes.truncate(self.k);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocessor::test_support::{ids, scored};

    #[tokio::test]
    async fn truncates_without_sorting() {
        let nodes = vec![scored("a", "", 0.1), scored("b", "", 0.9), scored("c", "", 0.5)];
        let out = TopKPostprocessor::new(2).postprocess_nodes(nodes, None).await.unwrap();
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn k_larger_than_input() {
        let nodes = vec![scored("a", "", 0.1)];
        let out = TopKPostprocessor::new(5).postprocess_nodes(nodes, None).await.unwrap();
        assert_eq!(out.len(), 1);
    }
}
