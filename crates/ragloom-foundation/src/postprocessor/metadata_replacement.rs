use super::NodePostprocessor;
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};
use serde_json::Value;

/// Replaces node content with the value stored under a metadata key, e.g.
/// swapping a sentence for its surrounding window. Nodes without the key
/// are left alone.
#[derive(Debug, Clone)]
pub struct MetadataReplacementPostprocessor {
    target_metadata_key: String,
}

impl MetadataReplacementPostprocessor {
    pub fn new(target_metadata_key: impl Into<String>) -> Self {
        Self {
            target_metadata_key: target_metadata_key.into(),
        }
    }
}

#[async_trait]
impl NodePostprocessor for MetadataReplacementPostprocessor {
    fn name(&self) -> &str {
        "metadata_replacement"
    }

    async fn postprocess_nodes(
        &self,
        mut nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        for scored in &mut nodes {
            let replacement = match scored.node.metadata().get(&self.target_metadata_key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => continue,
                Some(other) => other.to_string(),
            };
            scored.node.set_content(replacement);
        }
        Ok(nodes)
    }
}
