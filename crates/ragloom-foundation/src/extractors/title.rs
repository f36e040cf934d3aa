//! Document title extraction.

use super::{ExtractorCore, MetadataExtractor, single};
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::prompt::format_template;
use ragloom_kernel::schema::{Metadata, Node};
use std::collections::HashMap;

pub const TITLE_KEY: &str = "document_title";
pub const DEFAULT_TITLE_NODES: usize = 5;

pub const DEFAULT_TITLE_NODE_TEMPLATE: &str = "Context: {context_str}. Give a title that summarizes all of \
the unique entities, titles or themes found in the context. Title: ";

pub const DEFAULT_TITLE_COMBINE_TEMPLATE: &str = "{context_str}. Based on the above candidate titles and \
content, what is the comprehensive title for this document? Title: ";

/// Writes `document_title`.
///
/// Nodes are grouped by source document (or by their own id when they have
/// none). The first `nodes` of each group each yield a candidate title, and
/// the candidates are combined into one title shared by the whole group.
#[derive(Debug, Clone)]
pub struct TitleExtractor {
    core: ExtractorCore,
    nodes: usize,
    node_template: String,
    combine_template: String,
}

impl Default for TitleExtractor {
    fn default() -> Self {
        Self::new(ExtractorCore::default())
    }
}

impl TitleExtractor {
    pub fn new(core: ExtractorCore) -> Self {
        Self {
            core,
            nodes: DEFAULT_TITLE_NODES,
            node_template: DEFAULT_TITLE_NODE_TEMPLATE.to_string(),
            combine_template: DEFAULT_TITLE_COMBINE_TEMPLATE.to_string(),
        }
    }

    /// Candidate nodes per document; at least one.
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes.max(1);
        self
    }

    pub fn with_node_template(mut self, template: impl Into<String>) -> Self {
        self.node_template = template.into();
        self
    }

    pub fn with_combine_template(mut self, template: impl Into<String>) -> Self {
        self.combine_template = template.into();
        self
    }
}

/// Group key per node and the groups in first-seen order.
fn group_nodes(nodes: &[Node]) -> (Vec<String>, Vec<(String, Vec<usize>)>) {
    let mut keys = Vec::with_capacity(nodes.len());
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        let key = node.ref_doc_id().unwrap_or(node.id()).to_string();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(i);
        keys.push(key);
    }
    (keys, groups)
}

#[async_trait]
impl MetadataExtractor for TitleExtractor {
    fn name(&self) -> &str {
        "title_extractor"
    }

    async fn extract(&self, nodes: &[Node]) -> KernelResult<Vec<Metadata>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let llm = self.core.require_llm(self.name())?;
        let name = self.name();

        self.core
            .instrument(name, nodes, || async {
                let (keys, groups) = group_nodes(nodes);

                // (group, node) pairs for every candidate, flattened so the
                // worker bound applies across groups.
                let candidates: Vec<(usize, usize)> = groups
                    .iter()
                    .enumerate()
                    .flat_map(|(g, (_, members))| members.iter().take(self.nodes).map(move |&i| (g, i)))
                    .collect();
                let titles = self
                    .core
                    .map_ordered(candidates, |(g, i)| {
                        let llm = llm.clone();
                        let prompt = format_template(
                            &self.node_template,
                            &[("context_str", self.core.context_of(&nodes[i]).as_str())],
                        );
                        async move {
                            let title = self.core.complete(llm.as_ref(), name, &prompt).await?;
                            Ok((g, title.trim().to_string()))
                        }
                    })
                    .await?;

                let mut per_group: Vec<Vec<String>> = vec![Vec::new(); groups.len()];
                for (g, title) in titles {
                    per_group[g].push(title);
                }

                let combined = self
                    .core
                    .map_ordered(per_group, |candidates| {
                        let llm = llm.clone();
                        let prompt = format_template(
                            &self.combine_template,
                            &[("context_str", candidates.join(", ").as_str())],
                        );
                        async move {
                            let title = self.core.complete(llm.as_ref(), name, &prompt).await?;
                            Ok(title.trim().to_string())
                        }
                    })
                    .await?;

                let by_key: HashMap<&str, &String> = groups
                    .iter()
                    .map(|(key, _)| key.as_str())
                    .zip(combined.iter())
                    .collect();
                Ok(keys
                    .iter()
                    .map(|key| single(TITLE_KEY, by_key.get(key.as_str()).map(|t| t.as_str()).unwrap_or_default()))
                    .collect())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragloom_kernel::error::ErrorKind;
    use ragloom_kernel::llm::LLM;
    use ragloom_kernel::schema::{Document, NodeRelationship};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recording {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLM for Recording {
        async fn complete(&self, prompt: &str) -> KernelResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("comprehensive title") {
                Ok(" Combined ".to_string())
            } else {
                Ok(format!("candidate {}", prompt.len()))
            }
        }
    }

    fn child_of(doc: &Document, text: &str) -> Node {
        Node::text(text)
            .with_relationship(NodeRelationship::Source, doc.as_related_node_info())
    }

    #[tokio::test]
    async fn one_title_per_document() {
        let llm = Arc::new(Recording::default());
        let extractor = TitleExtractor::new(ExtractorCore::new(llm.clone())).with_nodes(2);
        let d1 = Document::new("d1");
        let d2 = Document::new("d2");
        let nodes = vec![child_of(&d1, "a"), child_of(&d2, "b"), child_of(&d1, "c"), child_of(&d1, "d")];

        let metadata = extractor.extract(&nodes).await.unwrap();
        assert_eq!(metadata.len(), 4);
        assert!(metadata.iter().all(|m| m[TITLE_KEY] == "Combined"));

        // two candidates for d1, one for d2, then one combine per document
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 5);
        assert_eq!(prompts.iter().filter(|p| p.contains("comprehensive title")).count(), 2);
    }

    #[tokio::test]
    async fn empty_batch_needs_no_llm() {
        assert!(TitleExtractor::default().extract(&[]).await.unwrap().is_empty());
        let err = TitleExtractor::default().extract(&[Node::text("x")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LlmRequired);
    }

    #[test]
    fn grouping_falls_back_to_node_id() {
        let loose = Node::text("x").with_id("n1");
        let (keys, groups) = group_nodes(&[loose]);
        assert_eq!(keys, vec!["n1".to_string()]);
        assert_eq!(groups.len(), 1);
    }
}
