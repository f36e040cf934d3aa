use super::NodePostprocessor;
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};

/// Keeps nodes that contain every required keyword and none of the
/// excluded ones. Matching is case-insensitive unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct KeywordNodePostprocessor {
    required: Vec<String>,
    excluded: Vec<String>,
    case_sensitive: bool,
}

impl KeywordNodePostprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_required<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_excluded<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    fn keeps(&self, text: &str) -> bool {
        let fold = |s: &str| {
            if self.case_sensitive {
                s.to_string()
            } else {
                s.to_lowercase()
            }
        };
        let text = fold(text);
        self.required.iter().all(|k| text.contains(&fold(k)))
            && !self.excluded.iter().any(|k| text.contains(&fold(k)))
    }
}

#[async_trait]
impl NodePostprocessor for KeywordNodePostprocessor {
    fn name(&self) -> &str {
        "keyword_filter"
    }

    async fn postprocess_nodes(
        &self,
        mut nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        nodes.retain(|n| self.keeps(n.content()));
        Ok(nodes)
    }
}
