//! Keyword extraction.

use super::{ExtractorCore, MetadataExtractor, single};
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::prompt::format_template;
use ragloom_kernel::schema::{Metadata, Node};

pub const KEYWORDS_KEY: &str = "excerpt_keywords";
pub const DEFAULT_KEYWORDS: usize = 5;

pub const DEFAULT_KEYWORD_TEMPLATE: &str = "{context_str}. Give {keywords} unique keywords for this \
document. Format as comma separated. Keywords: ";

/// Writes `excerpt_keywords` as a `", "`-joined list.
#[derive(Debug, Clone)]
pub struct KeywordsExtractor {
    core: ExtractorCore,
    keywords: usize,
    template: String,
}

impl Default for KeywordsExtractor {
    fn default() -> Self {
        Self::new(ExtractorCore::default())
    }
}

impl KeywordsExtractor {
    pub fn new(core: ExtractorCore) -> Self {
        Self {
            core,
            keywords: DEFAULT_KEYWORDS,
            template: DEFAULT_KEYWORD_TEMPLATE.to_string(),
        }
    }

    pub fn with_keywords(mut self, keywords: usize) -> Self {
        self.keywords = keywords.max(1);
        self
    }

    /// Prompt with `{context_str}` and `{keywords}` placeholders.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }
}

/// Split on commas, trim, drop blanks.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl MetadataExtractor for KeywordsExtractor {
    fn name(&self) -> &str {
        "keywords_extractor"
    }

    async fn extract(&self, nodes: &[Node]) -> KernelResult<Vec<Metadata>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let llm = self.core.require_llm(self.name())?;
        let name = self.name();
        let count = self.keywords.to_string();

        self.core
            .instrument(name, nodes, || async {
                self.core
                    .map_ordered((0..nodes.len()).collect(), |i| {
                        let llm = llm.clone();
                        let prompt = format_template(
                            &self.template,
                            &[
                                ("context_str", self.core.context_of(&nodes[i]).as_str()),
                                ("keywords", count.as_str()),
                            ],
                        );
                        async move {
                            let raw = self.core.complete(llm.as_ref(), name, &prompt).await?;
                            Ok(single(KEYWORDS_KEY, parse_keywords(&raw).join(", ")))
                        }
                    })
                    .await
            })
            .await
    }
}
