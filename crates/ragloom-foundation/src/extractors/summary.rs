//! Section summaries, optionally shared with neighbours.

use super::{ExtractorCore, MetadataExtractor};
use async_trait::async_trait;
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::prompt::format_template;
use ragloom_kernel::schema::{Metadata, Node};
use std::str::FromStr;

pub const SECTION_SUMMARY_KEY: &str = "section_summary";
pub const PREV_SECTION_SUMMARY_KEY: &str = "prev_section_summary";
pub const NEXT_SECTION_SUMMARY_KEY: &str = "next_section_summary";

pub const DEFAULT_SUMMARY_TEMPLATE: &str = "Here is the content of the section:\n{context_str}\n\n\
Summarize the key topics and entities of the section. \nSummary: ";

/// Which summaries a node receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// The previous node's summary.
    Prev,
    /// The node's own summary.
    Own,
    /// The next node's summary.
    Next,
}

impl SummaryKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Prev => PREV_SECTION_SUMMARY_KEY,
            Self::Own => SECTION_SUMMARY_KEY,
            Self::Next => NEXT_SECTION_SUMMARY_KEY,
        }
    }
}

impl FromStr for SummaryKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prev" => Ok(Self::Prev),
            "self" => Ok(Self::Own),
            "next" => Ok(Self::Next),
            other => Err(KernelError::ConfigInvalid(format!(
                "unknown summary '{other}', expected prev, self or next"
            ))),
        }
    }
}

/// Writes `section_summary` and, when configured, the neighbouring
/// `prev_section_summary` / `next_section_summary`.
#[derive(Debug, Clone)]
pub struct SummaryExtractor {
    core: ExtractorCore,
    summaries: Vec<SummaryKind>,
    template: String,
}

impl Default for SummaryExtractor {
    fn default() -> Self {
        Self::new(ExtractorCore::default())
    }
}

impl SummaryExtractor {
    pub fn new(core: ExtractorCore) -> Self {
        Self {
            core,
            summaries: vec![SummaryKind::Own],
            template: DEFAULT_SUMMARY_TEMPLATE.to_string(),
        }
    }

    pub fn with_summaries(mut self, summaries: Vec<SummaryKind>) -> Self {
        self.summaries = summaries;
        self
    }

    /// Parse `["prev", "self", "next"]`-style names.
    pub fn with_summary_names(self, names: &[&str]) -> KernelResult<Self> {
        let summaries = names
            .iter()
            .map(|n| n.parse())
            .collect::<KernelResult<Vec<SummaryKind>>>()?;
        Ok(self.with_summaries(summaries))
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    fn wants(&self, kind: SummaryKind) -> bool {
        self.summaries.contains(&kind)
    }
}

#[async_trait]
impl MetadataExtractor for SummaryExtractor {
    fn name(&self) -> &str {
        "summary_extractor"
    }

    async fn extract(&self, nodes: &[Node]) -> KernelResult<Vec<Metadata>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let llm = self.core.require_llm(self.name())?;
        let name = self.name();

        let summaries: Vec<String> = self
            .core
            .instrument(name, nodes, || async {
                self.core
                    .map_ordered((0..nodes.len()).collect(), |i| {
                        let llm = llm.clone();
                        let prompt = format_template(
                            &self.template,
                            &[("context_str", self.core.context_of(&nodes[i]).as_str())],
                        );
                        async move {
                            let summary = self.core.complete(llm.as_ref(), name, &prompt).await?;
                            Ok(summary.trim().to_string())
                        }
                    })
                    .await
            })
            .await?;

        let last = summaries.len() - 1;
        Ok((0..summaries.len())
            .map(|i| {
                let mut metadata = Metadata::new();
                if self.wants(SummaryKind::Own) {
                    metadata.insert(SECTION_SUMMARY_KEY.into(), summaries[i].clone().into());
                }
                if self.wants(SummaryKind::Prev) && i > 0 {
                    metadata.insert(PREV_SECTION_SUMMARY_KEY.into(), summaries[i - 1].clone().into());
                }
                if self.wants(SummaryKind::Next) && i < last {
                    metadata.insert(NEXT_SECTION_SUMMARY_KEY.into(), summaries[i + 1].clone().into());
                }
                metadata
            })
            .collect())
    }
}
