//! Questions an excerpt can answer.

use super::{ExtractorCore, MetadataExtractor, single};
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::prompt::format_template;
use ragloom_kernel::schema::{Metadata, Node};
use regex::Regex;

pub const QUESTIONS_KEY: &str = "questions_this_excerpt_can_answer";
pub const DEFAULT_NUM_QUESTIONS: usize = 3;

pub const DEFAULT_QUESTION_TEMPLATE: &str = "Here is the context:\n{context_str}\n\n\
Given the contextual information, generate {num_questions} questions this context can provide \
specific answers to which are unlikely to be found elsewhere.\n\n\
Higher-level summaries of surrounding context may be provided as well. \
Try using these summaries to generate better questions that this context can answer.\n\n";

/// Writes `questions_this_excerpt_can_answer`, one question per line.
#[derive(Debug, Clone)]
pub struct QuestionsAnsweredExtractor {
    core: ExtractorCore,
    questions: usize,
    template: String,
}

impl Default for QuestionsAnsweredExtractor {
    fn default() -> Self {
        Self::new(ExtractorCore::default())
    }
}

impl QuestionsAnsweredExtractor {
    pub fn new(core: ExtractorCore) -> Self {
        Self {
            core,
            questions: DEFAULT_NUM_QUESTIONS,
            template: DEFAULT_QUESTION_TEMPLATE.to_string(),
        }
    }

    pub fn with_questions(mut self, questions: usize) -> Self {
        self.questions = questions.max(1);
        self
    }

    /// Prompt with `{context_str}` and `{num_questions}` placeholders.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }
}

/// One question per non-blank line, numeric and bullet prefixes removed.
pub fn parse_questions(raw: &str) -> Vec<String> {
    let prefix = Regex::new(r"^\s*(?:\d+\s*[.):]|[-*•])\s*").ok();
    raw.lines()
        .map(|line| match &prefix {
            Some(re) => re.replace(line, "").trim().to_string(),
            None => line.trim().to_string(),
        })
        .filter(|q| !q.is_empty())
        .collect()
}

#[async_trait]
impl MetadataExtractor for QuestionsAnsweredExtractor {
    fn name(&self) -> &str {
        "questions_answered_extractor"
    }

    async fn extract(&self, nodes: &[Node]) -> KernelResult<Vec<Metadata>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let llm = self.core.require_llm(self.name())?;
        let name = self.name();
        let count = self.questions.to_string();

        self.core
            .instrument(name, nodes, || async {
                self.core
                    .map_ordered((0..nodes.len()).collect(), |i| {
                        let llm = llm.clone();
                        let prompt = format_template(
                            &self.template,
                            &[
                                ("context_str", self.core.context_of(&nodes[i]).as_str()),
                                ("num_questions", count.as_str()),
                            ],
                        );
                        async move {
                            let raw = self.core.complete(llm.as_ref(), name, &prompt).await?;
                            Ok(single(QUESTIONS_KEY, parse_questions(&raw).join("\n")))
                        }
                    })
                    .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{CallbackManager, DebugCallbackHandler};
    use async_trait::async_trait;
    use ragloom_kernel::callbacks::CBEventType;
    use ragloom_kernel::llm::LLM;
    use std::sync::Arc;

    struct Listing;

    #[async_trait]
    impl LLM for Listing {
        async fn complete(&self, _prompt: &str) -> KernelResult<String> {
            Ok("1. What is Rust?\n2) Who maintains tokio?\n\n- Why async?\n".to_string())
        }
    }

    #[test]
    fn prefixes_are_stripped() {
        assert_eq!(
            parse_questions("1. One?\n  10) Ten?\n* Star?\n• Dot?\nPlain?\n\n"),
            vec!["One?", "Ten?", "Star?", "Dot?", "Plain?"]
        );
    }

    #[tokio::test]
    async fn writes_questions_and_instruments() {
        let debug = Arc::new(DebugCallbackHandler::new());
        let manager = CallbackManager::new().with_handler(debug.clone());
        let extractor = QuestionsAnsweredExtractor::new(
            ExtractorCore::new(Arc::new(Listing)).with_callback_manager(manager),
        );
        let mut nodes = vec![Node::text("x")];
        extractor.process_nodes_in_place(&mut nodes).await.unwrap();

        assert_eq!(
            nodes[0].metadata()[QUESTIONS_KEY],
            "What is Rust?\nWho maintains tokio?\nWhy async?"
        );
        assert_eq!(debug.event_pairs(CBEventType::Extraction).len(), 1);
        assert_eq!(debug.event_pairs(CBEventType::Llm).len(), 1);
    }
}
