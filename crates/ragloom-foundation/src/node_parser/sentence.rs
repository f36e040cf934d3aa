//! Sentence-aware splitter.
//!
//! Text is split paragraph first, then by sentence, then by clause, word and
//! finally character, stopping as soon as a piece fits. Pieces are packed
//! greedily into chunks; chunks after the first reach back into the previous
//! chunk for overlap.

use super::split::{
    CHUNKING_REGEX, ChunkPacker, SENTENCE_REGEX, SentenceTokenizer, SplitLevel, TextChunk,
    WORD_REGEX, compile, resolve_chunks,
};
use super::{IdFn, NodeParser, ParserOptions, metadata_aware_chunk_size, validate_sizes};
use crate::callbacks::CallbackManager;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::llm::{CharTokenizer, Tokenizer};
use ragloom_kernel::schema::Node;
use ragloom_kernel::settings::ParserSettings;
use regex::Regex;
use std::sync::Arc;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_PARAGRAPH_SEPARATOR: &str = "\n\n\n";

#[derive(Clone)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    paragraph_separator: String,
    sentence_regex: Regex,
    secondary_regex: Regex,
    word_regex: Regex,
    sentence_tokenizer: Option<Arc<dyn SentenceTokenizer>>,
    tokenizer: Arc<dyn Tokenizer>,
    options: ParserOptions,
    callback_manager: CallbackManager,
}

impl std::fmt::Debug for SentenceSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("paragraph_separator", &self.paragraph_separator)
            .field("secondary_regex", &self.secondary_regex.as_str())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SentenceSplitter {
    /// Character-counting splitter. Fails with `ConfigInvalid` when
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> KernelResult<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
            paragraph_separator: DEFAULT_PARAGRAPH_SEPARATOR.to_string(),
            sentence_regex: compile(SENTENCE_REGEX)?,
            secondary_regex: compile(CHUNKING_REGEX)?,
            word_regex: compile(WORD_REGEX)?,
            sentence_tokenizer: None,
            tokenizer: Arc::new(CharTokenizer),
            options: ParserOptions::default(),
            callback_manager: CallbackManager::new(),
        })
    }

    pub fn from_settings(settings: &ParserSettings) -> KernelResult<Self> {
        Ok(Self::new(settings.chunk_size, settings.chunk_overlap)?
            .with_paragraph_separator(settings.paragraph_separator.clone())
            .with_include_metadata(settings.include_metadata)
            .with_include_prev_next_rel(settings.include_prev_next_rel))
    }

    pub fn with_paragraph_separator(mut self, separator: impl Into<String>) -> Self {
        self.paragraph_separator = separator.into();
        self
    }

    /// Clause-level pattern used when a sentence is still too long.
    pub fn with_secondary_regex(mut self, pattern: &str) -> KernelResult<Self> {
        self.secondary_regex = compile(pattern)?;
        Ok(self)
    }

    /// Locate sentences with `tokenizer` instead of the paragraph and
    /// sentence patterns.
    pub fn with_sentence_tokenizer(mut self, tokenizer: Arc<dyn SentenceTokenizer>) -> Self {
        self.sentence_tokenizer = Some(tokenizer);
        self
    }

    /// Length function for chunk sizes. Characters by default.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_id_fn(mut self, id_fn: IdFn) -> Self {
        self.options.id_fn = id_fn;
        self
    }

    pub fn with_include_metadata(mut self, include: bool) -> Self {
        self.options.include_metadata = include;
        self
    }

    pub fn with_include_prev_next_rel(mut self, include: bool) -> Self {
        self.options.include_prev_next_rel = include;
        self
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn packer(&self) -> ChunkPacker {
        let mut levels = Vec::with_capacity(5);
        match &self.sentence_tokenizer {
            Some(tokenizer) => levels.push(SplitLevel::Sentences(tokenizer.clone())),
            None => {
                levels.push(SplitLevel::Separator(self.paragraph_separator.clone()));
                levels.push(SplitLevel::Pattern(self.sentence_regex.clone()));
            }
        }
        levels.push(SplitLevel::Pattern(self.secondary_regex.clone()));
        levels.push(SplitLevel::Pattern(self.word_regex.clone()));
        levels.push(SplitLevel::Chars);
        ChunkPacker::new(levels, self.tokenizer.clone())
    }

    /// Chunk raw text at the configured size.
    pub fn split_text(&self, text: &str) -> Vec<TextChunk> {
        self.split_text_with_size(text, self.chunk_size)
    }

    fn split_text_with_size(&self, text: &str, chunk_size: usize) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let spans = self.packer().pack(text, chunk_size, self.chunk_overlap);
        resolve_chunks(text, &spans)
    }
}

impl NodeParser for SentenceSplitter {
    fn name(&self) -> &str {
        "sentence_splitter"
    }

    fn options(&self) -> &ParserOptions {
        &self.options
    }

    fn callback_manager(&self) -> &CallbackManager {
        &self.callback_manager
    }

    fn split_node(&self, node: &Node) -> KernelResult<Vec<TextChunk>> {
        let size = if self.options.include_metadata {
            metadata_aware_chunk_size(node, self.tokenizer.as_ref(), self.chunk_size)?
        } else {
            self.chunk_size
        };
        Ok(self.split_text_with_size(node.content(), size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::DebugCallbackHandler;
    use ragloom_kernel::callbacks::CBEventType;
    use ragloom_kernel::error::ErrorKind;
    use ragloom_kernel::schema::Document;

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = SentenceSplitter::new(10, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn short_sentences_with_overlap() {
        let splitter = SentenceSplitter::new(10, 2).unwrap();
        let doc = Document::new("One. Two. Three.");
        let nodes = splitter.get_nodes_from_documents(&[doc.clone()]).unwrap();

        let texts: Vec<&str> = nodes.iter().map(|n| n.content()).collect();
        assert_eq!(texts, vec!["One. Two.", "wo. Three."]);
        assert_eq!(nodes[0].next_node().unwrap().node_id, nodes[1].id());
        assert_eq!(nodes[1].prev_node().unwrap().node_id, nodes[0].id());
        for node in &nodes {
            assert_eq!(node.source_node().unwrap().node_id, doc.doc_id());
        }
    }

    #[test]
    fn paragraphs_split_before_sentences() {
        let splitter = SentenceSplitter::new(24, 0).unwrap();
        let chunks = splitter.split_text("First para here.\n\n\nSecond para here.");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["First para here.", "Second para here."]);
    }

    #[test]
    fn prev_next_can_be_disabled() {
        let splitter = SentenceSplitter::new(10, 0)
            .unwrap()
            .with_include_prev_next_rel(false);
        let nodes = splitter
            .get_nodes_from_documents(&[Document::new("One. Two. Three.")])
            .unwrap();
        assert!(nodes.len() > 1);
        assert!(nodes.iter().all(|n| n.prev_node().is_none() && n.next_node().is_none()));
    }

    #[test]
    fn metadata_too_large() {
        let splitter = SentenceSplitter::new(10, 0).unwrap();
        let doc = Document::new("text").with_metadata_entry("title", "a long title");
        let err = splitter.get_nodes_from_documents(&[doc]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataTooLarge);
    }

    #[test]
    fn metadata_reduces_chunk_size() {
        let splitter = SentenceSplitter::new(40, 0).unwrap();
        // "k: v" plus the separator leaves 34 characters for content.
        let doc = Document::new("aaaa bbbb cccc dddd eeee ffff gggg hhhh iiii").with_metadata_entry("k", "v");
        let nodes = splitter.get_nodes_from_documents(&[doc]).unwrap();
        assert!(nodes.len() > 1);
        for node in &nodes {
            assert!(node.content().chars().count() <= 34);
            assert_eq!(node.metadata()["k"], "v");
        }
    }

    #[test]
    fn deterministic_ids_and_char_ranges() {
        let splitter = SentenceSplitter::new(10, 0)
            .unwrap()
            .with_id_fn(Arc::new(|i: usize, parent: &Node| format!("{}_{i}", parent.id())));
        let doc = Document::new("One. Two. Three.").with_id("doc");
        let nodes = splitter.get_nodes_from_documents(&[doc.clone()]).unwrap();
        assert_eq!(nodes[0].id(), "doc_0");
        assert_eq!(nodes[1].id(), "doc_1");
        for node in &nodes {
            let (s, e) = (node.start_char_idx().unwrap(), node.end_char_idx().unwrap());
            assert_eq!(&doc.content()[s..e], node.content());
        }
    }

    #[test]
    fn custom_sentence_tokenizer() {
        let splitter = SentenceSplitter::new(8, 0)
            .unwrap()
            .with_sentence_tokenizer(Arc::new(|text: &str| {
                text.split(';').map(str::to_string).collect::<Vec<_>>()
            }));
        let texts: Vec<String> = splitter
            .split_text("alpha;beta;gamma")
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["alpha;", "beta;", "gamma"]);
    }

    #[test]
    fn emits_parsing_and_chunking_events() {
        let debug = Arc::new(DebugCallbackHandler::new());
        let manager = CallbackManager::new().with_handler(debug.clone());
        let splitter = SentenceSplitter::new(10, 2).unwrap().with_callback_manager(manager.clone());
        splitter
            .get_nodes_from_documents(&[Document::new("One. Two. Three.")])
            .unwrap();

        assert_eq!(debug.event_pairs(CBEventType::NodeParsing).len(), 1);
        assert_eq!(debug.event_pairs(CBEventType::Chunking).len(), 1);
        let parsing = manager.trace_map();
        let root_children = &parsing["root"];
        assert_eq!(root_children.len(), 1);
        assert_eq!(parsing[&root_children[0]].len(), 1);
    }

    #[test]
    fn from_settings_uses_parser_section() {
        let settings = ParserSettings {
            chunk_size: 64,
            chunk_overlap: 8,
            ..Default::default()
        };
        let splitter = SentenceSplitter::from_settings(&settings).unwrap();
        assert_eq!((splitter.chunk_size(), splitter.chunk_overlap()), (64, 8));
        let bad = ParserSettings {
            chunk_size: 8,
            chunk_overlap: 8,
            ..Default::default()
        };
        assert!(SentenceSplitter::from_settings(&bad).is_err());
    }
}
