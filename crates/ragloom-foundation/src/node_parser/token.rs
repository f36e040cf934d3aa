//! Word-level splitter.
//!
//! Splits on a separator, then on each backup separator, then by character,
//! and counts chunk sizes with a tokenizer (whitespace words by default).

use super::split::{ChunkPacker, SplitLevel, TextChunk, resolve_chunks};
use super::{IdFn, NodeParser, ParserOptions, metadata_aware_chunk_size, validate_sizes};
use crate::callbacks::CallbackManager;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::llm::{Tokenizer, WhitespaceTokenizer};
use ragloom_kernel::schema::Node;
use std::sync::Arc;

pub const DEFAULT_TOKEN_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_TOKEN_CHUNK_OVERLAP: usize = 20;

#[derive(Clone)]
pub struct TokenTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: String,
    backup_separators: Vec<String>,
    tokenizer: Arc<dyn Tokenizer>,
    options: ParserOptions,
    callback_manager: CallbackManager,
}

impl std::fmt::Debug for TokenTextSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenTextSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("separator", &self.separator)
            .field("backup_separators", &self.backup_separators)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for TokenTextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_TOKEN_CHUNK_SIZE,
            chunk_overlap: DEFAULT_TOKEN_CHUNK_OVERLAP,
            separator: " ".to_string(),
            backup_separators: vec!["\n".to_string()],
            tokenizer: Arc::new(WhitespaceTokenizer),
            options: ParserOptions::default(),
            callback_manager: CallbackManager::new(),
        }
    }
}

impl TokenTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> KernelResult<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        })
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_backup_separators(mut self, separators: Vec<String>) -> Self {
        self.backup_separators = separators;
        self
    }

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

    fn packer(&self) -> ChunkPacker {
        let levels = std::iter::once(&self.separator)
            .chain(self.backup_separators.iter())
            .map(|sep| SplitLevel::Separator(sep.clone()))
            .chain(std::iter::once(SplitLevel::Chars))
            .collect();
        ChunkPacker::new(levels, self.tokenizer.clone())
    }

    pub fn split_text(&self, text: &str) -> Vec<TextChunk> {
        self.split_text_with_size(text, self.chunk_size)
    }

    fn split_text_with_size(&self, text: &str, chunk_size: usize) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        resolve_chunks(text, &self.packer().pack(text, chunk_size, self.chunk_overlap))
    }
}

impl NodeParser for TokenTextSplitter {
    fn name(&self) -> &str {
        "token_text_splitter"
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
