//! Node parsers: documents in, ordered child nodes out.
//!
//! Every parser shares the same node construction: a child copies its
//! parent's metadata, exclusion lists and templates, points at the parent
//! through `SOURCE`, and (optionally) links to its siblings through
//! `PREVIOUS`/`NEXT`.

pub mod sentence;
pub mod split;
pub mod token;

pub use sentence::SentenceSplitter;
pub use split::{SentenceTokenizer, TextChunk};
pub use token::TokenTextSplitter;

use crate::callbacks::CallbackManager;
use ragloom_kernel::callbacks::{CBEventType, EventPayload, EventPayloadKey};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::Tokenizer;
use ragloom_kernel::schema::{Document, MetadataMode, Node, NodeRelationship};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Characters the text template puts between the metadata block and the body.
pub const METADATA_FORMAT_LEN: usize = 2;

/// Child id generator: `(index within parent, parent) -> id`.
pub type IdFn = Arc<dyn Fn(usize, &Node) -> String + Send + Sync>;

/// Random uuid v4 ids.
pub fn default_id_fn() -> IdFn {
    Arc::new(|_: usize, _: &Node| uuid::Uuid::new_v4().to_string())
}

/// Options shared by all parsers.
#[derive(Clone)]
pub struct ParserOptions {
    /// Copy parent metadata onto children and size chunks around it.
    pub include_metadata: bool,
    /// Link adjacent siblings through `PREVIOUS`/`NEXT`.
    pub include_prev_next_rel: bool,
    pub id_fn: IdFn,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            include_prev_next_rel: true,
            id_fn: default_id_fn(),
        }
    }
}

impl fmt::Debug for ParserOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserOptions")
            .field("include_metadata", &self.include_metadata)
            .field("include_prev_next_rel", &self.include_prev_next_rel)
            .finish_non_exhaustive()
    }
}

/// Splits parent nodes into ordered children.
///
/// Implementors provide [`NodeParser::split_node`]; relationship wiring,
/// metadata propagation and callback instrumentation come from the
/// provided methods.
///
/// ```rust,ignore
/// use ragloom_foundation::node_parser::{NodeParser, SentenceSplitter};
///
/// let parser = SentenceSplitter::new(256, 32)?;
/// let nodes = parser.get_nodes_from_documents(&documents)?;
/// ```
pub trait NodeParser: Send + Sync {
    fn name(&self) -> &str;

    fn options(&self) -> &ParserOptions;

    fn callback_manager(&self) -> &CallbackManager;

    /// Chunk one parent's text.
    fn split_node(&self, node: &Node) -> KernelResult<Vec<TextChunk>>;

    /// Parse nodes into children, in input order.
    fn parse_nodes(&self, nodes: &[Node]) -> KernelResult<Vec<Node>> {
        let parents: Vec<&Node> = nodes.iter().collect();
        self.parse_parents(&parents)
    }

    /// Parse documents into nodes, in input order.
    fn get_nodes_from_documents(&self, documents: &[Document]) -> KernelResult<Vec<Node>> {
        let parents: Vec<&Node> = documents.iter().map(Document::as_node).collect();
        self.parse_parents(&parents)
    }

    #[doc(hidden)]
    fn parse_parents(&self, parents: &[&Node]) -> KernelResult<Vec<Node>> {
        let manager = self.callback_manager();
        let ids: Vec<&str> = parents.iter().map(|p| p.id()).collect();
        let event_id = manager.on_event_start(
            CBEventType::NodeParsing,
            EventPayload::new().with(EventPayloadKey::Documents, ids),
            None,
            None,
        );

        let result = self.build_all(parents);
        let mut end = EventPayload::new();
        match &result {
            Ok(nodes) => {
                let ids: Vec<&str> = nodes.iter().map(|n| n.id()).collect();
                end.set(EventPayloadKey::Nodes, ids);
            }
            Err(err) => end.set(EventPayloadKey::Exception, err.to_string()),
        }
        manager.on_event_end(CBEventType::NodeParsing, end, &event_id);
        result
    }

    #[doc(hidden)]
    fn build_all(&self, parents: &[&Node]) -> KernelResult<Vec<Node>> {
        let options = self.options();
        let manager = self.callback_manager();
        let mut all = Vec::new();
        for parent in parents {
            let chunks = self.split_node(parent)?;
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let event_id = manager.on_event_start(
                CBEventType::Chunking,
                EventPayload::new().with(EventPayloadKey::Chunks, texts),
                None,
                None,
            );
            manager.on_event_end(CBEventType::Chunking, EventPayload::new(), &event_id);
            debug!(parser = self.name(), node_id = parent.id(), chunks = chunks.len(), "split node");
            all.extend(build_nodes_from_chunks(parent, chunks, options)?);
        }
        if options.include_prev_next_rel {
            link_siblings(&mut all)?;
        }
        Ok(all)
    }
}

/// Turn chunks of `parent` into child text nodes.
pub fn build_nodes_from_chunks(
    parent: &Node,
    chunks: Vec<TextChunk>,
    options: &ParserOptions,
) -> KernelResult<Vec<Node>> {
    let source = parent.as_related_node_info();
    let mut nodes = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut node = Node::text(chunk.text)
            .with_id((options.id_fn)(i, parent))
            .with_metadata_template(parent.metadata_template())
            .with_metadata_separator(parent.metadata_separator())
            .with_text_template(parent.text_template())
            .with_excluded_embed_metadata_keys(parent.excluded_embed_metadata_keys().to_vec())
            .with_excluded_llm_metadata_keys(parent.excluded_llm_metadata_keys().to_vec())
            .with_char_range(chunk.start_char_idx, chunk.end_char_idx);
        if options.include_metadata {
            let inherited = parent
                .metadata()
                .iter()
                .filter(|(key, _)| !node.metadata().contains_key(*key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            node.extend_metadata(inherited);
        }
        node.set_relationship(NodeRelationship::Source, source.clone())?;
        nodes.push(node);
    }
    Ok(nodes)
}

/// Set `PREVIOUS`/`NEXT` between adjacent nodes that share a source.
pub fn link_siblings(nodes: &mut [Node]) -> KernelResult<()> {
    for i in 1..nodes.len() {
        let same_source = match (nodes[i - 1].ref_doc_id(), nodes[i].ref_doc_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !same_source {
            continue;
        }
        let prev = nodes[i - 1].as_related_node_info();
        let next = nodes[i].as_related_node_info();
        nodes[i].set_relationship(NodeRelationship::Previous, prev)?;
        nodes[i - 1].set_relationship(NodeRelationship::Next, next)?;
    }
    Ok(())
}

/// Chunk size left for content once `node`'s metadata block is accounted for.
///
/// The block counted is the longer of the embed and LLM renderings plus the
/// template separator. Fails with `MetadataTooLarge` when nothing is left.
pub fn metadata_aware_chunk_size(
    node: &Node,
    tokenizer: &dyn Tokenizer,
    chunk_size: usize,
) -> KernelResult<usize> {
    let embed_len = tokenizer.count(&node.get_metadata_str(MetadataMode::Embed));
    let llm_len = tokenizer.count(&node.get_metadata_str(MetadataMode::Llm));
    if embed_len == 0 && llm_len == 0 {
        return Ok(chunk_size);
    }
    let metadata_len = embed_len.max(llm_len) + METADATA_FORMAT_LEN;
    if metadata_len >= chunk_size {
        return Err(KernelError::MetadataTooLarge {
            metadata_len,
            chunk_size,
        });
    }
    let effective = chunk_size - metadata_len;
    if effective < 50 {
        warn!(
            node_id = node.id(),
            metadata_len, effective, "metadata leaves little room for content; consider a larger chunk size"
        );
    }
    Ok(effective)
}

/// Reject `chunk_overlap >= chunk_size` and zero sizes.
pub fn validate_sizes(chunk_size: usize, chunk_overlap: usize) -> KernelResult<()> {
    if chunk_size == 0 {
        return Err(KernelError::ConfigInvalid("chunk_size must be positive".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(KernelError::ConfigInvalid(format!(
            "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}
