//! Node & document model
//!
//! A [`Node`] is the content unit that flows through parsing, extraction,
//! retrieval and postprocessing. Its hash is derived from the kind, the
//! optional character range and the content rendered with every metadata key,
//! and is re-derived by every mutator, so two nodes with equal hashes render
//! identically.
//!
//! Relationships never hold other nodes. They hold a [`RelatedNodeInfo`]
//! snapshot (id, kind, metadata, hash), which keeps the parent/child graph
//! acyclic in memory.

use crate::error::{KernelError, KernelResult};
use crate::prompt::format_template;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Node metadata. A `BTreeMap` keeps keys sorted so rendering is deterministic.
pub type Metadata = BTreeMap<String, Value>;

pub const DEFAULT_METADATA_TEMPLATE: &str = "{key}: {value}";
pub const DEFAULT_METADATA_SEPARATOR: &str = "\n";
pub const DEFAULT_TEXT_TEMPLATE: &str = "{metadata_str}\n\n{content}";
pub const DEFAULT_MIMETYPE: &str = "text/plain";

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Text,
    Image,
    Index,
    Document,
    Multimodal,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Index => "index",
            Self::Document => "document",
            Self::Multimodal => "multimodal",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which metadata keys take part in rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataMode {
    /// Every key.
    All,
    /// Drops the embed-excluded keys.
    Embed,
    /// Drops the LLM-excluded keys.
    Llm,
    /// No metadata at all; only the text body.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRelationship {
    Source,
    Previous,
    Next,
    Parent,
    Child,
}

impl NodeRelationship {
    /// `Child` is the only multi-valued relationship.
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Child)
    }
}

/// Snapshot of a related node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedNodeInfo {
    pub node_id: String,
    pub node_type: Option<ObjectType>,
    #[serde(default)]
    pub metadata: Metadata,
    pub hash: Option<String>,
}

impl RelatedNodeInfo {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: None,
            metadata: Metadata::new(),
            hash: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedNodes {
    Single(RelatedNodeInfo),
    Multiple(Vec<RelatedNodeInfo>),
}

/// Payload carried only by image and multimodal nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// Base64-encoded image bytes.
    pub image: Option<String>,
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub image_mimetype: Option<String>,
}

// ============================================================================
// Node
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: String,
    kind: ObjectType,
    text: String,
    embedding: Option<Vec<f32>>,
    metadata: Metadata,
    excluded_embed_metadata_keys: Vec<String>,
    excluded_llm_metadata_keys: Vec<String>,
    relationships: BTreeMap<NodeRelationship, RelatedNodes>,
    hash: String,
    start_char_idx: Option<usize>,
    end_char_idx: Option<usize>,
    mimetype: String,
    metadata_template: String,
    metadata_separator: String,
    text_template: String,
    image: Option<ImageData>,
    index_id: Option<String>,
}

impl Node {
    /// Create a node of the given kind with a fresh uuid v4 id.
    pub fn new(kind: ObjectType, text: impl Into<String>) -> Self {
        let mut node = Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            text: text.into(),
            embedding: None,
            metadata: Metadata::new(),
            excluded_embed_metadata_keys: Vec::new(),
            excluded_llm_metadata_keys: Vec::new(),
            relationships: BTreeMap::new(),
            hash: String::new(),
            start_char_idx: None,
            end_char_idx: None,
            mimetype: DEFAULT_MIMETYPE.to_string(),
            metadata_template: DEFAULT_METADATA_TEMPLATE.to_string(),
            metadata_separator: DEFAULT_METADATA_SEPARATOR.to_string(),
            text_template: DEFAULT_TEXT_TEMPLATE.to_string(),
            image: None,
            index_id: None,
        };
        if matches!(kind, ObjectType::Image | ObjectType::Multimodal) {
            node.image = Some(ImageData::default());
        }
        node.rehash();
        node
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ObjectType::Text, text)
    }

    /// Image node; `text` is an optional caption.
    pub fn image(image: ImageData, text: impl Into<String>) -> Self {
        let mut node = Self::new(ObjectType::Image, text);
        node.image = Some(image);
        node
    }

    /// Node standing in for another index.
    pub fn index(text: impl Into<String>, index_id: impl Into<String>) -> Self {
        let mut node = Self::new(ObjectType::Index, text);
        node.index_id = Some(index_id.into());
        node
    }

    // ---- builders ----------------------------------------------------------

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self.rehash();
        self
    }

    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self.rehash();
        self
    }

    pub fn with_excluded_embed_metadata_keys(mut self, keys: Vec<String>) -> Self {
        self.excluded_embed_metadata_keys = keys;
        self
    }

    pub fn with_excluded_llm_metadata_keys(mut self, keys: Vec<String>) -> Self {
        self.excluded_llm_metadata_keys = keys;
        self
    }

    pub fn with_char_range(mut self, start: usize, end: usize) -> Self {
        self.set_char_range(Some(start), Some(end));
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    pub fn with_metadata_template(mut self, template: impl Into<String>) -> Self {
        self.metadata_template = template.into();
        self.rehash();
        self
    }

    pub fn with_metadata_separator(mut self, separator: impl Into<String>) -> Self {
        self.metadata_separator = separator.into();
        self.rehash();
        self
    }

    pub fn with_text_template(mut self, template: impl Into<String>) -> Self {
        self.text_template = template.into();
        self.rehash();
        self
    }

    pub fn with_relationship(mut self, rel: NodeRelationship, info: RelatedNodeInfo) -> Self {
        if rel.is_multi() {
            self.add_child(info);
        } else {
            self.relationships.insert(rel, RelatedNodes::Single(info));
        }
        self
    }

    // ---- accessors ---------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    /// Raw text body, without metadata.
    pub fn content(&self) -> &str {
        &self.text
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn excluded_embed_metadata_keys(&self) -> &[String] {
        &self.excluded_embed_metadata_keys
    }

    pub fn excluded_llm_metadata_keys(&self) -> &[String] {
        &self.excluded_llm_metadata_keys
    }

    pub fn relationships(&self) -> &BTreeMap<NodeRelationship, RelatedNodes> {
        &self.relationships
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn start_char_idx(&self) -> Option<usize> {
        self.start_char_idx
    }

    pub fn end_char_idx(&self) -> Option<usize> {
        self.end_char_idx
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    pub fn metadata_separator(&self) -> &str {
        &self.metadata_separator
    }

    pub fn metadata_template(&self) -> &str {
        &self.metadata_template
    }

    pub fn text_template(&self) -> &str {
        &self.text_template
    }

    /// Image payload; `InvalidKind` unless the node is an image or multimodal node.
    pub fn image_data(&self) -> KernelResult<&ImageData> {
        match (&self.image, self.kind) {
            (Some(image), ObjectType::Image | ObjectType::Multimodal) => Ok(image),
            _ => Err(KernelError::invalid_kind(ObjectType::Image, self.kind)),
        }
    }

    pub fn image_data_mut(&mut self) -> KernelResult<&mut ImageData> {
        let kind = self.kind;
        match (&mut self.image, kind) {
            (Some(image), ObjectType::Image | ObjectType::Multimodal) => Ok(image),
            _ => Err(KernelError::invalid_kind(ObjectType::Image, kind)),
        }
    }

    /// Id of the index this node stands for; `InvalidKind` on other kinds.
    pub fn index_id(&self) -> KernelResult<&str> {
        match (&self.index_id, self.kind) {
            (Some(id), ObjectType::Index) => Ok(id),
            _ => Err(KernelError::invalid_kind(ObjectType::Index, self.kind)),
        }
    }

    // ---- mutation ----------------------------------------------------------

    /// Replace the text body and re-derive the hash.
    pub fn set_content(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.rehash();
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
        self.rehash();
    }

    /// Merge entries, overriding existing keys.
    pub fn extend_metadata(&mut self, entries: Metadata) {
        if entries.is_empty() {
            return;
        }
        self.metadata.extend(entries);
        self.rehash();
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<Value> {
        let removed = self.metadata.remove(key);
        if removed.is_some() {
            self.rehash();
        }
        removed
    }

    pub fn replace_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
        self.rehash();
    }

    pub fn set_embedding(&mut self, embedding: Option<Vec<f32>>) {
        self.embedding = embedding;
    }

    pub fn set_char_range(&mut self, start: Option<usize>, end: Option<usize>) {
        self.start_char_idx = start;
        self.end_char_idx = end;
        self.rehash();
    }

    pub fn set_excluded_embed_metadata_keys(&mut self, keys: Vec<String>) {
        self.excluded_embed_metadata_keys = keys;
    }

    pub fn set_excluded_llm_metadata_keys(&mut self, keys: Vec<String>) {
        self.excluded_llm_metadata_keys = keys;
    }

    /// Set a single-valued relationship. `Child` must go through
    /// [`Node::set_children`] / [`Node::add_child`].
    pub fn set_relationship(&mut self, rel: NodeRelationship, info: RelatedNodeInfo) -> KernelResult<()> {
        if rel.is_multi() {
            return Err(KernelError::ConfigInvalid(
                "CHILD is multi-valued; use set_children or add_child".to_string(),
            ));
        }
        self.relationships.insert(rel, RelatedNodes::Single(info));
        Ok(())
    }

    pub fn set_children(&mut self, children: Vec<RelatedNodeInfo>) {
        self.relationships
            .insert(NodeRelationship::Child, RelatedNodes::Multiple(children));
    }

    pub fn add_child(&mut self, child: RelatedNodeInfo) {
        match self.relationships.get_mut(&NodeRelationship::Child) {
            Some(RelatedNodes::Multiple(children)) => children.push(child),
            _ => self.set_children(vec![child]),
        }
    }

    pub fn remove_relationship(&mut self, rel: NodeRelationship) -> Option<RelatedNodes> {
        self.relationships.remove(&rel)
    }

    // ---- relationship helpers ---------------------------------------------

    fn single(&self, rel: NodeRelationship) -> Option<&RelatedNodeInfo> {
        match self.relationships.get(&rel) {
            Some(RelatedNodes::Single(info)) => Some(info),
            _ => None,
        }
    }

    pub fn source_node(&self) -> Option<&RelatedNodeInfo> {
        self.single(NodeRelationship::Source)
    }

    pub fn prev_node(&self) -> Option<&RelatedNodeInfo> {
        self.single(NodeRelationship::Previous)
    }

    pub fn next_node(&self) -> Option<&RelatedNodeInfo> {
        self.single(NodeRelationship::Next)
    }

    pub fn parent_node(&self) -> Option<&RelatedNodeInfo> {
        self.single(NodeRelationship::Parent)
    }

    pub fn child_nodes(&self) -> &[RelatedNodeInfo] {
        match self.relationships.get(&NodeRelationship::Child) {
            Some(RelatedNodes::Multiple(children)) => children,
            _ => &[],
        }
    }

    /// Id of the source document, if any.
    pub fn ref_doc_id(&self) -> Option<&str> {
        self.source_node().map(|info| info.node_id.as_str())
    }

    /// Snapshot of this node for use in another node's relationships.
    pub fn as_related_node_info(&self) -> RelatedNodeInfo {
        RelatedNodeInfo {
            node_id: self.id.clone(),
            node_type: Some(self.kind),
            metadata: self.metadata.clone(),
            hash: Some(self.hash.clone()),
        }
    }

    // ---- rendering ---------------------------------------------------------

    fn includes_key(&self, key: &str, mode: MetadataMode) -> bool {
        match mode {
            MetadataMode::All => true,
            MetadataMode::None => false,
            MetadataMode::Embed => !self.excluded_embed_metadata_keys.iter().any(|k| k == key),
            MetadataMode::Llm => !self.excluded_llm_metadata_keys.iter().any(|k| k == key),
        }
    }

    /// Metadata block for `mode`, one templated line per key in key order.
    pub fn get_metadata_str(&self, mode: MetadataMode) -> String {
        self.metadata
            .iter()
            .filter(|(key, _)| self.includes_key(key, mode))
            .map(|(key, value)| {
                let rendered = render_value(value);
                format_template(&self.metadata_template, &[("key", key), ("value", &rendered)])
            })
            .collect::<Vec<_>>()
            .join(&self.metadata_separator)
    }

    /// Text body prefixed by the metadata block for `mode`.
    pub fn get_content(&self, mode: MetadataMode) -> String {
        let metadata_str = self.get_metadata_str(mode);
        if metadata_str.is_empty() {
            return self.text.clone();
        }
        format_template(
            &self.text_template,
            &[("metadata_str", metadata_str.trim()), ("content", &self.text)],
        )
    }

    fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        if let (Some(start), Some(end)) = (self.start_char_idx, self.end_char_idx) {
            hasher.update(format!("[{start},{end}]").as_bytes());
        }
        hasher.update(self.get_content(MetadataMode::All).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Strings render bare; everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Document
// ============================================================================

/// Coarse-grained source input. Derefs to the underlying [`Node`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Node);

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Node::new(ObjectType::Document, text))
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        Self(self.0.with_id(id))
    }

    pub fn with_metadata(self, metadata: Metadata) -> Self {
        Self(self.0.with_metadata(metadata))
    }

    pub fn with_metadata_entry(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(self.0.with_metadata_entry(key, value))
    }

    pub fn with_excluded_embed_metadata_keys(self, keys: Vec<String>) -> Self {
        Self(self.0.with_excluded_embed_metadata_keys(keys))
    }

    pub fn with_excluded_llm_metadata_keys(self, keys: Vec<String>) -> Self {
        Self(self.0.with_excluded_llm_metadata_keys(keys))
    }

    pub fn doc_id(&self) -> &str {
        self.0.id()
    }

    pub fn as_node(&self) -> &Node {
        &self.0
    }

    pub fn into_node(self) -> Node {
        self.0
    }
}

impl Deref for Document {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Node {
        &mut self.0
    }
}

// ============================================================================
// Retrieval types
// ============================================================================

/// Retrieval result. `score` is a cosine similarity; higher is more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: Node,
    pub score: f32,
}

impl NodeWithScore {
    pub fn new(node: Node, score: f32) -> Self {
        Self { node, score }
    }

    pub fn node_id(&self) -> &str {
        self.node.id()
    }

    pub fn content(&self) -> &str {
        self.node.content()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryBundle {
    pub query_str: String,
    pub embedding: Option<Vec<f32>>,
    /// Strings to embed instead of `query_str`, when set.
    #[serde(default)]
    pub custom_embedding_strs: Vec<String>,
}

impl QueryBundle {
    pub fn new(query_str: impl Into<String>) -> Self {
        Self {
            query_str: query_str.into(),
            ..Default::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_custom_embedding_strs(mut self, strs: Vec<String>) -> Self {
        self.custom_embedding_strs = strs;
        self
    }

    pub fn embedding_strs(&self) -> Vec<&str> {
        if self.custom_embedding_strs.is_empty() {
            vec![self.query_str.as_str()]
        } else {
            self.custom_embedding_strs.iter().map(String::as_str).collect()
        }
    }
}
