//! Object ↔ node mapping.
//!
//! Every object is represented by one text node whose id is the object's id.
//! Ids come from an explicit extractor, then from
//! [`IndexableObject::object_id`], then from a digest of the object's JSON,
//! so the same object always maps to the same node.

use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::schema::Node;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Metadata key holding the object's short type name.
pub const OBJECT_TYPE_KEY: &str = "object_type";

/// Objects that can be stored in an object index.
///
/// Both hooks are optional; serialization is the fallback for ids and text.
pub trait IndexableObject: Clone + Serialize + Send + Sync + 'static {
    /// Stable id of this object.
    fn object_id(&self) -> Option<String> {
        None
    }

    /// Text that describes this object for embedding.
    fn object_description(&self) -> Option<String> {
        None
    }
}

impl IndexableObject for String {
    fn object_description(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl IndexableObject for serde_json::Value {}

type Extractor<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Short type name: the last path segment, without generic arguments.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub struct ObjectNodeMapping<T: IndexableObject> {
    id_fn: Option<Extractor<T>>,
    text_fn: Option<Extractor<T>>,
    /// Insertion order.
    order: Vec<String>,
    entries: HashMap<String, (T, Node)>,
}

impl<T: IndexableObject> Default for ObjectNodeMapping<T> {
    fn default() -> Self {
        Self {
            id_fn: None,
            text_fn: None,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<T: IndexableObject> Clone for ObjectNodeMapping<T> {
    fn clone(&self) -> Self {
        Self {
            id_fn: self.id_fn.clone(),
            text_fn: self.text_fn.clone(),
            order: self.order.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<T: IndexableObject> fmt::Debug for ObjectNodeMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNodeMapping")
            .field("type", &short_type_name::<T>())
            .field("len", &self.order.len())
            .finish_non_exhaustive()
    }
}

impl<T: IndexableObject> ObjectNodeMapping<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_fn(mut self, f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.id_fn = Some(Arc::new(f));
        self
    }

    pub fn with_text_fn(mut self, f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.text_fn = Some(Arc::new(f));
        self
    }

    pub fn object_id(&self, obj: &T) -> KernelResult<String> {
        if let Some(f) = &self.id_fn {
            return Ok(f(obj));
        }
        if let Some(id) = obj.object_id() {
            return Ok(id);
        }
        let json = serde_json::to_vec(obj)?;
        Ok(hex::encode(Sha256::digest(&json)))
    }

    pub fn object_text(&self, obj: &T) -> KernelResult<String> {
        if let Some(f) = &self.text_fn {
            return Ok(f(obj));
        }
        if let Some(text) = obj.object_description() {
            return Ok(text);
        }
        Ok(serde_json::to_string(obj)?)
    }

    /// Node for `obj`, whether or not it has been added.
    pub fn to_node(&self, obj: &T) -> KernelResult<Node> {
        let id = self.object_id(obj)?;
        let text = self.object_text(obj)?;
        Ok(Node::text(text)
            .with_id(id)
            .with_metadata_entry(OBJECT_TYPE_KEY, short_type_name::<T>())
            .with_excluded_embed_metadata_keys(vec![OBJECT_TYPE_KEY.to_string()])
            .with_excluded_llm_metadata_keys(vec![OBJECT_TYPE_KEY.to_string()]))
    }

    /// Object behind `node`, looked up by node id.
    pub fn from_node(&self, node: &Node) -> KernelResult<&T> {
        self.get(node.id())
    }

    /// Add or replace an object. Returns its node.
    pub fn add_object(&mut self, obj: T) -> KernelResult<Node> {
        let node = self.to_node(&obj)?;
        self.insert(obj, node.clone());
        Ok(node)
    }

    pub(crate) fn insert(&mut self, obj: T, node: Node) {
        let id = node.id().to_string();
        if self.entries.insert(id.clone(), (obj, node)).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &str) -> KernelResult<&T> {
        self.entries
            .get(id)
            .map(|(obj, _)| obj)
            .ok_or_else(|| KernelError::NotFound(format!("object '{id}'")))
    }

    pub fn node(&self, id: &str) -> KernelResult<&Node> {
        self.entries
            .get(id)
            .map(|(_, node)| node)
            .ok_or_else(|| KernelError::NotFound(format!("node '{id}'")))
    }

    pub fn remove(&mut self, id: &str) -> KernelResult<T> {
        let (obj, _) = self
            .entries
            .remove(id)
            .ok_or_else(|| KernelError::NotFound(format!("object '{id}'")))?;
        self.order.retain(|existing| existing != id);
        Ok(obj)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Objects in insertion order.
    pub fn objects(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|id| self.entries.get(id).map(|(obj, _)| obj))
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.entries.get(id).map(|(_, node)| node))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
