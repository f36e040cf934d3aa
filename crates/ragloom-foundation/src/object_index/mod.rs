//! Object index: arbitrary objects retrieved by embedding similarity.
//!
//! The index owns an [`ObjectNodeMapping`] and one embedding per node, all
//! behind a single read-write lock. Embedding runs outside the lock; results
//! are published in one write, so an `add` either lands completely or not at
//! all.
//!
//! ```rust,ignore
//! use ragloom_foundation::object_index::ObjectIndex;
//!
//! let index = ObjectIndex::new(embedder);
//! index.add(vec![tool_a, tool_b]).await?;
//! let best = index.retrieve_objects("search the web", 1).await?;
//! ```

pub mod mapping;
pub mod retriever;

pub use mapping::{IndexableObject, OBJECT_TYPE_KEY, ObjectNodeMapping, short_type_name};
pub use retriever::ObjectRetriever;

use crate::callbacks::CallbackManager;
use crate::similarity::{cosine_similarity, rank_order};
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use ragloom_kernel::callbacks::{CBEventType, EventPayload, EventPayloadKey};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::llm::EmbeddingModel;
use ragloom_kernel::schema::{MetadataMode, Node, NodeWithScore, QueryBundle};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_EMBED_WORKERS: usize = 4;

struct IndexState<T: IndexableObject> {
    mapping: ObjectNodeMapping<T>,
    embeddings: HashMap<String, Vec<f32>>,
}

impl<T: IndexableObject> IndexState<T> {
    fn dimension(&self) -> Option<usize> {
        self.embeddings.values().next().map(Vec::len)
    }
}

/// Check every vector against `expected` (or the first vector when `None`).
fn check_dimensions<'a>(
    expected: Option<usize>,
    vectors: impl IntoIterator<Item = &'a Vec<f32>>,
) -> KernelResult<()> {
    let mut expected = expected;
    for vector in vectors {
        match expected {
            Some(dim) if dim != vector.len() => {
                return Err(KernelError::DimMismatch {
                    left: dim,
                    right: vector.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(vector.len()),
        }
    }
    Ok(())
}

pub struct ObjectIndex<T: IndexableObject> {
    state: Arc<RwLock<IndexState<T>>>,
    embed_model: Arc<dyn EmbeddingModel>,
    callback_manager: CallbackManager,
    num_workers: usize,
    cancel: Option<CancellationToken>,
}

impl<T: IndexableObject> Clone for ObjectIndex<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            embed_model: self.embed_model.clone(),
            callback_manager: self.callback_manager.clone(),
            num_workers: self.num_workers,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: IndexableObject> std::fmt::Debug for ObjectIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ObjectIndex")
            .field("mapping", &state.mapping)
            .field("embedded", &state.embeddings.len())
            .field("model", &self.embed_model.model_name())
            .finish_non_exhaustive()
    }
}

impl<T: IndexableObject> ObjectIndex<T> {
    pub fn new(embed_model: Arc<dyn EmbeddingModel>) -> Self {
        Self::with_mapping(embed_model, ObjectNodeMapping::new())
    }

    /// Start from an existing mapping. Its objects are not embedded until
    /// [`ObjectIndex::build_index`] runs.
    pub fn with_mapping(embed_model: Arc<dyn EmbeddingModel>, mapping: ObjectNodeMapping<T>) -> Self {
        Self {
            state: Arc::new(RwLock::new(IndexState {
                mapping,
                embeddings: HashMap::new(),
            })),
            embed_model,
            callback_manager: CallbackManager::new(),
            num_workers: DEFAULT_EMBED_WORKERS,
            cancel: None,
        }
    }

    /// Build an index and embed `objects` into it.
    pub async fn from_objects(embed_model: Arc<dyn EmbeddingModel>, objects: Vec<T>) -> KernelResult<Self> {
        let index = Self::new(embed_model);
        index.add(objects).await?;
        Ok(index)
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn callback_manager(&self) -> &CallbackManager {
        &self.callback_manager
    }

    /// Retriever returning the `top_k` best objects per query.
    pub fn as_retriever(&self, top_k: usize) -> ObjectRetriever<T> {
        ObjectRetriever::new(self.clone(), top_k)
    }

    async fn cancellable<R>(&self, fut: impl Future<Output = KernelResult<R>>) -> KernelResult<R> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(KernelError::Cancelled),
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(KernelError::Cancelled),
                result = fut => result,
            },
            None => fut.await,
        }
    }

    /// Embed node contents (metadata mode `None`) with bounded concurrency.
    async fn embed_nodes(&self, nodes: &[Node]) -> KernelResult<Vec<Vec<f32>>> {
        let model = self.embed_model.as_ref();
        let manager = &self.callback_manager;
        let work = futures::stream::iter(nodes.iter().map(|node| async move {
            manager
                .embed_text(model, &node.get_content(MetadataMode::None))
                .await
                .map_err(|err| match err {
                    KernelError::Cancelled => err,
                    other => KernelError::embed_failed(node.id(), other),
                })
        }))
        .buffered(self.num_workers)
        .try_collect::<Vec<_>>();
        let vectors = self.cancellable(work).await?;
        check_dimensions(None, &vectors)?;
        Ok(vectors)
    }

    /// Embed and add objects. Objects with an existing id are replaced.
    /// Returns the ids in input order.
    pub async fn add(&self, objects: Vec<T>) -> KernelResult<Vec<String>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let nodes = {
            let state = self.state.read();
            objects
                .iter()
                .map(|obj| state.mapping.to_node(obj))
                .collect::<KernelResult<Vec<_>>>()?
        };
        let vectors = self.embed_nodes(&nodes).await?;

        let mut state = self.state.write();
        let existing = state
            .embeddings
            .iter()
            .filter(|(id, _)| !nodes.iter().any(|n| n.id() == id.as_str()))
            .map(|(_, v)| v.len())
            .next();
        check_dimensions(existing, &vectors)?;

        let ids: Vec<String> = nodes.iter().map(|n| n.id().to_string()).collect();
        for ((obj, node), vector) in objects.into_iter().zip(nodes).zip(vectors) {
            state.embeddings.insert(node.id().to_string(), vector);
            state.mapping.insert(obj, node);
        }
        debug!(added = ids.len(), total = state.mapping.len(), "objects indexed");
        Ok(ids)
    }

    /// Re-embed every node currently in the mapping.
    pub async fn build_index(&self) -> KernelResult<()> {
        let nodes: Vec<Node> = self.state.read().mapping.nodes().cloned().collect();
        let vectors = self.embed_nodes(&nodes).await?;

        let mut state = self.state.write();
        let rebuilt: HashMap<String, Vec<f32>> = nodes
            .iter()
            .map(|n| n.id().to_string())
            .zip(vectors)
            .filter(|(id, _)| state.mapping.contains(id))
            .collect();
        let others = state
            .embeddings
            .iter()
            .filter(|(id, _)| !rebuilt.contains_key(*id))
            .map(|(_, v)| v.len())
            .next();
        check_dimensions(others, rebuilt.values())?;
        state.embeddings.extend(rebuilt);
        debug!(total = state.embeddings.len(), "object index built");
        Ok(())
    }

    /// Ranked objects with their scores, best first, ties by id ascending.
    pub async fn retrieve_with_scores(&self, query: &QueryBundle, k: usize) -> KernelResult<Vec<(T, f32)>> {
        let payload = EventPayload::new()
            .with(EventPayloadKey::QueryStr, query.query_str.as_str())
            .with(EventPayloadKey::TopK, k);
        self.callback_manager
            .with_event(CBEventType::Retrieve, payload, |scope| async move {
                if k == 0 || self.is_empty() {
                    return Ok(Vec::new());
                }
                let query_vec = match &query.embedding {
                    Some(vector) => vector.clone(),
                    None => {
                        let embedding = self.callback_manager.embed_query(self.embed_model.as_ref(), &query.query_str);
                        self.cancellable(embedding).await?
                    }
                };

                let state = self.state.read();
                let mut scored = Vec::with_capacity(state.embeddings.len());
                for (id, vector) in &state.embeddings {
                    scored.push((id.as_str(), cosine_similarity(&query_vec, vector)?));
                }
                scored.sort_by(|a, b| rank_order(a.1, a.0, b.1, b.0));
                scored.truncate(k);

                let ids: Vec<String> = scored.iter().map(|(id, _)| id.to_string()).collect();
                let mut out = Vec::with_capacity(scored.len());
                for (id, score) in scored {
                    out.push((state.mapping.get(id)?.clone(), score));
                }
                scope.set_end_payload(EventPayloadKey::Nodes, ids);
                Ok(out)
            })
            .await
    }

    /// The `k` objects most similar to `query`.
    pub async fn retrieve_objects(&self, query: &str, k: usize) -> KernelResult<Vec<T>> {
        Ok(self
            .retrieve_with_scores(&QueryBundle::new(query), k)
            .await?
            .into_iter()
            .map(|(obj, _)| obj)
            .collect())
    }

    /// Scored nodes for `query`, for feeding postprocessors.
    pub async fn retrieve_nodes(&self, query: &QueryBundle, k: usize) -> KernelResult<Vec<NodeWithScore>> {
        let scored = self.retrieve_with_scores(query, k).await?;
        let state = self.state.read();
        scored
            .into_iter()
            .map(|(obj, score)| {
                let id = state.mapping.object_id(&obj)?;
                let mut node = state.mapping.node(&id)?.clone();
                node.set_embedding(state.embeddings.get(&id).cloned());
                Ok(NodeWithScore::new(node, score))
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> KernelResult<T> {
        self.state.read().mapping.get(id).cloned()
    }

    /// Every object in insertion order.
    pub fn all(&self) -> Vec<T> {
        self.state.read().mapping.objects().cloned().collect()
    }

    pub fn remove(&self, id: &str) -> KernelResult<T> {
        let mut state = self.state.write();
        let obj = state.mapping.remove(id)?;
        state.embeddings.remove(id);
        Ok(obj)
    }

    /// Nodes in insertion order, with their embeddings attached.
    pub fn nodes(&self) -> Vec<Node> {
        let state = self.state.read();
        state
            .mapping
            .nodes()
            .map(|node| {
                let mut node = node.clone();
                node.set_embedding(state.embeddings.get(node.id()).cloned());
                node
            })
            .collect()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension()
    }

    pub fn len(&self) -> usize {
        self.state.read().mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().mapping.is_empty()
    }
}
