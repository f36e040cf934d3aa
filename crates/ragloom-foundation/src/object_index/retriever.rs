use super::{IndexableObject, ObjectIndex};
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};

/// Fixed-`k` view over an [`ObjectIndex`].
#[derive(Debug, Clone)]
pub struct ObjectRetriever<T: IndexableObject> {
    index: ObjectIndex<T>,
    top_k: usize,
}

impl<T: IndexableObject> ObjectRetriever<T> {
    pub fn new(index: ObjectIndex<T>, top_k: usize) -> Self {
        Self { index, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &ObjectIndex<T> {
        &self.index
    }

    pub async fn retrieve(&self, query: &str) -> KernelResult<Vec<T>> {
        self.index.retrieve_objects(query, self.top_k).await
    }

    pub async fn retrieve_bundle(&self, query: &QueryBundle) -> KernelResult<Vec<T>> {
        Ok(self
            .index
            .retrieve_with_scores(query, self.top_k)
            .await?
            .into_iter()
            .map(|(obj, _)| obj)
            .collect())
    }

    pub async fn retrieve_nodes(&self, query: &QueryBundle) -> KernelResult<Vec<NodeWithScore>> {
        self.index.retrieve_nodes(query, self.top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragloom_kernel::llm::EmbeddingModel;
    use std::sync::Arc;

    /// Two-dimensional: vowels vs consonants at the start.
    struct Vowels;

    #[async_trait]
    impl EmbeddingModel for Vowels {
        async fn embed_text(&self, text: &str) -> KernelResult<Vec<f32>> {
            let vowel = text.starts_with(['a', 'e', 'i', 'o', 'u']);
            Ok(if vowel { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
        }
    }

    #[tokio::test]
    async fn retriever_applies_top_k() {
        let objects = ["owl", "emu", "cat"].map(String::from).to_vec();
        let index = ObjectIndex::from_objects(Arc::new(Vowels), objects).await.unwrap();
        let retriever = index.as_retriever(2);

        let found = retriever.retrieve("ibis").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|s| s != "cat"));

        let nodes = retriever.retrieve_nodes(&QueryBundle::new("dog")).await.unwrap();
        assert_eq!(nodes[0].node.content(), "cat");
        assert_eq!(nodes[0].score, 1.0);
        assert!(nodes[0].node.embedding().is_some());
    }

    #[tokio::test]
    async fn precomputed_query_embedding_is_used() {
        let index = ObjectIndex::from_objects(Arc::new(Vowels), vec!["cat".to_string(), "owl".to_string()])
            .await
            .unwrap();
        let bundle = QueryBundle::new("cat").with_embedding(vec![1.0, 0.0]);
        assert_eq!(index.as_retriever(1).retrieve_bundle(&bundle).await.unwrap(), vec!["owl"]);
    }
}
