//! Long-context reorder.
//!
//! Models attend best to the start and end of a long context, so the
//! strongest nodes go to the edges and the weakest to the middle.

use super::{NodePostprocessor, sort_by_score};
use async_trait::async_trait;
use ragloom_kernel::error::KernelResult;
use ragloom_kernel::schema::{NodeWithScore, QueryBundle};
use std::collections::VecDeque;

/// Outside-in zigzag: best node first, second best last, third best second,
/// and so on. Scores are untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongContextReorder;

impl LongContextReorder {
    pub fn reorder(mut nodes: Vec<NodeWithScore>) -> Vec<NodeWithScore> {
        sort_by_score(&mut nodes);
        let n = nodes.len();
        let mut front = Vec::with_capacity(n.div_ceil(2));
        let mut back = VecDeque::with_capacity(n / 2);
        for (rank, node) in nodes.into_iter().enumerate() {
            if rank % 2 == 0 {
                front.push(node);
            } else {
                back.push_front(node);
            }
        }
        front.extend(back);
        front
    }
}

#[async_trait]
impl NodePostprocessor for LongContextReorder {
    fn name(&self) -> &str {
        "long_context_reorder"
    }

    async fn postprocess_nodes(
        &self,
        nodes: Vec<NodeWithScore>,
        _query: Option<&QueryBundle>,
    ) -> KernelResult<Vec<NodeWithScore>> {
        Ok(Self::reorder(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocessor::test_support::{scored, scores};

    #[test]
    fn zigzag_from_the_outside_in() {
        let nodes = [0.95, 0.88, 0.82, 0.75, 0.68]
            .iter()
            .enumerate()
            .map(|(i, s)| scored(&format!("n{i}"), "", *s))
            .collect();
        let out = LongContextReorder::reorder(nodes);
        assert_eq!(scores(&out), vec![0.95, 0.82, 0.68, 0.75, 0.88]);
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let nodes = vec![
            scored("a", "", 0.1),
            scored("b", "", 0.4),
            scored("c", "", 0.3),
            scored("d", "", 0.2),
        ];
        let out = LongContextReorder::reorder(nodes);
        assert_eq!(scores(&out), vec![0.4, 0.2, 0.1, 0.3]);
    }

    #[test]
    fn short_inputs() {
        assert!(LongContextReorder::reorder(Vec::new()).is_empty());
        assert_eq!(scores(&LongContextReorder::reorder(vec![scored("a", "", 0.5)])), vec![0.5]);
    }
}
