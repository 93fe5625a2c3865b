use std::collections::{BTreeMap, BinaryHeap};
use ordered_float::OrderedFloat;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::vector::distance::Metric;
use crate::vector::{top_k, Algorithm, VectorFilter, VectorHit, VectorIndex};

/// Brute-force index. Exact, and the front tier of every tiered index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: BTreeMap<DocId, Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        FlatIndex { dim, metric, vectors: BTreeMap::new() }
    }

    pub fn ids(&self) -> Vec<DocId> {
        self.vectors.keys().copied().collect()
    }

    /// Up to `n` oldest entries, for tier transfer.
    pub fn batch(&self, n: usize) -> Vec<(DocId, Vec<f32>)> {
        self.vectors.iter().take(n).map(|(id, v)| (*id, v.clone())).collect()
    }
}

impl VectorIndex for FlatIndex {
    fn add(&mut self, doc_id: DocId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::new(
                ErrorKind::VectorBlobSizeMismatch,
                format!("expected dim {}, got {}", self.dim, vector.len()),
            ));
        }
        self.vectors.insert(doc_id, vector);
        Ok(())
    }

    fn delete(&mut self, doc_id: DocId) -> bool {
        self.vectors.remove(&doc_id).is_some()
    }

    fn contains(&self, doc_id: DocId) -> bool {
        self.vectors.contains_key(&doc_id)
    }

    fn get(&self, doc_id: DocId) -> Option<&[f32]> {
        self.vectors.get(&doc_id).map(|v| v.as_slice())
    }

    fn knn(&self, query: &[f32], k: usize, filter: VectorFilter<'_>, _ef: Option<usize>) -> Vec<VectorHit> {
        if k == 0 {
            return Vec::new();
        }
        // Max-heap of the best k so far, worst on top
        let mut heap: BinaryHeap<(OrderedFloat<f32>, DocId)> = BinaryHeap::with_capacity(k + 1);
        for (id, v) in &self.vectors {
            if let Some(f) = filter {
                if !f(*id) {
                    continue;
                }
            }
            let d = OrderedFloat(self.metric.distance(query, v));
            if heap.len() < k {
                heap.push((d, *id));
            } else if let Some(top) = heap.peek() {
                if (d, *id) < *top {
                    heap.pop();
                    heap.push((d, *id));
                }
            }
        }
        let hits = heap
            .into_iter()
            .map(|(d, id)| VectorHit { doc_id: id, distance: d.0 })
            .collect();
        top_k(hits, k)
    }

    fn range(&self, query: &[f32], radius: f32, filter: VectorFilter<'_>, _epsilon: Option<f64>) -> Vec<VectorHit> {
        let hits = self
            .vectors
            .iter()
            .filter(|(id, _)| filter.map(|f| f(**id)).unwrap_or(true))
            .map(|(id, v)| VectorHit { doc_id: *id, distance: self.metric.distance(query, v) })
            .filter(|h| h.distance <= radius)
            .collect::<Vec<_>>();
        let n = hits.len();
        top_k(hits, n)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn memory(&self) -> usize {
        self.vectors.len() * (self.dim * 4 + std::mem::size_of::<DocId>() + 24)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Flat
    }

    fn vectors(&self) -> Vec<(DocId, Vec<f32>)> {
        self.vectors.iter().map(|(id, v)| (*id, v.clone())).collect()
    }

    fn clear(&mut self) {
        self.vectors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FlatIndex {
        let mut idx = FlatIndex::new(2, Metric::L2);
        for i in 0..10u64 {
            idx.add(DocId(i + 1), vec![i as f32, 0.0]).unwrap();
        }
        idx
    }

    #[test]
    fn test_knn_exact() {
        let hits = index().knn(&[3.2, 0.0], 3, None, None);
        let ids: Vec<u64> = hits.iter().map(|h| h.doc_id.0).collect();
        assert_eq!(ids, vec![4, 5, 3]);
    }

    #[test]
    fn test_knn_filtered() {
        let even = |id: DocId| id.0 % 2 == 0;
        let hits = index().knn(&[3.0, 0.0], 2, Some(&even), None);
        let ids: Vec<u64> = hits.iter().map(|h| h.doc_id.0).collect();
        assert_eq!(ids, vec![4, 2]);
    }

    #[test]
    fn test_range() {
        let hits = index().range(&[0.0, 0.0], 4.0, None, None);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_dimension_checked() {
        let mut idx = FlatIndex::new(3, Metric::L2);
        assert!(idx.add(DocId(1), vec![1.0]).is_err());
    }
}
