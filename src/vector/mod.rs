pub mod distance;
pub mod flat;
pub mod hnsw;
pub mod vamana;
pub mod tiered;

use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use distance::{Metric, VectorType};

/// Predicate over doc ids for filtered searches.
pub type VectorFilter<'a> = Option<&'a (dyn Fn(DocId) -> bool + Sync)>;

/// A search hit: doc id and raw metric distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub doc_id: DocId,
    pub distance: f32,
}

impl VectorHit {
    /// Distance ascending, doc id ascending on ties.
    pub fn cmp_rank(&self, other: &VectorHit) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

/// Keeps the best `k` hits by (distance, doc id).
pub fn top_k(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| a.cmp_rank(b));
    hits.dedup_by_key(|h| h.doc_id);
    hits.truncate(k);
    hits
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Flat,
    Hnsw,
    Vamana,
}

impl Algorithm {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FLAT" => Ok(Algorithm::Flat),
            "HNSW" => Ok(Algorithm::Hnsw),
            "VAMANA" | "SVS-VAMANA" => Ok(Algorithm::Vamana),
            other => Err(Error::new(ErrorKind::BadSchema, format!("unknown vector algorithm '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Flat => "FLAT",
            Algorithm::Hnsw => "HNSW",
            Algorithm::Vamana => "VAMANA",
        }
    }
}

/// Parameters of a VECTOR field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorParams {
    pub algorithm: Algorithm,
    pub elem_type: VectorType,
    pub dim: usize,
    pub metric: Metric,
    pub initial_cap: usize,
    pub block_size: usize,
    // HNSW
    pub m: usize,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub epsilon: f64,
    // VAMANA
    pub graph_max_degree: usize,
    pub construction_window: usize,
    pub search_window: usize,
    pub alpha: f32,
    pub training_threshold: usize,
}

impl VectorParams {
    pub fn new(algorithm: Algorithm, elem_type: VectorType, dim: usize, metric: Metric) -> Self {
        VectorParams {
            algorithm,
            elem_type,
            dim,
            metric,
            initial_cap: 0,
            block_size: 1024,
            m: 16,
            ef_construction: 200,
            ef_runtime: 10,
            epsilon: 0.01,
            graph_max_degree: 32,
            construction_window: 200,
            search_window: 10,
            alpha: 1.2,
            training_threshold: 10 * 1024,
        }
    }

    pub fn blob_len(&self) -> usize {
        self.dim * self.elem_type.width()
    }
}

/// Common contract of every vector backend.
pub trait VectorIndex: Send + Sync {
    fn add(&mut self, doc_id: DocId, vector: Vec<f32>) -> Result<()>;

    fn delete(&mut self, doc_id: DocId) -> bool;

    fn contains(&self, doc_id: DocId) -> bool;

    fn get(&self, doc_id: DocId) -> Option<&[f32]>;

    /// Top-k by distance ascending. `ef` overrides the runtime window.
    fn knn(&self, query: &[f32], k: usize, filter: VectorFilter<'_>, ef: Option<usize>) -> Vec<VectorHit>;

    /// Every hit with distance <= radius, ascending.
    fn range(&self, query: &[f32], radius: f32, filter: VectorFilter<'_>, epsilon: Option<f64>) -> Vec<VectorHit>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn memory(&self) -> usize;

    fn algorithm(&self) -> Algorithm;

    /// Live (doc, vector) pairs in doc order.
    fn vectors(&self) -> Vec<(DocId, Vec<f32>)>;

    fn clear(&mut self);
}

/// Fresh backend for `params`.
pub fn new_backend(params: &VectorParams) -> Box<dyn VectorIndex> {
    match params.algorithm {
        Algorithm::Flat => Box::new(flat::FlatIndex::new(params.dim, params.metric)),
        Algorithm::Hnsw => Box::new(hnsw::HnswIndex::new(params.dim, hnsw::HnswConfig::from_params(params))),
        Algorithm::Vamana => Box::new(vamana::VamanaIndex::new(params.dim, vamana::VamanaConfig::from_params(params))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_breaks_ties_by_doc() {
        let hits = vec![
            VectorHit { doc_id: DocId(3), distance: 1.0 },
            VectorHit { doc_id: DocId(1), distance: 1.0 },
            VectorHit { doc_id: DocId(2), distance: 0.5 },
        ];
        let best = top_k(hits, 2);
        assert_eq!(best.iter().map(|h| h.doc_id.0).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::parse("hnsw").unwrap(), Algorithm::Hnsw);
        assert!(Algorithm::parse("ivf").is_err());
    }
}
