//! Single-layer Vamana graph: greedy search from a medoid plus
//! alpha-robust pruning of out-edges.

use std::collections::{BTreeSet, HashMap};
use ordered_float::OrderedFloat;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::vector::distance::Metric;
use crate::vector::{top_k, Algorithm, VectorFilter, VectorHit, VectorIndex, VectorParams};

#[derive(Debug, Clone, PartialEq)]
pub struct VamanaConfig {
    pub max_degree: usize,
    pub construction_window: usize,
    pub search_window: usize,
    pub alpha: f32,
    pub epsilon: f64,
    pub metric: Metric,
}

impl VamanaConfig {
    pub fn from_params(params: &VectorParams) -> Self {
        VamanaConfig {
            max_degree: params.graph_max_degree.max(2),
            construction_window: params.construction_window.max(params.graph_max_degree).max(2),
            search_window: params.search_window.max(1),
            alpha: params.alpha.max(1.0),
            epsilon: params.epsilon,
            metric: params.metric,
        }
    }
}

#[derive(Debug)]
pub struct VamanaIndex {
    config: VamanaConfig,
    dim: usize,
    vectors: Vec<Vec<f32>>,
    edges: Vec<Vec<u32>>,
    deleted: Vec<bool>,
    labels: Vec<DocId>,
    nodes: HashMap<DocId, u32>,
    medoid: Option<u32>,
    num_deleted: usize,
}

impl VamanaIndex {
    pub fn new(dim: usize, config: VamanaConfig) -> Self {
        VamanaIndex {
            config,
            dim,
            vectors: Vec::new(),
            edges: Vec::new(),
            deleted: Vec::new(),
            labels: Vec::new(),
            nodes: HashMap::new(),
            medoid: None,
            num_deleted: 0,
        }
    }

    fn dist(&self, q: &[f32], n: u32) -> f32 {
        self.config.metric.distance(q, &self.vectors[n as usize])
    }

    /// Greedy beam search with window `l`. Returns the final window
    /// (ascending) and every node expanded on the way.
    fn greedy_search(&self, query: &[f32], l: usize) -> (Vec<(f32, u32)>, Vec<u32>) {
        let Some(start) = self.medoid else {
            return (Vec::new(), Vec::new());
        };
        let mut window: BTreeSet<(OrderedFloat<f32>, u32)> = BTreeSet::new();
        let mut expanded: BTreeSet<u32> = BTreeSet::new();
        let mut seen: BTreeSet<u32> = BTreeSet::new();
        window.insert((OrderedFloat(self.dist(query, start)), start));
        seen.insert(start);

        loop {
            let next = window.iter().find(|(_, n)| !expanded.contains(n)).copied();
            let Some((_, node)) = next else { break };
            expanded.insert(node);
            for &nb in &self.edges[node as usize] {
                if seen.insert(nb) {
                    window.insert((OrderedFloat(self.dist(query, nb)), nb));
                }
            }
            while window.len() > l {
                window.pop_last();
            }
        }
        let found = window.into_iter().map(|(d, n)| (d.0, n)).collect();
        (found, expanded.into_iter().collect())
    }

    /// Keeps at most `max_degree` candidates, dropping any candidate that an
    /// already kept neighbor dominates by a factor of alpha.
    fn robust_prune(&self, node: u32, candidates: Vec<u32>) -> Vec<u32> {
        let base = &self.vectors[node as usize];
        let mut pool: Vec<(f32, u32)> = candidates
            .into_iter()
            .filter(|&c| c != node)
            .map(|c| (self.config.metric.distance(base, &self.vectors[c as usize]), c))
            .collect();
        pool.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        pool.dedup_by_key(|p| p.1);

        let mut kept: Vec<u32> = Vec::with_capacity(self.config.max_degree);
        while let Some(&(_, best)) = pool.first() {
            kept.push(best);
            if kept.len() >= self.config.max_degree {
                break;
            }
            let bv = &self.vectors[best as usize];
            let alpha = self.config.alpha;
            pool.retain(|&(d, c)| {
                c != best && alpha * self.config.metric.distance(bv, &self.vectors[c as usize]) > d
            });
        }
        kept
    }

    fn insert_node(&mut self, doc_id: DocId, vector: Vec<f32>) {
        let id = self.labels.len() as u32;
        let (_, visited) = self.greedy_search(&vector, self.config.construction_window);
        self.vectors.push(vector);
        self.edges.push(Vec::new());
        self.deleted.push(false);
        self.labels.push(doc_id);
        self.nodes.insert(doc_id, id);
        if self.medoid.is_none() {
            self.medoid = Some(id);
            return;
        }

        let out = self.robust_prune(id, visited);
        self.edges[id as usize] = out.clone();
        for n in out {
            let over = {
                let e = &mut self.edges[n as usize];
                if !e.contains(&id) {
                    e.push(id);
                }
                e.len() > self.config.max_degree
            };
            if over {
                let cands = self.edges[n as usize].clone();
                self.edges[n as usize] = self.robust_prune(n, cands);
            }
        }
    }

    fn rebuild(&mut self) {
        let live = self.vectors();
        tracing::debug!("rebuilding Vamana graph: {} live, {} deleted", live.len(), self.num_deleted);
        let config = self.config.clone();
        *self = VamanaIndex::new(self.dim, config);
        for (doc, v) in live {
            self.insert_node(doc, v);
        }
    }

    fn accept(&self, n: u32, filter: VectorFilter<'_>) -> bool {
        !self.deleted[n as usize] && filter.map(|f| f(self.labels[n as usize])).unwrap_or(true)
    }
}

impl VectorIndex for VamanaIndex {
    fn add(&mut self, doc_id: DocId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::new(
                ErrorKind::VectorBlobSizeMismatch,
                format!("expected dim {}, got {}", self.dim, vector.len()),
            ));
        }
        self.delete(doc_id);
        self.insert_node(doc_id, vector);
        Ok(())
    }

    fn delete(&mut self, doc_id: DocId) -> bool {
        let Some(id) = self.nodes.remove(&doc_id) else {
            return false;
        };
        self.deleted[id as usize] = true;
        self.num_deleted += 1;
        if self.num_deleted >= 64 && self.num_deleted > self.nodes.len() {
            self.rebuild();
        }
        true
    }

    fn contains(&self, doc_id: DocId) -> bool {
        self.nodes.contains_key(&doc_id)
    }

    fn get(&self, doc_id: DocId) -> Option<&[f32]> {
        self.nodes.get(&doc_id).map(|&id| self.vectors[id as usize].as_slice())
    }

    fn knn(&self, query: &[f32], k: usize, filter: VectorFilter<'_>, ef: Option<usize>) -> Vec<VectorHit> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }
        // Filtered or tombstoned nodes shrink the window; widen up to 4x
        let base = ef.unwrap_or(self.config.search_window).max(k);
        let budget = base * 4;
        let mut l = base;
        loop {
            let (found, _) = self.greedy_search(query, l);
            let hits: Vec<VectorHit> = found
                .into_iter()
                .filter(|(_, n)| self.accept(*n, filter))
                .map(|(d, n)| VectorHit { doc_id: self.labels[n as usize], distance: d })
                .collect();
            if hits.len() >= k || l >= budget || l >= self.labels.len() {
                return top_k(hits, k);
            }
            l = (l * 2).min(budget);
        }
    }

    fn range(&self, query: &[f32], radius: f32, filter: VectorFilter<'_>, epsilon: Option<f64>) -> Vec<VectorHit> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let eps = epsilon.unwrap_or(self.config.epsilon) as f32;
        let boundary = radius + radius.abs() * eps;
        let mut l = self.config.search_window.max(16);
        loop {
            let (found, _) = self.greedy_search(query, l);
            let beyond = found.last().map(|(d, _)| *d > boundary).unwrap_or(true);
            if beyond || l >= self.labels.len() {
                let hits: Vec<VectorHit> = found
                    .into_iter()
                    .filter(|(d, n)| *d <= radius && self.accept(*n, filter))
                    .map(|(d, n)| VectorHit { doc_id: self.labels[n as usize], distance: d })
                    .collect();
                let n = hits.len();
                return top_k(hits, n);
            }
            l *= 2;
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn memory(&self) -> usize {
        let edges: usize = self.edges.iter().map(|e| e.len() * 4).sum();
        self.vectors.len() * self.dim * 4 + edges + self.labels.len() * 24
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Vamana
    }

    fn vectors(&self) -> Vec<(DocId, Vec<f32>)> {
        let mut out: Vec<(DocId, Vec<f32>)> = self
            .nodes
            .iter()
            .map(|(doc, &id)| (*doc, self.vectors[id as usize].clone()))
            .collect();
        out.sort_by_key(|(d, _)| *d);
        out
    }

    fn clear(&mut self) {
        let config = self.config.clone();
        *self = VamanaIndex::new(self.dim, config);
    }
}
