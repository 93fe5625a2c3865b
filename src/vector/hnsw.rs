//! Hierarchical navigable small world graph over raw f32 vectors.
//!
//! Nodes are addressed by a dense internal id; `labels` maps them back to doc
//! ids. Deletion tombstones a node, which keeps it usable for navigation but
//! hides it from results. Once tombstones outnumber live nodes the graph is
//! rebuilt from the live vectors.

use std::collections::{BinaryHeap, HashMap, HashSet};
use ordered_float::OrderedFloat;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::vector::distance::Metric;
use crate::vector::{top_k, Algorithm, VectorFilter, VectorHit, VectorIndex, VectorParams};

const MAX_LAYERS: usize = 16;
const REBUILD_MIN_DELETED: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct HnswConfig {
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub epsilon: f64,
    pub metric: Metric,
}

impl HnswConfig {
    pub fn from_params(params: &VectorParams) -> Self {
        let m = params.m.max(2);
        HnswConfig {
            m,
            m_max0: m * 2,
            ef_construction: params.ef_construction.max(m),
            ef_runtime: params.ef_runtime.max(1),
            epsilon: params.epsilon,
            metric: params.metric,
        }
    }
}

/// Generation-stamped visited marks, cleared in O(1).
#[derive(Debug, Default)]
struct VisitedSet {
    data: Vec<u32>,
    generation: u32,
}

impl VisitedSet {
    fn reset(&mut self, capacity: usize) {
        if capacity > self.data.len() {
            self.data.resize(capacity, 0);
        }
        if self.generation == u32::MAX {
            self.data.fill(0);
            self.generation = 0;
        }
        self.generation += 1;
    }

    fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.data[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

/// Min-heap entry for the candidate frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

/// Max-heap entry for the current result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Found {
    distance: OrderedFloat<f32>,
    id: u32,
}

#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    dim: usize,
    vectors: Vec<f32>,               // node_id * dim arena
    neighbors: Vec<Vec<Vec<u32>>>,   // [node][layer] -> neighbor ids
    deleted: Vec<bool>,
    labels: Vec<DocId>,
    nodes: HashMap<DocId, u32>,
    entry_point: Option<u32>,
    max_layer: usize,
    num_deleted: usize,
}

impl HnswIndex {
    pub fn new(dim: usize, config: HnswConfig) -> Self {
        HnswIndex {
            config,
            dim,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            deleted: Vec::new(),
            labels: Vec::new(),
            nodes: HashMap::new(),
            entry_point: None,
            max_layer: 0,
            num_deleted: 0,
        }
    }

    fn node_count(&self) -> usize {
        self.labels.len()
    }

    fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    fn dist(&self, query: &[f32], id: u32) -> f32 {
        self.config.metric.distance(query, self.vector(id))
    }

    fn random_level(&self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(MAX_LAYERS - 1)
    }

    /// Best-first search of one layer. Returns up to `ef` (distance, node)
    /// pairs ascending; tombstoned or filtered nodes navigate but are not
    /// returned.
    fn search_layer<F: Fn(u32) -> bool>(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        visited: &mut VisitedSet,
        accept: &F,
    ) -> Vec<(f32, u32)> {
        visited.reset(self.node_count());
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<Found> = BinaryHeap::new();
        let mut worst = f32::MAX;

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let d = self.dist(query, ep);
            candidates.push(Candidate { neg_distance: OrderedFloat(-d), id: ep });
            if accept(ep) {
                results.push(Found { distance: OrderedFloat(d), id: ep });
                if results.len() > ef {
                    results.pop();
                }
                worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }

        while let Some(c) = candidates.pop() {
            let c_dist = -c.neg_distance.0;
            if results.len() >= ef && c_dist > worst {
                break;
            }
            let Some(links) = self.neighbors[c.id as usize].get(layer) else {
                continue;
            };
            for &n in links {
                if !visited.insert(n) {
                    continue;
                }
                let d = self.dist(query, n);
                if results.len() < ef || d < worst {
                    candidates.push(Candidate { neg_distance: OrderedFloat(-d), id: n });
                    if accept(n) {
                        results.push(Found { distance: OrderedFloat(d), id: n });
                        if results.len() > ef {
                            results.pop();
                        }
                        worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                    }
                }
            }
        }

        results.into_sorted_vec().into_iter().map(|r| (r.distance.0, r.id)).collect()
    }

    /// Greedy descent from the top layer to layer 1.
    fn descend(&self, query: &[f32], visited: &mut VisitedSet, down_to: usize) -> Option<u32> {
        let mut ep = self.entry_point?;
        let any = |_: u32| true;
        for layer in (down_to..=self.max_layer).rev() {
            if layer == 0 {
                break;
            }
            if let Some(&(_, nearest)) = self.search_layer(query, &[ep], 1, layer, visited, &any).first() {
                ep = nearest;
            }
        }
        Some(ep)
    }

    /// Prefers candidates closer to the base than to any already selected
    /// neighbor, then tops up with the nearest leftovers.
    fn select_neighbors(&self, candidates: &[(f32, u32)], m: usize) -> Vec<u32> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut selected: Vec<u32> = Vec::with_capacity(m);
        for &(d_base, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            let cv = self.vector(cid);
            let diverse = selected
                .iter()
                .all(|&sid| d_base <= self.config.metric.distance(cv, self.vector(sid)));
            if diverse {
                selected.push(cid);
            }
        }
        if selected.len() < m {
            let chosen: HashSet<u32> = selected.iter().copied().collect();
            for &(_, cid) in &sorted {
                if selected.len() >= m {
                    break;
                }
                if !chosen.contains(&cid) {
                    selected.push(cid);
                }
            }
        }
        selected
    }

    fn insert_node(&mut self, doc_id: DocId, vector: &[f32]) {
        let id = self.node_count() as u32;
        let level = self.random_level();
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(vec![Vec::new(); level + 1]);
        self.deleted.push(false);
        self.labels.push(doc_id);
        self.nodes.insert(doc_id, id);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_layer = level;
            return;
        };

        let mut visited = VisitedSet::default();
        let any = |_: u32| true;
        let mut eps = vec![self.descend(vector, &mut visited, level + 1).unwrap_or(entry)];
        let top = level.min(self.max_layer);

        for layer in (0..=top).rev() {
            let found = self.search_layer(vector, &eps, self.config.ef_construction, layer, &mut visited, &any);
            let found: Vec<(f32, u32)> = found.into_iter().filter(|&(_, n)| n != id).collect();
            let m_max = if layer == 0 { self.config.m_max0 } else { self.config.m };
            let chosen = self.select_neighbors(&found, self.config.m);
            self.neighbors[id as usize][layer] = chosen.clone();

            for n in chosen {
                let over = {
                    let links = &mut self.neighbors[n as usize];
                    while links.len() <= layer {
                        links.push(Vec::new());
                    }
                    links[layer].push(id);
                    links[layer].len() > m_max
                };
                if over {
                    let base = self.vector(n).to_vec();
                    let scored: Vec<(f32, u32)> = self.neighbors[n as usize][layer]
                        .iter()
                        .map(|&c| (self.config.metric.distance(&base, self.vector(c)), c))
                        .collect();
                    let pruned = self.select_neighbors(&scored, m_max);
                    self.neighbors[n as usize][layer] = pruned;
                }
            }

            eps = found.iter().map(|&(_, n)| n).collect();
            if eps.is_empty() {
                eps.push(entry);
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
    }

    fn rebuild(&mut self) {
        let live = self.vectors();
        tracing::debug!("rebuilding HNSW graph: {} live, {} deleted", live.len(), self.num_deleted);
        let config = self.config.clone();
        *self = HnswIndex::new(self.dim, config);
        for (doc, v) in live {
            self.insert_node(doc, &v);
        }
    }

    /// Layer-0 search with adaptive widening when a filter starves results.
    fn search(&self, query: &[f32], k: usize, ef: usize, filter: VectorFilter<'_>) -> Vec<(f32, u32)> {
        let mut visited = VisitedSet::default();
        let Some(ep) = self.descend(query, &mut visited, 1) else {
            return Vec::new();
        };
        let accept = |n: u32| {
            !self.deleted[n as usize] && filter.map(|f| f(self.labels[n as usize])).unwrap_or(true)
        };
        let base = ef.max(k);
        let budget = (base * 4).max(base).min(self.node_count().max(1));
        let mut ef = base;
        loop {
            let found = self.search_layer(query, &[ep], ef, 0, &mut visited, &accept);
            if found.len() >= k || ef >= budget {
                return found;
            }
            ef = (ef * 2).min(budget);
        }
    }
}

impl VectorIndex for HnswIndex {
    fn add(&mut self, doc_id: DocId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::new(
                ErrorKind::VectorBlobSizeMismatch,
                format!("expected dim {}, got {}", self.dim, vector.len()),
            ));
        }
        self.delete(doc_id);
        self.insert_node(doc_id, &vector);
        Ok(())
    }

    fn delete(&mut self, doc_id: DocId) -> bool {
        let Some(id) = self.nodes.remove(&doc_id) else {
            return false;
        };
        self.deleted[id as usize] = true;
        self.num_deleted += 1;
        if self.num_deleted >= REBUILD_MIN_DELETED && self.num_deleted > self.nodes.len() {
            self.rebuild();
        }
        true
    }

    fn contains(&self, doc_id: DocId) -> bool {
        self.nodes.contains_key(&doc_id)
    }

    fn get(&self, doc_id: DocId) -> Option<&[f32]> {
        self.nodes.get(&doc_id).map(|&id| self.vector(id))
    }

    fn knn(&self, query: &[f32], k: usize, filter: VectorFilter<'_>, ef: Option<usize>) -> Vec<VectorHit> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }
        let ef = ef.unwrap_or(self.config.ef_runtime);
        let hits = self
            .search(query, k, ef, filter)
            .into_iter()
            .map(|(d, n)| VectorHit { doc_id: self.labels[n as usize], distance: d })
            .collect();
        top_k(hits, k)
    }

    fn range(&self, query: &[f32], radius: f32, filter: VectorFilter<'_>, epsilon: Option<f64>) -> Vec<VectorHit> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        // Widen the window until its farthest hit leaves the epsilon-expanded radius
        let eps = epsilon.unwrap_or(self.config.epsilon) as f32;
        let boundary = radius + radius.abs() * eps;
        let mut ef = self.config.ef_runtime.max(16);
        loop {
            let found = self.search(query, ef, ef, filter);
            let exhausted = found.len() < ef || ef >= self.node_count();
            let beyond = found.last().map(|(d, _)| *d > boundary).unwrap_or(true);
            if exhausted || beyond {
                let hits: Vec<VectorHit> = found
                    .into_iter()
                    .filter(|(d, _)| *d <= radius)
                    .map(|(d, n)| VectorHit { doc_id: self.labels[n as usize], distance: d })
                    .collect();
                let n = hits.len();
                return top_k(hits, n);
            }
            ef *= 2;
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn memory(&self) -> usize {
        let links: usize = self.neighbors.iter().flatten().map(|l| l.len() * 4).sum();
        self.vectors.len() * 4 + links + self.labels.len() * 24
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Hnsw
    }

    fn vectors(&self) -> Vec<(DocId, Vec<f32>)> {
        let mut out: Vec<(DocId, Vec<f32>)> =
            self.nodes.iter().map(|(doc, &id)| (*doc, self.vector(id).to_vec())).collect();
        out.sort_by_key(|(d, _)| *d);
        out
    }

    fn clear(&mut self) {
        let config = self.config.clone();
        *self = HnswIndex::new(self.dim, config);
    }
}
