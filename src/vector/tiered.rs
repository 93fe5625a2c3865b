use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use parking_lot::RwLock;
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::vector::flat::FlatIndex;
use crate::vector::{new_backend, top_k, VectorFilter, VectorHit, VectorIndex, VectorParams};

const TRANSFER_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TierStatus {
    New = 0,
    Scanning = 1,
    PausedOnOom = 2,
    Ready = 3,
}

impl TierStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TierStatus::Scanning,
            2 => TierStatus::PausedOnOom,
            3 => TierStatus::Ready,
            _ => TierStatus::New,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TierStatus::New => "NEW",
            TierStatus::Scanning => "SCANNING",
            TierStatus::PausedOnOom => "PAUSED_ON_OOM",
            TierStatus::Ready => "READY",
        }
    }
}

/// How a transfer run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Drained(usize),
    Paused(usize),
    Cancelled(usize),
    Idle,
}

/// Snapshot of a tiered index for VECSIM_INFO.
#[derive(Debug, Clone)]
pub struct TieredInfo {
    pub algorithm: &'static str,
    pub dim: usize,
    pub metric: &'static str,
    pub front_size: usize,
    pub back_size: usize,
    pub memory: usize,
    pub status: &'static str,
    pub transfer_threshold: usize,
}

/// Write buffer in front of a searchable backend. Writes land in the flat
/// front tier; a background transfer moves them into the backend. Reads
/// consult both tiers.
pub struct TieredIndex {
    params: VectorParams,
    front: RwLock<FlatIndex>,
    back: RwLock<Box<dyn VectorIndex>>,
    status: AtomicU8,
    cancelled: AtomicBool,
    transferring: AtomicBool,
    transfer_threshold: usize,
}

impl std::fmt::Debug for TieredIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredIndex")
            .field("algorithm", &self.params.algorithm)
            .field("status", &self.status())
            .finish()
    }
}

impl TieredIndex {
    /// `buffer_limit` bounds the front tier for graph backends; VAMANA waits
    /// for its training threshold instead.
    pub fn new(params: VectorParams, buffer_limit: usize) -> Self {
        let transfer_threshold = match params.algorithm {
            crate::vector::Algorithm::Vamana => params.training_threshold.max(1),
            _ => buffer_limit.max(1),
        };
        TieredIndex {
            front: RwLock::new(FlatIndex::new(params.dim, params.metric)),
            back: RwLock::new(new_backend(&params)),
            status: AtomicU8::new(TierStatus::New as u8),
            cancelled: AtomicBool::new(false),
            transferring: AtomicBool::new(false),
            transfer_threshold,
            params,
        }
    }

    pub fn params(&self) -> &VectorParams {
        &self.params
    }

    pub fn status(&self) -> TierStatus {
        TierStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, s: TierStatus) {
        self.status.store(s as u8, Ordering::Release);
    }

    pub fn add(&self, doc_id: DocId, vector: Vec<f32>) -> Result<()> {
        self.back.write().delete(doc_id);
        self.front.write().add(doc_id, vector)
    }

    pub fn delete(&self, doc_id: DocId) -> bool {
        let in_front = self.front.write().delete(doc_id);
        let in_back = self.back.write().delete(doc_id);
        in_front || in_back
    }

    pub fn contains(&self, doc_id: DocId) -> bool {
        self.front.read().contains(doc_id) || self.back.read().contains(doc_id)
    }

    pub fn get(&self, doc_id: DocId) -> Option<Vec<f32>> {
        if let Some(v) = self.front.read().get(doc_id) {
            return Some(v.to_vec());
        }
        self.back.read().get(doc_id).map(|v| v.to_vec())
    }

    pub fn len(&self) -> usize {
        self.front.read().len() + self.back.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the front tier should be drained into the backend.
    pub fn needs_transfer(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
            && !self.transferring.load(Ordering::Acquire)
            && self.front.read().len() >= self.transfer_threshold
    }

    pub fn knn(&self, query: &[f32], k: usize, filter: VectorFilter<'_>, ef: Option<usize>) -> Vec<VectorHit> {
        let mut hits = self.front.read().knn(query, k, filter, ef);
        hits.extend(self.back.read().knn(query, k, filter, ef));
        top_k(hits, k)
    }

    pub fn range(&self, query: &[f32], radius: f32, filter: VectorFilter<'_>, epsilon: Option<f64>) -> Vec<VectorHit> {
        let mut hits = self.front.read().range(query, radius, filter, epsilon);
        hits.extend(self.back.read().range(query, radius, filter, epsilon));
        let n = hits.len();
        top_k(hits, n)
    }

    /// Moves front-tier vectors into the backend in batches. `low_memory`
    /// is polled between batches and pauses the run when it returns true.
    pub fn transfer(&self, low_memory: &dyn Fn() -> bool) -> TransferOutcome {
        if self.transferring.swap(true, Ordering::AcqRel) {
            return TransferOutcome::Idle;
        }
        self.set_status(TierStatus::Scanning);
        let mut moved = 0;
        let outcome = loop {
            if self.cancelled.load(Ordering::Acquire) {
                break TransferOutcome::Cancelled(moved);
            }
            if low_memory() {
                tracing::warn!("vector tier transfer paused on low memory after {} vectors", moved);
                self.set_status(TierStatus::PausedOnOom);
                self.transferring.store(false, Ordering::Release);
                return TransferOutcome::Paused(moved);
            }
            let batch = self.front.read().batch(TRANSFER_BATCH);
            if batch.is_empty() {
                break TransferOutcome::Drained(moved);
            }
            for (doc, vector) in batch {
                let mut front = self.front.write();
                // A concurrent rewrite or delete of this doc wins
                if front.get(doc) != Some(vector.as_slice()) {
                    continue;
                }
                let mut back = self.back.write();
                if back.add(doc, vector).is_ok() {
                    front.delete(doc);
                    moved += 1;
                } else {
                    front.delete(doc);
                }
            }
        };
        if moved > 0 {
            tracing::debug!("vector tier transfer moved {} vectors", moved);
        }
        if !matches!(outcome, TransferOutcome::Cancelled(_)) {
            self.set_status(TierStatus::Ready);
        }
        self.transferring.store(false, Ordering::Release);
        outcome
    }

    /// Runs a full transfer on the calling thread.
    pub fn flush_transfer(&self) -> TransferOutcome {
        self.transfer(&|| false)
    }

    /// Stops any running or future transfer. Called on index drop.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn memory(&self) -> usize {
        self.front.read().memory() + self.back.read().memory()
    }

    /// Every stored vector, front tier first winning on duplicates.
    pub fn vectors(&self) -> Vec<(DocId, Vec<f32>)> {
        let mut out = self.front.read().vectors();
        out.extend(self.back.read().vectors());
        out.sort_by_key(|(d, _)| *d);
        out.dedup_by_key(|(d, _)| *d);
        out
    }

    /// Restores contents after a snapshot load. Vectors land in the front
    /// tier and the backend is re-derived by the next transfer.
    pub fn restore(&self, vectors: Vec<(DocId, Vec<f32>)>) -> Result<()> {
        let mut front = self.front.write();
        for (doc, v) in vectors {
            front.add(doc, v)?;
        }
        self.set_status(TierStatus::New);
        Ok(())
    }

    pub fn clear(&self) {
        self.front.write().clear();
        self.back.write().clear();
        self.set_status(TierStatus::New);
    }

    pub fn info(&self) -> TieredInfo {
        TieredInfo {
            algorithm: self.params.algorithm.name(),
            dim: self.params.dim,
            metric: self.params.metric.name(),
            front_size: self.front.read().len(),
            back_size: self.back.read().len(),
            memory: self.memory(),
            status: self.status().name(),
            transfer_threshold: self.transfer_threshold,
        }
    }
}
