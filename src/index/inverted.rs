use std::sync::Arc;
use roaring::RoaringTreemap;
use crate::compression::codec::{PostingEntry, RecordFlags};
use crate::core::error::Result;
use crate::core::types::{DocId, FieldMask};
use crate::index::block::IndexBlock;

pub const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Posting list of one term (or tag value, or numeric leaf).
///
/// The block list is copy-on-write: a writer mutates through `Arc::make_mut`,
/// so a reader holding a [`PostingSnapshot`] keeps iterating the blocks it
/// saw when it took the snapshot.
#[derive(Debug, Clone)]
pub struct InvertedIndex {
    blocks: Arc<Vec<Arc<IndexBlock>>>,
    flags: RecordFlags,
    block_size: usize,
    num_docs: usize,
    bytes: usize,
}

/// Immutable view of a posting list taken at plan time.
#[derive(Debug, Clone)]
pub struct PostingSnapshot {
    pub blocks: Arc<Vec<Arc<IndexBlock>>>,
    pub flags: RecordFlags,
    pub num_docs: usize,
}

/// Result of compacting one list against a set of deleted ids.
#[derive(Debug)]
pub struct BlockRewrite {
    pub index: usize,
    pub original: Arc<IndexBlock>,
    pub replacement: Option<IndexBlock>,
    pub bytes_freed: usize,
    pub records_freed: usize,
}

impl InvertedIndex {
    pub fn new(flags: RecordFlags, block_size: usize) -> Self {
        InvertedIndex {
            blocks: Arc::new(Vec::new()),
            flags,
            block_size: block_size.max(1),
            num_docs: 0,
            bytes: 0,
        }
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_docs == 0
    }

    pub fn last_id(&self) -> Option<DocId> {
        self.blocks.last().map(|b| b.last_id)
    }

    /// Appends a record. Ids must arrive in increasing order; a repeat of
    /// the last id is ignored. Returns the bytes added.
    pub fn append(&mut self, entry: &PostingEntry) -> Result<usize> {
        if self.last_id() == Some(entry.doc_id) {
            return Ok(0);
        }
        let flags = self.flags;
        let block_size = self.block_size;
        let blocks = Arc::make_mut(&mut self.blocks);

        let need_new = match blocks.last() {
            None => true,
            Some(b) => b.num_entries as usize >= block_size,
        };
        let mut added = 0;
        if need_new {
            let block = IndexBlock::new(entry.doc_id);
            added += std::mem::size_of::<IndexBlock>();
            blocks.push(Arc::new(block));
        }
        let last = blocks.len() - 1;
        added += Arc::make_mut(&mut blocks[last]).append(entry, flags)?;

        self.num_docs += 1;
        self.bytes += added;
        Ok(added)
    }

    pub fn snapshot(&self) -> PostingSnapshot {
        PostingSnapshot {
            blocks: self.blocks.clone(),
            flags: self.flags,
            num_docs: self.num_docs,
        }
    }

    pub fn blocks(&self) -> &[Arc<IndexBlock>] {
        &self.blocks
    }

    /// Compacts blocks against `deleted`. Pure function of the snapshot, so
    /// it can run on a background thread.
    pub fn compact(snapshot: &PostingSnapshot, deleted: &RoaringTreemap) -> Result<Vec<BlockRewrite>> {
        let mut out = Vec::new();
        for (index, block) in snapshot.blocks.iter().enumerate() {
            // Cheap skip: no deleted id inside the block's bounds
            let below = if block.first_id.0 == 0 { 0 } else { deleted.rank(block.first_id.0 - 1) };
            if deleted.rank(block.last_id.0) == below {
                continue;
            }
            let entries = block.decode(snapshot.flags)?;
            let kept: Vec<PostingEntry> = entries
                .iter()
                .filter(|e| !deleted.contains(e.doc_id.0))
                .cloned()
                .collect();
            if kept.len() == entries.len() {
                continue;
            }
            let replacement = IndexBlock::from_entries(&kept, snapshot.flags)?;
            let new_size = replacement.as_ref().map(|b| b.byte_size()).unwrap_or(0);
            out.push(BlockRewrite {
                index,
                original: block.clone(),
                bytes_freed: block.byte_size().saturating_sub(new_size),
                records_freed: entries.len() - kept.len(),
                replacement,
            });
        }
        Ok(out)
    }

    /// Applies rewrites whose original block is still in place. A block that
    /// was appended to since the snapshot is skipped. Returns (bytes, records)
    /// reclaimed.
    pub fn apply_rewrites(&mut self, rewrites: Vec<BlockRewrite>) -> (usize, usize) {
        let mut bytes = 0;
        let mut records = 0;
        let mut slots: Vec<Option<Arc<IndexBlock>>> = self.blocks.iter().cloned().map(Some).collect();

        for rw in rewrites {
            let Some(slot) = slots.get_mut(rw.index) else { continue };
            let unchanged = slot.as_ref().map(|b| Arc::ptr_eq(b, &rw.original)).unwrap_or(false);
            if !unchanged {
                continue;
            }
            *slot = rw.replacement.map(Arc::new);
            bytes += rw.bytes_freed;
            records += rw.records_freed;
        }
        if records > 0 {
            self.blocks = Arc::new(slots.into_iter().flatten().collect());
            self.num_docs = self.num_docs.saturating_sub(records);
            self.bytes = self.bytes.saturating_sub(bytes);
        }
        (bytes, records)
    }

    /// All records in doc-id order. Used by splits, merges and snapshots.
    pub fn entries(&self) -> Result<Vec<PostingEntry>> {
        let mut out = Vec::with_capacity(self.num_docs);
        for b in self.blocks.iter() {
            out.extend(b.decode(self.flags)?);
        }
        Ok(out)
    }

    pub fn from_entries(flags: RecordFlags, block_size: usize, entries: &[PostingEntry]) -> Result<Self> {
        let mut idx = InvertedIndex::new(flags, block_size);
        for e in entries {
            idx.append(e)?;
        }
        Ok(idx)
    }

    pub fn from_blocks(flags: RecordFlags, block_size: usize, blocks: Vec<IndexBlock>) -> Self {
        let num_docs = blocks.iter().map(|b| b.num_entries as usize).sum();
        let bytes = blocks.iter().map(|b| b.byte_size()).sum();
        InvertedIndex {
            blocks: Arc::new(blocks.into_iter().map(Arc::new).collect()),
            flags,
            block_size: block_size.max(1),
            num_docs,
            bytes,
        }
    }
}

/// Sequential reader over a snapshot with block-level skipping.
pub struct PostingReader {
    snapshot: PostingSnapshot,
    block_idx: usize,
    entries: Vec<PostingEntry>,
    pos: usize,
    field_mask: FieldMask,
}

impl PostingReader {
    pub fn new(snapshot: PostingSnapshot, field_mask: FieldMask) -> Self {
        PostingReader {
            snapshot,
            block_idx: 0,
            entries: Vec::new(),
            pos: 0,
            field_mask,
        }
    }

    pub fn num_docs(&self) -> usize {
        self.snapshot.num_docs
    }

    fn load_block(&mut self, idx: usize) -> bool {
        self.block_idx = idx;
        self.pos = 0;
        match self.snapshot.blocks.get(idx) {
            None => {
                self.entries.clear();
                false
            }
            Some(block) => match block.decode(self.snapshot.flags) {
                Ok(entries) => {
                    self.entries = entries;
                    true
                }
                Err(e) => {
                    tracing::error!("corrupt posting block {}: {}", idx, e);
                    self.entries.clear();
                    self.block_idx = self.snapshot.blocks.len();
                    false
                }
            },
        }
    }

    fn accepts(&self, entry: &PostingEntry) -> bool {
        !self.snapshot.flags.has(RecordFlags::FIELDS) || entry.field_mask & self.field_mask != 0
    }

    pub fn next(&mut self) -> Option<PostingEntry> {
        loop {
            if self.block_idx >= self.snapshot.blocks.len() {
                return None;
            }
            if self.entries.is_empty() && self.pos == 0 && !self.load_block(self.block_idx) {
                return None;
            }
            while self.pos < self.entries.len() {
                let entry = &self.entries[self.pos];
                self.pos += 1;
                if self.accepts(entry) {
                    return Some(entry.clone());
                }
            }
            let next = self.block_idx + 1;
            if !self.load_block(next) {
                return None;
            }
        }
    }

    /// First accepted record with id >= target.
    pub fn skip_to(&mut self, target: DocId) -> Option<PostingEntry> {
        let loaded = !self.entries.is_empty();
        let covers = loaded
            && self
                .snapshot
                .blocks
                .get(self.block_idx)
                .map(|b| b.last_id >= target)
                .unwrap_or(false);
        if !covers {
            // Binary search by last id over the remaining blocks
            let start = self.block_idx.min(self.snapshot.blocks.len());
            let idx = start + self.snapshot.blocks[start..].partition_point(|b| b.last_id < target);
            if !self.load_block(idx) {
                return None;
            }
        }
        while self.pos < self.entries.len() && self.entries[self.pos].doc_id < target {
            self.pos += 1;
        }
        self.next()
    }

    pub fn rewind(&mut self) {
        self.block_idx = 0;
        self.entries.clear();
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[u64], block_size: usize) -> InvertedIndex {
        let mut idx = InvertedIndex::new(RecordFlags::DOCIDS_ONLY, block_size);
        for &id in ids {
            idx.append(&PostingEntry::doc(DocId(id))).unwrap();
        }
        idx
    }

    fn drain(reader: &mut PostingReader) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(e) = reader.next() {
            out.push(e.doc_id.0);
        }
        out
    }

    #[test]
    fn test_blocks_fill_to_capacity() {
        let idx = list(&(1..=10).collect::<Vec<_>>(), 4);
        assert_eq!(idx.num_blocks(), 3);
        assert_eq!(idx.num_docs(), 10);
    }

    #[test]
    fn test_duplicate_append_ignored() {
        let idx = list(&[1, 1, 2], 4);
        assert_eq!(idx.num_docs(), 2);
    }

    #[test]
    fn test_skip_to_across_blocks() {
        let idx = list(&[1, 3, 5, 7, 9, 11, 13], 2);
        let mut r = PostingReader::new(idx.snapshot(), u64::MAX);
        assert_eq!(r.skip_to(DocId(6)).map(|e| e.doc_id.0), Some(7));
        assert_eq!(r.next().map(|e| e.doc_id.0), Some(9));
        assert_eq!(r.skip_to(DocId(13)).map(|e| e.doc_id.0), Some(13));
        assert!(r.skip_to(DocId(14)).is_none());
    }

    #[test]
    fn test_snapshot_isolated_from_later_appends() {
        let mut idx = list(&[1, 2], 4);
        let snap = idx.snapshot();
        idx.append(&PostingEntry::doc(DocId(3))).unwrap();
        let mut r = PostingReader::new(snap, u64::MAX);
        assert_eq!(drain(&mut r), vec![1, 2]);
    }

    #[test]
    fn test_field_mask_filters_records() {
        let mut idx = InvertedIndex::new(RecordFlags::text(true, true, false), 8);
        for (id, mask) in [(1u64, 0b01u64), (2, 0b10), (3, 0b11)] {
            let mut e = PostingEntry::doc(DocId(id));
            e.field_mask = mask;
            idx.append(&e).unwrap();
        }
        let mut r = PostingReader::new(idx.snapshot(), 0b10);
        assert_eq!(drain(&mut r), vec![2, 3]);
    }

    #[test]
    fn test_compact_and_apply() {
        let mut idx = list(&[1, 2, 3, 4, 5, 6], 2);
        let mut deleted = RoaringTreemap::new();
        deleted.insert(3);
        deleted.insert(4);
        deleted.insert(5);
        let rewrites = InvertedIndex::compact(&idx.snapshot(), &deleted).unwrap();
        assert_eq!(rewrites.len(), 2);
        let (_, records) = idx.apply_rewrites(rewrites);
        assert_eq!(records, 3);
        assert_eq!(idx.num_docs(), 3);
        assert_eq!(idx.num_blocks(), 2);
        let mut r = PostingReader::new(idx.snapshot(), u64::MAX);
        assert_eq!(drain(&mut r), vec![1, 2, 6]);
    }

    #[test]
    fn test_rewrite_skipped_when_block_changed() {
        let mut idx = list(&[1, 2, 3], 4);
        let mut deleted = RoaringTreemap::new();
        deleted.insert(2);
        let rewrites = InvertedIndex::compact(&idx.snapshot(), &deleted).unwrap();
        idx.append(&PostingEntry::doc(DocId(4))).unwrap();
        let (_, records) = idx.apply_rewrites(rewrites);
        assert_eq!(records, 0);
        assert_eq!(idx.num_docs(), 4);
    }
}
