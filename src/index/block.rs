use serde::{Serialize, Deserialize};
use crate::compression::codec::{decode_entry, encode_entry, PostingEntry, RecordFlags};
use crate::core::error::Result;
use crate::core::types::DocId;

/// Fixed-capacity chunk of a posting list. Records are delta-encoded from
/// `first_id`, so a block decodes without looking at its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBlock {
    pub first_id: DocId,
    pub last_id: DocId,
    pub num_entries: u32,
    pub data: Vec<u8>,
}

impl IndexBlock {
    pub fn new(first_id: DocId) -> Self {
        IndexBlock {
            first_id,
            last_id: first_id,
            num_entries: 0,
            data: Vec::new(),
        }
    }

    /// Appends one record and returns the number of bytes it took.
    pub fn append(&mut self, entry: &PostingEntry, flags: RecordFlags) -> Result<usize> {
        let before = self.data.len();
        let prev = if self.num_entries == 0 { self.first_id } else { self.last_id };
        encode_entry(&mut self.data, prev, entry, flags)?;
        self.last_id = entry.doc_id;
        self.num_entries += 1;
        Ok(self.data.len() - before)
    }

    pub fn decode(&self, flags: RecordFlags) -> Result<Vec<PostingEntry>> {
        let mut entries = Vec::with_capacity(self.num_entries as usize);
        let mut pos = 0;
        let mut prev = self.first_id;
        for _ in 0..self.num_entries {
            let (entry, used) = decode_entry(&self.data[pos..], prev, flags)?;
            prev = entry.doc_id;
            pos += used;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Re-encodes `entries` (sorted by doc id) into a fresh block.
    pub fn from_entries(entries: &[PostingEntry], flags: RecordFlags) -> Result<Option<Self>> {
        let Some(first) = entries.first() else {
            return Ok(None);
        };
        let mut block = IndexBlock::new(first.doc_id);
        for e in entries {
            block.append(e, flags)?;
        }
        Ok(Some(block))
    }

    pub fn contains_range(&self, id: DocId) -> bool {
        id >= self.first_id && id <= self.last_id
    }

    pub fn byte_size(&self) -> usize {
        self.data.len() + std::mem::size_of::<IndexBlock>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_bounds_and_decode() {
        let flags = RecordFlags::text(true, true, false);
        let mut block = IndexBlock::new(DocId(5));
        for id in [5u64, 9, 40] {
            let mut e = PostingEntry::doc(DocId(id));
            e.field_mask = 1;
            block.append(&e, flags).unwrap();
        }
        assert_eq!(block.last_id, DocId(40));
        assert_eq!(block.num_entries, 3);
        let ids: Vec<u64> = block.decode(flags).unwrap().iter().map(|e| e.doc_id.0).collect();
        assert_eq!(ids, vec![5, 9, 40]);
        assert!(block.contains_range(DocId(10)));
        assert!(!block.contains_range(DocId(41)));
    }

    #[test]
    fn test_from_empty_entries() {
        assert!(IndexBlock::from_entries(&[], RecordFlags::DOCIDS_ONLY).unwrap().is_none());
    }
}
