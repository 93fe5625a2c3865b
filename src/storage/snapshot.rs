//! Snapshot file layout:
//!
//! ```text
//! magic "VXSN" | version u32 | compression u8 | crc32 u32 | body
//! ```
//!
//! All integers little-endian. The crc covers the (compressed) body, which
//! is a bincode-encoded [`SnapshotBody`]. Cursors are never persisted.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::compression::codec::PostingEntry;
use crate::compression::compress::{CompressedBlock, CompressionType};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::document::doc_table::{DocMeta, DocTable};
use crate::engine::index::{FieldIndex, IndexData, SearchIndex};
use crate::index::block::IndexBlock;
use crate::index::inverted::InvertedIndex;
use crate::index::terms::TermDictionary;
use crate::schema::IndexDefinition;

pub const MAGIC: &[u8; 4] = b"VXSN";
pub const VERSION: u32 = 2;
const HEADER_LEN: usize = 4 + 4 + 1 + 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListImage {
    term: String,
    blocks: Vec<IndexBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FieldImage {
    Empty,
    Tag(Vec<ListImage>),
    /// NUMERIC values, or GEO hashes.
    Numeric(Vec<(DocId, f64)>),
    GeoShape(Vec<(DocId, String)>),
    Vector(Vec<(DocId, Vec<f32>)>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotImage {
    index: FieldImage,
    missing: Option<Vec<IndexBlock>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexImage {
    name: String,
    definition: IndexDefinition,
    max_id: u64,
    docs: Vec<DocMeta>,
    /// Serialized roaring treemap of tombstoned ids.
    deleted: Vec<u8>,
    terms: Vec<ListImage>,
    slots: Vec<SlotImage>,
    index_all: Option<Vec<IndexBlock>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    saved_at: DateTime<Utc>,
    indexes: Vec<IndexImage>,
}

/// Version 1 kept no INDEXMISSING or INDEXALL lists.
mod v1 {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct IndexImage {
        pub name: String,
        pub definition: IndexDefinition,
        pub max_id: u64,
        pub docs: Vec<DocMeta>,
        pub deleted: Vec<u8>,
        pub terms: Vec<ListImage>,
        pub fields: Vec<FieldImage>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SnapshotBody {
        pub saved_at: DateTime<Utc>,
        pub indexes: Vec<IndexImage>,
    }

    /// The missing and index-all lists are rebuilt on load from the docs.
    pub fn migrate(body: SnapshotBody) -> super::SnapshotBody {
        let indexes = body
            .indexes
            .into_iter()
            .map(|old| super::IndexImage {
                name: old.name,
                definition: old.definition,
                max_id: old.max_id,
                docs: old.docs,
                deleted: old.deleted,
                terms: old.terms,
                slots: old.fields.into_iter().map(|index| SlotImage { index, missing: None }).collect(),
                index_all: None,
            })
            .collect();
        super::SnapshotBody { saved_at: body.saved_at, indexes }
    }
}

fn list_image(term: &str, list: &InvertedIndex) -> ListImage {
    ListImage { term: term.to_string(), blocks: blocks_of(list) }
}

fn blocks_of(list: &InvertedIndex) -> Vec<IndexBlock> {
    list.blocks().iter().map(|b| IndexBlock::clone(b)).collect()
}

fn dictionary_image(dict: &TermDictionary) -> Vec<ListImage> {
    dict.iter().map(|(t, l)| list_image(t, l)).collect()
}

fn image_of(index: &SearchIndex) -> Result<IndexImage> {
    let data = index.data.read();
    let mut deleted = Vec::new();
    data.docs.deleted().serialize_into(&mut deleted)?;
    let mut slots = Vec::with_capacity(data.slots.len());
    for slot in &data.slots {
        let image = match &slot.index {
            FieldIndex::Tag(t) => FieldImage::Tag(dictionary_image(t.dictionary())),
            FieldIndex::Numeric(tree) | FieldIndex::Geo(tree) => FieldImage::Numeric(tree.dump()?),
            FieldIndex::GeoShape(g) => FieldImage::GeoShape(g.dump()),
            FieldIndex::Vector(v) => FieldImage::Vector(v.vectors()),
            FieldIndex::Text | FieldIndex::Unindexed => FieldImage::Empty,
        };
        slots.push(SlotImage { index: image, missing: slot.missing.as_ref().map(blocks_of) });
    }
    Ok(IndexImage {
        name: index.name.clone(),
        definition: data.definition.clone(),
        max_id: data.docs.max_id(),
        docs: data.docs.dump(),
        deleted,
        terms: dictionary_image(&data.terms),
        slots,
        index_all: data.index_all.as_ref().map(blocks_of),
    })
}

/// Writes every index to `path`, replacing it atomically.
pub fn save(path: &Path, indexes: &[Arc<SearchIndex>]) -> Result<()> {
    let images = indexes.iter().map(|i| image_of(i)).collect::<Result<Vec<_>>>()?;
    let body = SnapshotBody { saved_at: Utc::now(), indexes: images };
    let raw = bincode::serialize(&body)?;
    let block = CompressedBlock::compress(&raw, CompressionType::Lz4);

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&[block.compression.to_byte()])?;
        file.write_all(&crc32fast::hash(&block.data).to_le_bytes())?;
        file.write_all(&block.data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(raw = raw.len(), compressed = block.data.len(), "snapshot written");
    Ok(())
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::Parse, msg)
}

fn decode(bytes: &[u8]) -> Result<SnapshotBody> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(corrupt("not a snapshot file"));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let version = word(4);
    let compression = CompressionType::from_byte(bytes[8])?;
    let crc = word(9);
    let payload = &bytes[HEADER_LEN..];
    if crc32fast::hash(payload) != crc {
        return Err(corrupt("snapshot checksum mismatch"));
    }
    let raw = CompressedBlock::decompress(payload, compression)?;
    match version {
        VERSION => Ok(bincode::deserialize(&raw)?),
        1 => {
            info!("migrating version 1 snapshot");
            Ok(v1::migrate(bincode::deserialize(&raw)?))
        }
        other => Err(corrupt(format!("unsupported snapshot version {}", other))),
    }
}

fn restore_dictionary(dict: &mut TermDictionary, lists: Vec<ListImage>) {
    let (flags, block_size) = (dict.flags(), dict.block_size());
    for l in lists {
        dict.insert_list(l.term, InvertedIndex::from_blocks(flags, block_size, l.blocks));
    }
}

/// Rebuilds a doc-id list the old format did not store.
fn list_of_ids(flags_from: &InvertedIndex, block_size: usize, ids: impl Iterator<Item = DocId>) -> Result<InvertedIndex> {
    let mut list = InvertedIndex::new(flags_from.flags(), block_size);
    for id in ids {
        list.append(&PostingEntry::doc(id))?;
    }
    Ok(list)
}

fn restore_index(image: IndexImage, config: &Config) -> Result<SearchIndex> {
    let mut data = IndexData::new(image.definition, config);
    if image.slots.len() != data.slots.len() {
        return Err(corrupt(format!("index {}: field count does not match its schema", image.name)));
    }
    let deleted = RoaringTreemap::deserialize_from(&image.deleted[..])?;
    data.docs = DocTable::restore(config.max_doc_table_size, image.max_id, image.docs, deleted);
    restore_dictionary(&mut data.terms, image.terms);

    let block_size = data.block_size;
    for (slot, img) in data.slots.iter_mut().zip(image.slots) {
        match (&mut slot.index, img.index) {
            (FieldIndex::Tag(t), FieldImage::Tag(lists)) => restore_dictionary(t.dictionary_mut(), lists),
            (FieldIndex::Numeric(tree) | FieldIndex::Geo(tree), FieldImage::Numeric(pairs)) => tree.rebuild(pairs)?,
            (FieldIndex::GeoShape(g), FieldImage::GeoShape(shapes)) => {
                for (id, wkt) in shapes {
                    g.add(id, &wkt)?;
                }
            }
            (FieldIndex::Vector(v), FieldImage::Vector(vectors)) => v.restore(vectors)?,
            (_, FieldImage::Empty) => {}
            _ => return Err(corrupt(format!("index {}: field kind does not match its schema", image.name))),
        }
        if let (Some(list), Some(blocks)) = (slot.missing.as_mut(), img.missing) {
            *list = InvertedIndex::from_blocks(list.flags(), block_size, blocks);
        }
    }
    match (data.index_all.as_mut(), image.index_all) {
        (Some(list), Some(blocks)) => *list = InvertedIndex::from_blocks(list.flags(), block_size, blocks),
        (Some(list), None) => {
            let ids: Vec<DocId> = data.docs.scan_live_ids().collect();
            *list = list_of_ids(list, block_size, ids.into_iter())?;
        }
        _ => {}
    }

    let index = SearchIndex::new(&image.name, data);
    {
        let data = index.data.read();
        index.counters.add_bytes(data.inverted_bytes() as isize);
        index.counters.add_records(data.terms.total_records() as isize);
    }
    Ok(index)
}

/// Reads a snapshot. Older versions are migrated; unknown versions and
/// damaged files fail without touching engine state.
pub fn load(path: &Path, config: &Config) -> Result<Vec<SearchIndex>> {
    let file = File::open(path)?;
    // SAFETY: the map is read-only and dropped before this returns
    let map = unsafe { Mmap::map(&file)? };
    let body = decode(&map)?;
    drop(map);
    let indexes = body.indexes.into_iter().map(|i| restore_index(i, config)).collect::<Result<Vec<_>>>()?;
    debug!(saved_at = %body.saved_at, indexes = indexes.len(), "snapshot decoded");
    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ingest::testing::with_hashes;

    fn sample() -> Arc<SearchIndex> {
        let data = with_hashes(
            "INDEXALL ENABLE SCHEMA t TEXT n NUMERIC g TAG",
            &[("a", &[("t", "hello world"), ("n", "3"), ("g", "x,y")]), ("b", &[("t", "bye"), ("n", "7"), ("g", "y")])],
        );
        let index = SearchIndex::new("idx", data);
        index.data.write().remove_document("b");
        Arc::new(index)
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.vxs");
        save(&path, &[sample()]).unwrap();
        let loaded = load(&path, &Config::default()).unwrap();
        assert_eq!(loaded.len(), 1);
        let data = loaded[0].data.read();
        assert_eq!(data.docs.num_docs(), 1);
        assert_eq!(data.docs.max_id(), 2);
        assert!(data.docs.deleted().contains(2));
        assert!(data.terms.get("hello").is_some());
        assert_eq!(data.index_all.as_ref().map(|l| l.num_docs()), Some(2));
        match &data.slots[1].index {
            // Tombstoned records survive until the collector runs
            FieldIndex::Numeric(tree) => assert_eq!(tree.dump().unwrap().len(), 2),
            _ => panic!("expected numeric slot"),
        }
    }

    #[test]
    fn test_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.vxs");
        save(&path, &[sample()]).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        match load(&path, &Config::default()) {
            Err(err) => assert!(err.context.contains("version 99")),
            Ok(_) => panic!("a future version must be refused"),
        }

        let last = bytes.len() - 1;
        bytes[4..8].copy_from_slice(&VERSION.to_le_bytes());
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert_eq!(load(&path, &Config::default()).err().map(|e| e.kind), Some(ErrorKind::Parse));
    }

    #[test]
    fn test_migrates_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.vxs");
        let current = image_of(&sample()).unwrap();
        let old = v1::SnapshotBody {
            saved_at: Utc::now(),
            indexes: vec![v1::IndexImage {
                name: current.name,
                definition: current.definition,
                max_id: current.max_id,
                docs: current.docs,
                deleted: current.deleted,
                terms: current.terms,
                fields: current.slots.into_iter().map(|s| s.index).collect(),
            }],
        };
        let block = CompressedBlock::compress(&bincode::serialize(&old).unwrap(), CompressionType::Lz4);
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(block.compression.to_byte());
        bytes.extend_from_slice(&crc32fast::hash(&block.data).to_le_bytes());
        bytes.extend_from_slice(&block.data);
        fs::write(&path, bytes).unwrap();

        let loaded = load(&path, &Config::default()).unwrap();
        let data = loaded[0].data.read();
        // The INDEXALL list is rebuilt from live docs only
        assert_eq!(data.index_all.as_ref().map(|l| l.num_docs()), Some(1));
    }
}
