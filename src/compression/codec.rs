use serde::{Serialize, Deserialize};
use crate::compression::vbyte::VByteEncoder;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, FieldMask};

/// Which payloads a posting record carries. Chosen per field kind when the
/// list is created and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFlags(u8);

impl RecordFlags {
    pub const DOCIDS_ONLY: RecordFlags = RecordFlags(0);
    pub const FREQS: u8 = 1;
    pub const FIELDS: u8 = 2;
    pub const OFFSETS: u8 = 4;
    pub const NUMERIC: u8 = 8;
    pub const RAW_DOCID: u8 = 16;

    pub fn new(bits: u8) -> Self {
        RecordFlags(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Full-text records: freq + field mask + offsets, minus what the index disabled.
    pub fn text(with_freqs: bool, with_fields: bool, with_offsets: bool) -> Self {
        let mut bits = 0;
        if with_freqs {
            bits |= Self::FREQS;
        }
        if with_fields {
            bits |= Self::FIELDS;
        }
        if with_offsets {
            bits |= Self::OFFSETS;
        }
        RecordFlags(bits)
    }

    pub fn tag(raw: bool) -> Self {
        if raw { RecordFlags(Self::RAW_DOCID) } else { Self::DOCIDS_ONLY }
    }

    pub fn numeric() -> Self {
        RecordFlags(Self::NUMERIC)
    }

    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn name(&self) -> String {
        if self.0 == 0 {
            return "DOCIDS_ONLY".to_string();
        }
        let mut parts = Vec::new();
        for (bit, name) in [
            (Self::FREQS, "FREQS"),
            (Self::FIELDS, "FIELDS"),
            (Self::OFFSETS, "OFFSETS"),
            (Self::NUMERIC, "NUMERIC"),
            (Self::RAW_DOCID, "RAW_DOCID"),
        ] {
            if self.has(bit) {
                parts.push(name);
            }
        }
        parts.join("|")
    }
}

/// One decoded posting record.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingEntry {
    pub doc_id: DocId,
    pub freq: u32,
    pub field_mask: FieldMask,
    pub offsets: Vec<u32>,
    pub value: f64,
}

impl PostingEntry {
    pub fn doc(doc_id: DocId) -> Self {
        PostingEntry { doc_id, freq: 1, field_mask: 0, offsets: Vec::new(), value: 0.0 }
    }

    pub fn numeric(doc_id: DocId, value: f64) -> Self {
        PostingEntry { doc_id, freq: 1, field_mask: 0, offsets: Vec::new(), value }
    }
}

/// Appends one record; `prev` is the previous doc-id in the same block
/// (the block's first id for its first record).
pub fn encode_entry(out: &mut Vec<u8>, prev: DocId, entry: &PostingEntry, flags: RecordFlags) -> Result<()> {
    if entry.doc_id < prev {
        return Err(Error::new(
            ErrorKind::InvalidState,
            format!("doc id {} appended after {}", entry.doc_id, prev),
        ));
    }
    let delta = entry.doc_id.0 - prev.0;

    if flags.has(RecordFlags::RAW_DOCID) {
        let raw = u32::try_from(delta)
            .map_err(|_| Error::new(ErrorKind::InvalidState, "raw doc id delta exceeds 4 bytes"))?;
        out.extend_from_slice(&raw.to_le_bytes());
    } else {
        VByteEncoder::encode_u64(out, delta);
    }
    if flags.has(RecordFlags::FREQS) {
        VByteEncoder::encode_u32(out, entry.freq);
    }
    if flags.has(RecordFlags::FIELDS) {
        VByteEncoder::encode_u64(out, entry.field_mask);
    }
    if flags.has(RecordFlags::OFFSETS) {
        VByteEncoder::encode_delta_list(out, &entry.offsets);
    }
    if flags.has(RecordFlags::NUMERIC) {
        out.extend_from_slice(&entry.value.to_le_bytes());
    }
    Ok(())
}

/// Decodes one record, returns it with the number of bytes consumed.
pub fn decode_entry(input: &[u8], prev: DocId, flags: RecordFlags) -> Result<(PostingEntry, usize)> {
    let mut pos;
    let delta = if flags.has(RecordFlags::RAW_DOCID) {
        let bytes: [u8; 4] = input
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::new(ErrorKind::Parse, "truncated raw doc id"))?;
        pos = 4;
        u32::from_le_bytes(bytes) as u64
    } else {
        let (d, used) = VByteEncoder::decode_u64(input)?;
        pos = used;
        d
    };

    let mut entry = PostingEntry::doc(DocId(prev.0 + delta));
    if flags.has(RecordFlags::FREQS) {
        let (freq, used) = VByteEncoder::decode_u32(&input[pos..])?;
        entry.freq = freq;
        pos += used;
    }
    if flags.has(RecordFlags::FIELDS) {
        let (mask, used) = VByteEncoder::decode_u64(&input[pos..])?;
        entry.field_mask = mask;
        pos += used;
    }
    if flags.has(RecordFlags::OFFSETS) {
        let (offsets, used) = VByteEncoder::decode_delta_list(&input[pos..])?;
        entry.offsets = offsets;
        pos += used;
    }
    if flags.has(RecordFlags::NUMERIC) {
        let bytes: [u8; 8] = input
            .get(pos..pos + 8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::new(ErrorKind::Parse, "truncated numeric record"))?;
        entry.value = f64::from_le_bytes(bytes);
        pos += 8;
    }
    Ok((entry, pos))
}
