use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Lz4,
}

impl CompressionType {
    pub fn to_byte(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            other => Err(Error::new(ErrorKind::Parse, format!("unknown compression type {}", other))),
        }
    }
}

/// Compressed byte payload (snapshot bodies).
pub struct CompressedBlock {
    pub data: Vec<u8>,
    pub compression: CompressionType,
}

impl CompressedBlock {
    pub fn compress(data: &[u8], compression: CompressionType) -> Self {
        let data = match compression {
            CompressionType::None => data.to_vec(),
            // Prepends the uncompressed size so decompression needs no side channel
            CompressionType::Lz4 => lz4_flex::compress_prepend_size(data),
        };
        CompressedBlock { data, compression }
    }

    pub fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
        match compression {
            CompressionType::None => Ok(data.to_vec()),
            CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::new(ErrorKind::Parse, format!("lz4: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_shrinks_repetitive_data() {
        let data = vec![7u8; 4096];
        let block = CompressedBlock::compress(&data, CompressionType::Lz4);
        assert!(block.data.len() < data.len());
        let back = CompressedBlock::decompress(&block.data, CompressionType::Lz4).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_corrupt_payload_fails() {
        let err = CompressedBlock::decompress(&[1, 0, 0], CompressionType::Lz4).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_unknown_type_byte() {
        assert!(CompressionType::from_byte(9).is_err());
    }
}
