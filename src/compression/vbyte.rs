use crate::core::error::{Error, ErrorKind, Result};

/// Variable byte encoding for integers (best for small integers)
pub struct VByteEncoder;

impl VByteEncoder {
    /// Values < 128 use 1 byte, < 16384 use 2 bytes, etc.
    pub fn encode_u32(output: &mut Vec<u8>, value: u32) {
        Self::encode_u64(output, value as u64)
    }

    pub fn encode_u64(output: &mut Vec<u8>, mut value: u64) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128);  // Set continuation bit
            value >>= 7;
        }
        output.push(value as u8);
    }

    /// Decode single u32 value, returns (value, bytes_consumed)
    pub fn decode_u32(input: &[u8]) -> Result<(u32, usize)> {
        let (value, consumed) = Self::decode_u64(input)?;
        let value = u32::try_from(value)
            .map_err(|_| Error::new(ErrorKind::Parse, "VByte value exceeds u32"))?;
        Ok((value, consumed))
    }

    pub fn decode_u64(input: &[u8]) -> Result<(u64, usize)> {
        let mut value = 0u64;
        let mut shift = 0;

        for (i, &byte) in input.iter().enumerate() {
            value |= ((byte & 127) as u64) << shift;

            if byte & 128 == 0 {
                return Ok((value, i + 1));
            }

            shift += 7;
            if shift > 63 {  // Max 10 bytes for u64
                return Err(Error::new(ErrorKind::Parse, "VByte overflow"));
            }
        }

        Err(Error::new(ErrorKind::Parse, "Incomplete VByte"))
    }

    /// Sorted list as first value plus deltas.
    pub fn encode_delta_list(output: &mut Vec<u8>, nums: &[u32]) {
        Self::encode_u32(output, nums.len() as u32);
        let mut prev = 0u32;
        for &n in nums {
            Self::encode_u32(output, n.wrapping_sub(prev));
            prev = n;
        }
    }

    pub fn decode_delta_list(input: &[u8]) -> Result<(Vec<u32>, usize)> {
        let (count, mut pos) = Self::decode_u32(input)?;
        let mut nums = Vec::with_capacity(count as usize);
        let mut prev = 0u32;
        for _ in 0..count {
            let (delta, consumed) = Self::decode_u32(&input[pos..])?;
            prev = prev.wrapping_add(delta);
            nums.push(prev);
            pos += consumed;
        }
        Ok((nums, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_use_one_byte() {
        let mut out = Vec::new();
        VByteEncoder::encode_u32(&mut out, 127);
        assert_eq!(out.len(), 1);
        VByteEncoder::encode_u32(&mut out, 128);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let err = VByteEncoder::decode_u64(&[0x80, 0x80]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_delta_list() {
        let mut out = Vec::new();
        VByteEncoder::encode_delta_list(&mut out, &[3, 7, 7, 300]);
        out.push(0xFF);
        let (nums, used) = VByteEncoder::decode_delta_list(&out).unwrap();
        assert_eq!(nums, vec![3, 7, 7, 300]);
        assert_eq!(used, out.len() - 1);
    }
}
