//! Distance metrics, similarity normalization and blob decoding.

use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Distance function of a vector field. Lower distance means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared euclidean distance.
    L2,
    /// `1 - dot(a, b)`.
    Ip,
    /// `1 - cos(a, b)`.
    Cosine,
}

impl Metric {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(Metric::L2),
            "IP" => Ok(Metric::Ip),
            "COSINE" => Ok(Metric::Cosine),
            other => Err(Error::new(ErrorKind::BadSchema, format!("unknown DISTANCE_METRIC '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::L2 => "L2",
            Metric::Ip => "IP",
            Metric::Cosine => "COSINE",
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Metric::Ip => 1.0 - dot(a, b),
            Metric::Cosine => {
                let denom = norm(a) * norm(b);
                if denom == 0.0 { 1.0 } else { 1.0 - dot(a, b) / denom }
            }
        }
    }

    /// Maps a distance to a similarity in [0, 1] for fusion and display.
    pub fn to_similarity(&self, distance: f64) -> f64 {
        match self {
            Metric::L2 => 1.0 / (1.0 + distance),
            Metric::Ip | Metric::Cosine => (1.0 + (1.0 - distance)) / 2.0,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorType {
    Float32,
    Float64,
}

impl VectorType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FLOAT32" => Ok(VectorType::Float32),
            "FLOAT64" => Ok(VectorType::Float64),
            other => Err(Error::new(ErrorKind::BadSchema, format!("unsupported vector TYPE '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VectorType::Float32 => "FLOAT32",
            VectorType::Float64 => "FLOAT64",
        }
    }

    pub fn width(&self) -> usize {
        match self {
            VectorType::Float32 => 4,
            VectorType::Float64 => 8,
        }
    }
}

/// Decodes a little-endian blob into f32 components.
pub fn parse_blob(blob: &[u8], elem: VectorType, dim: usize) -> Result<Vec<f32>> {
    let expected = dim * elem.width();
    if blob.len() != expected {
        return Err(Error::new(
            ErrorKind::VectorBlobSizeMismatch,
            format!("expected {} bytes for {} x {}, got {}", expected, dim, elem.name(), blob.len()),
        ));
    }
    let out = match elem {
        VectorType::Float32 => blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        VectorType::Float64 => blob
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
    };
    Ok(out)
}

/// Encodes f32 components as a little-endian FLOAT32 blob.
pub fn to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_is_squared() {
        assert_eq!(Metric::L2.distance(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let d = Metric::Cosine.distance(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - 1.0).abs() < 1e-6);
        assert!((Metric::Cosine.to_similarity(d as f64) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_ranges() {
        assert_eq!(Metric::L2.to_similarity(0.0), 1.0);
        assert_eq!(Metric::Cosine.to_similarity(0.0), 1.0);
        assert_eq!(Metric::Ip.to_similarity(2.0), 0.0);
    }

    #[test]
    fn test_blob_size_mismatch() {
        let err = parse_blob(&[0u8; 7], VectorType::Float32, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::VectorBlobSizeMismatch);
    }

    #[test]
    fn test_blob_float64() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&1.5f64.to_le_bytes());
        blob.extend_from_slice(&(-2.0f64).to_le_bytes());
        assert_eq!(parse_blob(&blob, VectorType::Float64, 2).unwrap(), vec![1.5, -2.0]);
        assert_eq!(parse_blob(&to_blob(&[1.0, 2.0]), VectorType::Float32, 2).unwrap(), vec![1.0, 2.0]);
    }
}
