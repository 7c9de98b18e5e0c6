//! Distance metric implementations for HNSW search.
//!
//! Supports three spaces: squared Euclidean (L2), inner product and cosine.
//! Cosine is computed as inner product over unit-length vectors; callers run
//! vectors through [`DistanceMetric::prepare`] before storing or querying.

use std::fmt;
use std::str::FromStr;

/// Distance metric used for vector similarity computation.
///
/// All metrics return a value where **lower is better** (more similar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    L2,
    /// `1 - dot(a, b)`. Not a metric; only used as a ranking key.
    InnerProduct,
    /// `1 - dot(a, b)` over unit-normalized vectors. Range: \[0, 2\].
    Cosine,
}

impl DistanceMetric {
    /// Distance between two vectors of equal length.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::L2 => euclidean_sq(a, b),
            DistanceMetric::InnerProduct | DistanceMetric::Cosine => 1.0 - dot_product(a, b),
        }
    }

    /// Returns `true` if vectors must be normalized before storage and query.
    #[inline]
    pub fn normalizes(&self) -> bool {
        matches!(self, DistanceMetric::Cosine)
    }

    /// Returns the form in which `vector` is stored or queried under this metric.
    pub fn prepare(&self, vector: &[f32]) -> Vec<f32> {
        let mut out = vector.to_vec();
        if self.normalizes() {
            normalize(&mut out);
        }
        out
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "ip",
            DistanceMetric::Cosine => "cosine",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceMetric {
    type Err = crate::error::HnswError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "ip" | "inner_product" | "dot" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(crate::error::HnswError::invalid(format!(
                "unknown distance metric '{other}', expected one of l2, ip, cosine"
            ))),
        }
    }
}

/// Scale `v` to unit length in place. Zero vectors stay zero.
pub fn normalize(v: &mut [f32]) {
    let norm_sq = dot_product(v, v);
    let inv = 1.0 / (norm_sq.sqrt() + 1e-30);
    for x in v.iter_mut() {
        *x *= inv;
    }
}

/// Squared Euclidean distance, accumulated over 4 lanes to help autovectorization.
#[inline]
fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let rem_a = chunks_a.remainder();
    let rem_b = chunks_b.remainder();
    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..4 {
            let d = ca[lane] - cb[lane];
            acc[lane] += d * d;
        }
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for (x, y) in rem_a.iter().zip(rem_b) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let rem_a = chunks_a.remainder();
    let rem_b = chunks_b.remainder();
    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..4 {
            acc[lane] += ca[lane] * cb[lane];
        }
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for (x, y) in rem_a.iter().zip(rem_b) {
        sum += x * y;
    }
    sum
}
