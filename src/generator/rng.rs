//! Per-fixture random sub-streams and fingerprints.
//!
//! Every fixture draws from its own `ChaCha8Rng` keyed by
//! `SHA-256(seed || label || indices)`. Building fixtures in a different
//! order, or building only some of them, never changes any value.

use rand::SeedableRng;
use rand::distr::Distribution;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::errors::Result;

/// Independent RNG for one fixture.
#[must_use]
pub fn substream(seed: u64, label: &str, indices: &[u64]) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(label.as_bytes());
    hasher.update([0xff]);
    for index in indices {
        hasher.update(index.to_le_bytes());
    }
    let mut key = [0_u8; 32];
    key.copy_from_slice(&hasher.finalize());
    ChaCha8Rng::from_seed(key)
}

/// Standard normal draw clamped to `[-3, 3]`.
pub fn bounded_normal(rng: &mut ChaCha8Rng) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    z.clamp(-3.0, 3.0)
}

/// Scale a vector to unit length in place. Zero vectors are left as is.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Stable 64-bit salt for a string label.
#[must_use]
pub fn label_salt(label: &str) -> u64 {
    let digest = Sha256::digest(label.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// SHA-256 over the canonical JSON of a fixture, hex encoded.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_vec(value)?;
    Ok(hex_encode(&Sha256::digest(&canonical)))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}
