//! MurmurHash3 x64_128.
//!
//! Original algorithm by Austin Appleby (public domain).
//!
//! Besides the one-shot [`hash128`], this crate provides [`Murmur3Hasher`], a
//! [`std::hash::Hasher`] that buffers written bytes and hashes them on
//! `finish`. It is used to bucket attribute values whose canonical byte form
//! is fed through `write`.

use std::hash::{BuildHasher, Hasher};

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

#[inline]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Final avalanche for 64-bit lanes.
#[inline]
fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// Reads up to 8 bytes as a little-endian u64, zero padded.
#[inline]
fn read_lane(bytes: &[u8]) -> u64 {
    let mut lane = [0u8; 8];
    lane[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(lane)
}

/// Compute MurmurHash3 x64_128 of `data` with the given seed.
///
/// Returns the two 64-bit halves `(h1, h2)`.
pub fn hash128_with_seed(data: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let k1 = read_lane(&block[..8]);
        let k2 = read_lane(&block[8..]);

        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(27).wrapping_add(h2).wrapping_mul(5).wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2.rotate_left(31).wrapping_add(h1).wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    // Tail: at most 15 bytes, low lane first
    let tail = blocks.remainder();
    if tail.len() > 8 {
        h2 ^= mix_k2(read_lane(&tail[8..]));
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(read_lane(&tail[..tail.len().min(8)]));
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// Compute MurmurHash3 x64_128 of `data` with seed 0.
#[inline]
pub fn hash128(data: &[u8]) -> (u64, u64) {
    hash128_with_seed(data, 0)
}

/// Streaming hasher: bytes are buffered and hashed once on `finish`.
///
/// `finish` returns the low half of the 128-bit hash.
#[derive(Clone, Debug, Default)]
pub struct Murmur3Hasher {
    seed: u64,
    buffer: Vec<u8>,
}

impl Murmur3Hasher {
    /// Create a hasher with a seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, buffer: Vec::new() }
    }

    /// Full 128-bit result for the bytes written so far.
    pub fn finish128(&self) -> (u64, u64) {
        hash128_with_seed(&self.buffer, self.seed)
    }
}

impl Hasher for Murmur3Hasher {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.finish128().0
    }
}

/// [`BuildHasher`] for hash maps keyed by pre-hashed or byte-like values.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildMurmur3 {
    pub seed: u64,
}

impl BuildHasher for BuildMurmur3 {
    type Hasher = Murmur3Hasher;

    fn build_hasher(&self) -> Self::Hasher {
        Murmur3Hasher::with_seed(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero_with_zero_seed() {
        assert_eq!(hash128(&[]), (0, 0));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(hash128(b"hello"), hash128(b"hello"));
        assert_ne!(hash128(b"hello"), hash128(b"hellp"));
    }

    #[test]
    fn test_tail_lengths_differ() {
        let data: Vec<u8> = (0..40).collect();
        let mut seen = std::collections::HashSet::new();
        for len in 0..data.len() {
            assert!(seen.insert(hash128(&data[..len])), "collision at len {len}");
        }
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = Murmur3Hasher::default();
        hasher.write(b"0123456789");
        hasher.write(b"abcdefghij");
        assert_eq!(hasher.finish128(), hash128(b"0123456789abcdefghij"));
    }

    #[test]
    fn test_seed_changes_output() {
        assert_ne!(hash128_with_seed(b"abc", 0), hash128_with_seed(b"abc", 1));
    }
}
