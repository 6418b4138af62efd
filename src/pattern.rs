use crate::target::{ArrayId, VolumeId};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Deterministic xorshift generator for content patterns. Same seed,
/// same bytes, so a pattern written before a crash can be reproduced for
/// verification after recovery.
pub struct PatternRng {
    state: u64,
}

impl PatternRng {
    pub fn new(seed: u64) -> Self {
        let mut rng = Self { state: 0 };
        rng.state = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        rng.next();
        rng
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Generate a `len`-byte pattern from `seed`.
pub fn generate(seed: u64, len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    PatternRng::new(seed).fill(&mut buf);
    Bytes::from(buf)
}

/// Per-volume pattern bookkeeping for fault scenarios. A fresh seed is
/// drawn before every write phase, so pre-crash and post-crash contents
/// are always distinguishable.
pub struct PatternStore {
    next_seed: AtomicU64,
    pattern_len: usize,
    latest: Mutex<HashMap<(ArrayId, VolumeId), Bytes>>,
}

impl PatternStore {
    pub fn new(base_seed: u64, pattern_len: usize) -> Self {
        Self {
            next_seed: AtomicU64::new(base_seed),
            pattern_len,
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Generate and remember a new pattern for `(array, volume)`.
    pub fn create_new(&self, array: ArrayId, volume: VolumeId) -> Bytes {
        let seed = self.next_seed.fetch_add(1, Ordering::SeqCst);
        let pattern = generate(seed, self.pattern_len);
        self.latest
            .lock()
            .expect("pattern store lock poisoned")
            .insert((array, volume), pattern.clone());
        pattern
    }

    /// The most recently generated pattern for `(array, volume)`.
    pub fn latest(&self, array: ArrayId, volume: VolumeId) -> Option<Bytes> {
        self.latest
            .lock()
            .expect("pattern store lock poisoned")
            .get(&(array, volume))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        assert_eq!(generate(7, 256), generate(7, 256));
    }

    #[test]
    fn different_seeds_differ() {
        assert_ne!(generate(7, 256), generate(8, 256));
    }

    #[test]
    fn store_rotates_patterns_per_volume() {
        let store = PatternStore::new(1, 64);
        let p1 = store.create_new(0, 1);
        assert_eq!(store.latest(0, 1).unwrap(), p1);

        let p2 = store.create_new(0, 1);
        assert_ne!(p1, p2);
        assert_eq!(store.latest(0, 1).unwrap(), p2);

        // Other volumes are independent.
        assert!(store.latest(0, 2).is_none());
        let q = store.create_new(0, 2);
        assert_ne!(q, p2);
    }
}
