//! Per-recipient counter serialization via an N-way sharded mutex array.
//!
//! Only the read-modify-write of a recipient's counter row needs to be serialized; shard
//! selection is `SHA-256(shard_rand || key) mod N`, rehashed once per process so restarts
//! don't leak a stable mapping of key to shard across runs.

use std::sync::{Mutex, MutexGuard};

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub struct ShardLocks {
    shard_rand: [u8; 16],
    locks: Vec<Mutex<()>>,
}

impl ShardLocks {
    pub fn new(num_shards: usize) -> Self {
        let mut shard_rand = [0u8; 16];
        OsRng.fill_bytes(&mut shard_rand);
        let mut locks = Vec::with_capacity(num_shards.max(1));
        for _ in 0..num_shards.max(1) {
            locks.push(Mutex::new(()));
        }
        Self { shard_rand, locks }
    }

    fn shard_for(&self, key: &[u8]) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(self.shard_rand);
        hasher.update(key);
        let digest = hasher.finalize();
        let mut first_eight = [0u8; 8];
        first_eight.copy_from_slice(&digest[0..8]);
        (u64::from_be_bytes(first_eight) % self.locks.len() as u64) as usize
    }

    /// Lock the shard owning `key` for the duration of the returned guard.
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.locks[self.shard_for(key)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locking_disjoint_keys_does_not_deadlock() {
        let shards = ShardLocks::new(4);
        let _a = shards.lock(b"recipient-a");
        let _b = shards.lock(b"recipient-b");
    }

    #[test]
    fn shard_selection_is_stable_within_a_process() {
        let shards = ShardLocks::new(16);
        let first = shards.shard_for(b"recipient-a");
        let second = shards.shard_for(b"recipient-a");
        assert_eq!(first, second);
    }
}
