use tokio::sync::{Mutex, MutexGuard};

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

/// Async per-product lock table.
///
/// Concurrent seller transactions may target the same seller; updates to
/// one `(seller, product)` pair are serialized by holding its shard lock
/// across the request. Unrelated products share a shard only on hash
/// collision, which costs throughput but never correctness.
pub struct ShardedLocks {
    shards: Box<[Mutex<()>]>,
}

impl Default for ShardedLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedLocks {
    pub fn new() -> Self {
        let shards: Vec<Mutex<()>> = (0..NUM_SHARDS).map(|_| Mutex::new(())).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    fn shard_index(seller_id: u64, product_id: u64) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one((seller_id, product_id));
        (hash & SHARD_MASK) as usize
    }

    /// Wait for exclusive access to `(seller_id, product_id)`.
    pub async fn lock(&self, seller_id: u64, product_id: u64) -> MutexGuard<'_, ()> {
        self.shards[Self::shard_index(seller_id, product_id)]
            .lock()
            .await
    }
}
