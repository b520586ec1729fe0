use std::cmp;
use std::sync::{Arc, Mutex};

/// A byte budget shared by all aggregation sessions in a process.
///
/// Each active session registers with the pool and may hold up to its fair
/// share of the capacity, `capacity / active_sessions`. Accounting is
/// guarded by a mutex so sessions running on different threads can request
/// and release memory concurrently, even though each session itself is
/// single-threaded.
///
/// # Examples
///
/// ```
/// use spill_collections::external_map::MemoryPool;
/// use std::sync::Arc;
///
/// let pool = Arc::new(MemoryPool::new(64 * 1024 * 1024));
/// assert_eq!(pool.capacity(), 64 * 1024 * 1024);
/// assert_eq!(pool.used(), 0);
/// ```
pub struct MemoryPool {
    capacity: u64,
    state: Mutex<PoolState>,
}

struct PoolState {
    used: u64,
    active: usize,
}

impl MemoryPool {
    /// Constructs a new `MemoryPool` with a capacity in bytes.
    pub fn new(capacity: u64) -> Self {
        MemoryPool {
            capacity,
            state: Mutex::new(PoolState { used: 0, active: 0 }),
        }
    }

    /// Returns the total capacity of the pool in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of bytes currently granted to sessions.
    pub fn used(&self) -> u64 {
        self.state.lock().unwrap().used
    }

    pub(crate) fn register(&self) {
        self.state.lock().unwrap().active += 1;
    }

    pub(crate) fn unregister(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = state.active.saturating_sub(1);
    }

    /// Grants up to `want` more bytes to a session already holding `held`,
    /// bounded by the session's fair share and the unused capacity.
    pub(crate) fn try_acquire(&self, want: u64, held: u64) -> u64 {
        let mut state = self.state.lock().unwrap();
        let fair_share = if state.active == 0 {
            self.capacity
        } else {
            self.capacity / state.active as u64
        };
        let headroom = cmp::min(
            fair_share.saturating_sub(held),
            self.capacity.saturating_sub(state.used),
        );
        let granted = cmp::min(want, headroom);
        state.used += granted;
        granted
    }

    pub(crate) fn release(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.used = state.used.saturating_sub(bytes);
    }
}

/// Per-session spill decision logic over a shared [`MemoryPool`].
///
/// The policy pads the collection's size estimate by a safety margin to
/// guard against under-estimation, and tries to keep the session's grant
/// ahead of the padded estimate by doubling it whenever it is crossed. Only
/// when the pool cannot satisfy the request does the policy answer that the
/// collection should be spilled.
///
/// Constructing a policy registers a session with the pool; dropping it
/// releases whatever the session still holds and unregisters it.
pub struct SpillPolicy {
    pool: Arc<MemoryPool>,
    granted: u64,
    safety_margin: f64,
}

impl SpillPolicy {
    /// Constructs a new `SpillPolicy` for one session, registering it with
    /// the pool.
    pub fn new(pool: Arc<MemoryPool>, safety_margin: f64) -> Self {
        pool.register();
        SpillPolicy {
            pool,
            granted: 0,
            safety_margin,
        }
    }

    /// Decides whether the collection whose estimated size is
    /// `estimated_size` should be spilled and replaced with a fresh one.
    pub fn maybe_spill(&mut self, estimated_size: u64) -> bool {
        let padded = (estimated_size as f64 * self.safety_margin) as u64;
        if padded <= self.granted {
            return false;
        }
        let want = padded.saturating_mul(2).saturating_sub(self.granted);
        self.granted += self.pool.try_acquire(want, self.granted);
        padded > self.granted
    }

    /// Returns the bytes currently granted to this session.
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Releases the session's grant back to the pool after a spill.
    pub fn reset(&mut self) {
        self.pool.release(self.granted);
        self.granted = 0;
    }
}

impl Drop for SpillPolicy {
    fn drop(&mut self) {
        self.pool.release(self.granted);
        self.pool.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryPool, SpillPolicy};
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_always_spills() {
        let pool = Arc::new(MemoryPool::new(0));
        let mut policy = SpillPolicy::new(pool, 1.5);
        assert!(policy.maybe_spill(1));
        assert!(policy.maybe_spill(1024));
    }

    #[test]
    fn test_large_capacity_never_spills() {
        let pool = Arc::new(MemoryPool::new(u64::max_value() / 4));
        let mut policy = SpillPolicy::new(Arc::clone(&pool), 1.5);
        for estimated_size in (0..10_000u64).map(|step| step * 100) {
            assert!(!policy.maybe_spill(estimated_size));
        }
        assert!(pool.used() > 0);
    }

    #[test]
    fn test_empty_collection_does_not_spill() {
        let pool = Arc::new(MemoryPool::new(0));
        let mut policy = SpillPolicy::new(pool, 1.5);
        assert!(!policy.maybe_spill(0));
    }

    #[test]
    fn test_reset_releases_grant() {
        let pool = Arc::new(MemoryPool::new(1024 * 1024));
        let mut policy = SpillPolicy::new(Arc::clone(&pool), 1.0);
        assert!(!policy.maybe_spill(1000));
        assert!(pool.used() > 0);
        assert!(policy.granted() > 0);

        policy.reset();
        assert_eq!(pool.used(), 0);
        assert_eq!(policy.granted(), 0);
    }

    #[test]
    fn test_drop_releases_grant_and_unregisters() {
        let pool = Arc::new(MemoryPool::new(1024 * 1024));
        {
            let mut policy = SpillPolicy::new(Arc::clone(&pool), 1.0);
            assert!(!policy.maybe_spill(1000));
            assert!(pool.used() > 0);
        }
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_fair_share_is_split_between_sessions() {
        let pool = Arc::new(MemoryPool::new(1000));
        let mut first = SpillPolicy::new(Arc::clone(&pool), 1.0);
        let mut second = SpillPolicy::new(Arc::clone(&pool), 1.0);

        // each session can hold at most half of the pool
        assert!(!first.maybe_spill(400));
        assert!(first.granted() <= 500);
        assert!(!second.maybe_spill(400));
        assert!(second.granted() <= 500);

        // crossing the fair share forces a spill even though the pool as a
        // whole is not exhausted
        assert!(first.maybe_spill(600));
    }

    #[test]
    fn test_acquire_is_bounded_by_unused_capacity() {
        let pool = Arc::new(MemoryPool::new(100));
        assert_eq!(pool.try_acquire(500, 0), 100);
        assert_eq!(pool.used(), 100);
        assert_eq!(pool.try_acquire(1, 0), 0);

        pool.release(100);
        assert_eq!(pool.used(), 0);
    }
}
