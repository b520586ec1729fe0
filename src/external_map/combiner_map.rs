use crate::external_map::size_tracker::SizeTracker;
use crate::external_map::{Aggregator, Result};
use bincode::serialized_size;
use serde::ser::Serialize;
use siphasher::sip::SipHasher;
use std::hash::{Hash, Hasher};
use std::mem;
use std::vec;

const INITIAL_CAPACITY: usize = 64;
const LOAD_FACTOR: f64 = 0.7;

// Fixed keys: spill order is defined by this hash, so it must be stable
// across maps, spills, and sessions.
const HASH_KEY_0: u64 = 0x9e37_79b9_7f4a_7c15;
const HASH_KEY_1: u64 = 0x6c62_272e_07bb_0142;

pub(crate) fn key_hash<T>(key: &T) -> u64
where
    T: Hash,
{
    let mut hasher = SipHasher::new_with_keys(HASH_KEY_0, HASH_KEY_1);
    key.hash(&mut hasher);
    hasher.finish()
}

/// An in-memory map from keys to accumulated combiners.
///
/// Values are folded into their key's combiner as they are inserted, through
/// the `Aggregator` passed to `insert`. The map tracks an estimate of its
/// own memory footprint and is consumed by `into_sorted_iter`, which yields
/// the entries ordered by key hash for spilling or merging.
///
/// # Examples
///
/// ```
/// # use spill_collections::external_map::Result;
/// # fn foo() -> Result<()> {
/// use spill_collections::external_map::{Aggregator, CombinerMap};
///
/// struct Sum;
///
/// impl Aggregator<u64, u64> for Sum {
///     fn create_combiner(&self, value: u64) -> u64 {
///         value
///     }
///
///     fn merge_value(&self, combiner: u64, value: u64) -> u64 {
///         combiner + value
///     }
///
///     fn merge_combiners(&self, lhs: u64, rhs: u64) -> u64 {
///         lhs + rhs
///     }
/// }
///
/// let mut map = CombinerMap::new();
/// map.insert(&Sum, "a", 1)?;
/// map.insert(&Sum, "b", 2)?;
/// map.insert(&Sum, "a", 3)?;
///
/// assert_eq!(map.len(), 2);
/// assert!(map.estimated_size() > 0);
/// # Ok(())
/// # }
/// # foo().unwrap();
/// ```
pub struct CombinerMap<K, C> {
    slots: Vec<Option<(u64, K, C)>>,
    len: usize,
    size_tracker: SizeTracker,
}

impl<K, C> CombinerMap<K, C>
where
    K: Eq + Hash + Serialize,
    C: Serialize,
{
    /// Constructs a new, empty `CombinerMap<K, C>`.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(INITIAL_CAPACITY);
        for _ in 0..INITIAL_CAPACITY {
            slots.push(None);
        }
        CombinerMap {
            slots,
            len: 0,
            size_tracker: SizeTracker::new(),
        }
    }

    /// Inserts a value: the first value seen for a key becomes
    /// `create_combiner(value)`, later values are folded in with
    /// `merge_value`. Amortized constant time.
    pub fn insert<V, A>(&mut self, aggregator: &A, key: K, value: V) -> Result<()>
    where
        A: Aggregator<V, C>,
    {
        if (self.len + 1) as f64 > self.slots.len() as f64 * LOAD_FACTOR {
            self.grow();
        }

        let hash = key_hash(&key);
        let mask = self.slots.len() - 1;
        let mut pos = (hash as usize) & mask;
        let mut delta = 1;
        loop {
            match self.slots[pos].take() {
                None => {
                    let combiner = aggregator.create_combiner(value);
                    let bytes = serialized_size(&key)? + serialized_size(&combiner)?;
                    self.slots[pos] = Some((hash, key, combiner));
                    self.len += 1;
                    self.size_tracker.record_create(bytes);
                    break;
                },
                Some((slot_hash, slot_key, combiner)) => {
                    if slot_hash == hash && slot_key == key {
                        let old_bytes = serialized_size(&combiner)?;
                        let combiner = aggregator.merge_value(combiner, value);
                        let new_bytes = serialized_size(&combiner)?;
                        self.slots[pos] = Some((slot_hash, slot_key, combiner));
                        self.size_tracker.record_merge(old_bytes, new_bytes);
                        break;
                    }
                    self.slots[pos] = Some((slot_hash, slot_key, combiner));
                    pos = (pos + delta) & mask;
                    delta += 1;
                },
            }
        }

        let shallow = self.shallow_size();
        self.size_tracker.estimate(shallow);
        Ok(())
    }

    fn grow(&mut self) {
        let new_capacity = self.slots.len() * 2;
        let mut new_slots = Vec::with_capacity(new_capacity);
        for _ in 0..new_capacity {
            new_slots.push(None);
        }
        let old_slots = mem::replace(&mut self.slots, new_slots);
        for entry in old_slots.into_iter().flatten() {
            let mask = self.slots.len() - 1;
            let mut pos = (entry.0 as usize) & mask;
            let mut delta = 1;
            while self.slots[pos].is_some() {
                pos = (pos + delta) & mask;
                delta += 1;
            }
            self.slots[pos] = Some(entry);
        }
    }

    fn shallow_size(&self) -> u64 {
        (self.slots.len() * mem::size_of::<Option<(u64, K, C)>>()) as u64
    }

    /// An estimate of the map's memory footprint in bytes. Used as a spill
    /// trigger heuristic; never decreases over the lifetime of the map.
    pub fn estimated_size(&self) -> u64 {
        self.size_tracker.last_estimate()
    }

    /// Returns the number of distinct keys in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the map and returns its entries sorted by key hash.
    ///
    /// The occupied slots are moved into a contiguous vector and sorted
    /// there, at the cost of one transient vector during the sort; taking
    /// the map by value is what guarantees no insertion can follow the
    /// start of iteration.
    pub fn into_sorted_iter(self) -> vec::IntoIter<(u64, K, C)> {
        let mut entries: Vec<_> = self.slots.into_iter().flatten().collect();
        entries.sort_unstable_by_key(|entry| entry.0);
        entries.into_iter()
    }
}
