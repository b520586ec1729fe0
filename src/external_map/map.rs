use crate::external_map::combiner_map::CombinerMap;
use crate::external_map::memory::{MemoryPool, SpillPolicy};
use crate::external_map::merge::{MergeIter, RunStream};
use crate::external_map::run::{self, RunHandle, RunReader};
use crate::external_map::{Aggregator, Result};
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use std::fs;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
const DEFAULT_SAFETY_MARGIN: f64 = 1.5;

/// An aggregating map over arbitrarily large input, backed by disk.
///
/// Key-value pairs are folded into per-key combiners in an in-memory map.
/// When the map's estimated footprint outgrows what the shared
/// [`MemoryPool`] will grant this session, the map is drained to a
/// hash-sorted run on disk and replaced with a fresh one. Consuming the map
/// with `into_iter` merges the final in-memory contents and all spilled
/// runs into a single stream of combined key-combiner pairs, so the result
/// is the same no matter how many times the session spilled.
///
/// One session is owned by one logical producer; only the pool accounting
/// is shared across sessions. Spill files live inside the directory given
/// at construction and are deleted as they are consumed, or when their
/// owners are dropped; removing the directory itself is left to the caller.
///
/// # Examples
///
/// ```
/// # use spill_collections::external_map::Result;
/// # fn foo() -> Result<()> {
/// # use std::fs;
/// use spill_collections::external_map::{Aggregator, ExternalMap, MemoryPool};
/// use std::sync::Arc;
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
/// let pool = Arc::new(MemoryPool::new(64 * 1024 * 1024));
/// let mut map = ExternalMap::new("example_external_map", Sum, pool)?;
///
/// map.insert(1u32, 10)?;
/// map.insert(2u32, 20)?;
/// map.insert(1u32, 30)?;
///
/// let mut result: Vec<_> = map
///     .into_iter()?
///     .collect::<Result<Vec<_>>>()?;
/// result.sort();
/// assert_eq!(result, vec![(1, 40), (2, 20)]);
/// # fs::remove_dir_all("example_external_map")?;
/// # Ok(())
/// # }
/// # foo().unwrap();
/// ```
pub struct ExternalMap<K, V, C, A> {
    path: PathBuf,
    aggregator: A,
    map: CombinerMap<K, C>,
    spilled_runs: Vec<RunHandle>,
    policy: SpillPolicy,
    buffer_size: usize,
    _marker: PhantomData<V>,
}

impl<K, V, C, A> ExternalMap<K, V, C, A>
where
    K: Eq + Hash + Serialize + DeserializeOwned,
    C: Serialize + DeserializeOwned,
    A: Aggregator<V, C>,
{
    /// Constructs a new `ExternalMap<K, V, C, A>`, creating `path` as its
    /// spill directory and registering one session with `pool`.
    pub fn new<P>(path: P, aggregator: A, pool: Arc<MemoryPool>) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::with_config(path, aggregator, pool, DEFAULT_BUFFER_SIZE, DEFAULT_SAFETY_MARGIN)
    }

    /// Constructs a new `ExternalMap<K, V, C, A>` with a specific spill I/O
    /// buffer size and size-estimate safety margin.
    pub fn with_config<P>(
        path: P,
        aggregator: A,
        pool: Arc<MemoryPool>,
        buffer_size: usize,
        safety_margin: f64,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        fs::create_dir(path.as_ref())?;
        Ok(ExternalMap {
            path: PathBuf::from(path.as_ref()),
            aggregator,
            map: CombinerMap::new(),
            spilled_runs: Vec::new(),
            policy: SpillPolicy::new(pool, safety_margin),
            buffer_size,
            _marker: PhantomData,
        })
    }

    /// Inserts a key-value pair, folding the value into the key's combiner.
    /// If the in-memory map can no longer be kept within this session's
    /// share of the memory pool, it is spilled to a new run on disk and
    /// accumulation continues in a fresh map.
    ///
    /// # Examples
    ///
    /// ```
    /// # use spill_collections::external_map::Result;
    /// # fn foo() -> Result<()> {
    /// # use std::fs;
    /// # use spill_collections::external_map::{Aggregator, ExternalMap, MemoryPool};
    /// # use std::sync::Arc;
    /// # struct Sum;
    /// # impl Aggregator<u64, u64> for Sum {
    /// #     fn create_combiner(&self, value: u64) -> u64 {
    /// #         value
    /// #     }
    /// #     fn merge_value(&self, combiner: u64, value: u64) -> u64 {
    /// #         combiner + value
    /// #     }
    /// #     fn merge_combiners(&self, lhs: u64, rhs: u64) -> u64 {
    /// #         lhs + rhs
    /// #     }
    /// # }
    /// // a pool with no capacity forces a spill on every insert
    /// let pool = Arc::new(MemoryPool::new(0));
    /// let mut map = ExternalMap::new("example_external_map_insert", Sum, pool)?;
    ///
    /// map.insert(1u32, 10)?;
    /// map.insert(1u32, 5)?;
    /// assert_eq!(map.spill_count(), 2);
    ///
    /// let result: Vec<_> = map.into_iter()?.collect::<Result<Vec<_>>>()?;
    /// assert_eq!(result, vec![(1, 15)]);
    /// # fs::remove_dir_all("example_external_map_insert")?;
    /// # Ok(())
    /// # }
    /// # foo().unwrap();
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        self.map.insert(&self.aggregator, key, value)?;
        if self.policy.maybe_spill(self.map.estimated_size()) {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        let map = mem::replace(&mut self.map, CombinerMap::new());
        let handle = run::write_run(
            self.path.as_path(),
            map.into_sorted_iter(),
            self.buffer_size,
        )?;
        self.spilled_runs.push(handle);
        self.policy.reset();
        Ok(())
    }

    /// Returns the number of runs this session has spilled to disk.
    pub fn spill_count(&self) -> usize {
        self.spilled_runs.len()
    }

    /// Returns the number of distinct keys currently held in memory. Keys
    /// that only live in spilled runs are not counted.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the map holds no entries, in memory or on disk.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.spilled_runs.is_empty()
    }

    /// An estimate of the in-memory map's footprint in bytes.
    pub fn estimated_size(&self) -> u64 {
        self.map.estimated_size()
    }

    /// Consumes the map and merges the in-memory contents with all spilled
    /// runs, yielding each key exactly once with its combined value. The
    /// output is ordered by key hash; no order is guaranteed among distinct
    /// keys sharing a hash.
    ///
    /// Run files are deleted as they are exhausted; dropping the iterator
    /// early deletes the rest.
    pub fn into_iter(mut self) -> Result<MergeIter<K, V, C, A>> {
        let spilled_runs = mem::replace(&mut self.spilled_runs, Vec::new());
        let map = mem::replace(&mut self.map, CombinerMap::new());

        let mut sources = Vec::with_capacity(spilled_runs.len() + 1);
        for handle in spilled_runs {
            sources.push(RunStream::Disk(RunReader::open(handle, self.buffer_size)?));
        }
        sources.push(RunStream::Memory(map.into_sorted_iter()));

        let ExternalMap { aggregator, .. } = self;
        MergeIter::new(aggregator, sources)
    }
}
