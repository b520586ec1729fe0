/// Incremental footprint bookkeeping for a growing collection.
///
/// Tracks the deep (serialized) bytes of the entries as they are created and
/// merged, and folds in the caller's shallow bytes when asked for an
/// estimate. The estimate is reported through a high-water mark so that the
/// value used as a spill trigger never decreases, even when a merge shrinks
/// a combiner.
pub struct SizeTracker {
    deep_bytes: u64,
    high_water: u64,
}

impl SizeTracker {
    pub fn new() -> Self {
        SizeTracker {
            deep_bytes: 0,
            high_water: 0,
        }
    }

    /// Records a newly created entry of `bytes` serialized bytes.
    pub fn record_create(&mut self, bytes: u64) {
        self.deep_bytes += bytes;
    }

    /// Records a merge that replaced a combiner of `old_bytes` with one of
    /// `new_bytes`.
    pub fn record_merge(&mut self, old_bytes: u64, new_bytes: u64) {
        self.deep_bytes = (self.deep_bytes + new_bytes).saturating_sub(old_bytes);
    }

    /// Updates and returns the current estimate given the collection's
    /// shallow bytes.
    pub fn estimate(&mut self, shallow_bytes: u64) -> u64 {
        let estimate = self.deep_bytes + shallow_bytes;
        if estimate > self.high_water {
            self.high_water = estimate;
        }
        self.high_water
    }

    /// The most recent estimate, without recomputing.
    pub fn last_estimate(&self) -> u64 {
        self.high_water
    }
}
