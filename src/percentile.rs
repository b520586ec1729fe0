//! Online order-statistic tracking over a stream of samples.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Clone, Copy, Debug)]
struct TotalF64(f64);

impl PartialEq for TotalF64 {
    fn eq(&self, other: &TotalF64) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &TotalF64) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &TotalF64) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A running percentile over a stream of samples, maintained with two heaps.
///
/// The samples at or below the tracked percentile live in a max-heap, the
/// rest in a min-heap whose head is the current percentile value. Each
/// insert grows whichever side keeps the small heap at the target fraction
/// of the total, within one element, moving at most one sample across.
/// Samples are only ever inserted; nothing is removed.
///
/// # Examples
///
/// ```
/// use spill_collections::percentile::PercentileHeap;
///
/// let mut heap = PercentileHeap::new(0.5);
/// assert_eq!(heap.percentile(), None);
///
/// for sample in &[4.0, 1.0, 3.0, 5.0, 2.0] {
///     heap.insert(*sample);
/// }
///
/// assert_eq!(heap.len(), 5);
/// assert_eq!(heap.percentile(), Some(3.0));
/// ```
pub struct PercentileHeap {
    fraction: f64,
    small: BinaryHeap<TotalF64>,
    large: BinaryHeap<Reverse<TotalF64>>,
}

impl PercentileHeap {
    /// Constructs a new `PercentileHeap` tracking the given percentile
    /// fraction.
    ///
    /// # Panics
    ///
    /// Panics if `fraction` is not in `[0, 1]`.
    pub fn new(fraction: f64) -> Self {
        assert!(
            fraction >= 0.0 && fraction <= 1.0,
            "percentile fraction must be in [0, 1]"
        );
        PercentileHeap {
            fraction,
            small: BinaryHeap::new(),
            large: BinaryHeap::new(),
        }
    }

    /// Returns the number of samples inserted.
    pub fn len(&self) -> usize {
        self.small.len() + self.large.len()
    }

    /// Returns `true` if no samples have been inserted.
    pub fn is_empty(&self) -> bool {
        self.small.is_empty() && self.large.is_empty()
    }

    /// Returns the current percentile value, or `None` if no samples have
    /// been inserted.
    pub fn percentile(&self) -> Option<f64> {
        self.large.peek().map(|&Reverse(TotalF64(value))| value)
    }

    /// Inserts a sample.
    pub fn insert(&mut self, value: f64) {
        let point = match self.large.peek() {
            Some(&Reverse(TotalF64(point))) => point,
            None => {
                self.large.push(Reverse(TotalF64(value)));
                return;
            },
        };

        let target = ((self.len() + 1) as f64 * self.fraction) as usize;
        if target > self.small.len() {
            if value < point {
                self.small.push(TotalF64(value));
            } else {
                if let Some(Reverse(moved)) = self.large.pop() {
                    self.small.push(moved);
                }
                self.large.push(Reverse(TotalF64(value)));
            }
        } else if value < point {
            match self.small.pop() {
                Some(moved) => {
                    self.large.push(Reverse(moved));
                    self.small.push(TotalF64(value));
                },
                // fraction 0 keeps the small heap empty; a new minimum
                // simply becomes the head of the large heap
                None => self.large.push(Reverse(TotalF64(value))),
            }
        } else {
            self.large.push(Reverse(TotalF64(value)));
        }
    }
}
