use crate::external_map::run::RunReader;
use crate::external_map::{Aggregator, Result};
use serde::de::DeserializeOwned;
use std::cmp;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::vec;

/// A hash-sorted source of entries, either the final in-memory map or a
/// spilled run on disk.
pub(crate) enum RunStream<K, C> {
    Memory(vec::IntoIter<(u64, K, C)>),
    Disk(RunReader<K, C>),
}

impl<K, C> RunStream<K, C>
where
    K: Hash + DeserializeOwned,
    C: DeserializeOwned,
{
    fn next_entry(&mut self) -> Option<Result<(u64, K, C)>> {
        match self {
            RunStream::Memory(iter) => iter.next().map(Ok),
            RunStream::Disk(reader) => reader.next(),
        }
    }
}

/// One stream plus its current hash group.
///
/// `entries` always holds the complete set of the stream's entries sharing
/// its minimum hash; entries of the following group are parked one at a
/// time in `lookahead`. Buffers order themselves by that minimum hash so
/// they can sit in a min-priority-queue.
struct StreamBuffer<K, C> {
    stream: RunStream<K, C>,
    entries: Vec<(u64, K, C)>,
    lookahead: Option<(u64, K, C)>,
}

impl<K, C> StreamBuffer<K, C>
where
    K: Hash + DeserializeOwned,
    C: DeserializeOwned,
{
    fn new(stream: RunStream<K, C>) -> Result<Self> {
        let mut buffer = StreamBuffer {
            stream,
            entries: Vec::new(),
            lookahead: None,
        };
        buffer.refill()?;
        Ok(buffer)
    }

    /// Pulls the stream's next hash group into `entries`. Leaves `entries`
    /// empty when the stream is exhausted.
    fn refill(&mut self) -> Result<()> {
        let head = match self.lookahead.take() {
            Some(entry) => entry,
            None => match self.stream.next_entry() {
                Some(entry) => entry?,
                None => return Ok(()),
            },
        };
        let hash = head.0;
        self.entries.push(head);
        while let Some(entry) = self.stream.next_entry() {
            let entry = entry?;
            if entry.0 == hash {
                self.entries.push(entry);
            } else {
                self.lookahead = Some(entry);
                break;
            }
        }
        Ok(())
    }
}

impl<K, C> StreamBuffer<K, C> {
    fn min_hash(&self) -> u64 {
        self.entries
            .first()
            .map_or(u64::max_value(), |entry| entry.0)
    }
}

impl<K, C> PartialEq for StreamBuffer<K, C> {
    fn eq(&self, other: &StreamBuffer<K, C>) -> bool {
        self.min_hash() == other.min_hash()
    }
}

impl<K, C> Eq for StreamBuffer<K, C> {}

impl<K, C> PartialOrd for StreamBuffer<K, C> {
    fn partial_cmp(&self, other: &StreamBuffer<K, C>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K, C> Ord for StreamBuffer<K, C> {
    fn cmp(&self, other: &StreamBuffer<K, C>) -> Ordering {
        self.min_hash().cmp(&other.min_hash())
    }
}

/// Removes and returns the entry for `key` from a stream buffer, if present.
///
/// A stream combines duplicate keys before it is spilled, so one buffer can
/// legally hold at most one entry for a key; finding a second one means an
/// upstream dedup failure and panics rather than dropping data.
fn take_key_match<K, C>(entries: &mut Vec<(u64, K, C)>, key: &K) -> Option<(u64, K, C)>
where
    K: Eq,
{
    let mut found = None;
    let mut index = 0;
    while index < entries.len() {
        if entries[index].1 == *key {
            assert!(
                found.is_none(),
                "duplicate entries for one key within a single sorted run"
            );
            found = Some(entries.swap_remove(index));
        } else {
            index += 1;
        }
    }
    found
}

/// An iterator over the merged output of an aggregation session.
///
/// Merges the final in-memory map and all spilled runs as peer hash-sorted
/// streams, yielding each key exactly once with its fully combined value.
/// Each call to `next` does work proportional to the number of streams
/// whose minimum hash ties with the global minimum. A read failure ends the
/// iteration immediately: the error is returned once, every remaining
/// source is torn down (deleting its backing file), and the iterator yields
/// nothing further.
pub struct MergeIter<K, V, C, A> {
    aggregator: A,
    heap: BinaryHeap<cmp::Reverse<StreamBuffer<K, C>>>,
    failed: bool,
    _marker: PhantomData<V>,
}

impl<K, V, C, A> MergeIter<K, V, C, A>
where
    K: Eq + Hash + DeserializeOwned,
    C: DeserializeOwned,
    A: Aggregator<V, C>,
{
    pub(crate) fn new(aggregator: A, sources: Vec<RunStream<K, C>>) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for stream in sources {
            let buffer = StreamBuffer::new(stream)?;
            if !buffer.entries.is_empty() {
                heap.push(cmp::Reverse(buffer));
            }
        }
        Ok(MergeIter {
            aggregator,
            heap,
            failed: false,
            _marker: PhantomData,
        })
    }

    fn fail(&mut self) {
        // dropping the buffers tears down their sources and deletes the
        // remaining run files
        self.failed = true;
        self.heap.clear();
    }
}

impl<K, V, C, A> Iterator for MergeIter<K, V, C, A>
where
    K: Eq + Hash + DeserializeOwned,
    C: DeserializeOwned,
    A: Aggregator<V, C>,
{
    type Item = Result<(K, C)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let cmp::Reverse(mut buffer) = self.heap.pop()?;
        let (hash, key, mut combiner) = buffer.entries.swap_remove(0);
        if take_key_match(&mut buffer.entries, &key).is_some() {
            panic!("duplicate entries for one key within a single sorted run");
        }

        let mut touched = vec![buffer];
        loop {
            let ties = match self.heap.peek() {
                Some(cmp::Reverse(peer)) => peer.min_hash() == hash,
                None => false,
            };
            if !ties {
                break;
            }
            if let Some(cmp::Reverse(mut peer)) = self.heap.pop() {
                if let Some((_, _, other)) = take_key_match(&mut peer.entries, &key) {
                    combiner = self.aggregator.merge_combiners(combiner, other);
                }
                touched.push(peer);
            }
        }

        for mut buffer in touched {
            if buffer.entries.is_empty() {
                if let Err(error) = buffer.refill() {
                    self.fail();
                    return Some(Err(error));
                }
            }
            if !buffer.entries.is_empty() {
                self.heap.push(cmp::Reverse(buffer));
            }
        }

        Some(Ok((key, combiner)))
    }
}
