//! An aggregating map that spills combined partial results to disk and
//! merges them back with an external sort-merge.

mod combiner_map;
mod map;
mod memory;
mod merge;
mod run;
mod size_tracker;

pub use self::combiner_map::CombinerMap;
pub use self::map::ExternalMap;
pub use self::memory::{MemoryPool, SpillPolicy};
pub use self::merge::MergeIter;
pub use self::run::{RunHandle, RunReader};

use std::error;
use std::fmt;
use std::io;
use std::result;

#[derive(Debug)]
pub enum Error {
    IOError(io::Error),
    SerdeError(bincode::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IOError(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Error {
        Error::SerdeError(err)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IOError(error) => Some(error),
            Error::SerdeError(error) => Some(error),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IOError(error) => write!(f, "{}", error),
            Error::SerdeError(error) => write!(f, "{}", error),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Combine semantics injected into an aggregation session.
///
/// The three operations correspond to the three places a value can meet its
/// key's accumulated state: the first value seen for a key, a value merging
/// into an in-memory combiner, and two partial combiners meeting during the
/// final merge of spilled runs. The merge of two combiners must be
/// insensitive to the order the runs are visited in, so `merge_combiners`
/// should be associative and commutative.
pub trait Aggregator<V, C> {
    /// Creates the initial combiner for the first value seen for a key.
    fn create_combiner(&self, value: V) -> C;

    /// Folds a new value into the existing combiner for its key.
    fn merge_value(&self, combiner: C, value: V) -> C;

    /// Merges two partial combiners for the same key.
    fn merge_combiners(&self, lhs: C, rhs: C) -> C;
}
