use crate::entry::Entry;
use crate::external_map::combiner_map::key_hash;
use crate::external_map::{Error, Result};
use bincode::{deserialize, serialize};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::{thread_rng, Rng};
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use std::fs;
use std::hash::Hash;
use std::io::{BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

fn generate_file_name() -> String {
    thread_rng().gen_ascii_chars().take(32).collect()
}

/// A reference to one spilled run on disk.
///
/// The handle owns the backing file: dropping a handle that was never opened
/// for reading deletes the file.
pub struct RunHandle {
    path: PathBuf,
    entry_count: usize,
}

impl RunHandle {
    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Returns the number of entries written to the run.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        fs::remove_file(self.path.as_path()).ok();
    }
}

/// Drains a hash-sorted iterator of entries into a fresh run file inside
/// `dir`, keeping nothing in memory beyond the write buffer. A partially
/// written file is deleted before a write error is propagated.
pub(crate) fn write_run<K, C, I>(dir: &Path, entries: I, buffer_size: usize) -> Result<RunHandle>
where
    K: Serialize,
    C: Serialize,
    I: Iterator<Item = (u64, K, C)>,
{
    let path = dir.join(format!("{}.run", generate_file_name()));
    match write_entries(path.as_path(), entries, buffer_size) {
        Ok(entry_count) => Ok(RunHandle { path, entry_count }),
        Err(error) => {
            fs::remove_file(path.as_path()).ok();
            Err(error)
        },
    }
}

fn write_entries<K, C, I>(path: &Path, entries: I, buffer_size: usize) -> Result<usize>
where
    K: Serialize,
    C: Serialize,
    I: Iterator<Item = (u64, K, C)>,
{
    let file = fs::File::create(path)?;
    let mut stream = BufWriter::with_capacity(buffer_size, file);
    let mut entry_count = 0;
    for (_, key, combiner) in entries {
        let serialized_entry = serialize(&Entry {
            key,
            value: combiner,
        })?;
        stream.write_u64::<BigEndian>(serialized_entry.len() as u64)?;
        stream.write_all(&serialized_entry)?;
        entry_count += 1;
    }
    stream.flush()?;
    Ok(entry_count)
}

/// A one-shot reader over a spilled run.
///
/// Yields the entries strictly in written (hash) order, recomputing each
/// key's hash on the way in. The backing file is deleted as soon as the run
/// is exhausted, and by `Drop` if the reader is abandoned early, so cleanup
/// never depends on reaching end-of-stream. A file that ends before the
/// recorded entry count surfaces as an error, distinct from exhaustion.
pub struct RunReader<K, C> {
    handle: Option<RunHandle>,
    stream: BufReader<fs::File>,
    entry_count: usize,
    entries_read: usize,
    _marker: PhantomData<(K, C)>,
}

impl<K, C> RunReader<K, C> {
    pub(crate) fn open(handle: RunHandle, buffer_size: usize) -> Result<Self> {
        let file = fs::File::open(handle.path())?;
        Ok(RunReader {
            entry_count: handle.entry_count,
            handle: Some(handle),
            stream: BufReader::with_capacity(buffer_size, file),
            entries_read: 0,
            _marker: PhantomData,
        })
    }

    fn remove_file(&mut self) {
        self.handle.take();
    }
}

impl<K, C> Iterator for RunReader<K, C>
where
    K: Hash + DeserializeOwned,
    C: DeserializeOwned,
{
    type Item = Result<(u64, K, C)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.handle.is_none() {
            return None;
        }
        if self.entries_read == self.entry_count {
            self.remove_file();
            return None;
        }

        let size = match self.stream.read_u64::<BigEndian>() {
            Ok(size) => size,
            Err(error) => {
                self.remove_file();
                return Some(Err(Error::IOError(error)));
            },
        };

        let mut buffer = vec![0; size as usize];
        if let Err(error) = self.stream.read_exact(buffer.as_mut_slice()) {
            self.remove_file();
            return Some(Err(Error::IOError(error)));
        }

        match deserialize::<Entry<K, C>>(&buffer) {
            Ok(entry) => {
                self.entries_read += 1;
                let hash = key_hash(&entry.key);
                Some(Ok((hash, entry.key, entry.value)))
            },
            Err(error) => {
                self.remove_file();
                Some(Err(Error::SerdeError(error)))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{write_run, RunReader};
    use crate::external_map::combiner_map::key_hash;
    use std::fs;
    use std::io::Write;
    use std::panic;
    use std::path::Path;

    fn teardown(test_name: &str) {
        fs::remove_dir_all(test_name).ok();
    }

    fn run_test<T>(test: T, test_name: &str)
    where
        T: FnOnce() + panic::UnwindSafe,
    {
        let result = panic::catch_unwind(test);

        teardown(test_name);

        assert!(result.is_ok());
    }

    fn sorted_entries(keys: &[u32]) -> Vec<(u64, u32, u64)> {
        let mut entries: Vec<_> = keys
            .iter()
            .map(|&key| (key_hash(&key), key, u64::from(key) * 10))
            .collect();
        entries.sort_unstable_by_key(|entry| entry.0);
        entries
    }

    fn dir_entry_count(path: &str) -> usize {
        fs::read_dir(path).unwrap().count()
    }

    #[test]
    fn test_round_trip_and_deletion_on_exhaustion() {
        let test_name = "run_test_round_trip";
        run_test(
            || {
                fs::create_dir(test_name).unwrap();
                let entries = sorted_entries(&[5, 3, 8, 1]);
                let handle = write_run(Path::new(test_name), entries.clone().into_iter(), 4096)
                    .unwrap();
                assert_eq!(handle.entry_count(), 4);
                assert_eq!(dir_entry_count(test_name), 1);

                let reader: RunReader<u32, u64> = RunReader::open(handle, 4096).unwrap();
                let read_entries: Vec<_> = reader.map(|entry| entry.unwrap()).collect();
                assert_eq!(read_entries, entries);

                // exhausted run deletes its own file
                assert_eq!(dir_entry_count(test_name), 0);
            },
            test_name,
        );
    }

    #[test]
    fn test_abandoned_reader_deletes_file() {
        let test_name = "run_test_abandoned_reader";
        run_test(
            || {
                fs::create_dir(test_name).unwrap();
                let entries = sorted_entries(&[7, 2, 9]);
                let handle = write_run(Path::new(test_name), entries.into_iter(), 4096).unwrap();

                let mut reader: RunReader<u32, u64> = RunReader::open(handle, 4096).unwrap();
                reader.next().unwrap().unwrap();
                drop(reader);

                assert_eq!(dir_entry_count(test_name), 0);
            },
            test_name,
        );
    }

    #[test]
    fn test_unopened_handle_deletes_file() {
        let test_name = "run_test_unopened_handle";
        run_test(
            || {
                fs::create_dir(test_name).unwrap();
                let entries = sorted_entries(&[4, 6]);
                let handle = write_run(Path::new(test_name), entries.into_iter(), 4096).unwrap();
                assert_eq!(dir_entry_count(test_name), 1);

                drop(handle);
                assert_eq!(dir_entry_count(test_name), 0);
            },
            test_name,
        );
    }

    #[test]
    fn test_truncated_run_surfaces_error() {
        let test_name = "run_test_truncated";
        run_test(
            || {
                fs::create_dir(test_name).unwrap();
                let entries = sorted_entries(&[1, 2, 3]);
                let handle = write_run(Path::new(test_name), entries.into_iter(), 4096).unwrap();

                // chop the file mid-entry
                let length = fs::metadata(handle.path()).unwrap().len();
                let bytes = fs::read(handle.path()).unwrap();
                let mut file = fs::File::create(handle.path()).unwrap();
                file.write_all(&bytes[..length as usize - 4]).unwrap();
                drop(file);

                let reader: RunReader<u32, u64> = RunReader::open(handle, 4096).unwrap();
                let results: Vec<_> = reader.collect();
                assert!(results.len() <= 3);
                assert!(results.last().unwrap().is_err());

                assert_eq!(dir_entry_count(test_name), 0);
            },
            test_name,
        );
    }

    #[test]
    fn test_empty_run_round_trip() {
        let test_name = "run_test_empty";
        run_test(
            || {
                fs::create_dir(test_name).unwrap();
                let entries: Vec<(u64, u32, u64)> = Vec::new();
                let handle = write_run(Path::new(test_name), entries.into_iter(), 4096).unwrap();
                assert_eq!(handle.entry_count(), 0);

                let reader: RunReader<u32, u64> = RunReader::open(handle, 4096).unwrap();
                assert_eq!(reader.count(), 0);
                assert_eq!(dir_entry_count(test_name), 0);
            },
            test_name,
        );
    }
}
