//! The storage engine itself: recovery on open, the keydir-backed
//! read/write path, rotation, and the public operations built on top.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use uuid::Uuid;

use crate::error::{CloseError, DeleteError, FoldError, GetError, MergeError, OpenError, PutError, SegmentError, SyncError};
use crate::iter::Iter;
use crate::keydir::{Keydir, KeydirEntry};
use crate::options::Options;
use crate::record;
use crate::recovery;
use crate::segment::{self, Segment};

/// Directory sentinel selecting the in-memory backend.
pub const MEMORY: &str = ":memory";

const LOCK_FILE_NAME: &str = "LOCK";

pub(crate) enum StoreDir {
    Disk(PathBuf),
    Memory,
}

/// A single Bitcask-style store, either backed by a directory of segment
/// files or held entirely in memory.
pub struct Store {
    pub(crate) dir: StoreDir,
    pub(crate) options: Options,
    pub(crate) keydir: Keydir,
    pub(crate) segments: HashMap<u32, Segment>,
    pub(crate) active: Option<Segment>,
    active_stem: Option<String>,
    cursor: u64,
    lock_file: Option<File>,
}

impl Store {
    /// Opens `dir` with default [`Options`]. Pass [`MEMORY`] for a
    /// filesystem-free store.
    pub fn open(dir: &str) -> Result<Self, OpenError> {
        Self::open_with_options(dir, Options::default())
    }

    /// Opens `dir` with explicit [`Options`].
    pub fn open_with_options(dir: &str, options: Options) -> Result<Self, OpenError> {
        if dir == MEMORY {
            log::info!("opening in-memory store");
            return Ok(Store {
                dir: StoreDir::Memory,
                options,
                keydir: Keydir::new(),
                segments: HashMap::new(),
                active: None,
                active_stem: None,
                cursor: 0,
                lock_file: None,
            });
        }

        let path = PathBuf::from(dir);
        if !path.is_dir() {
            return Err(OpenError::NotADirectory(path));
        }

        let lock_file = if options.lock { Some(acquire_lock(&path)?) } else { None };
        let outcome = recovery::recover(&path, options.verbose_recovery)?;
        log::info!("opened store at {}", path.display());

        Ok(Store {
            dir: StoreDir::Disk(path),
            options,
            keydir: outcome.keydir,
            segments: outcome.segments,
            active: None,
            active_stem: outcome.max_stem_seen,
            cursor: 0,
            lock_file,
        })
    }

    /// Inserts or overwrites `key`. `value` must be non-empty.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), PutError> {
        if value.is_empty() {
            return Err(PutError::InvalidValue);
        }
        self.append_record(key, value)?;
        Ok(())
    }

    /// Returns the current value for `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, GetError> {
        let entry = self.keydir.get(key).cloned().ok_or(GetError::NotFound)?;
        let segment = self
            .segment_mut(entry.segment_id)
            .expect("keydir entry must reference a currently-open segment");
        let value = segment.read_at(entry.value_pos, entry.value_len as usize)?;
        Ok(value)
    }

    /// Removes `key`, appending a tombstone record before dropping it from
    /// the keydir.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), DeleteError> {
        if self.keydir.get(key).is_none() {
            return Err(DeleteError::NotFound);
        }
        self.append_record(key, &[])?;
        self.keydir.remove(key);
        Ok(())
    }

    /// Keys in first-insertion order for this session.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        self.keydir.keys().map(|k| k.to_vec()).collect()
    }

    /// Folds over every live value, in keydir insertion order, re-reading
    /// each value from disk. Mutations made during the fold are not
    /// guaranteed to be observed: the set of keys visited is fixed at the
    /// start.
    pub fn fold<A>(&mut self, acc: A, mut f: impl FnMut(A, Vec<u8>) -> A) -> Result<A, FoldError> {
        let snapshot: Vec<KeydirEntry> = self.keydir.iter().map(|(_, entry)| entry.clone()).collect();
        let mut acc = acc;
        for entry in snapshot {
            let segment = self
                .segment_mut(entry.segment_id)
                .expect("keydir entry must reference a currently-open segment");
            let value = segment.read_at(entry.value_pos, entry.value_len as usize)?;
            acc = f(acc, value);
        }
        Ok(acc)
    }

    /// A standalone iterator over live values, in the same order as
    /// [`Store::fold`]. Owns its own snapshot, so concurrent iterations
    /// never interfere with one another.
    pub fn iterate(&mut self) -> Iter<'_> {
        Iter::new(self)
    }

    /// Forces the active segment's bytes to stable storage.
    pub fn sync(&mut self) -> Result<(), SyncError> {
        if matches!(self.dir, StoreDir::Memory) {
            return Err(SyncError::UnsupportedInMemory);
        }
        if let Some(active) = &mut self.active {
            active.flush()?;
            active.sync_data()?;
        }
        Ok(())
    }

    /// Compacts the store in place. See [`crate::merge`].
    pub fn merge(&mut self) -> Result<(), MergeError> {
        if matches!(self.dir, StoreDir::Memory) {
            return Err(MergeError::UnsupportedInMemory);
        }
        crate::merge::merge(self)
    }

    /// Flushes and releases the store. Dropping a `Store` without calling
    /// `close` still releases its file handles and advisory lock, but
    /// `close` surfaces any final flush error instead of discarding it.
    pub fn close(mut self) -> Result<(), CloseError> {
        if let Some(active) = &mut self.active {
            active.flush()?;
        }
        Ok(())
    }

    pub(crate) fn segment_mut(&mut self, id: u32) -> Option<&mut Segment> {
        if let Some(active) = &mut self.active {
            if active.id == id {
                return Some(active);
            }
        }
        self.segments.get_mut(&id)
    }

    /// Appends a record for `key`/`value` (an empty `value` encodes a
    /// tombstone), rotating the active segment first if it is absent or
    /// has crossed the configured threshold, and updates the keydir to
    /// point at the freshly-written bytes.
    pub(crate) fn append_record(&mut self, key: &[u8], value: &[u8]) -> Result<(), SegmentError> {
        if self.active.is_none() || self.cursor > self.options.threshold {
            self.rotate()?;
        }

        let timestamp = Uuid::now_v7();
        let encoded = record::encode_record(timestamp, key, value);
        let active = self.active.as_mut().expect("rotate() guarantees an active segment");
        let offset = active.append(&encoded)?;
        let segment_id = active.id;
        self.cursor += encoded.len() as u64;

        let value_pos = offset + record::HEADER_SIZE as u64 + key.len() as u64;
        self.keydir.insert(
            key.to_vec(),
            KeydirEntry { segment_id, value_pos, value_len: value.len() as u32, timestamp },
        );
        Ok(())
    }

    /// Seals the current active segment (if any) and installs a fresh one.
    pub(crate) fn rotate(&mut self) -> Result<(), SegmentError> {
        let stem = fresh_stem();

        if let Some(mut prev) = self.active.take() {
            prev.flush()?;
            let sealed = prev.reopen_readonly()?;
            self.segments.insert(sealed.id, sealed);
        }

        let fresh = match &self.dir {
            StoreDir::Memory => Segment::create_active_memory(segment::id_from_stem(&stem)),
            StoreDir::Disk(dir) => Segment::create_active_disk(dir, &stem)?,
        };
        self.active = Some(fresh);
        self.active_stem = Some(stem);
        self.cursor = 0;
        Ok(())
    }

    /// Seals the active segment in place, without installing a replacement.
    /// Used by merge to guarantee every record in the merge store ends up
    /// in a sealed segment without leaving a stray empty active one behind.
    pub(crate) fn seal_active(&mut self) -> Result<(), SegmentError> {
        if let Some(mut active) = self.active.take() {
            active.flush()?;
            let sealed = active.reopen_readonly()?;
            self.segments.insert(sealed.id, sealed);
        }
        Ok(())
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match &self.dir {
            StoreDir::Disk(path) => Some(path),
            StoreDir::Memory => None,
        }
    }
}

fn fresh_stem() -> String {
    Uuid::now_v7().to_string()
}

fn acquire_lock(dir: &Path) -> Result<File, OpenError> {
    let lock_path = dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new().create(true).write(true).open(lock_path)?;
    file.try_lock_exclusive().map_err(|_| OpenError::AlreadyOpen)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use tempfile::tempdir;

    #[test]
    fn round_trip_and_order() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let mut store = Store::open(dir.path().to_str().unwrap())?;
        store.put(b"a", b"1")?;
        store.put(b"b", b"22")?;

        assert_eq!(store.list_keys(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(store.get(b"a")?, b"1");
        assert_eq!(store.get(b"b")?, b"22");
        store.close()?;
        Ok(())
    }

    #[test]
    fn last_writer_wins_and_tombstone() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let mut store = Store::open(dir.path().to_str().unwrap())?;
        store.put(b"k", b"v1")?;
        store.put(b"k", b"v2")?;
        assert_eq!(store.get(b"k")?, b"v2");

        store.delete(b"k")?;
        assert!(matches!(store.get(b"k"), Err(GetError::NotFound)));
        assert!(store.list_keys().is_empty());
        Ok(())
    }

    #[test]
    fn put_rejects_empty_value() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path().to_str().unwrap()).unwrap();
        assert!(matches!(store.put(b"k", b""), Err(PutError::InvalidValue)));
    }

    #[test]
    fn rotation_keeps_every_key_readable() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let options = Options::new().threshold(64);
        let mut store = Store::open_with_options(dir.path().to_str().unwrap(), options)?;

        for i in 0..200u32 {
            let key = format!("key-{i}");
            let value = format!("{:0>16}", i);
            store.put(key.as_bytes(), value.as_bytes())?;
        }
        for i in 0..200u32 {
            let key = format!("key-{i}");
            let expected = format!("{:0>16}", i);
            assert_eq!(store.get(key.as_bytes())?, expected.as_bytes());
        }

        let db_files = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("db"))
            .count();
        assert!(db_files > 1);
        Ok(())
    }

    #[test]
    fn recovery_survives_close_and_reopen() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().to_str().unwrap();
        {
            let mut store = Store::open(path)?;
            for i in 0..32u32 {
                store.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
            }
            store.close()?;
        }

        let mut reopened = Store::open(path)?;
        assert_eq!(reopened.list_keys().len(), 32);
        for i in 0..32u32 {
            assert_eq!(reopened.get(format!("k{i}").as_bytes())?, format!("v{i}").as_bytes());
        }
        Ok(())
    }

    #[test]
    fn corrupted_tail_is_dropped_without_losing_earlier_keys() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().to_str().unwrap();
        {
            let mut store = Store::open(path)?;
            for i in 0..32u32 {
                store.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
            }
            store.close()?;
        }

        // The newest segment is the one with the lexicographically-greatest
        // stem (UUIDv7 stems sort in creation order), same as recovery's own
        // `max_stem_seen` — not whatever `read_dir` happens to list first,
        // which isn't guaranteed to be creation order.
        let db_file = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("db"))
            .max_by_key(|p| p.file_stem().and_then(|s| s.to_str()).unwrap().to_string())
            .unwrap();
        let mut bytes = std::fs::read(&db_file)?;
        let len = bytes.len();
        for b in bytes[len - 3..].iter_mut() {
            *b ^= 0xFF;
        }
        std::fs::write(&db_file, bytes)?;

        let mut reopened = Store::open(path)?;
        for i in 0..31u32 {
            assert!(reopened.get(format!("k{i}").as_bytes()).is_ok());
        }
        Ok(())
    }

    #[test]
    fn memory_store_rejects_sync_and_merge() -> Result<(), Box<dyn Error>> {
        let mut store = Store::open(MEMORY)?;
        store.put(b"x", b"1")?;
        assert_eq!(store.get(b"x")?, b"1");
        assert!(matches!(store.sync(), Err(SyncError::UnsupportedInMemory)));
        assert!(matches!(store.merge(), Err(MergeError::UnsupportedInMemory)));
        store.close()?;
        Ok(())
    }

    #[test]
    fn open_fails_on_non_directory_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("not-a-dir");
        std::fs::write(&file_path, b"x").unwrap();
        let result = Store::open(file_path.to_str().unwrap());
        assert!(matches!(result, Err(OpenError::NotADirectory(_))));
    }

    #[test]
    fn second_open_on_same_directory_fails_to_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let _first = Store::open(path).unwrap();
        let second = Store::open(path);
        assert!(matches!(second, Err(OpenError::AlreadyOpen)));
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn non_empty_bytes() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 1..32)
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_any_non_empty_key_and_value(
            key in non_empty_bytes(),
            value in non_empty_bytes(),
        ) {
            let dir = tempdir().unwrap();
            let mut store = Store::open(dir.path().to_str().unwrap()).unwrap();
            store.put(&key, &value).unwrap();
            prop_assert_eq!(store.get(&key).unwrap(), value);
        }

        #[test]
        fn last_writer_wins_for_any_pair_of_values(
            key in non_empty_bytes(),
            first in non_empty_bytes(),
            second in non_empty_bytes(),
        ) {
            let dir = tempdir().unwrap();
            let mut store = Store::open(dir.path().to_str().unwrap()).unwrap();
            store.put(&key, &first).unwrap();
            store.put(&key, &second).unwrap();
            prop_assert_eq!(store.get(&key).unwrap(), second);
            prop_assert_eq!(store.list_keys().len(), 1);
        }

        #[test]
        fn rotation_never_loses_a_key(
            values in proptest::collection::vec(non_empty_bytes(), 1..40),
        ) {
            let dir = tempdir().unwrap();
            let options = Options::new().threshold(48);
            let mut store = Store::open_with_options(dir.path().to_str().unwrap(), options).unwrap();

            for (i, value) in values.iter().enumerate() {
                store.put(format!("key-{i}").as_bytes(), value).unwrap();
            }
            for (i, value) in values.iter().enumerate() {
                prop_assert_eq!(store.get(format!("key-{i}").as_bytes()).unwrap(), value.clone());
            }
        }
    }
}
