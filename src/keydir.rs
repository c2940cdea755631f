//! The in-memory index: key -> location of its most recent value.

use uuid::Uuid;

/// Where a value currently lives, as of the last write observed for its key.
#[derive(Debug, Clone)]
pub(crate) struct KeydirEntry {
    pub(crate) segment_id: u32,
    pub(crate) value_pos: u64,
    pub(crate) value_len: u32,
    pub(crate) timestamp: Uuid,
}

/// Maps keys to their current location, while preserving first-insertion
/// order for iteration. A plain `HashMap` would do for lookups alone; the
/// parallel `order` vector is what gives `keys`/`iter`/`fold` their stable,
/// insertion-ordered traversal. `positions` records each key's slot in
/// `order` for as long as the key has ever been inserted, independent of
/// whether it is currently present in `entries` — that's what lets a
/// remove-then-reinsert (a delete followed by a later put, or merge
/// re-pointing a carried-over key at its rewritten segment) land back on the
/// same slot instead of appending a second one.
#[derive(Debug, Default)]
pub(crate) struct Keydir {
    order: Vec<Vec<u8>>,
    positions: std::collections::HashMap<Vec<u8>, usize>,
    entries: std::collections::HashMap<Vec<u8>, KeydirEntry>,
}

impl Keydir {
    pub(crate) fn new() -> Self {
        Keydir {
            order: Vec::new(),
            positions: std::collections::HashMap::new(),
            entries: std::collections::HashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&KeydirEntry> {
        self.entries.get(key)
    }

    /// Inserts or overwrites a key's entry. A key gets a fresh slot in the
    /// insertion order only the first time it is ever seen; every later
    /// insert, including one that follows a `remove`, reuses that slot.
    pub(crate) fn insert(&mut self, key: Vec<u8>, entry: KeydirEntry) {
        if !self.positions.contains_key(&key) {
            self.positions.insert(key.clone(), self.order.len());
            self.order.push(key.clone());
        }
        self.entries.insert(key, entry);
    }

    /// Removes a key's entry. The key's slot in `order` is left in place
    /// (and its position in `positions` kept) so a later reinsertion reuses
    /// it instead of appending a duplicate.
    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<KeydirEntry> {
        self.entries.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keys in first-insertion order, skipping any since removed.
    pub(crate) fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.order.iter().filter_map(move |key| {
            if self.entries.contains_key(key) {
                Some(key.as_slice())
            } else {
                None
            }
        })
    }

    /// Key/entry pairs in first-insertion order, skipping any since removed.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &KeydirEntry)> {
        self.order.iter().filter_map(move |key| {
            self.entries.get(key).map(|entry| (key.as_slice(), entry))
        })
    }

    /// Drops every entry for which `keep` returns `false`. Used by merge to
    /// evict entries that still point at pre-merge segments after the
    /// rewritten segments have taken over.
    pub(crate) fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&KeydirEntry) -> bool,
    {
        self.entries.retain(|_, entry| keep(entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(segment_id: u32) -> KeydirEntry {
        KeydirEntry { segment_id, value_pos: 0, value_len: 1, timestamp: Uuid::now_v7() }
    }

    #[test]
    fn preserves_insertion_order_across_overwrites() {
        let mut keydir = Keydir::new();
        keydir.insert(b"a".to_vec(), entry(1));
        keydir.insert(b"b".to_vec(), entry(1));
        keydir.insert(b"a".to_vec(), entry(2));

        let keys: Vec<&[u8]> = keydir.keys().collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice()]);
        assert_eq!(keydir.get(b"a").unwrap().segment_id, 2);
    }

    #[test]
    fn removed_keys_are_skipped_by_iteration() {
        let mut keydir = Keydir::new();
        keydir.insert(b"a".to_vec(), entry(1));
        keydir.insert(b"b".to_vec(), entry(1));
        keydir.remove(b"a");

        let keys: Vec<&[u8]> = keydir.keys().collect();
        assert_eq!(keys, vec![b"b".as_slice()]);
        assert_eq!(keydir.len(), 1);
    }

    #[test]
    fn retain_drops_entries_pointing_at_old_segments() {
        let mut keydir = Keydir::new();
        keydir.insert(b"a".to_vec(), entry(1));
        keydir.insert(b"b".to_vec(), entry(2));
        keydir.retain(|e| e.segment_id != 1);

        assert!(keydir.get(b"a").is_none());
        assert!(keydir.get(b"b").is_some());
    }

    #[test]
    fn reinserting_a_removed_key_does_not_duplicate_its_slot() {
        let mut keydir = Keydir::new();
        keydir.insert(b"a".to_vec(), entry(1));
        keydir.remove(b"a");
        keydir.insert(b"a".to_vec(), entry(2));

        let keys: Vec<&[u8]> = keydir.keys().collect();
        assert_eq!(keys, vec![b"a".as_slice()]);
        assert_eq!(keydir.len(), 1);
        assert_eq!(keydir.get(b"a").unwrap().segment_id, 2);
    }

    #[test]
    fn reinserting_after_retain_does_not_duplicate_its_slot() {
        let mut keydir = Keydir::new();
        keydir.insert(b"a".to_vec(), entry(1));
        keydir.insert(b"b".to_vec(), entry(1));
        keydir.retain(|_| false);
        keydir.insert(b"a".to_vec(), entry(2));
        keydir.insert(b"b".to_vec(), entry(2));

        let keys: Vec<&[u8]> = keydir.keys().collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice()]);
        assert_eq!(keydir.len(), 2);
    }
}
