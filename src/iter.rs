//! A standalone, per-call iterator over a store's live values.

use std::io;

use crate::keydir::KeydirEntry;
use crate::store::Store;

/// Iterates over every live value in a [`Store`], in keydir insertion
/// order, as of the moment the iterator was created. Later mutations to
/// the store are not observed by an iterator already in flight, and two
/// iterators created from the same store never share state.
pub struct Iter<'a> {
    store: &'a mut Store,
    snapshot: std::vec::IntoIter<KeydirEntry>,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(store: &'a mut Store) -> Self {
        let snapshot: Vec<KeydirEntry> = store.keydir.iter().map(|(_, entry)| entry.clone()).collect();
        Iter { store, snapshot: snapshot.into_iter() }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.snapshot.next()?;
        let segment = self
            .store
            .segment_mut(entry.segment_id)
            .expect("keydir entry must reference a currently-open segment");
        Some(
            segment
                .read_at(entry.value_pos, entry.value_len as usize)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string())),
        )
    }
}
