//! Compaction: rewrites every segment that isn't currently being written to
//! into a fresh, tombstone-free set of segments with matching hint files.

use std::collections::HashMap;

use crate::error::{CloseError, MergeError, OpenError};
use crate::keydir::KeydirEntry;
use crate::options::Options;
use crate::record;
use crate::segment::{self, Segment};
use crate::store::Store;

pub(crate) fn merge(store: &mut Store) -> Result<(), MergeError> {
    let dir = store.path().expect("merge only runs on persistent stores").to_path_buf();
    let merge_dir = dir.join("merge");
    std::fs::create_dir(&merge_dir)?;

    // The merge store never takes its own advisory lock: it lives inside a
    // directory the parent store already holds the lock for, and a second
    // `LOCK` file here would just get renamed into the parent's directory
    // in step 6.
    let merge_options = Options::new().threshold(store.options.threshold).lock(false);
    let merge_dir_str = merge_dir.to_str().expect("merge directory path must be valid UTF-8");
    let mut merge_store = Store::open_with_options(merge_dir_str, merge_options).map_err(|err| match err {
        OpenError::SegmentError(e) => MergeError::SegmentError(e),
        OpenError::IOError(e) => MergeError::IOError(e),
        OpenError::NotADirectory(_) | OpenError::AlreadyOpen => {
            unreachable!("merge directory was just created fresh and is never locked")
        }
    })?;

    let active_id = store.active.as_ref().map(|segment| segment.id);
    let segments_before = store.segments.len() + usize::from(store.active.is_some());
    let bytes_before: u64 = store.segments.values().map(Segment::size).sum();

    let carry_keys: Vec<Vec<u8>> = store
        .keydir
        .iter()
        .filter(|(_, entry)| Some(entry.segment_id) != active_id)
        .map(|(key, _)| key.to_vec())
        .collect();

    for key in &carry_keys {
        let entry = store.keydir.get(key).expect("key was just read from this keydir").clone();
        let segment = store
            .segment_mut(entry.segment_id)
            .expect("carried key must reference a currently-open segment");
        let value = segment
            .read_at(entry.value_pos, entry.value_len as usize)
            .map_err(MergeError::SegmentError)?;
        merge_store.append_record(key, &value).map_err(MergeError::SegmentError)?;
    }

    merge_store.seal_active()?;

    let mut stem_by_segment: HashMap<u32, String> = HashMap::new();
    let mut entries_by_segment: HashMap<u32, Vec<(Vec<u8>, KeydirEntry)>> = HashMap::new();
    for (key, entry) in merge_store.keydir.iter() {
        entries_by_segment.entry(entry.segment_id).or_default().push((key.to_vec(), entry.clone()));
    }
    let bytes_after: u64 = merge_store.segments.values().map(Segment::size).sum();
    for (segment_id, segment) in &merge_store.segments {
        let stem = segment
            .path()
            .and_then(|path| path.file_stem())
            .and_then(|stem| stem.to_str())
            .expect("disk segment must have a UTF-8 stem")
            .to_string();
        stem_by_segment.insert(*segment_id, stem);
    }

    for (segment_id, entries) in &entries_by_segment {
        let stem = stem_by_segment.get(segment_id).expect("every live entry's segment was just sealed");
        let hint_path = merge_dir.join(format!("{stem}.{}", segment::HINT_EXT));
        let mut hint_bytes = Vec::new();
        for (key, entry) in entries {
            hint_bytes.extend_from_slice(&record::encode_hint(
                entry.timestamp,
                key,
                entry.value_len,
                entry.value_pos as u32,
            ));
        }
        std::fs::write(&hint_path, hint_bytes)?;
    }

    let keys_carried = merge_store.keydir.len();
    merge_store.close().map_err(|err| match err {
        CloseError::SegmentError(e) => MergeError::SegmentError(e),
        CloseError::IOError(e) => MergeError::IOError(e),
    })?;

    for entry in std::fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let from = entry.path();
        let to = dir.join(entry.file_name());
        std::fs::rename(&from, &to)?;
    }
    std::fs::remove_dir(&merge_dir)?;

    let old_segment_ids: Vec<u32> = store.segments.keys().copied().collect();
    for id in old_segment_ids {
        if let Some(segment) = store.segments.remove(&id) {
            if let Some(path) = segment.path() {
                let _ = std::fs::remove_file(path.with_extension(segment::HINT_EXT));
                std::fs::remove_file(path)?;
            }
        }
    }

    store.keydir.retain(|entry| Some(entry.segment_id) == active_id);

    for (segment_id, entries) in entries_by_segment {
        let stem = stem_by_segment.get(&segment_id).expect("segment stem recorded above");
        let new_path = dir.join(format!("{stem}.{}", segment::DATA_EXT));
        let segment = Segment::open_readonly_disk(&new_path, segment_id).map_err(MergeError::SegmentError)?;
        store.segments.insert(segment_id, segment);
        for (key, entry) in entries {
            store.keydir.insert(key, entry);
        }
    }

    let segments_after = store.segments.len() + usize::from(store.active.is_some());
    let bytes_reclaimed = bytes_before.saturating_sub(bytes_after);
    log::info!(
        "merge complete: {segments_before} segment(s) before, {segments_after} after, \
         {keys_carried} key(s) carried over, {bytes_reclaimed} byte(s) reclaimed"
    );
    Ok(())
}
