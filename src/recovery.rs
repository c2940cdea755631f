//! Rebuilds the keydir and the set of sealed segments from whatever is on
//! disk when a store is opened.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::OpenError;
use crate::keydir::{Keydir, KeydirEntry};
use crate::record::{self, HEADER_SIZE, HINT_HEADER_SIZE};
use crate::segment::{self, Segment, DATA_EXT, HINT_EXT};

pub(crate) struct RecoveryOutcome {
    pub(crate) keydir: Keydir,
    pub(crate) segments: HashMap<u32, Segment>,
    pub(crate) max_stem_seen: Option<String>,
}

/// One key's candidate location, as read from either a hint file or a full
/// data-file scan, not yet known to be the globally winning one.
struct Candidate {
    stem: String,
    segment_id: u32,
    value_pos: u64,
    value_len: u32,
    timestamp: Uuid,
}

/// Scans `dir` for `.db`/`.hint` pairs, resolves the winning location for
/// every key across all of them (largest timestamp wins; a tie is broken by
/// the lexicographically greater stem, which for UUIDv7-derived stems also
/// means the more recently created segment), and opens every surviving
/// segment read-only so later reads can find their bytes.
pub(crate) fn recover(dir: &Path, verbose: bool) -> Result<RecoveryOutcome, OpenError> {
    let mut stems: Vec<String> = Vec::new();
    let mut hint_paths: HashMap<String, std::path::PathBuf> = HashMap::new();
    let mut data_paths: HashMap<String, std::path::PathBuf> = HashMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext == DATA_EXT => {
                data_paths.insert(stem.to_string(), path.clone());
                stems.push(stem.to_string());
            }
            Some(ext) if ext == HINT_EXT => {
                hint_paths.insert(stem.to_string(), path.clone());
            }
            _ => {}
        }
    }
    stems.sort();
    stems.dedup();

    let mut segments: HashMap<u32, Segment> = HashMap::new();
    let mut candidates: HashMap<Vec<u8>, Candidate> = HashMap::new();

    for stem in &stems {
        let data_path = data_paths.get(stem).expect("stem collected from a .db file");
        let id = segment::id_from_stem(stem);
        let mut segment = Segment::open_readonly_disk(data_path, id)?;

        let found = if let Some(hint_path) = hint_paths.get(stem) {
            log_recovery_step(verbose, format_args!("recovering segment {stem} from hint file"));
            read_hint_file(hint_path, stem, id)?
        } else {
            log_recovery_step(verbose, format_args!("recovering segment {stem} by scanning data file"));
            read_data_file(&mut segment, stem, id)?
        };

        for candidate in found {
            consider(&mut candidates, candidate);
        }

        segments.insert(id, segment);
    }

    let mut keydir = Keydir::new();
    let mut by_key: Vec<_> = candidates.into_iter().collect();
    by_key.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, candidate) in by_key {
        if candidate.value_len == 0 {
            continue;
        }
        keydir.insert(
            key,
            KeydirEntry {
                segment_id: candidate.segment_id,
                value_pos: candidate.value_pos,
                value_len: candidate.value_len,
                timestamp: candidate.timestamp,
            },
        );
    }

    let max_stem_seen = stems.into_iter().max();
    log::info!(
        "recovery complete: {} segment(s), {} live key(s)",
        segments.len(),
        keydir.len()
    );

    Ok(RecoveryOutcome { keydir, segments, max_stem_seen })
}

/// Inserts `candidate` unless a prior candidate for the same key already
/// wins under the global tie-break rule.
fn consider(candidates: &mut HashMap<Vec<u8>, Candidate>, (key, candidate): (Vec<u8>, Candidate)) {
    match candidates.get(&key) {
        Some(existing) if !beats(&candidate, existing) => {}
        _ => {
            candidates.insert(key, candidate);
        }
    }
}

fn beats(candidate: &Candidate, existing: &Candidate) -> bool {
    match candidate.timestamp.cmp(&existing.timestamp) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.stem > existing.stem,
    }
}

/// Per-segment recovery progress: `debug` normally, promoted to `info` when
/// `Options::verbose_recovery` is set, so a store with many segments doesn't
/// flood the log on every open by default.
fn log_recovery_step(verbose: bool, message: std::fmt::Arguments) {
    if verbose {
        log::info!("{message}");
    } else {
        log::debug!("{message}");
    }
}

/// Reads every record out of a data file's hint sidecar. Hints carry no
/// checksum; a truncated hint file (shorter than its last declared entry)
/// just stops early rather than erroring the whole recovery.
fn read_hint_file(path: &Path, stem: &str, segment_id: u32) -> Result<Vec<(Vec<u8>, Candidate)>, OpenError> {
    let bytes = fs::read(path)?;
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos + HINT_HEADER_SIZE <= bytes.len() {
        let header: [u8; HINT_HEADER_SIZE] = bytes[pos..pos + HINT_HEADER_SIZE].try_into().unwrap();
        let (timestamp, key_len, value_len, value_pos) = record::decode_hint_header(&header);
        let key_start = pos + HINT_HEADER_SIZE;
        let key_end = key_start + key_len as usize;
        if key_end > bytes.len() {
            log::warn!("hint file for segment {stem} truncated mid-key, stopping early");
            break;
        }
        let key = bytes[key_start..key_end].to_vec();
        out.push((
            key,
            Candidate { stem: stem.to_string(), segment_id, value_pos: value_pos as u64, value_len, timestamp },
        ));
        pos = key_end;
    }

    Ok(out)
}

/// Scans a data file record by record, verifying each CRC. The first
/// corrupt or truncated record ends the scan: everything before it is
/// trusted, everything from it onward is treated as an unfinished write
/// that never completed.
fn read_data_file(segment: &mut Segment, stem: &str, segment_id: u32) -> Result<Vec<(Vec<u8>, Candidate)>, OpenError> {
    let bytes = segment.read_all()?;
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos + HEADER_SIZE <= bytes.len() {
        let header_bytes: [u8; HEADER_SIZE] = bytes[pos..pos + HEADER_SIZE].try_into().unwrap();
        let (crc, header) = record::decode_header(&header_bytes);
        let key_start = pos + HEADER_SIZE;
        let key_end = key_start + header.key_len as usize;
        let value_end = key_end + header.value_len as usize;
        if value_end > bytes.len() {
            log::warn!("data file for segment {stem} truncated mid-record, stopping early");
            break;
        }
        let key = &bytes[key_start..key_end];
        let value = &bytes[key_end..value_end];
        if !record::verify_crc(&header, key, value, crc) {
            log::warn!("CRC mismatch in segment {stem} at offset {pos}, stopping early");
            break;
        }

        out.push((
            key.to_vec(),
            Candidate {
                stem: stem.to_string(),
                segment_id,
                value_pos: key_end as u64,
                value_len: header.value_len,
                timestamp: header.timestamp,
            },
        ));
        pos = value_end;
    }

    Ok(out)
}
