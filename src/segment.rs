//! A single append-only file (or its in-memory stand-in), plus the handful
//! of positioned reads/writes the rest of the crate needs from it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::SegmentError;

pub(crate) const DATA_EXT: &str = "db";
pub(crate) const HINT_EXT: &str = "hint";

/// A segment's storage medium. `Memory` backs the `:memory` store, which
/// never touches a filesystem; `Disk` backs everything else.
pub(crate) enum Backend {
    Disk(File),
    Memory(Vec<u8>),
}

/// One segment file: either the single growing active segment, or one of
/// the read-only sealed segments left behind after rotation.
pub(crate) struct Segment {
    pub(crate) id: u32,
    path: Option<PathBuf>,
    backend: Backend,
    size: u64,
}

/// Derives a segment's id from its file stem. Collisions are astronomically
/// unlikely for UUIDv7-derived stems but are still surfaced as an error
/// rather than silently overwriting an existing segment.
pub(crate) fn id_from_stem(stem: &str) -> u32 {
    crc32fast::hash(stem.as_bytes())
}

impl Segment {
    /// Creates a brand new active segment file on disk, named `<stem>.db`.
    pub(crate) fn create_active_disk(dir: &Path, stem: &str) -> Result<Self, SegmentError> {
        let path = dir.join(format!("{stem}.{DATA_EXT}"));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Segment { id: id_from_stem(stem), path: Some(path), backend: Backend::Disk(file), size: 0 })
    }

    /// Opens an existing segment file read-only, for a sealed segment
    /// rediscovered by recovery or produced by rotation.
    pub(crate) fn open_readonly_disk(path: &Path, id: u32) -> Result<Self, SegmentError> {
        let file = OpenOptions::new().read(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Segment { id, path: Some(path.to_path_buf()), backend: Backend::Disk(file), size })
    }

    /// Reopens this segment (assumed currently open for writing) read-only,
    /// used when rotation demotes the active segment to sealed.
    pub(crate) fn reopen_readonly(&self) -> Result<Self, SegmentError> {
        match &self.path {
            Some(path) => Segment::open_readonly_disk(path, self.id),
            None => Ok(Segment { id: self.id, path: None, backend: Backend::Memory(self.snapshot()), size: self.size }),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        match &self.backend {
            Backend::Memory(buf) => buf.clone(),
            Backend::Disk(_) => Vec::new(),
        }
    }

    /// Creates the single in-memory active segment for a `:memory` store.
    pub(crate) fn create_active_memory(id: u32) -> Self {
        Segment { id, path: None, backend: Backend::Memory(Vec::new()), size: 0 }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Appends `bytes` to the end of the segment, returning the offset at
    /// which they begin.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> Result<u64, SegmentError> {
        let offset = self.size;
        match &mut self.backend {
            Backend::Disk(file) => {
                file.seek(SeekFrom::End(0))?;
                file.write_all(bytes)?;
            }
            Backend::Memory(buf) => buf.extend_from_slice(bytes),
        }
        self.size += bytes.len() as u64;
        Ok(offset)
    }

    /// Reads exactly `len` bytes starting at `pos`.
    pub(crate) fn read_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>, SegmentError> {
        match &mut self.backend {
            Backend::Disk(file) => {
                file.seek(SeekFrom::Start(pos))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            Backend::Memory(buf) => {
                let start = pos as usize;
                let end = start + len;
                if end > buf.len() {
                    return Err(SegmentError::IOError(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "read past end of in-memory segment",
                    )));
                }
                Ok(buf[start..end].to_vec())
            }
        }
    }

    /// Reads every byte of the segment, in order, for use during recovery.
    pub(crate) fn read_all(&mut self) -> Result<Vec<u8>, SegmentError> {
        match &mut self.backend {
            Backend::Disk(file) => {
                file.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
            Backend::Memory(buf) => Ok(buf.clone()),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<(), SegmentError> {
        if let Backend::Disk(file) = &mut self.backend {
            file.flush()?;
        }
        Ok(())
    }

    /// Forces the segment's bytes to stable storage. A no-op for in-memory
    /// segments, which have no storage to be stable on.
    pub(crate) fn sync_data(&self) -> Result<(), SegmentError> {
        if let Backend::Disk(file) = &self.backend {
            file.sync_data()?;
        }
        Ok(())
    }
}
