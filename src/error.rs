use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while assembling or growing the set of on-disk
/// segments: a fresh stem colliding with one already in use, or any
/// underlying filesystem failure.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("segment id collision for stem {0:?}")]
    IdCollision(String),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("path '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("store is already open")]
    AlreadyOpen,

    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum PutError {
    #[error("value must not be empty")]
    InvalidValue,

    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum GetError {
    #[error("key not found")]
    NotFound,

    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum DeleteError {
    #[error("key not found")]
    NotFound,

    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum FoldError {
    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("operation not supported on an in-memory store")]
    UnsupportedInMemory,

    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("operation not supported on an in-memory store")]
    UnsupportedInMemory,

    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum CloseError {
    #[error("segment error")]
    SegmentError(#[from] SegmentError),

    #[error("IO error")]
    IOError(#[from] io::Error),
}
