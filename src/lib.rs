//! A Bitcask-style, log-structured key-value storage engine.
//!
//! Writes are appended to an active segment file; a keydir maps each live
//! key to its most recent offset. Segments rotate once the active one
//! crosses a configurable threshold, and [`Store::merge`] reclaims space
//! occupied by overwritten and deleted keys by rewriting sealed segments
//! into a smaller, tombstone-free set.
//!
//! ```no_run
//! use logcask::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::open("/tmp/my-store")?;
//! store.put(b"hello", b"world")?;
//! assert_eq!(store.get(b"hello")?, b"world");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod iter;
mod keydir;
mod merge;
mod options;
mod record;
mod recovery;
mod segment;
mod store;

pub use error::{CloseError, DeleteError, FoldError, GetError, MergeError, OpenError, PutError, SegmentError, SyncError};
pub use iter::Iter;
pub use options::Options;
pub use store::{Store, MEMORY};
