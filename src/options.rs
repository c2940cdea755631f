/// Default rotation threshold, in bytes, for a freshly constructed [`Options`].
pub(crate) const DEFAULT_THRESHOLD: u64 = 1024;

/// Store-wide configuration.
///
/// This crate has no server process and therefore no file-based configuration
/// format; `Options` plays that role for a single embedded store, the way a
/// library layers settings over its internals rather than reading a config
/// file from disk.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) threshold: u64,
    pub(crate) lock: bool,
    pub(crate) verbose_recovery: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options { threshold: DEFAULT_THRESHOLD, lock: true, verbose_recovery: false }
    }
}

impl Options {
    /// Starts from the default configuration: a 1024 byte rotation threshold
    /// and the advisory directory lock enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the byte threshold that triggers active segment rotation.
    pub fn threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Controls whether `open` takes an OS-level advisory lock on the data
    /// directory. Always ignored for `:memory` stores, which never touch the
    /// filesystem.
    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Controls whether recovery logs a per-segment line (hint vs. full scan,
    /// discarded tails) at `info` instead of `debug`. Off by default, since a
    /// store with many segments would otherwise flood the log on every open.
    pub fn verbose_recovery(mut self, verbose: bool) -> Self {
        self.verbose_recovery = verbose;
        self
    }
}
