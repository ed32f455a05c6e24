//! The watcher adapter contract.
//!
//! Ingestion is driven by a pluggable backend that turns OS change
//! notifications into pending entries. The default backend wraps the
//! `notify` crate; the trait keeps the door open for platform-specific
//! implementations with different per-file watch requirements.

mod backend;

pub use backend::NotifyWatcher;

use std::fs::ReadDir;
use std::io;
use std::path::Path;
use std::time::Duration;

use bitflags::bitflags;

use crate::pending::PendingCollection;

bitflags! {
    /// Event classes produced by a backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileEventFlags: u16 {
        const DELETE = 1 << 0;
        const WRITE = 1 << 1;
        const EXTEND = 1 << 2;
        const ATTRIB = 1 << 3;
        const LINK = 1 << 4;
        const RENAME = 1 << 5;
        const REVOKE = 1 << 6;
    }
}

impl FileEventFlags {
    /// Any of these on the root path cancels the root; on a tracked
    /// path they remove its watch.
    pub fn removes_watch(self) -> bool {
        self.intersects(Self::DELETE | Self::RENAME | Self::REVOKE)
    }

    /// Whether a change of this class can imply sibling or child
    /// changes, requiring the parent directory to be re-enumerated.
    pub fn implies_recursion(self) -> bool {
        self.intersects(Self::DELETE | Self::LINK | Self::RENAME | Self::REVOKE)
    }
}

/// What one drain of buffered OS events produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsumeOutcome {
    /// Any events were delivered.
    pub delivered: bool,
    /// The backend lost events (queue overflow); a recrawl is needed.
    pub needs_recrawl: bool,
    /// The root itself was deleted, renamed, or revoked.
    pub root_lost: bool,
}

/// A filesystem notification backend.
pub trait FsWatcher: Send + Sync {
    /// Begins observing a directory and opens it for enumeration.
    ///
    /// Implementations must detect the directory being replaced between
    /// open and stat and bail with an error rather than enumerate the
    /// impostor.
    fn start_watch_dir(&self, path: &Path) -> io::Result<ReadDir>;

    /// Releases OS resources for a directory. Idempotent.
    fn stop_watch_dir(&self, path: &Path);

    /// Begins observing a single file, on backends that need per-file
    /// watches. Succeeds if the file is already watched.
    fn start_watch_file(&self, path: &Path) -> io::Result<()>;

    /// Drains buffered OS events into the pending collection.
    fn consume_notify(&self, coll: &mut PendingCollection) -> ConsumeOutcome;

    /// Blocks up to `timeout` for events; returns whether any are
    /// available.
    fn wait_notify(&self, timeout: Duration) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_removal_classes() {
        assert!(FileEventFlags::DELETE.removes_watch());
        assert!(FileEventFlags::RENAME.removes_watch());
        assert!(FileEventFlags::REVOKE.removes_watch());
        assert!(!FileEventFlags::WRITE.removes_watch());
        assert!(!(FileEventFlags::ATTRIB | FileEventFlags::EXTEND).removes_watch());
    }
}
