//! The pending collection: a FIFO batch of paths awaiting ingestion.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use bitflags::bitflags;

bitflags! {
    /// Flags carried on a pending entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PendingFlags: u8 {
        /// Enumerate the directory's contents, and its children's.
        const RECURSIVE = 1 << 0;
        /// The entry came from an OS notification rather than a crawl.
        const VIA_NOTIFY = 1 << 1;
    }
}

/// One path awaiting processing.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub path: PathBuf,
    /// Unix seconds at which the change was observed.
    pub observed_at: i64,
    pub flags: PendingFlags,
}

/// FIFO collection of pending paths.
///
/// Re-adding a queued path merges flags rather than queueing it twice,
/// and a path already covered by a queued recursive ancestor is dropped:
/// the ancestor's enumeration will reach it.
#[derive(Debug, Default)]
pub struct PendingCollection {
    order: VecDeque<PathBuf>,
    entries: HashMap<PathBuf, (i64, PendingFlags)>,
}

impl PendingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn add(&mut self, path: PathBuf, observed_at: i64, flags: PendingFlags) {
        if let Some((_, existing)) = self.entries.get_mut(&path) {
            *existing |= flags;
            return;
        }
        if self.covered_by_recursive_ancestor(&path) {
            return;
        }
        self.entries.insert(path.clone(), (observed_at, flags));
        self.order.push_back(path);
    }

    pub fn pop(&mut self) -> Option<PendingEntry> {
        let path = self.order.pop_front()?;
        let (observed_at, flags) = self
            .entries
            .remove(&path)
            .expect("queued path always has an entry");
        Some(PendingEntry {
            path,
            observed_at,
            flags,
        })
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn covered_by_recursive_ancestor(&self, path: &Path) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let mut ancestor = path.parent();
        while let Some(current) = ancestor {
            if let Some((_, flags)) = self.entries.get(current) {
                if flags.contains(PendingFlags::RECURSIVE) {
                    return true;
                }
            }
            ancestor = current.parent();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let mut coll = PendingCollection::new();
        coll.add(PathBuf::from("/r/a"), 1, PendingFlags::VIA_NOTIFY);
        coll.add(PathBuf::from("/r/b"), 2, PendingFlags::VIA_NOTIFY);

        assert_eq!(coll.pop().unwrap().path, PathBuf::from("/r/a"));
        assert_eq!(coll.pop().unwrap().path, PathBuf::from("/r/b"));
        assert!(coll.pop().is_none());
    }

    #[test]
    fn repeated_paths_merge_flags() {
        let mut coll = PendingCollection::new();
        coll.add(PathBuf::from("/r/a"), 1, PendingFlags::VIA_NOTIFY);
        coll.add(PathBuf::from("/r/a"), 2, PendingFlags::RECURSIVE);

        assert_eq!(coll.len(), 1);
        let entry = coll.pop().unwrap();
        assert!(entry.flags.contains(PendingFlags::VIA_NOTIFY));
        assert!(entry.flags.contains(PendingFlags::RECURSIVE));
    }

    #[test]
    fn recursive_ancestor_absorbs_descendants() {
        let mut coll = PendingCollection::new();
        coll.add(PathBuf::from("/r/dir"), 1, PendingFlags::RECURSIVE);
        coll.add(PathBuf::from("/r/dir/deep/file"), 2, PendingFlags::VIA_NOTIFY);

        assert_eq!(coll.len(), 1);
        assert_eq!(coll.pop().unwrap().path, PathBuf::from("/r/dir"));
    }

    #[test]
    fn non_recursive_ancestor_does_not_absorb() {
        let mut coll = PendingCollection::new();
        coll.add(PathBuf::from("/r/dir"), 1, PendingFlags::VIA_NOTIFY);
        coll.add(PathBuf::from("/r/dir/file"), 2, PendingFlags::VIA_NOTIFY);

        assert_eq!(coll.len(), 2);
    }
}
