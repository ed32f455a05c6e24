//! The in-memory view: a monotonically ticking model of one directory
//! tree.
//!
//! The view owns two arenas (files, directories), the recency list
//! ordering every tracked file by last observation, and the per-suffix
//! buckets that accelerate suffix queries. The ingestion pipeline is the
//! sole mutator; queries walk the structures read-only under the root's
//! shared lock.

mod ageout;
mod generators;

pub(crate) use generators::{all_files_generator, run_selected_generator};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::storage::{
    Arena, ClockStamp, DirIndex, DirNode, FileIndex, FileNode, PathKey,
};

/// Head of one per-suffix intrusive list.
#[derive(Debug, Default)]
struct SuffixBucket {
    head: Option<FileIndex>,
}

/// Keeps track of the state of the filesystem in memory.
#[derive(Debug)]
pub struct InMemoryView {
    root_path: PathBuf,
    files: Arena<FileIndex, FileNode>,
    dirs: Arena<DirIndex, DirNode>,
    root_dir: DirIndex,

    /// Most recently touched file.
    recency_head: Option<FileIndex>,
    /// Oldest tracked file.
    recency_tail: Option<FileIndex>,

    /// List heads for all known suffixes. Buckets are created on demand
    /// and never removed, even once empty.
    suffixes: HashMap<PathKey, SuffixBucket>,

    /// The most recently observed tick value of an item in the view.
    /// Atomic so clock reads do not need the root lock.
    most_recent_tick: AtomicU32,

    last_age_out_tick: u32,
    last_age_out_timestamp: i64,
}

impl InMemoryView {
    pub fn new(root_path: &Path) -> Self {
        let mut dirs = Arena::new();
        let root_dir = dirs.insert(DirNode::new(PathKey::new(""), None));
        Self {
            root_path: root_path.to_path_buf(),
            files: Arena::new(),
            dirs,
            root_dir,
            recency_head: None,
            recency_tail: None,
            suffixes: HashMap::new(),
            most_recent_tick: AtomicU32::new(0),
            last_age_out_tick: 0,
            last_age_out_timestamp: 0,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    // -----------------------------------------------------------------
    // Tick clock
    // -----------------------------------------------------------------

    /// Advances the tick, returning the new value. Every structural or
    /// content change observed by ingestion stamps files with the value
    /// returned here, so `most_recent_tick` always equals the highest
    /// stamped tick.
    pub fn advance_clock(&self) -> u32 {
        self.most_recent_tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn most_recent_tick(&self) -> u32 {
        self.most_recent_tick.load(Ordering::Acquire)
    }

    pub fn last_age_out_tick(&self) -> u32 {
        self.last_age_out_tick
    }

    pub fn last_age_out_timestamp(&self) -> i64 {
        self.last_age_out_timestamp
    }

    // -----------------------------------------------------------------
    // Node access
    // -----------------------------------------------------------------

    #[inline]
    pub fn file(&self, index: FileIndex) -> &FileNode {
        &self.files[index]
    }

    #[inline]
    pub fn file_mut(&mut self, index: FileIndex) -> &mut FileNode {
        &mut self.files[index]
    }

    #[inline]
    pub fn dir(&self, index: DirIndex) -> &DirNode {
        &self.dirs[index]
    }

    #[inline]
    pub fn dir_mut(&mut self, index: DirIndex) -> &mut DirNode {
        &mut self.dirs[index]
    }

    #[inline]
    pub fn root_dir(&self) -> DirIndex {
        self.root_dir
    }

    pub fn recency_head(&self) -> Option<FileIndex> {
        self.recency_head
    }

    pub fn recency_tail(&self) -> Option<FileIndex> {
        self.recency_tail
    }

    pub fn suffix_head(&self, suffix: &str) -> Option<FileIndex> {
        self.suffixes.get(suffix).and_then(|bucket| bucket.head)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    // -----------------------------------------------------------------
    // Path resolution
    // -----------------------------------------------------------------

    /// Resolves a root-relative directory path. The empty path names the
    /// root directory. Returns `None` at the first missing segment.
    pub fn resolve_dir(&self, path: &str) -> Option<DirIndex> {
        let mut current = self.root_dir;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = *self.dirs[current].subdirs.get(segment)?;
        }
        Some(current)
    }

    /// Resolves a root-relative directory path, materializing missing
    /// intermediate directories.
    pub fn resolve_or_create_dir(&mut self, path: &str) -> DirIndex {
        let mut current = self.root_dir;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let existing = self.dirs[current].subdirs.get(segment).copied();
            current = match existing {
                Some(child) => child,
                None => {
                    let key = PathKey::new(segment);
                    let child = self.dirs.insert(DirNode::new(key.clone(), Some(current)));
                    self.dirs[current].subdirs.insert(key, child);
                    child
                }
            };
        }
        current
    }

    /// Looks up the file entity at a root-relative path.
    pub fn lookup_file(&self, path: &str) -> Option<FileIndex> {
        let (dirname, base) = match path.rfind('/') {
            Some(slash) => (&path[..slash], &path[slash + 1..]),
            None => ("", path),
        };
        if base.is_empty() {
            return None;
        }
        let dir = self.resolve_dir(dirname)?;
        self.dirs[dir].files.get(base).copied()
    }

    /// Computes the root-relative path of a directory.
    pub fn dir_path(&self, index: DirIndex) -> PathKey {
        let mut segments: Vec<&str> = Vec::new();
        let mut current = index;
        loop {
            let node = &self.dirs[current];
            match node.parent {
                Some(parent) => {
                    segments.push(node.name.as_str());
                    current = parent;
                }
                None => break,
            }
        }
        segments.reverse();
        PathKey::from(segments.join("/"))
    }

    /// Computes the root-relative path of a file.
    pub fn wholename(&self, index: FileIndex) -> PathKey {
        let file = &self.files[index];
        self.dir_path(file.parent).join(file.name.as_str())
    }

    // -----------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------

    /// Returns the direct child file named `name` if it already exists,
    /// else creates that entry (stamped with the current observation)
    /// and returns it.
    pub fn get_or_create_child_file(
        &mut self,
        dir: DirIndex,
        name: &str,
        now: i64,
        tick: u32,
    ) -> FileIndex {
        if let Some(&existing) = self.dirs[dir].files.get(name) {
            return existing;
        }
        let key = PathKey::new(name);
        let stamp = ClockStamp::new(tick, now);
        let index = self.files.insert(FileNode::new(key.clone(), dir, stamp));
        self.dirs[dir].files.insert(key, index);
        self.push_recency_head(index);
        self.link_suffix(index);
        index
    }

    /// Updates the otime for the file and bubbles it to the front of the
    /// recency index and of its suffix bucket.
    pub fn mark_file_changed(&mut self, index: FileIndex, now: i64, tick: u32) {
        {
            let file = &mut self.files[index];
            file.otime = ClockStamp::new(tick, now);
            file.maybe_deleted = false;
        }
        self.push_recency_head(index);
        self.unlink_suffix(index);
        self.link_suffix(index);
    }

    /// Marks a directory as removed from the view: stamps the contained
    /// files as deleted and, when `recursive`, descends into child dirs.
    /// The directory stays linked into its parent until age-out.
    pub fn mark_dir_deleted(&mut self, dir: DirIndex, now: i64, tick: u32, recursive: bool) {
        let file_ids: Vec<FileIndex> = self.dirs[dir].files.values().copied().collect();
        for index in file_ids {
            if self.files[index].exists {
                self.files[index].exists = false;
                self.mark_file_changed(index, now, tick);
            }
        }
        self.dirs[dir].last_check_existed = false;
        if recursive {
            let subdir_ids: Vec<DirIndex> = self.dirs[dir].subdirs.values().copied().collect();
            for child in subdir_ids {
                self.mark_dir_deleted(child, now, tick, true);
            }
        }
    }

    // -----------------------------------------------------------------
    // Recency list
    // -----------------------------------------------------------------

    fn unlink_recency(&mut self, index: FileIndex) {
        let (prev, next) = {
            let file = &self.files[index];
            (file.recency_prev, file.recency_next)
        };
        match prev {
            Some(prev) => self.files[prev].recency_next = next,
            None => {
                if self.recency_head == Some(index) {
                    self.recency_head = next;
                }
            }
        }
        match next {
            Some(next) => self.files[next].recency_prev = prev,
            None => {
                if self.recency_tail == Some(index) {
                    self.recency_tail = prev;
                }
            }
        }
        let file = &mut self.files[index];
        file.recency_prev = None;
        file.recency_next = None;
    }

    fn push_recency_head(&mut self, index: FileIndex) {
        if self.recency_head == Some(index) {
            return;
        }
        self.unlink_recency(index);
        let old_head = self.recency_head;
        self.files[index].recency_next = old_head;
        match old_head {
            Some(old) => self.files[old].recency_prev = Some(index),
            None => self.recency_tail = Some(index),
        }
        self.recency_head = Some(index);
    }

    // -----------------------------------------------------------------
    // Suffix index
    // -----------------------------------------------------------------

    fn link_suffix(&mut self, index: FileIndex) {
        if self.files[index].suffix_key.is_some() {
            return;
        }
        let Some(suffix) = PathKey::suffix_of(self.files[index].name.as_str()) else {
            return;
        };
        let bucket = self.suffixes.entry(suffix.clone()).or_default();
        let old_head = bucket.head;
        bucket.head = Some(index);
        if let Some(old) = old_head {
            self.files[old].suffix_prev = Some(index);
        }
        let file = &mut self.files[index];
        file.suffix_key = Some(suffix);
        file.suffix_next = old_head;
        file.suffix_prev = None;
    }

    fn unlink_suffix(&mut self, index: FileIndex) {
        let Some(suffix) = self.files[index].suffix_key.take() else {
            return;
        };
        let (prev, next) = {
            let file = &self.files[index];
            (file.suffix_prev, file.suffix_next)
        };
        match prev {
            Some(prev) => self.files[prev].suffix_next = next,
            None => {
                if let Some(bucket) = self.suffixes.get_mut(suffix.as_str()) {
                    bucket.head = next;
                }
            }
        }
        if let Some(next) = next {
            self.files[next].suffix_prev = prev;
        }
        let file = &mut self.files[index];
        file.suffix_prev = None;
        file.suffix_next = None;
    }

    /// Fully detaches a file from the view. Only age-out removes files.
    pub(crate) fn evict_file(&mut self, index: FileIndex) -> Option<DirIndex> {
        self.unlink_recency(index);
        self.unlink_suffix(index);
        let file = self.files.remove(index)?;
        let parent = file.parent;
        if let Some(dir) = self.dirs.get_mut(parent) {
            dir.files.remove(file.name.as_str());
        }
        Some(parent)
    }

    /// Unlinks an empty, non-root directory from its parent.
    pub(crate) fn evict_dir(&mut self, index: DirIndex) -> Option<DirIndex> {
        let node = self.dirs.get(index)?;
        let parent = node.parent?;
        let name = node.name.clone();
        self.dirs[parent].subdirs.remove(name.as_str());
        // The directory's own file entity goes with it.
        if let Some(&entity) = self.dirs[parent].files.get(name.as_str()) {
            self.evict_file(entity);
        }
        self.dirs.remove(index);
        Some(parent)
    }

    pub(crate) fn record_age_out(&mut self, now: i64) {
        self.last_age_out_tick = self.most_recent_tick();
        self.last_age_out_timestamp = now;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{observe_file, tombstone_file, view_with};
    use super::*;

    fn recency_names(view: &InMemoryView) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = view.recency_head();
        while let Some(index) = cursor {
            names.push(view.wholename(index).to_string());
            cursor = view.file(index).recency_next;
        }
        names
    }

    #[test]
    fn ticks_are_strictly_increasing() {
        let view = view_with(&["a.txt", "b.txt", "c.txt"]);
        let mut ticks = Vec::new();
        let mut cursor = view.recency_head();
        while let Some(index) = cursor {
            ticks.push(view.file(index).otime.tick);
            cursor = view.file(index).recency_next;
        }
        // Head is newest; ticks decrease strictly toward the tail.
        assert!(ticks.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(view.most_recent_tick(), *ticks.first().unwrap());
    }

    #[test]
    fn touch_moves_file_to_recency_head() {
        let mut view = view_with(&["a.txt", "b.txt"]);
        assert_eq!(recency_names(&view), vec!["b.txt", "a.txt"]);

        observe_file(&mut view, "a.txt", true);
        assert_eq!(recency_names(&view), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn suffix_bucket_membership() {
        let view = view_with(&["a.txt", "b.TXT", "c.rs"]);

        let mut txt = Vec::new();
        let mut cursor = view.suffix_head("txt");
        while let Some(index) = cursor {
            txt.push(view.file(index).name.to_string());
            cursor = view.file(index).suffix_next;
        }
        txt.sort();
        assert_eq!(txt, vec!["a.txt", "b.TXT"]);
        assert!(view.suffix_head("rs").is_some());
        assert!(view.suffix_head("c").is_none());
    }

    #[test]
    fn resolve_is_stable() {
        let view = view_with(&["src/main.rs", "src/lib.rs"]);
        let a = view.resolve_dir("src").unwrap();
        let b = view.resolve_dir("src").unwrap();
        assert_eq!(a, b);
        assert_eq!(view.lookup_file("src/main.rs"), view.lookup_file("src/main.rs"));
        assert!(view.resolve_dir("src/nested").is_none());
    }

    #[test]
    fn wholename_includes_parent_chain() {
        let view = view_with(&["a/b/c.txt"]);
        let index = view.lookup_file("a/b/c.txt").unwrap();
        assert_eq!(view.wholename(index).as_str(), "a/b/c.txt");
    }

    #[test]
    fn mark_dir_deleted_tombstones_recursively() {
        let mut view = view_with(&["d/x", "d/sub/y"]);
        let dir = view.resolve_dir("d").unwrap();
        let tick = view.advance_clock();
        view.mark_dir_deleted(dir, 0, tick, true);

        let x = view.lookup_file("d/x").unwrap();
        let y = view.lookup_file("d/sub/y").unwrap();
        assert!(!view.file(x).exists);
        assert!(!view.file(y).exists);
        assert_eq!(view.file(x).otime.tick, tick);
        // Tombstoned files stay in the recency list until age-out.
        assert!(recency_names(&view).contains(&"d/x".to_string()));
    }

    #[test]
    fn tombstone_keeps_suffix_membership() {
        let mut view = view_with(&["a.txt"]);
        tombstone_file(&mut view, "a.txt");
        assert!(view.suffix_head("txt").is_some());
    }
}
