//! The ingestion pipeline: drains pending entries under the write lock,
//! stats each path, and folds the outcome into the view.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::pending::{PendingCollection, PendingEntry, PendingFlags};
use crate::storage::{DirIndex, FileIndex, FileStat};
use crate::view::InMemoryView;
use crate::watcher::FsWatcher;

#[derive(Debug, Default)]
pub(crate) struct IngestOutcome {
    /// An entry failed in a way only a full re-enumeration can repair.
    pub needs_recrawl: bool,
    /// The root itself is gone; the caller must cancel the root.
    pub root_lost: bool,
}

/// What processing one path concluded.
enum PathDisposition {
    Done,
    RootLost,
}

/// Drains the collection in FIFO order. Each entry advances the tick
/// and is stamped with the new value; entries enqueued while crawling
/// (directory children) are processed in the same batch.
pub(crate) fn process_pending(
    view: &mut InMemoryView,
    watcher: &dyn FsWatcher,
    coll: &mut PendingCollection,
) -> IngestOutcome {
    let root = view.root_path().to_path_buf();
    let mut outcome = IngestOutcome::default();
    while let Some(entry) = coll.pop() {
        let tick = view.advance_clock();
        match process_path(view, watcher, coll, &root, &entry, tick) {
            Ok(PathDisposition::Done) => {}
            Ok(PathDisposition::RootLost) => {
                outcome.root_lost = true;
                break;
            }
            Err(error) => {
                warn!(
                    path = %entry.path.display(),
                    %error,
                    "failed to process pending path, scheduling recrawl"
                );
                outcome.needs_recrawl = true;
            }
        }
    }
    outcome
}

fn process_path(
    view: &mut InMemoryView,
    watcher: &dyn FsWatcher,
    coll: &mut PendingCollection,
    root: &Path,
    entry: &PendingEntry,
    tick: u32,
) -> io::Result<PathDisposition> {
    let Some(rel) = relative_of(root, &entry.path) else {
        debug!(path = %entry.path.display(), "path is outside the root, ignoring");
        return Ok(PathDisposition::Done);
    };

    // Until the stat says otherwise, a notification implies the path
    // may be gone.
    if entry.flags.contains(PendingFlags::VIA_NOTIFY) {
        if let Some(index) = view.lookup_file(&rel) {
            view.file_mut(index).maybe_deleted = true;
        }
    }

    match fs::symlink_metadata(&entry.path) {
        Err(error) if is_missing(&error) => {
            if rel.is_empty() {
                return Ok(PathDisposition::RootLost);
            }
            watcher.stop_watch_dir(&entry.path);
            handle_missing(view, &rel, entry.observed_at, tick);
            Ok(PathDisposition::Done)
        }
        Err(error) => Err(error),
        Ok(meta) if meta.is_dir() => {
            let dir = view.resolve_or_create_dir(&rel);
            view.dir_mut(dir).last_check_existed = true;
            if !rel.is_empty() {
                update_file_entity(view, &rel, &meta, entry.observed_at, tick);
            }
            if entry
                .flags
                .intersects(PendingFlags::RECURSIVE | PendingFlags::VIA_NOTIFY)
            {
                crawl_dir(view, watcher, coll, entry, dir, &rel, tick)?;
            }
            Ok(PathDisposition::Done)
        }
        Ok(meta) => {
            if rel.is_empty() {
                return Ok(PathDisposition::RootLost);
            }
            update_file_entity(view, &rel, &meta, entry.observed_at, tick);
            let _ = watcher.start_watch_file(&entry.path);
            Ok(PathDisposition::Done)
        }
    }
}

fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn relative_of(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn split_rel(rel: &str) -> (&str, &str) {
    match rel.rfind('/') {
        Some(slash) => (&rel[..slash], &rel[slash + 1..]),
        None => ("", rel),
    }
}

/// The path stat'd as gone: tombstone the file entity and, if a
/// directory lived there, everything beneath it.
fn handle_missing(view: &mut InMemoryView, rel: &str, now: i64, tick: u32) {
    if let Some(dir) = view.resolve_dir(rel) {
        debug!(rel, "directory is gone, marking deleted");
        view.mark_dir_deleted(dir, now, tick, true);
    }
    if rel.is_empty() {
        return;
    }
    if let Some(index) = view.lookup_file(rel) {
        let file = view.file_mut(index);
        file.maybe_deleted = false;
        if file.exists {
            file.exists = false;
            view.mark_file_changed(index, now, tick);
        }
    }
}

fn update_file_entity(view: &mut InMemoryView, rel: &str, meta: &fs::Metadata, now: i64, tick: u32) {
    let (dirname, base) = split_rel(rel);
    let dir = view.resolve_or_create_dir(dirname);
    let index = view.get_or_create_child_file(dir, base, now, tick);
    let stat = FileStat::from_metadata(meta);
    {
        let file = view.file_mut(index);
        if file.exists && !file.stat.content_changed(&stat) {
            debug!(rel, "stat unchanged, stamping tick only");
        }
        file.stat = stat;
        file.exists = true;
    }
    // Any notification is a tick event, changed content or not.
    view.mark_file_changed(index, now, tick);
}

/// Enumerates a directory, queueing each entry for processing and
/// tombstoning tracked children the enumeration no longer lists.
fn crawl_dir(
    view: &mut InMemoryView,
    watcher: &dyn FsWatcher,
    coll: &mut PendingCollection,
    entry: &PendingEntry,
    dir: DirIndex,
    rel: &str,
    tick: u32,
) -> io::Result<()> {
    let entries = match watcher.start_watch_dir(&entry.path) {
        Ok(entries) => entries,
        Err(error) if is_missing(&error) => {
            handle_missing(view, rel, entry.observed_at, tick);
            return Ok(());
        }
        Err(error) => return Err(error),
    };

    // Deep crawls propagate; a notification only refreshes one level.
    let child_flags = if entry.flags.contains(PendingFlags::RECURSIVE) {
        PendingFlags::RECURSIVE
    } else {
        PendingFlags::empty()
    };

    let mut seen: HashSet<String> = HashSet::new();
    for dirent in entries {
        let dirent = match dirent {
            Ok(dirent) => dirent,
            Err(error) => {
                warn!(rel, %error, "readdir entry failed");
                continue;
            }
        };
        let name = match dirent.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(rel, ?raw, "skipping non-UTF-8 entry name");
                continue;
            }
        };
        coll.add(entry.path.join(&name), entry.observed_at, child_flags);
        seen.insert(name);
    }

    let missing_files: Vec<FileIndex> = {
        let node = view.dir(dir);
        node.files
            .iter()
            .filter(|(name, &index)| !seen.contains(name.as_str()) && view.file(index).exists)
            .map(|(_, &index)| index)
            .collect()
    };
    let missing_dirs: Vec<(String, DirIndex)> = {
        let node = view.dir(dir);
        node.subdirs
            .iter()
            .filter(|(name, _)| !seen.contains(name.as_str()))
            .map(|(name, &index)| (name.to_string(), index))
            .collect()
    };
    for index in missing_files {
        view.file_mut(index).exists = false;
        view.mark_file_changed(index, entry.observed_at, tick);
    }
    for (name, index) in missing_dirs {
        watcher.stop_watch_dir(&entry.path.join(&name));
        view.mark_dir_deleted(index, entry.observed_at, tick, true);
    }
    Ok(())
}
