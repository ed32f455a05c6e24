//! The `notify`-backed watcher.
//!
//! Directories are registered one at a time (non-recursively) as the
//! crawler reaches them; the backend buffers OS events on a channel and
//! drains them into the pending collection on demand.

use std::collections::VecDeque;
use std::fs::{self, ReadDir};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ConsumeOutcome, FileEventFlags, FsWatcher};
use crate::error::Result;
use crate::pending::{PendingCollection, PendingFlags};
use crate::storage::now_secs;

pub struct NotifyWatcher {
    root: PathBuf,
    watcher: Mutex<RecommendedWatcher>,
    rx: Receiver<notify::Result<Event>>,
    /// Events pulled off the channel by `wait_notify` but not yet
    /// consumed.
    buffer: Mutex<VecDeque<notify::Result<Event>>>,
}

impl NotifyWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = unbounded();
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            watcher: Mutex::new(watcher),
            rx,
            buffer: Mutex::new(VecDeque::new()),
        })
    }

    fn apply_event(
        &self,
        result: notify::Result<Event>,
        coll: &mut PendingCollection,
        now: i64,
        outcome: &mut ConsumeOutcome,
    ) {
        let event = match result {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "watcher delivered an error, scheduling recrawl");
                outcome.delivered = true;
                outcome.needs_recrawl = true;
                return;
            }
        };
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        outcome.delivered = true;
        if event.need_rescan() {
            // The kernel dropped events; only a recrawl recovers.
            outcome.needs_recrawl = true;
        }
        if event.paths.is_empty() {
            outcome.needs_recrawl = true;
            return;
        }

        let flags = event_flags(&event.kind);
        for path in &event.paths {
            if flags.removes_watch() {
                if *path == self.root {
                    warn!(root = %self.root.display(), "root was removed, cancelling watch");
                    outcome.root_lost = true;
                    continue;
                }
                // The path is gone from under its watch; release it.
                let _ = self.watcher.lock().unwatch(path);
            }
            let mut pending = PendingFlags::VIA_NOTIFY;
            if flags.implies_recursion() {
                pending |= PendingFlags::RECURSIVE;
            }
            debug!(path = %path.display(), ?flags, "queueing notification");
            coll.add(path.clone(), now, pending);
        }
    }
}

impl FsWatcher for NotifyWatcher {
    fn start_watch_dir(&self, path: &Path) -> io::Result<ReadDir> {
        let before = fs::symlink_metadata(path)?;
        if !before.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", path.display()),
            ));
        }
        self.watcher
            .lock()
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(notify_to_io)?;
        let entries = fs::read_dir(path)?;
        let after = fs::symlink_metadata(path)?;
        if !same_identity(&before, &after) {
            let _ = self.watcher.lock().unwatch(path);
            return Err(io::Error::other(format!(
                "{} was replaced while opening it",
                path.display()
            )));
        }
        Ok(entries)
    }

    fn stop_watch_dir(&self, path: &Path) {
        let _ = self.watcher.lock().unwatch(path);
    }

    /// kqueue only reports directory-entry changes for a watched
    /// directory, so file content changes need their own watches there.
    /// inotify and FSEvents cover children through the directory watch.
    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    fn start_watch_file(&self, path: &Path) -> io::Result<()> {
        self.watcher
            .lock()
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(notify_to_io)
    }

    #[cfg(not(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )))]
    fn start_watch_file(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn consume_notify(&self, coll: &mut PendingCollection) -> ConsumeOutcome {
        let mut outcome = ConsumeOutcome::default();
        let now = now_secs();
        let buffered: Vec<notify::Result<Event>> = self.buffer.lock().drain(..).collect();
        for result in buffered {
            self.apply_event(result, coll, now, &mut outcome);
        }
        while let Ok(result) = self.rx.try_recv() {
            self.apply_event(result, coll, now, &mut outcome);
        }
        outcome
    }

    fn wait_notify(&self, timeout: Duration) -> bool {
        if !self.buffer.lock().is_empty() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.buffer.lock().push_back(event);
                true
            }
            Err(_) => false,
        }
    }
}

fn event_flags(kind: &EventKind) -> FileEventFlags {
    match kind {
        EventKind::Create(_) => FileEventFlags::LINK,
        EventKind::Remove(_) => FileEventFlags::DELETE,
        EventKind::Modify(ModifyKind::Name(_)) => FileEventFlags::RENAME,
        EventKind::Modify(ModifyKind::Metadata(_)) => FileEventFlags::ATTRIB,
        _ => FileEventFlags::WRITE,
    }
}

fn notify_to_io(error: notify::Error) -> io::Error {
    io::Error::other(error)
}

#[cfg(unix)]
fn same_identity(before: &fs::Metadata, after: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    before.ino() == after.ino() && before.dev() == after.dev()
}

#[cfg(not(unix))]
fn same_identity(before: &fs::Metadata, after: &fs::Metadata) -> bool {
    before.file_type() == after.file_type()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, Flag, RemoveKind, RenameMode};
    use tempfile::TempDir;

    #[test]
    fn event_kind_mapping() {
        assert_eq!(
            event_flags(&EventKind::Create(CreateKind::File)),
            FileEventFlags::LINK
        );
        assert_eq!(
            event_flags(&EventKind::Remove(RemoveKind::Any)),
            FileEventFlags::DELETE
        );
        assert_eq!(
            event_flags(&EventKind::Modify(ModifyKind::Any)),
            FileEventFlags::WRITE
        );
        assert_eq!(
            event_flags(&EventKind::Modify(ModifyKind::Name(RenameMode::Any))),
            FileEventFlags::RENAME
        );
        assert!(event_flags(&EventKind::Modify(ModifyKind::Name(RenameMode::Any))).removes_watch());
    }

    #[test]
    fn rescan_flag_requests_recrawl() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::new(tmp.path()).unwrap();
        let mut coll = PendingCollection::new();
        let mut outcome = ConsumeOutcome::default();

        // The kernel dropped events; the event itself is still applied.
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(tmp.path().join("a.txt"))
            .set_flag(Flag::Rescan);
        watcher.apply_event(Ok(event), &mut coll, 0, &mut outcome);

        assert!(outcome.delivered);
        assert!(outcome.needs_recrawl);
        assert_eq!(coll.pop().unwrap().path, tmp.path().join("a.txt"));
    }

    #[test]
    fn root_removal_is_reported_as_root_loss() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::new(tmp.path()).unwrap();
        let mut coll = PendingCollection::new();
        let mut outcome = ConsumeOutcome::default();

        let event = Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(tmp.path().to_path_buf());
        watcher.apply_event(Ok(event), &mut coll, 0, &mut outcome);

        assert!(outcome.root_lost);
        assert!(coll.is_empty());
    }

    #[test]
    fn create_events_queue_recursive_pending() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::new(tmp.path()).unwrap();
        let mut coll = PendingCollection::new();
        let mut outcome = ConsumeOutcome::default();

        let child = tmp.path().join("newdir");
        let event = Event::new(EventKind::Create(CreateKind::Folder)).add_path(child.clone());
        watcher.apply_event(Ok(event), &mut coll, 0, &mut outcome);

        assert!(outcome.delivered);
        assert!(!outcome.root_lost);
        let entry = coll.pop().unwrap();
        assert_eq!(entry.path, child);
        assert!(entry.flags.contains(PendingFlags::RECURSIVE));
        assert!(entry.flags.contains(PendingFlags::VIA_NOTIFY));
    }

    #[test]
    fn watcher_errors_request_recrawl() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::new(tmp.path()).unwrap();
        let mut coll = PendingCollection::new();
        let mut outcome = ConsumeOutcome::default();

        watcher.apply_event(
            Err(notify::Error::generic("queue overflow")),
            &mut coll,
            0,
            &mut outcome,
        );

        assert!(outcome.needs_recrawl);
    }

    #[test]
    fn live_directory_watch_delivers_events() {
        let tmp = TempDir::new().unwrap();
        let watcher = NotifyWatcher::new(tmp.path()).unwrap();
        let _entries = watcher.start_watch_dir(tmp.path()).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        fs::write(tmp.path().join("a.txt"), "hello").unwrap();

        let mut coll = PendingCollection::new();
        let mut delivered = false;
        for _ in 0..20 {
            if watcher.wait_notify(Duration::from_millis(100)) {
                let outcome = watcher.consume_notify(&mut coll);
                delivered |= outcome.delivered;
                if !coll.is_empty() {
                    break;
                }
            }
        }

        assert!(delivered, "no events observed for file creation");
        assert!(!coll.is_empty());
    }

    #[test]
    fn start_watch_dir_rejects_files() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let watcher = NotifyWatcher::new(tmp.path()).unwrap();
        assert!(watcher.start_watch_dir(&file).is_err());
    }
}
