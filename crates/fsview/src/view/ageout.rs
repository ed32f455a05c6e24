//! Age-out: evicts files that have been deleted for longer than a
//! threshold and prunes the directories they leave empty.

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use super::InMemoryView;
use crate::storage::DirIndex;

impl InMemoryView {
    /// Walks the recency list from the oldest end, evicting tombstoned
    /// files older than `min_age` and pruning directories that end up
    /// empty. Records the age-out tick so later since-queries can detect
    /// that the view no longer holds enough history to answer them.
    pub fn age_out(&mut self, min_age: Duration, now: i64) {
        let min_age = min_age.as_secs() as i64;
        let mut dirs_to_prune: HashSet<DirIndex> = HashSet::new();
        let mut reaped = 0usize;

        let mut cursor = self.recency_tail();
        while let Some(index) = cursor {
            let file = self.file(index);
            if now - file.otime.timestamp <= min_age {
                // The list is ordered by observation time; everything
                // newer than this entry is inside the window too.
                break;
            }
            let next = file.recency_prev;
            if !file.exists {
                if let Some(parent) = self.evict_file(index) {
                    dirs_to_prune.insert(parent);
                }
                reaped += 1;
            }
            cursor = next;
        }

        for dir in dirs_to_prune {
            self.prune_dir_chain(dir);
        }

        self.record_age_out(now);
        if reaped > 0 {
            debug!(
                reaped,
                tick = self.last_age_out_tick(),
                "aged out deleted files"
            );
        }
    }

    /// Removes a directory if it is empty and was last observed missing,
    /// then retries on its parent.
    fn prune_dir_chain(&mut self, start: DirIndex) {
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir == self.root_dir() {
                break;
            }
            let node = self.dir(dir);
            if node.last_check_existed || !node.files.is_empty() || !node.subdirs.is_empty() {
                break;
            }
            current = self.evict_dir(dir);
        }
    }
}
