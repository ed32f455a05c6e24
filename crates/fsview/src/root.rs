//! A watched root: the view, its reader/writer lock, the ingestion
//! thread, cancellation, and the query entry point.
//!
//! The ingestion thread is the sole writer. Queries acquire the lock
//! shared, with the timeout the query carries; in-flight queries are
//! never interrupted, but observe cancellation on their next lock
//! attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, ViewError};
use crate::ingest;
use crate::pending::{PendingCollection, PendingFlags};
use crate::query::{
    clock_string, parse_query, ClockSpec, Query, QueryContext, QueryOptions, QueryResult,
    QuerySince, TermRegistry,
};
use crate::storage::now_secs;
use crate::view::{run_selected_generator, InMemoryView};
use crate::watcher::{FsWatcher, NotifyWatcher};

static NEXT_ROOT_NUMBER: AtomicU32 = AtomicU32::new(0);

/// How long the writer waits per lock attempt between cancellation
/// checks.
const WRITE_LOCK_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RootConfig {
    pub root_path: PathBuf,
    /// Default case sensitivity for queries against this root.
    pub case_sensitive: bool,
    /// How long to let an event burst settle before draining it.
    pub settle: Duration,
    /// Tombstones older than this are evicted by the periodic age-out.
    pub gc_age: Duration,
    /// How often the periodic age-out runs; zero disables it.
    pub gc_interval: Duration,
}

impl RootConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            case_sensitive: true,
            settle: Duration::from_millis(20),
            gc_age: Duration::from_secs(3 * 86400),
            gc_interval: Duration::from_secs(86400),
        }
    }
}

pub struct WatchedRoot {
    config: RootConfig,
    /// Distinguishes clocks issued by this view from clocks issued by a
    /// previous incarnation of the process.
    instance_id: u64,
    root_number: u32,
    registry: TermRegistry,
    view: RwLock<InMemoryView>,
    watcher: Arc<dyn FsWatcher>,
    cancelled: AtomicBool,
    /// True while the pending queue is drained and no burst is being
    /// collected; `sync_timeout` waits on this.
    settled: AtomicBool,
    recrawl_count: AtomicU32,
    cursors: Mutex<HashMap<String, u32>>,
}

impl WatchedRoot {
    /// Opens a root backed by the platform notify watcher.
    pub fn open(config: RootConfig) -> Result<Arc<Self>> {
        let watcher = Arc::new(NotifyWatcher::new(&config.root_path)?);
        Ok(Self::with_watcher(config, watcher))
    }

    pub fn with_watcher(config: RootConfig, watcher: Arc<dyn FsWatcher>) -> Arc<Self> {
        let root_number = NEXT_ROOT_NUMBER.fetch_add(1, Ordering::Relaxed);
        let instance_id = ((std::process::id() as u64) << 40)
            ^ ((now_secs() as u64) << 8)
            ^ root_number as u64;
        let view = InMemoryView::new(&config.root_path);
        Arc::new(Self {
            config,
            instance_id,
            root_number,
            registry: TermRegistry::new(),
            view: RwLock::new(view),
            watcher,
            cancelled: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            recrawl_count: AtomicU32::new(0),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.config.root_path
    }

    pub fn root_number(&self) -> u32 {
        self.root_number
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the root. The ingestion loop drops its remaining work;
    /// new lock attempts fail with `Cancelled`.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!(root = %self.config.root_path.display(), "root cancelled");
        }
    }

    /// The current clock, suitable as a later since parameter.
    pub fn current_clock(&self) -> String {
        clock_string(self.instance_id, self.view.read().most_recent_tick())
    }

    pub fn recrawl_count(&self) -> u32 {
        self.recrawl_count.load(Ordering::Relaxed)
    }

    /// Parses a JSON query spec with this root's defaults.
    pub fn parse_query(&self, spec: &Value) -> Result<Query> {
        parse_query(
            &self.registry,
            spec,
            &QueryOptions {
                case_sensitive: self.config.case_sensitive,
            },
        )
    }

    // -----------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------

    /// Spawns the ingestion thread: initial crawl, then notifications.
    pub fn spawn(self: &Arc<Self>) -> std::io::Result<thread::JoinHandle<()>> {
        let root = Arc::clone(self);
        thread::Builder::new()
            .name(format!("fsview-ingest-{}", self.root_number))
            .spawn(move || root.run_ingest())
    }

    /// Synchronously crawls the root into the view. The spawned
    /// ingestion loop does this itself; callers driving ingestion by
    /// hand use it to seed the view.
    pub fn crawl(&self) -> Result<()> {
        let mut coll = PendingCollection::new();
        coll.add(
            self.config.root_path.clone(),
            now_secs(),
            PendingFlags::RECURSIVE,
        );
        let result = self.drain(&mut coll);
        self.settled.store(true, Ordering::Release);
        result
    }

    /// Runs one explicit age-out pass.
    pub fn age_out_now(&self, min_age: Duration) -> Result<()> {
        let mut view = self.write_view()?;
        view.age_out(min_age, now_secs());
        Ok(())
    }

    fn run_ingest(&self) {
        let mut coll = PendingCollection::new();
        coll.add(
            self.config.root_path.clone(),
            now_secs(),
            PendingFlags::RECURSIVE,
        );
        let mut last_gc = Instant::now();
        info!(root = %self.config.root_path.display(), "watching root");

        while !self.is_cancelled() {
            if !coll.is_empty() {
                self.settled.store(false, Ordering::Release);
                match self.drain(&mut coll) {
                    Ok(()) => {}
                    Err(ViewError::Cancelled) => break,
                    Err(ViewError::RootLost(path)) => {
                        warn!(root = %path.display(), "root is gone, stopping ingestion");
                        break;
                    }
                    Err(error) => {
                        warn!(%error, "ingest batch failed");
                        // Back off so a persistently failing path does
                        // not spin the loop.
                        thread::sleep(self.config.settle);
                    }
                }
            }
            self.settled.store(coll.is_empty(), Ordering::Release);

            if self.watcher.wait_notify(self.config.settle) {
                self.settled.store(false, Ordering::Release);
                // Collect the whole burst into one batch.
                loop {
                    let outcome = self.watcher.consume_notify(&mut coll);
                    if outcome.root_lost {
                        self.cancel();
                        break;
                    }
                    if outcome.needs_recrawl {
                        self.schedule_recrawl(&mut coll);
                    }
                    if !self.watcher.wait_notify(self.config.settle) {
                        break;
                    }
                }
            } else if self.config.gc_interval > Duration::ZERO
                && last_gc.elapsed() >= self.config.gc_interval
            {
                match self.write_view() {
                    Ok(mut view) => {
                        view.age_out(self.config.gc_age, now_secs());
                        last_gc = Instant::now();
                    }
                    Err(_) => break,
                }
            }
        }

        coll.clear();
        debug!(root = %self.config.root_path.display(), "ingest loop exited");
    }

    /// Drains the collection under one write-lock hold.
    fn drain(&self, coll: &mut PendingCollection) -> Result<()> {
        let mut view = self.write_view()?;
        let outcome = ingest::process_pending(&mut view, self.watcher.as_ref(), coll);
        drop(view);
        if outcome.root_lost {
            self.cancel();
            return Err(ViewError::RootLost(self.config.root_path.clone()));
        }
        if outcome.needs_recrawl {
            self.schedule_recrawl(coll);
        }
        Ok(())
    }

    fn schedule_recrawl(&self, coll: &mut PendingCollection) {
        let count = self.recrawl_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            root = %self.config.root_path.display(),
            count,
            "scheduling recrawl"
        );
        coll.add(
            self.config.root_path.clone(),
            now_secs(),
            PendingFlags::RECURSIVE,
        );
    }

    /// Feeds one path through ingestion, as a delivered notification
    /// would.
    pub fn ingest_path(&self, path: PathBuf, flags: PendingFlags) -> Result<()> {
        let mut coll = PendingCollection::new();
        coll.add(path, now_secs(), flags);
        self.drain(&mut coll)
    }

    // -----------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------

    fn write_view(&self) -> Result<RwLockWriteGuard<'_, InMemoryView>> {
        loop {
            if self.is_cancelled() {
                return Err(ViewError::Cancelled);
            }
            if let Some(guard) = self.view.try_write_for(WRITE_LOCK_SLICE) {
                return Ok(guard);
            }
        }
    }

    fn read_view(&self, timeout: Duration) -> Result<RwLockReadGuard<'_, InMemoryView>> {
        if self.is_cancelled() {
            return Err(ViewError::Cancelled);
        }
        let guard = self
            .view
            .try_read_for(timeout)
            .ok_or(ViewError::Timeout("root read lock"))?;
        if self.is_cancelled() {
            return Err(ViewError::Cancelled);
        }
        Ok(guard)
    }

    fn wait_settled(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.settled.load(Ordering::Acquire) {
            if self.is_cancelled() {
                return Err(ViewError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(ViewError::Timeout("view to settle"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Executes a query against the current view snapshot.
    pub fn execute_query(&self, query: &Query) -> Result<QueryResult> {
        if query.sync_timeout > Duration::ZERO {
            self.wait_settled(query.sync_timeout)?;
        }
        let view = self.read_view(query.lock_timeout)?;
        let since = self.resolve_since(&view, query.since_spec.as_ref());
        let ticks = view.most_recent_tick();
        let is_fresh_instance = since.is_fresh_instance();

        let result = if is_fresh_instance && query.empty_on_fresh_instance {
            QueryResult {
                is_fresh_instance: true,
                matches: Vec::new(),
                ticks,
                num_walked: 0,
                num_deduped: 0,
            }
        } else {
            let resolver = |spec: &ClockSpec| self.resolve_since(&view, Some(spec));
            let mut ctx = QueryContext::new(query, &view, since, self.root_number, &resolver);
            let num_walked = run_selected_generator(&mut ctx);
            QueryResult {
                is_fresh_instance,
                matches: ctx.results,
                ticks,
                num_walked,
                num_deduped: ctx.num_deduped,
            }
        };
        drop(view);

        // A named cursor advances to the clock this query observed.
        if let Some(ClockSpec::NamedCursor(name)) = &query.since_spec {
            self.cursors.lock().insert(name.clone(), result.ticks);
            debug!(cursor = %name, ticks = result.ticks, "advanced named cursor");
        }
        Ok(result)
    }

    /// Parses and executes a JSON query spec in one step.
    pub fn query(&self, spec: &Value) -> Result<QueryResult> {
        let query = self.parse_query(spec)?;
        self.execute_query(&query)
    }

    /// Renders a result in the wire shape:
    /// `{is_fresh_instance, clock, files}`.
    pub fn render_response(&self, query: &Query, result: &QueryResult) -> Value {
        let files: Vec<Value> = result
            .matches
            .iter()
            .map(|m| query.fields.render(m, self.instance_id))
            .collect();
        serde_json::json!({
            "is_fresh_instance": result.is_fresh_instance,
            "clock": clock_string(self.instance_id, result.ticks),
            "files": files,
        })
    }

    fn resolve_since(&self, view: &InMemoryView, spec: Option<&ClockSpec>) -> QuerySince {
        match spec {
            None => QuerySince::fresh_instance(),
            Some(ClockSpec::Timestamp(secs)) => QuerySince::at_timestamp(*secs),
            Some(ClockSpec::Clock { instance_id, ticks }) => {
                if *instance_id != self.instance_id || *ticks < view.last_age_out_tick() {
                    QuerySince::fresh_instance()
                } else {
                    QuerySince::at_ticks(*ticks)
                }
            }
            Some(ClockSpec::NamedCursor(name)) => {
                match self.cursors.lock().get(name).copied() {
                    None => QuerySince::fresh_instance(),
                    Some(ticks) if ticks < view.last_age_out_tick() => {
                        QuerySince::fresh_instance()
                    }
                    Some(ticks) => QuerySince::at_ticks(ticks),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn setup(tree: &[&str]) -> (TempDir, Arc<WatchedRoot>) {
        let tmp = TempDir::new().unwrap();
        for path in tree {
            let full = tmp.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, path.as_bytes()).unwrap();
        }
        let root = WatchedRoot::open(RootConfig::new(tmp.path())).unwrap();
        root.crawl().unwrap();
        (tmp, root)
    }

    fn names(result: &QueryResult) -> Vec<String> {
        result.matches.iter().map(|m| m.relname.to_string()).collect()
    }

    #[test]
    fn touch_then_suffix_query_orders_by_recency() {
        let (tmp, root) = setup(&["a.txt", "b.txt"]);

        fs::write(tmp.path().join("a.txt"), "touched").unwrap();
        let before = root.view.read().most_recent_tick();
        root.ingest_path(tmp.path().join("a.txt"), PendingFlags::VIA_NOTIFY)
            .unwrap();
        assert_eq!(root.view.read().most_recent_tick(), before + 1);

        let result = root.query(&json!({"suffix": "txt"})).unwrap();
        assert_eq!(names(&result), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn since_query_reports_deletion_then_ageout_resets_history() {
        let (tmp, root) = setup(&["a.txt", "b.txt"]);
        let t0 = root.current_clock();

        fs::remove_file(tmp.path().join("a.txt")).unwrap();
        root.ingest_path(tmp.path().join("a.txt"), PendingFlags::VIA_NOTIFY)
            .unwrap();

        let result = root.query(&json!({"since": t0})).unwrap();
        assert!(!result.is_fresh_instance);
        assert_eq!(names(&result), vec!["a.txt"]);
        assert!(!result.matches[0].file.exists);
        assert!(!result.matches[0].is_new);

        // Evict the tombstone (the stamp is seconds-granular, so age
        // out relative to one second later).
        {
            let mut view = root.view.write();
            view.age_out(Duration::ZERO, now_secs() + 1);
        }

        let current = root.current_clock();
        let result = root.query(&json!({"since": current})).unwrap();
        assert!(!result.is_fresh_instance);
        assert!(result.matches.is_empty());

        // A cut from before the age-out is unanswerable: fresh instance.
        let stale = root.query(&json!({"since": t0})).unwrap();
        assert!(stale.is_fresh_instance);
        let mut all = names(&stale);
        all.sort();
        assert_eq!(all, vec!["b.txt"]);

        let empty = root
            .query(&json!({"since": t0, "empty_on_fresh_instance": true}))
            .unwrap();
        assert!(empty.is_fresh_instance);
        assert!(empty.matches.is_empty());
    }

    #[test]
    fn queries_without_since_are_fresh_instances() {
        let (_tmp, root) = setup(&["a.txt"]);
        let result = root.query(&json!({})).unwrap();
        assert!(result.is_fresh_instance);
        assert!(result.matches.iter().all(|m| m.is_new));
    }

    #[test]
    fn clock_from_another_instance_is_fresh() {
        let (_tmp, root) = setup(&["a.txt"]);
        let foreign = format!("c:{}:3", root.instance_id().wrapping_add(1));
        let result = root.query(&json!({"since": foreign})).unwrap();
        assert!(result.is_fresh_instance);
    }

    #[test]
    fn named_cursor_advances_per_query() {
        let (tmp, root) = setup(&["a.txt", "b.txt"]);

        let first = root.query(&json!({"since": "n:sub"})).unwrap();
        assert!(first.is_fresh_instance);
        assert!(!names(&first).is_empty());

        let quiet = root.query(&json!({"since": "n:sub"})).unwrap();
        assert!(!quiet.is_fresh_instance);
        assert!(quiet.matches.is_empty());

        fs::write(tmp.path().join("a.txt"), "changed").unwrap();
        root.ingest_path(tmp.path().join("a.txt"), PendingFlags::VIA_NOTIFY)
            .unwrap();

        let delta = root.query(&json!({"since": "n:sub"})).unwrap();
        assert!(!delta.is_fresh_instance);
        assert_eq!(names(&delta), vec!["a.txt"]);
    }

    #[test]
    fn cancelled_root_fails_queries() {
        let (_tmp, root) = setup(&["a.txt"]);
        root.cancel();
        let err = root.query(&json!({})).unwrap_err();
        assert!(matches!(err, ViewError::Cancelled));
    }

    #[test]
    fn losing_the_root_cancels_it() {
        let tmp = TempDir::new().unwrap();
        let inner = tmp.path().join("r");
        fs::create_dir(&inner).unwrap();
        fs::write(inner.join("a.txt"), "a").unwrap();

        let root = WatchedRoot::open(RootConfig::new(&inner)).unwrap();
        root.crawl().unwrap();

        fs::remove_dir_all(&inner).unwrap();
        let err = root.crawl().unwrap_err();
        assert!(matches!(err, ViewError::RootLost(_)));
        assert!(root.is_cancelled());
        assert!(matches!(
            root.query(&json!({})).unwrap_err(),
            ViewError::Cancelled
        ));
    }

    #[test]
    fn render_response_has_wire_shape() {
        let (_tmp, root) = setup(&["a.txt"]);
        let query = root.parse_query(&json!({"fields": ["name"]})).unwrap();
        let result = root.execute_query(&query).unwrap();
        let rendered = root.render_response(&query, &result);

        assert_eq!(rendered["is_fresh_instance"], json!(true));
        let clock = rendered["clock"].as_str().unwrap();
        assert!(clock.starts_with("c:"));
        assert!(rendered["files"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "a.txt"));
    }

    #[test]
    fn concurrent_readers_see_consistent_prefixes() {
        let (tmp, root) = setup(&[]);
        let total = 120usize;
        let clock = root.current_clock();

        let writer = {
            let root = Arc::clone(&root);
            let dir = tmp.path().to_path_buf();
            thread::spawn(move || {
                for i in 0..total {
                    let path = dir.join(format!("f{i:04}.dat"));
                    fs::write(&path, b"x").unwrap();
                    root.ingest_path(path, PendingFlags::VIA_NOTIFY).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let root = Arc::clone(&root);
                let since = clock.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let result = root
                            .query(&json!({"since": since, "lock_timeout": 5000}))
                            .unwrap();
                        let mut seen = HashSet::new();
                        let mut max_tick = 0;
                        for m in &result.matches {
                            assert!(seen.insert(m.relname.clone()), "duplicate in result");
                            max_tick = max_tick.max(m.file.oclock.tick);
                        }
                        assert!(result.ticks >= max_tick);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        let final_result = root.query(&json!({"since": clock})).unwrap();
        assert_eq!(final_result.matches.len(), total);
    }

    #[test]
    fn s3_path_depth_scenario() {
        let (_tmp, root) = setup(&["d/x"]);
        let deep = root
            .query(&json!({"path": [{"path": "d", "depth": -1}]}))
            .unwrap();
        assert_eq!(names(&deep), vec!["d/x"]);

        let shallow = root
            .query(&json!({"path": [{"path": "d", "depth": 0}]}))
            .unwrap();
        assert_eq!(names(&shallow), vec!["d"]);
    }

    #[test]
    fn s4_glob_scenario() {
        let (_tmp, root) = setup(&["src/a.c", "src/b.h", "src/sub/c.c"]);
        let result = root.query(&json!({"glob": ["**/*.c"]})).unwrap();
        let mut found = names(&result);
        found.sort();
        assert_eq!(found, vec!["src/a.c", "src/sub/c.c"]);
    }

    #[test]
    fn end_to_end_with_spawned_watcher() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("seed.txt"), "seed").unwrap();

        let mut config = RootConfig::new(tmp.path());
        config.settle = Duration::from_millis(20);
        let root = WatchedRoot::open(config).unwrap();
        let handle = root.spawn().unwrap();

        // Wait for the initial crawl.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let result = root.query(&json!({"suffix": "txt"})).unwrap();
            if !result.matches.is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "initial crawl never surfaced");
            thread::sleep(Duration::from_millis(20));
        }

        let clock = root.current_clock();
        fs::write(tmp.path().join("later.txt"), "later").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let result = root.query(&json!({"since": clock})).unwrap();
            if names(&result).contains(&"later.txt".to_string()) {
                break;
            }
            assert!(
                Instant::now() < deadline,
                "notification for later.txt never arrived"
            );
            thread::sleep(Duration::from_millis(20));
        }

        root.cancel();
        handle.join().unwrap();
    }
}
