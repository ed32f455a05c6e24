//! Query types and per-file processing.
//!
//! A parsed query is immutable; all execution state lives in the
//! [`QueryContext`]. Generators feed candidate files into
//! [`process_file`], which applies the relative-root filter, the
//! expression tree, and dedup before appending a [`RuleMatch`].

mod clockspec;
mod context;
mod expression;
mod fields;
pub(crate) mod glob;
mod parser;
mod terms;

pub use clockspec::{clock_string, ClockSpec, QuerySince, SinceMode};
pub use context::{ClockResolver, QueryContext};
pub use expression::{AllOf, AnyOf, FalseExpr, NotExpr, QueryExpr, TrueExpr};
pub use fields::{Field, FieldList};
pub use glob::GlobTree;
pub use parser::{parse_query, QueryOptions, TermRegistry};
pub use terms::{IntCompareOp, NameScope};

use std::time::Duration;

use crate::storage::{ClockStamp, FileIndex, FileNode, NodeFileType, PathKey};

/// One `path` entry: a root-relative prefix and a recursion bound.
/// `depth == 0` names only the entry itself; `depth == -1` is unbounded.
#[derive(Debug, Clone)]
pub struct QueryPath {
    pub path: String,
    pub depth: i64,
}

/// The relative-root filter, stored with and without the trailing
/// separator so per-file checks need no allocation.
#[derive(Debug, Clone)]
pub struct RelativeRoot {
    pub root: PathKey,
    pub with_slash: PathKey,
}

impl RelativeRoot {
    pub fn new(root: &str) -> Self {
        let trimmed = root.trim_matches('/');
        Self {
            root: PathKey::new(trimmed),
            with_slash: PathKey::from(format!("{trimmed}/")),
        }
    }
}

/// A parsed, immutable query.
#[derive(Debug)]
pub struct Query {
    pub case_sensitive: bool,
    pub empty_on_fresh_instance: bool,
    pub dedup_results: bool,
    pub relative_root: Option<RelativeRoot>,
    pub paths: Vec<QueryPath>,
    pub glob: Option<GlobTree>,
    pub suffixes: Vec<PathKey>,
    /// Cannot be fully evaluated until the query executes: named cursors
    /// and fresh-instance detection depend on root state at that moment.
    pub since_spec: Option<ClockSpec>,
    pub expr: Box<dyn QueryExpr>,
    pub fields: FieldList,
    pub sync_timeout: Duration,
    pub lock_timeout: Duration,
}

/// Stat and clock data copied out of a matching file while the lock is
/// held, so results stay valid after it is released.
#[derive(Debug, Clone, Copy)]
pub struct FileSnapshot {
    pub exists: bool,
    pub file_type: NodeFileType,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub ctime: i64,
    pub oclock: ClockStamp,
    pub cclock: ClockStamp,
}

impl FileSnapshot {
    pub fn capture(file: &FileNode) -> Self {
        Self {
            exists: file.exists,
            file_type: file.stat.file_type,
            size: file.stat.size,
            mode: file.stat.mode,
            mtime: file.stat.mtime,
            ctime: file.stat.ctime,
            oclock: file.otime,
            cclock: file.cclock,
        }
    }
}

/// One matching file.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub root_number: u32,
    pub relname: PathKey,
    pub is_new: bool,
    pub file: FileSnapshot,
}

/// The outcome of one query execution.
#[derive(Debug)]
pub struct QueryResult {
    pub is_fresh_instance: bool,
    pub matches: Vec<RuleMatch>,
    /// The root's clock at execution, for use as the next since point.
    pub ticks: u32,
    pub num_walked: u64,
    pub num_deduped: u32,
}

/// Runs one candidate file through the query engine.
pub(crate) fn process_file(ctx: &mut QueryContext<'_>, index: FileIndex) {
    ctx.begin_file(index);
    let query = ctx.query;
    let view = ctx.view;
    let file = view.file(index);

    let wholename = ctx.wholename(index);
    if let Some(rel) = &query.relative_root {
        if !within_relative_root(&wholename, rel, query.case_sensitive) {
            return;
        }
    }

    if !query.expr.evaluate(ctx, file) {
        return;
    }

    let relname = match &query.relative_root {
        Some(rel) if wholename.len() > rel.with_slash.len() => {
            PathKey::new(&wholename.as_str()[rel.with_slash.len()..])
        }
        Some(_) => PathKey::new(""),
        None => wholename.clone(),
    };

    if query.dedup_results {
        let key = if query.case_sensitive {
            relname.clone()
        } else {
            relname.to_lowercase_key()
        };
        if !ctx.dedup.insert(key) {
            ctx.num_deduped += 1;
            return;
        }
    }

    let is_new = match ctx.since.mode {
        SinceMode::Ticks {
            ticks,
            fresh_instance,
        } => fresh_instance || file.cclock.tick > ticks,
        SinceMode::Timestamp(cut) => file.cclock.timestamp > cut,
    };

    ctx.results.push(RuleMatch {
        root_number: ctx.root_number,
        relname,
        is_new,
        file: FileSnapshot::capture(file),
    });
}

fn within_relative_root(wholename: &PathKey, rel: &RelativeRoot, case_sensitive: bool) -> bool {
    if case_sensitive {
        *wholename == rel.root || wholename.as_str().starts_with(rel.with_slash.as_str())
    } else {
        wholename.eq_ignore_case(rel.root.as_str())
            || starts_with_ignore_case(wholename.as_str(), rel.with_slash.as_str())
    }
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack.len() >= prefix.len()
        && haystack.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
