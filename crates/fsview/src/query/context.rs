//! Per-query execution context.
//!
//! One-shot scratch space for a running query: the current candidate
//! file, its lazily computed wholename, the dedup set, and the result
//! accumulator. Lives only for the duration of one generator run under
//! the shared lock.

use std::collections::HashSet;

use crate::query::clockspec::{ClockSpec, QuerySince};
use crate::query::{Query, RuleMatch};
use crate::storage::{FileIndex, PathKey};
use crate::view::InMemoryView;

/// Resolves a clockspec against the live root at execution time.
pub type ClockResolver<'a> = &'a dyn Fn(&ClockSpec) -> QuerySince;

pub struct QueryContext<'a> {
    pub query: &'a Query,
    pub view: &'a InMemoryView,
    /// The query-level since point, already resolved.
    pub since: QuerySince,
    pub root_number: u32,

    pub results: Vec<RuleMatch>,
    pub dedup: HashSet<PathKey>,
    /// How many results were suppressed by dedup checking.
    pub num_deduped: u32,

    resolver: ClockResolver<'a>,
    current: Option<FileIndex>,
    wholename: Option<PathKey>,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        query: &'a Query,
        view: &'a InMemoryView,
        since: QuerySince,
        root_number: u32,
        resolver: ClockResolver<'a>,
    ) -> Self {
        Self {
            query,
            view,
            since,
            root_number,
            results: Vec::new(),
            dedup: HashSet::new(),
            num_deduped: 0,
            resolver,
            current: None,
            wholename: None,
        }
    }

    /// Makes `index` the current candidate, invalidating the cached
    /// wholename.
    pub(crate) fn begin_file(&mut self, index: FileIndex) {
        if self.current != Some(index) {
            self.current = Some(index);
            self.wholename = None;
        }
    }

    /// The root-relative path of `index`, computed once per candidate.
    pub fn wholename(&mut self, index: FileIndex) -> PathKey {
        self.begin_file(index);
        if let Some(cached) = &self.wholename {
            return cached.clone();
        }
        let computed = self.view.wholename(index);
        self.wholename = Some(computed.clone());
        computed
    }

    /// The wholename of the candidate currently under evaluation.
    pub fn current_wholename(&mut self) -> PathKey {
        match self.current {
            Some(index) => self.wholename(index),
            None => PathKey::new(""),
        }
    }

    /// Resolves a term-level clockspec against the live root.
    pub fn resolve_clock(&self, spec: &ClockSpec) -> QuerySince {
        (self.resolver)(spec)
    }
}
