//! Candidate generators: each strategy yields files for the expression
//! to judge and reports how many it walked.

use crate::query::glob::{GlobNode, GlobToken, GlobTree};
use crate::query::{process_file, Query, QueryContext, SinceMode};
use crate::storage::{DirIndex, FileIndex};

use super::InMemoryView;

/// Picks the generator for a query: paths beat globs beat suffixes beat
/// the since walk; everything else scans the whole tree.
pub(crate) fn run_selected_generator(ctx: &mut QueryContext<'_>) -> u64 {
    if !ctx.query.paths.is_empty() {
        path_generator(ctx)
    } else if ctx.query.glob.is_some() {
        glob_generator(ctx)
    } else if !ctx.query.suffixes.is_empty() {
        suffix_generator(ctx)
    } else if ctx.query.since_spec.is_some() {
        time_generator(ctx)
    } else {
        all_files_generator(ctx)
    }
}

/// Walks the recency list from the head and stops at the first file not
/// observed since the cut. The list is ordered by observation, so this
/// visits exactly the files changed since then.
pub(crate) fn time_generator(ctx: &mut QueryContext<'_>) -> u64 {
    let view = ctx.view;
    let mut walked = 0;
    let mut cursor = view.recency_head();
    while let Some(index) = cursor {
        let file = view.file(index);
        let include = match ctx.since.mode {
            SinceMode::Ticks {
                ticks,
                fresh_instance,
            } => fresh_instance || file.otime.tick > ticks,
            // Wall-clock mode has one-second granularity; the boundary
            // second is included.
            SinceMode::Timestamp(cut) => file.otime.timestamp >= cut,
        };
        if !include {
            break;
        }
        cursor = file.recency_next;
        walked += 1;
        process_file(ctx, index);
    }
    walked
}

/// Walks every file in the buckets of the query's suffix set, existing
/// or tombstoned.
pub(crate) fn suffix_generator(ctx: &mut QueryContext<'_>) -> u64 {
    let view = ctx.view;
    let query = ctx.query;
    let mut walked = 0;
    for suffix in &query.suffixes {
        let mut cursor = view.suffix_head(suffix.as_str());
        while let Some(index) = cursor {
            cursor = view.file(index).suffix_next;
            walked += 1;
            process_file(ctx, index);
        }
    }
    walked
}

/// Emits files under each `(prefix, depth)` entry. Depth zero names
/// only the entry itself; -1 is unbounded.
pub(crate) fn path_generator(ctx: &mut QueryContext<'_>) -> u64 {
    let view = ctx.view;
    let query = ctx.query;
    let mut walked = 0;
    for query_path in &query.paths {
        let full = compose_path(query, &query_path.path);
        let dir = view.resolve_dir(&full);
        if query_path.depth == 0 || dir.is_none() {
            if let Some(index) = view.lookup_file(&full) {
                walked += 1;
                process_file(ctx, index);
            }
            continue;
        }
        if let Some(dir) = dir {
            dir_generator(ctx, dir, query_path.depth, &mut walked);
        }
    }
    walked
}

fn compose_path(query: &Query, path: &str) -> String {
    match &query.relative_root {
        Some(rel) if path.is_empty() => rel.root.to_string(),
        Some(rel) => format!("{}{}", rel.with_slash, path),
        None => path.to_string(),
    }
}

/// Recursively walks files under a directory, bounded by `depth`.
fn dir_generator(ctx: &mut QueryContext<'_>, dir: DirIndex, depth: i64, walked: &mut u64) {
    let view = ctx.view;
    for &index in view.dir(dir).files.values() {
        *walked += 1;
        process_file(ctx, index);
    }
    if depth != 0 {
        let next_depth = if depth > 0 { depth - 1 } else { depth };
        for &subdir in view.dir(dir).subdirs.values() {
            dir_generator(ctx, subdir, next_depth, walked);
        }
    }
}

/// Evaluates the pre-compiled glob tree against the directory structure.
pub(crate) fn glob_generator(ctx: &mut QueryContext<'_>) -> u64 {
    let query = ctx.query;
    let Some(tree) = query.glob.as_ref() else {
        return 0;
    };
    let view = ctx.view;
    let base = match &query.relative_root {
        Some(rel) => match view.resolve_dir(rel.root.as_str()) {
            Some(dir) => dir,
            None => return 0,
        },
        None => view.root_dir(),
    };
    let mut walked = 0;
    glob_walk(ctx, tree, base, &tree.roots, &mut walked);
    walked
}

fn glob_walk(
    ctx: &mut QueryContext<'_>,
    tree: &GlobTree,
    dir: DirIndex,
    nodes: &[GlobNode],
    walked: &mut u64,
) {
    let view = ctx.view;
    for node in nodes {
        match &node.token {
            GlobToken::Literal(name) => {
                if node.is_leaf {
                    if let Some(index) = literal_file(view, dir, name, tree.case_sensitive) {
                        *walked += 1;
                        process_file(ctx, index);
                    }
                }
                if !node.children.is_empty() {
                    if let Some(subdir) = literal_subdir(view, dir, name, tree.case_sensitive) {
                        glob_walk(ctx, tree, subdir, &node.children, walked);
                    }
                }
            }
            GlobToken::Pattern { matcher, .. } => {
                if node.is_leaf {
                    for (name, &index) in view.dir(dir).files.iter() {
                        if wildcard_may_match(tree, name.as_str())
                            && matcher.is_match(name.as_str())
                        {
                            *walked += 1;
                            process_file(ctx, index);
                        }
                    }
                }
                if !node.children.is_empty() {
                    for (name, &subdir) in view.dir(dir).subdirs.iter() {
                        if wildcard_may_match(tree, name.as_str())
                            && matcher.is_match(name.as_str())
                        {
                            glob_walk(ctx, tree, subdir, &node.children, walked);
                        }
                    }
                }
            }
            GlobToken::DoubleStar => glob_doublestar(ctx, tree, dir, node, walked),
        }
    }
}

/// `**` matches zero or more directory levels: try the node's tail
/// right here, then against every level below.
fn glob_doublestar(
    ctx: &mut QueryContext<'_>,
    tree: &GlobTree,
    dir: DirIndex,
    node: &GlobNode,
    walked: &mut u64,
) {
    let view = ctx.view;
    if node.is_leaf {
        for (name, &index) in view.dir(dir).files.iter() {
            if wildcard_may_match(tree, name.as_str()) {
                *walked += 1;
                process_file(ctx, index);
            }
        }
    }
    glob_walk(ctx, tree, dir, &node.children, walked);
    for (name, &subdir) in view.dir(dir).subdirs.iter() {
        if wildcard_may_match(tree, name.as_str()) {
            glob_doublestar(ctx, tree, subdir, node, walked);
        }
    }
}

/// Wildcards only match dotfiles when the query opted in; literal
/// segments are unaffected.
fn wildcard_may_match(tree: &GlobTree, name: &str) -> bool {
    tree.include_dotfiles || !name.starts_with('.')
}

fn literal_file(
    view: &InMemoryView,
    dir: DirIndex,
    name: &str,
    case_sensitive: bool,
) -> Option<FileIndex> {
    let node = view.dir(dir);
    let exact = node.files.get(name).copied();
    if case_sensitive || exact.is_some() {
        return exact;
    }
    node.files
        .iter()
        .find(|(key, _)| key.eq_ignore_case(name))
        .map(|(_, &index)| index)
}

fn literal_subdir(
    view: &InMemoryView,
    dir: DirIndex,
    name: &str,
    case_sensitive: bool,
) -> Option<DirIndex> {
    let node = view.dir(dir);
    let exact = node.subdirs.get(name).copied();
    if case_sensitive || exact.is_some() {
        return exact;
    }
    node.subdirs
        .iter()
        .find(|(key, _)| key.eq_ignore_case(name))
        .map(|(_, &index)| index)
}

/// Walks the entire tree depth-first.
pub(crate) fn all_files_generator(ctx: &mut QueryContext<'_>) -> u64 {
    let view = ctx.view;
    let mut walked = 0;
    let mut stack = vec![view.root_dir()];
    while let Some(dir) = stack.pop() {
        for &index in view.dir(dir).files.values() {
            walked += 1;
            process_file(ctx, index);
        }
        stack.extend(view.dir(dir).subdirs.values().copied());
    }
    walked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{parse_query, ClockSpec, QueryOptions, QuerySince, TermRegistry};
    use crate::view::test_support::{observe_file, view_with};
    use serde_json::{json, Value};

    fn parse(spec: Value) -> Query {
        parse_query(&TermRegistry::new(), &spec, &QueryOptions::default()).unwrap()
    }

    fn run(view: &InMemoryView, query: &Query, since: QuerySince) -> Vec<String> {
        let resolver = |_spec: &ClockSpec| QuerySince::fresh_instance();
        let mut ctx = QueryContext::new(query, view, since, 0, &resolver);
        run_selected_generator(&mut ctx);
        let mut names: Vec<String> = ctx.results.iter().map(|m| m.relname.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn time_generator_visits_exactly_the_changed_set() {
        let mut view = view_with(&["a.txt", "b.txt"]);
        let cut = view.most_recent_tick();
        observe_file(&mut view, "c.txt", true);
        observe_file(&mut view, "a.txt", true);

        let query = parse(json!({"since": "c:1:1"}));
        let names = run(&view, &query, QuerySince::at_ticks(cut));
        assert_eq!(names, vec!["a.txt", "c.txt"]);
    }

    #[test]
    fn time_generator_fresh_instance_walks_everything() {
        let view = view_with(&["a.txt", "b.txt"]);
        let query = parse(json!({"since": "c:1:1"}));
        let names = run(&view, &query, QuerySince::fresh_instance());
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn suffix_generator_visits_tombstones_too() {
        let mut view = view_with(&["a.txt", "b.txt", "c.rs"]);
        let index = view.lookup_file("a.txt").unwrap();
        let tick = view.advance_clock();
        view.file_mut(index).exists = false;
        view.mark_file_changed(index, 0, tick);

        let query = parse(json!({"suffix": "txt"}));
        let names = run(&view, &query, QuerySince::fresh_instance());
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn path_generator_depth_semantics() {
        let view = view_with(&["d/x", "d/sub/y", "other.txt"]);

        let unbounded = parse(json!({"path": [{"path": "d", "depth": -1}]}));
        assert_eq!(
            run(&view, &unbounded, QuerySince::fresh_instance()),
            vec!["d/sub", "d/sub/y", "d/x"]
        );

        let only_entry = parse(json!({"path": [{"path": "d", "depth": 0}]}));
        assert_eq!(
            run(&view, &only_entry, QuerySince::fresh_instance()),
            vec!["d"]
        );

        let one_level = parse(json!({"path": [{"path": "d", "depth": 1}]}));
        assert_eq!(
            run(&view, &one_level, QuerySince::fresh_instance()),
            vec!["d/sub", "d/sub/y", "d/x"]
        );
    }

    #[test]
    fn path_generator_emits_plain_files() {
        let view = view_with(&["d/x", "other.txt"]);
        let query = parse(json!({"path": ["other.txt"]}));
        assert_eq!(
            run(&view, &query, QuerySince::fresh_instance()),
            vec!["other.txt"]
        );
    }

    #[test]
    fn glob_generator_doublestar() {
        let view = view_with(&["src/a.c", "src/b.h", "src/sub/c.c", "top.c"]);
        let query = parse(json!({"glob": ["**/*.c"]}));
        assert_eq!(
            run(&view, &query, QuerySince::fresh_instance()),
            // `**` matches zero components at the root.
            vec!["src/a.c", "src/sub/c.c", "top.c"]
        );
    }

    #[test]
    fn glob_generator_literal_and_pattern_segments() {
        let view = view_with(&["src/a.c", "src/sub/c.c", "lib/z.c"]);
        let query = parse(json!({"glob": ["src/*.c"]}));
        assert_eq!(
            run(&view, &query, QuerySince::fresh_instance()),
            vec!["src/a.c"]
        );
    }

    #[test]
    fn glob_wildcards_skip_dotfiles_by_default() {
        let view = view_with(&["src/.hidden.c", "src/a.c"]);
        let query = parse(json!({"glob": ["src/*.c"]}));
        assert_eq!(
            run(&view, &query, QuerySince::fresh_instance()),
            vec!["src/a.c"]
        );

        let opted_in = parse(json!({"glob": ["src/*.c"], "glob_includedotfiles": true}));
        assert_eq!(
            run(&view, &opted_in, QuerySince::fresh_instance()),
            vec!["src/.hidden.c", "src/a.c"]
        );
    }

    #[test]
    fn all_files_generator_covers_the_tree() {
        let view = view_with(&["a", "d/b", "d/e/c"]);
        let query = parse(json!({}));
        let names = run(&view, &query, QuerySince::fresh_instance());
        // Directory entities ride along with plain files.
        assert_eq!(names, vec!["a", "d", "d/b", "d/e", "d/e/c"]);
    }

    #[test]
    fn generators_respect_expressions() {
        let view = view_with(&["src/a.c", "src/b.h"]);
        let query = parse(json!({
            "path": [{"path": "src", "depth": -1}],
            "expression": ["suffix", "c"],
        }));
        assert_eq!(
            run(&view, &query, QuerySince::fresh_instance()),
            vec!["src/a.c"]
        );
    }
}
