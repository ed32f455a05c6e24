//! Query-spec parsing.
//!
//! The JSON-shaped query spec is parsed into an immutable [`Query`].
//! Expression terms are looked up in an explicit [`TermRegistry`] built
//! at startup; there is no hidden registration order.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use globset::GlobBuilder;
use regex::RegexBuilder;
use serde_json::Value;

use crate::error::{Result, ViewError};
use crate::query::clockspec::ClockSpec;
use crate::query::expression::{AllOf, AnyOf, FalseExpr, NotExpr, QueryExpr, TrueExpr};
use crate::query::glob::GlobTree;
use crate::query::terms::{
    DirNameExpr, EmptyExpr, ExistsExpr, IntCompareOp, MatchExpr, NameExpr, NameScope, PcreExpr,
    SinceExpr, SinceField, SizeExpr, SuffixExpr, TypeExpr,
};
use crate::query::{FieldList, Query, QueryPath, RelativeRoot};
use crate::storage::{NodeFileType, PathKey};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Root-level defaults that shape parsing.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// The root's configured case sensitivity; a query may override it
    /// with the `case_sensitive` key.
    pub case_sensitive: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

/// Parsing context threaded through term parsers.
pub struct ParseEnv {
    pub case_sensitive: bool,
}

type TermParser = fn(&TermRegistry, &str, &[Value], &ParseEnv) -> Result<Box<dyn QueryExpr>>;

/// Maps expression term names to their parsers.
pub struct TermRegistry {
    parsers: HashMap<&'static str, TermParser>,
}

impl Default for TermRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TermRegistry {
    pub fn new() -> Self {
        let mut parsers: HashMap<&'static str, TermParser> = HashMap::new();
        parsers.insert("allof", parse_allof);
        parsers.insert("anyof", parse_anyof);
        parsers.insert("not", parse_not);
        parsers.insert("true", parse_true);
        parsers.insert("false", parse_false);
        parsers.insert("suffix", parse_suffix);
        parsers.insert("name", parse_name);
        parsers.insert("iname", parse_name);
        parsers.insert("match", parse_match);
        parsers.insert("imatch", parse_match);
        parsers.insert("type", parse_type);
        parsers.insert("exists", parse_exists);
        parsers.insert("empty", parse_empty);
        parsers.insert("size", parse_size);
        parsers.insert("since", parse_since);
        parsers.insert("dirname", parse_dirname);
        parsers.insert("idirname", parse_dirname);
        parsers.insert("pcre", parse_pcre);
        parsers.insert("ipcre", parse_pcre);
        Self { parsers }
    }

    pub fn parse_term(&self, term: &Value, env: &ParseEnv) -> Result<Box<dyn QueryExpr>> {
        match term {
            Value::String(name) => self.dispatch(name, &[], env),
            Value::Array(items) => {
                let name = items.first().and_then(Value::as_str).ok_or_else(|| {
                    ViewError::parse("expression term array must start with a term name")
                })?;
                self.dispatch(name, &items[1..], env)
            }
            other => Err(ViewError::parse(format!(
                "expression term must be a string or array, got {other}"
            ))),
        }
    }

    fn dispatch(&self, name: &str, args: &[Value], env: &ParseEnv) -> Result<Box<dyn QueryExpr>> {
        let parser = self
            .parsers
            .get(name)
            .ok_or_else(|| ViewError::parse(format!("unknown expression term {name:?}")))?;
        parser(self, name, args, env)
    }
}

/// Parses a JSON query spec into an executable [`Query`].
pub fn parse_query(registry: &TermRegistry, spec: &Value, options: &QueryOptions) -> Result<Query> {
    let spec = spec
        .as_object()
        .ok_or_else(|| ViewError::parse("query spec must be an object"))?;

    let case_sensitive = match spec.get("case_sensitive") {
        Some(value) => value
            .as_bool()
            .ok_or_else(|| ViewError::parse("'case_sensitive' must be a boolean"))?,
        None => options.case_sensitive,
    };
    let env = ParseEnv { case_sensitive };

    let relative_root = match spec.get("relative_root") {
        Some(value) => {
            let text = value
                .as_str()
                .ok_or_else(|| ViewError::parse("'relative_root' must be a string"))?;
            Some(RelativeRoot::new(text))
        }
        None => None,
    };

    let suffixes = match spec.get("suffix") {
        Some(value) => parse_string_or_list(value, "suffix")?
            .into_iter()
            .map(|s| PathKey::from(s.to_ascii_lowercase()))
            .collect(),
        None => Vec::new(),
    };

    let paths = match spec.get("path") {
        Some(value) => parse_paths(value)?,
        None => Vec::new(),
    };

    let glob = match spec.get("glob") {
        Some(value) => {
            let patterns: Vec<String> = parse_string_or_list(value, "glob")?;
            let include_dotfiles = spec
                .get("glob_includedotfiles")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(GlobTree::compile(
                &patterns,
                case_sensitive,
                include_dotfiles,
            )?)
        }
        None => None,
    };

    let since_spec = match spec.get("since") {
        Some(value) => Some(ClockSpec::parse(value)?),
        None => None,
    };

    let expr: Box<dyn QueryExpr> = match spec.get("expression") {
        Some(term) => registry.parse_term(term, &env)?,
        None => Box::new(TrueExpr),
    };

    let fields = FieldList::parse(spec.get("fields"))?;

    let sync_timeout = parse_timeout_ms(spec.get("sync_timeout"), "sync_timeout")?
        .unwrap_or(Duration::ZERO);
    let lock_timeout = parse_timeout_ms(spec.get("lock_timeout"), "lock_timeout")?
        .unwrap_or(DEFAULT_LOCK_TIMEOUT);

    Ok(Query {
        case_sensitive,
        empty_on_fresh_instance: bool_key(spec, "empty_on_fresh_instance")?,
        dedup_results: bool_key(spec, "dedup_results")?,
        relative_root,
        paths,
        glob,
        suffixes,
        since_spec,
        expr,
        fields,
        sync_timeout,
        lock_timeout,
    })
}

fn bool_key(spec: &serde_json::Map<String, Value>, key: &str) -> Result<bool> {
    match spec.get(key) {
        Some(value) => value
            .as_bool()
            .ok_or_else(|| ViewError::parse(format!("'{key}' must be a boolean"))),
        None => Ok(false),
    }
}

fn parse_timeout_ms(value: Option<&Value>, key: &str) -> Result<Option<Duration>> {
    match value {
        Some(value) => {
            let ms = value
                .as_u64()
                .ok_or_else(|| ViewError::parse(format!("'{key}' must be milliseconds")))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        None => Ok(None),
    }
}

fn parse_string_or_list(value: &Value, key: &str) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ViewError::parse(format!("'{key}' entries must be strings"))
                })
            })
            .collect(),
        _ => Err(ViewError::parse(format!(
            "'{key}' must be a string or an array of strings"
        ))),
    }
}

fn parse_paths(value: &Value) -> Result<Vec<QueryPath>> {
    let items = value
        .as_array()
        .ok_or_else(|| ViewError::parse("'path' must be an array"))?;
    items
        .iter()
        .map(|item| match item {
            Value::String(path) => Ok(QueryPath {
                path: path.trim_matches('/').to_string(),
                depth: -1,
            }),
            Value::Object(entry) => {
                let path = entry
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ViewError::parse("'path' entry is missing 'path'"))?;
                let depth = entry
                    .get("depth")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ViewError::parse("'path' entry is missing 'depth'"))?;
                Ok(QueryPath {
                    path: path.trim_matches('/').to_string(),
                    depth,
                })
            }
            _ => Err(ViewError::parse(
                "'path' entries must be strings or {path, depth} objects",
            )),
        })
        .collect()
}

// ---------------------------------------------------------------------
// Term parsers
// ---------------------------------------------------------------------

fn parse_allof(
    registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    if args.is_empty() {
        return Err(ViewError::parse("'allof' needs at least one sub-term"));
    }
    let children = args
        .iter()
        .map(|term| registry.parse_term(term, env))
        .collect::<Result<Vec<_>>>()?;
    Ok(Box::new(AllOf(children)))
}

fn parse_anyof(
    registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    if args.is_empty() {
        return Err(ViewError::parse("'anyof' needs at least one sub-term"));
    }
    let children = args
        .iter()
        .map(|term| registry.parse_term(term, env))
        .collect::<Result<Vec<_>>>()?;
    Ok(Box::new(AnyOf(children)))
}

fn parse_not(
    registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    match args {
        [term] => Ok(Box::new(NotExpr(registry.parse_term(term, env)?))),
        _ => Err(ViewError::parse("'not' takes exactly one sub-term")),
    }
}

fn parse_true(
    _registry: &TermRegistry,
    _name: &str,
    _args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    Ok(Box::new(TrueExpr))
}

fn parse_false(
    _registry: &TermRegistry,
    _name: &str,
    _args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    Ok(Box::new(FalseExpr))
}

fn parse_exists(
    _registry: &TermRegistry,
    _name: &str,
    _args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    Ok(Box::new(ExistsExpr))
}

fn parse_empty(
    _registry: &TermRegistry,
    _name: &str,
    _args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    Ok(Box::new(EmptyExpr))
}

fn parse_suffix(
    _registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let [value] = args else {
        return Err(ViewError::parse("'suffix' takes one string or list"));
    };
    let suffixes = parse_string_or_list(value, "suffix")?
        .into_iter()
        .map(|s| PathKey::from(s.to_ascii_lowercase()))
        .collect::<Vec<_>>();
    if suffixes.is_empty() {
        return Err(ViewError::parse("'suffix' needs at least one suffix"));
    }
    Ok(Box::new(SuffixExpr { suffixes }))
}

fn parse_scope(args: &[Value], position: usize, term: &str) -> Result<NameScope> {
    match args.get(position) {
        None => Ok(NameScope::Basename),
        Some(value) => match value.as_str() {
            Some("basename") => Ok(NameScope::Basename),
            Some("wholename") => Ok(NameScope::Wholename),
            _ => Err(ViewError::parse(format!(
                "'{term}' scope must be \"basename\" or \"wholename\""
            ))),
        },
    }
}

fn parse_name(
    _registry: &TermRegistry,
    name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let value = args
        .first()
        .ok_or_else(|| ViewError::parse(format!("'{name}' takes a name or list of names")))?;
    let case_sensitive = name == "name" && env.case_sensitive;
    let names: HashSet<String> = parse_string_or_list(value, name)?
        .into_iter()
        .map(|n| {
            if case_sensitive {
                n
            } else {
                n.to_ascii_lowercase()
            }
        })
        .collect();
    if names.is_empty() {
        return Err(ViewError::parse(format!("'{name}' needs at least one name")));
    }
    let scope = parse_scope(args, 1, name)?;
    Ok(Box::new(NameExpr {
        names,
        scope,
        case_sensitive,
    }))
}

fn parse_match(
    _registry: &TermRegistry,
    name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let pattern = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ViewError::parse(format!("'{name}' takes a glob pattern")))?;
    let scope = parse_scope(args, 1, name)?;
    let include_dotfiles = args
        .get(2)
        .and_then(Value::as_object)
        .and_then(|opts| opts.get("includedotfiles"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let case_sensitive = name == "match" && env.case_sensitive;
    let matcher = GlobBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .backslash_escape(true)
        .build()
        .map_err(|e| ViewError::Glob(e.to_string()))?
        .compile_matcher();
    Ok(Box::new(MatchExpr {
        matcher,
        scope,
        include_dotfiles,
    }))
}

fn parse_type(
    _registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let kind = match args.first().and_then(Value::as_str) {
        Some("f") => NodeFileType::File,
        Some("d") => NodeFileType::Dir,
        Some("l") => NodeFileType::Symlink,
        Some(other) => {
            return Err(ViewError::parse(format!(
                "'type' does not understand {other:?}"
            )))
        }
        None => return Err(ViewError::parse("'type' takes a type character")),
    };
    Ok(Box::new(TypeExpr { kind }))
}

fn parse_size(
    _registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let [op, operand] = args else {
        return Err(ViewError::parse("'size' takes an operator and an integer"));
    };
    let op = op
        .as_str()
        .and_then(IntCompareOp::parse)
        .ok_or_else(|| ViewError::parse("'size' operator must be eq/ne/gt/ge/lt/le"))?;
    let operand = operand
        .as_i64()
        .ok_or_else(|| ViewError::parse("'size' operand must be an integer"))?;
    Ok(Box::new(SizeExpr { op, operand }))
}

fn parse_since(
    _registry: &TermRegistry,
    _name: &str,
    args: &[Value],
    _env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let spec_value = args
        .first()
        .ok_or_else(|| ViewError::parse("'since' takes a clockspec"))?;
    let spec = ClockSpec::parse(spec_value)?;
    let field = match args.get(1) {
        None => SinceField::OClock,
        Some(value) => value
            .as_str()
            .and_then(SinceField::parse)
            .ok_or_else(|| ViewError::parse("'since' field must be oclock/cclock/mtime/ctime"))?,
    };
    if matches!(field, SinceField::Mtime | SinceField::Ctime)
        && !matches!(spec, ClockSpec::Timestamp(_))
    {
        return Err(ViewError::parse(
            "'since' on mtime/ctime requires a timestamp clockspec",
        ));
    }
    Ok(Box::new(SinceExpr { spec, field }))
}

fn parse_dirname(
    _registry: &TermRegistry,
    name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let path = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ViewError::parse(format!("'{name}' takes a directory path")))?;
    let depth = match args.get(1) {
        None => None,
        Some(Value::Array(depth_spec)) => match depth_spec.as_slice() {
            [Value::String(label), Value::String(op), operand] if label == "depth" => {
                let op = IntCompareOp::parse(op).ok_or_else(|| {
                    ViewError::parse(format!("'{name}' depth operator must be eq/ne/gt/ge/lt/le"))
                })?;
                let operand = operand.as_i64().ok_or_else(|| {
                    ViewError::parse(format!("'{name}' depth operand must be an integer"))
                })?;
                Some((op, operand))
            }
            _ => {
                return Err(ViewError::parse(format!(
                    "'{name}' second argument must be [\"depth\", op, n]"
                )))
            }
        },
        Some(_) => {
            return Err(ViewError::parse(format!(
                "'{name}' second argument must be [\"depth\", op, n]"
            )))
        }
    };
    let case_sensitive = name == "dirname" && env.case_sensitive;
    Ok(Box::new(DirNameExpr {
        path: path.trim_matches('/').to_string(),
        depth,
        case_sensitive,
    }))
}

fn parse_pcre(
    _registry: &TermRegistry,
    name: &str,
    args: &[Value],
    env: &ParseEnv,
) -> Result<Box<dyn QueryExpr>> {
    let pattern = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ViewError::parse(format!("'{name}' takes a pattern")))?;
    let scope = parse_scope(args, 1, name)?;
    let case_insensitive = name == "ipcre" || !env.case_sensitive;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()?;
    Ok(Box::new(PcreExpr { regex, scope }))
}
