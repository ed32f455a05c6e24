//! Leaf expression terms.
//!
//! Each leaf consults either the candidate file's attributes or the
//! query context's since field.

use std::collections::HashSet;

use globset::GlobMatcher;
use regex::Regex;

use crate::query::clockspec::{ClockSpec, SinceMode};
use crate::query::context::QueryContext;
use crate::query::expression::QueryExpr;
use crate::storage::{FileNode, NodeFileType, PathKey};

/// Integer comparison operators used by the `size` and `dirname` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl IntCompareOp {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }

    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

/// Which name a name-shaped term inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    Basename,
    Wholename,
}

/// `["suffix", "txt"]`: the lowercased extension is in the given set.
#[derive(Debug)]
pub struct SuffixExpr {
    pub suffixes: Vec<PathKey>,
}

impl QueryExpr for SuffixExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        match PathKey::suffix_of(file.name.as_str()) {
            Some(suffix) => self.suffixes.iter().any(|s| *s == suffix),
            None => false,
        }
    }
}

/// `["name", ...]` / `["iname", ...]`: exact (in)sensitive name match.
/// Names are pre-folded at parse time for the insensitive variant.
#[derive(Debug)]
pub struct NameExpr {
    pub names: HashSet<String>,
    pub scope: NameScope,
    pub case_sensitive: bool,
}

impl QueryExpr for NameExpr {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        let subject = match self.scope {
            NameScope::Basename => file.name.to_string(),
            NameScope::Wholename => ctx.current_wholename().to_string(),
        };
        if self.case_sensitive {
            self.names.contains(&subject)
        } else {
            self.names.contains(&subject.to_ascii_lowercase())
        }
    }
}

/// `["match", "*.c"]` / `["imatch", ...]`: wildmatch-style glob.
/// Case handling is baked into the compiled matcher.
#[derive(Debug)]
pub struct MatchExpr {
    pub matcher: GlobMatcher,
    pub scope: NameScope,
    pub include_dotfiles: bool,
}

impl QueryExpr for MatchExpr {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        if !self.include_dotfiles && file.name.as_str().starts_with('.') {
            return false;
        }
        let subject = match self.scope {
            NameScope::Basename => file.name.to_string(),
            NameScope::Wholename => ctx.current_wholename().to_string(),
        };
        self.matcher.is_match(subject.as_str())
    }
}

/// `["type", "f"]`: file type check.
#[derive(Debug)]
pub struct TypeExpr {
    pub kind: NodeFileType,
}

impl QueryExpr for TypeExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        file.stat.file_type == self.kind
    }
}

/// `"exists"`: present on disk at last stat.
#[derive(Debug)]
pub struct ExistsExpr;

impl QueryExpr for ExistsExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        file.exists
    }
}

/// `"empty"`: an existing, zero-length regular file.
#[derive(Debug)]
pub struct EmptyExpr;

impl QueryExpr for EmptyExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        file.exists && file.stat.file_type == NodeFileType::File && file.stat.size == 0
    }
}

/// `["size", "gt", 4096]`.
#[derive(Debug)]
pub struct SizeExpr {
    pub op: IntCompareOp,
    pub operand: i64,
}

impl QueryExpr for SizeExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        // Tombstones carry a stale size; size only means something for
        // files that are still on disk.
        file.exists && self.op.eval(file.stat.size as i64, self.operand)
    }
}

/// Which clock or stat field a `since` term compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinceField {
    OClock,
    CClock,
    Mtime,
    Ctime,
}

impl SinceField {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "oclock" => Some(Self::OClock),
            "cclock" => Some(Self::CClock),
            "mtime" => Some(Self::Mtime),
            "ctime" => Some(Self::Ctime),
            _ => None,
        }
    }
}

/// `["since", <clockspec>, <field>?]`: observed (or created, or
/// stat-timed) since the given point. Clock-form specs are resolved at
/// evaluation time against the live root.
#[derive(Debug)]
pub struct SinceExpr {
    pub spec: ClockSpec,
    pub field: SinceField,
}

impl QueryExpr for SinceExpr {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        match self.field {
            SinceField::OClock | SinceField::CClock => {
                let stamp = if self.field == SinceField::OClock {
                    file.otime
                } else {
                    file.cclock
                };
                let since = ctx.resolve_clock(&self.spec);
                match since.mode {
                    SinceMode::Ticks {
                        ticks,
                        fresh_instance,
                    } => fresh_instance || stamp.tick > ticks,
                    SinceMode::Timestamp(cut) => stamp.timestamp >= cut,
                }
            }
            SinceField::Mtime => match self.spec {
                ClockSpec::Timestamp(cut) => file.exists && file.stat.mtime >= cut,
                _ => false,
            },
            SinceField::Ctime => match self.spec {
                ClockSpec::Timestamp(cut) => file.exists && file.stat.ctime >= cut,
                _ => false,
            },
        }
    }
}

/// `["dirname", "foo"]`: the file lies under the named directory, with
/// an optional depth constraint (default: any depth at or below it).
#[derive(Debug)]
pub struct DirNameExpr {
    pub path: String,
    pub depth: Option<(IntCompareOp, i64)>,
    pub case_sensitive: bool,
}

impl QueryExpr for DirNameExpr {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, _file: &FileNode) -> bool {
        let wholename = ctx.current_wholename();
        let dirname = match wholename.as_str().rfind('/') {
            Some(slash) => &wholename.as_str()[..slash],
            None => "",
        };

        let within = if self.path.is_empty() {
            true
        } else if self.case_sensitive {
            dirname == self.path
                || (dirname.len() > self.path.len()
                    && dirname.as_bytes()[self.path.len()] == b'/'
                    && dirname[..self.path.len()] == self.path)
        } else {
            dirname.eq_ignore_ascii_case(&self.path)
                || (dirname.len() > self.path.len()
                    && dirname.as_bytes()[self.path.len()] == b'/'
                    && dirname[..self.path.len()].eq_ignore_ascii_case(&self.path))
        };
        if !within {
            return false;
        }

        match self.depth {
            None => true,
            Some((op, operand)) => {
                let base_depth = if self.path.is_empty() {
                    0
                } else {
                    self.path.split('/').count() as i64
                };
                let dir_depth = if dirname.is_empty() {
                    0
                } else {
                    dirname.split('/').count() as i64
                };
                op.eval(dir_depth - base_depth, operand)
            }
        }
    }
}

/// `["pcre", "pattern"]` / `["ipcre", ...]`: regular expression match.
#[derive(Debug)]
pub struct PcreExpr {
    pub regex: Regex,
    pub scope: NameScope,
}

impl QueryExpr for PcreExpr {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        let subject = match self.scope {
            NameScope::Basename => file.name.to_string(),
            NameScope::Wholename => ctx.current_wholename().to_string(),
        };
        self.regex.is_match(&subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_compare_ops() {
        assert!(IntCompareOp::Eq.eval(3, 3));
        assert!(IntCompareOp::Ne.eval(3, 4));
        assert!(IntCompareOp::Gt.eval(4, 3));
        assert!(IntCompareOp::Ge.eval(3, 3));
        assert!(IntCompareOp::Lt.eval(2, 3));
        assert!(IntCompareOp::Le.eval(3, 3));
        assert!(!IntCompareOp::Gt.eval(3, 3));
        assert_eq!(IntCompareOp::parse("ge"), Some(IntCompareOp::Ge));
        assert_eq!(IntCompareOp::parse("gte"), None);
    }
}
