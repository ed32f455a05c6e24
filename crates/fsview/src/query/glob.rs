//! Glob tree compilation.
//!
//! Query globs are pre-compiled into a trie of path segments so that
//! shared literal prefixes (`src/a.c`, `src/b.c`) are walked once. Each
//! node is a literal name, a wildcard pattern, or `**`; the generator in
//! the view walks the tree against the directory structure.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{Result, ViewError};

#[derive(Debug)]
pub struct GlobTree {
    pub(crate) roots: Vec<GlobNode>,
    pub(crate) case_sensitive: bool,
    pub(crate) include_dotfiles: bool,
}

#[derive(Debug)]
pub(crate) struct GlobNode {
    pub(crate) token: GlobToken,
    pub(crate) children: Vec<GlobNode>,
    /// A pattern ends here: candidates matched at this node are emitted.
    pub(crate) is_leaf: bool,
}

#[derive(Debug)]
pub(crate) enum GlobToken {
    /// A segment with no special characters; matched by name lookup.
    Literal(String),
    /// A wildcard segment, matched against each child name.
    Pattern { raw: String, matcher: GlobMatcher },
    /// `**`: matches zero or more directory levels.
    DoubleStar,
}

impl GlobToken {
    fn same(&self, other: &GlobToken) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Pattern { raw: a, .. }, Self::Pattern { raw: b, .. }) => a == b,
            (Self::DoubleStar, Self::DoubleStar) => true,
            _ => false,
        }
    }
}

impl GlobTree {
    pub fn compile(
        patterns: &[String],
        case_sensitive: bool,
        include_dotfiles: bool,
    ) -> Result<Self> {
        let mut roots = Vec::new();
        for pattern in patterns {
            let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                return Err(ViewError::Glob(format!(
                    "glob pattern must name at least one segment: {pattern:?}"
                )));
            }
            insert_segments(&mut roots, &segments, case_sensitive)?;
        }
        Ok(Self {
            roots,
            case_sensitive,
            include_dotfiles,
        })
    }
}

fn insert_segments(children: &mut Vec<GlobNode>, segments: &[&str], case_sensitive: bool) -> Result<()> {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    let token = compile_token(first, case_sensitive)?;
    let position = children.iter().position(|node| node.token.same(&token));
    let node = match position {
        Some(index) => &mut children[index],
        None => {
            children.push(GlobNode {
                token,
                children: Vec::new(),
                is_leaf: false,
            });
            children.last_mut().expect("just pushed")
        }
    };
    if rest.is_empty() {
        node.is_leaf = true;
    } else {
        insert_segments(&mut node.children, rest, case_sensitive)?;
    }
    Ok(())
}

fn compile_token(segment: &str, case_sensitive: bool) -> Result<GlobToken> {
    if segment == "**" {
        return Ok(GlobToken::DoubleStar);
    }
    if segment.contains(['*', '?', '[', '{', '\\']) {
        let matcher = GlobBuilder::new(segment)
            .case_insensitive(!case_sensitive)
            .backslash_escape(true)
            .build()
            .map_err(|e| ViewError::Glob(e.to_string()))?
            .compile_matcher();
        return Ok(GlobToken::Pattern {
            raw: segment.to_string(),
            matcher,
        });
    }
    Ok(GlobToken::Literal(segment.to_string()))
}
