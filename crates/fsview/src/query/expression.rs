//! The expression tree: boolean predicates evaluated per candidate file.

use std::fmt;

use crate::query::context::QueryContext;
use crate::storage::FileNode;

/// One node of a query expression.
///
/// `evaluate` may lazily compute the wholename through the context and
/// must not mutate the tree; it observes the snapshot held under the
/// shared lock.
pub trait QueryExpr: fmt::Debug + Send + Sync {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool;
}

/// Matches when every sub-expression matches. Short-circuits.
#[derive(Debug)]
pub struct AllOf(pub Vec<Box<dyn QueryExpr>>);

impl QueryExpr for AllOf {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        self.0.iter().all(|expr| expr.evaluate(ctx, file))
    }
}

/// Matches when any sub-expression matches. Short-circuits.
#[derive(Debug)]
pub struct AnyOf(pub Vec<Box<dyn QueryExpr>>);

impl QueryExpr for AnyOf {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        self.0.iter().any(|expr| expr.evaluate(ctx, file))
    }
}

#[derive(Debug)]
pub struct NotExpr(pub Box<dyn QueryExpr>);

impl QueryExpr for NotExpr {
    fn evaluate(&self, ctx: &mut QueryContext<'_>, file: &FileNode) -> bool {
        !self.0.evaluate(ctx, file)
    }
}

#[derive(Debug)]
pub struct TrueExpr;

impl QueryExpr for TrueExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, _file: &FileNode) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct FalseExpr;

impl QueryExpr for FalseExpr {
    fn evaluate(&self, _ctx: &mut QueryContext<'_>, _file: &FileNode) -> bool {
        false
    }
}
