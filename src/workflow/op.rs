//! # Workflow Operations
//!
//! This module defines the operation algebra of the planner. A `WorkflowOp`
//! is a node in a DAG of atomic query operations; the planner normalizes the
//! graph (coalesce, prune), combines independently built graphs (merge), and
//! finally lowers it to engine tasks (crush).
//!
//! ## Operator Categories
//!
//! Every variant belongs to exactly one category:
//!
//! | Category | Variants | Notes |
//! |----------|----------|-------|
//! | Source | Pure, Read | no sources |
//! | Shape-preserving | Match, Limit, Skip | never alter document shape |
//! | Pipeline | the above plus Project, Redact, Unwind, Group, Sort, GeoNear | expressible as native pipeline stages |
//! | Map/reduce | Map, FlatMap, Reduce | carry JS functions, lower to jobs |
//! | Composite | FoldLeft, Join | multiple sources |
//!
//! Shape-preserving ops are a subset of pipeline ops.
//!
//! ## Memory Model
//!
//! Ops are immutable values allocated in a planning arena, linked with `&'a`
//! references. A rewrite allocates new nodes; shared sources stay shared.
//! The algebra never observes pointer identity except through structural
//! equality.

use crate::bson::Bson;
use crate::expr::{BsonField, DocVar, ExprOp, Grouped, Reshape, Selector};
use crate::js::JsExpr;
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOp<'a> {
    Pure(PureOp<'a>),
    Read(ReadOp<'a>),
    Match(MatchOp<'a>),
    Project(ProjectOp<'a>),
    Redact(RedactOp<'a>),
    Unwind(UnwindOp<'a>),
    Group(GroupOp<'a>),
    Sort(SortOp<'a>),
    Skip(SkipOp<'a>),
    Limit(LimitOp<'a>),
    GeoNear(GeoNearOp<'a>),
    Map(MapOp<'a>),
    FlatMap(FlatMapOp<'a>),
    Reduce(ReduceOp<'a>),
    FoldLeft(FoldLeftOp<'a>),
    Join(JoinOp<'a>),
    // An Out op (write results to a named collection) belongs here once its
    // forking semantics is settled: single terminal output, or tee into the
    // collection and keep streaming? Left unimplemented rather than guessed.
    // Out(OutOp<'a>),
}

/// An inline literal document.
#[derive(Debug, Clone, PartialEq)]
pub struct PureOp<'a> {
    pub value: Bson<'a>,
}

/// A named collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOp<'a> {
    pub collection: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub selector: Selector<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub shape: Reshape<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedactOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub expr: ExprOp<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub field: DocVar<'a>,
}

/// How a `Group` partitions its input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupBy<'a> {
    Expr(ExprOp<'a>),
    Shape(Reshape<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub grouped: Grouped<'a>,
    pub by: GroupBy<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey<'a> {
    pub field: &'a [BsonField<'a>],
    pub dir: SortDir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub keys: &'a [SortKey<'a>],
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkipOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoNearOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub near: (f64, f64),
    pub dist_field: &'a [BsonField<'a>],
    pub limit: Option<i64>,
    pub query: Option<Selector<'a>>,
    pub spherical: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub func: JsExpr<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatMapOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub func: JsExpr<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOp<'a> {
    pub src: &'a WorkflowOp<'a>,
    pub func: JsExpr<'a>,
}

/// Sequentially folds the outputs of its sources into one result set. The
/// source list is non-empty by construction (see [`WorkflowOp::fold_left`]).
#[derive(Debug, Clone, PartialEq)]
pub struct FoldLeftOp<'a> {
    pub srcs: &'a [&'a WorkflowOp<'a>],
}

/// Combines independent sources.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOp<'a> {
    pub srcs: &'a [&'a WorkflowOp<'a>],
}

impl<'a> WorkflowOp<'a> {
    pub fn pure(arena: &'a Bump, value: Bson<'a>) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Pure(PureOp { value }))
    }

    pub fn read(arena: &'a Bump, collection: &'a str) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Read(ReadOp { collection }))
    }

    pub fn match_op(
        arena: &'a Bump,
        src: &'a WorkflowOp<'a>,
        selector: Selector<'a>,
    ) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Match(MatchOp { src, selector }))
    }

    pub fn project(
        arena: &'a Bump,
        src: &'a WorkflowOp<'a>,
        shape: Reshape<'a>,
    ) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Project(ProjectOp { src, shape }))
    }

    pub fn redact(
        arena: &'a Bump,
        src: &'a WorkflowOp<'a>,
        expr: ExprOp<'a>,
    ) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Redact(RedactOp { src, expr }))
    }

    pub fn unwind(arena: &'a Bump, src: &'a WorkflowOp<'a>, field: DocVar<'a>) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Unwind(UnwindOp { src, field }))
    }

    pub fn group(
        arena: &'a Bump,
        src: &'a WorkflowOp<'a>,
        grouped: Grouped<'a>,
        by: GroupBy<'a>,
    ) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Group(GroupOp { src, grouped, by }))
    }

    pub fn sort(
        arena: &'a Bump,
        src: &'a WorkflowOp<'a>,
        keys: &[SortKey<'a>],
    ) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Sort(SortOp {
            src,
            keys: arena.alloc_slice_copy(keys),
        }))
    }

    pub fn skip(arena: &'a Bump, src: &'a WorkflowOp<'a>, count: i64) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Skip(SkipOp { src, count }))
    }

    pub fn limit(arena: &'a Bump, src: &'a WorkflowOp<'a>, count: i64) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Limit(LimitOp { src, count }))
    }

    pub fn map(arena: &'a Bump, src: &'a WorkflowOp<'a>, func: JsExpr<'a>) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Map(MapOp { src, func }))
    }

    pub fn flat_map(
        arena: &'a Bump,
        src: &'a WorkflowOp<'a>,
        func: JsExpr<'a>,
    ) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::FlatMap(FlatMapOp { src, func }))
    }

    pub fn reduce(arena: &'a Bump, src: &'a WorkflowOp<'a>, func: JsExpr<'a>) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Reduce(ReduceOp { src, func }))
    }

    /// Builds a fold-left; taking the head separately keeps the source list
    /// non-empty by construction.
    pub fn fold_left(
        arena: &'a Bump,
        head: &'a WorkflowOp<'a>,
        tail: &[&'a WorkflowOp<'a>],
    ) -> &'a WorkflowOp<'a> {
        let mut srcs = BumpVec::with_capacity_in(tail.len() + 1, arena);
        srcs.push(head);
        srcs.extend_from_slice(tail);
        arena.alloc(WorkflowOp::FoldLeft(FoldLeftOp {
            srcs: srcs.into_bump_slice(),
        }))
    }

    pub fn join(arena: &'a Bump, srcs: &[&'a WorkflowOp<'a>]) -> &'a WorkflowOp<'a> {
        arena.alloc(WorkflowOp::Join(JoinOp {
            srcs: arena.alloc_slice_copy(srcs),
        }))
    }

    /// Source ops have no inputs.
    pub fn is_source(&self) -> bool {
        matches!(self, WorkflowOp::Pure(_) | WorkflowOp::Read(_))
    }

    /// Shape-preserving ops pass their input documents through unchanged.
    pub fn is_shape_preserving(&self) -> bool {
        matches!(
            self,
            WorkflowOp::Match(_) | WorkflowOp::Limit(_) | WorkflowOp::Skip(_)
        )
    }

    /// Pipeline ops are expressible as native pipeline stages.
    pub fn is_pipeline(&self) -> bool {
        matches!(
            self,
            WorkflowOp::Match(_)
                | WorkflowOp::Project(_)
                | WorkflowOp::Redact(_)
                | WorkflowOp::Unwind(_)
                | WorkflowOp::Group(_)
                | WorkflowOp::Sort(_)
                | WorkflowOp::Skip(_)
                | WorkflowOp::Limit(_)
                | WorkflowOp::GeoNear(_)
        )
    }

    /// Pipeline ops whose output keeps every input field path addressable.
    /// Project and Group define a new document shape; everything else in the
    /// pipeline family leaves existing paths valid.
    pub fn is_path_stable(&self) -> bool {
        self.is_pipeline() && !matches!(self, WorkflowOp::Project(_) | WorkflowOp::Group(_))
    }

    /// The single input of a one-source op.
    pub fn single_source(&self) -> Option<&'a WorkflowOp<'a>> {
        match self {
            WorkflowOp::Match(op) => Some(op.src),
            WorkflowOp::Project(op) => Some(op.src),
            WorkflowOp::Redact(op) => Some(op.src),
            WorkflowOp::Unwind(op) => Some(op.src),
            WorkflowOp::Group(op) => Some(op.src),
            WorkflowOp::Sort(op) => Some(op.src),
            WorkflowOp::Skip(op) => Some(op.src),
            WorkflowOp::Limit(op) => Some(op.src),
            WorkflowOp::GeoNear(op) => Some(op.src),
            WorkflowOp::Map(op) => Some(op.src),
            WorkflowOp::FlatMap(op) => Some(op.src),
            WorkflowOp::Reduce(op) => Some(op.src),
            WorkflowOp::Pure(_)
            | WorkflowOp::Read(_)
            | WorkflowOp::FoldLeft(_)
            | WorkflowOp::Join(_) => None,
        }
    }

    /// The same op over a new source. Sources and composites are returned
    /// unchanged.
    pub fn reparent(&self, arena: &'a Bump, src: &'a WorkflowOp<'a>) -> &'a WorkflowOp<'a> {
        match self {
            WorkflowOp::Match(op) => arena.alloc(WorkflowOp::Match(MatchOp {
                src,
                selector: op.selector,
            })),
            WorkflowOp::Project(op) => arena.alloc(WorkflowOp::Project(ProjectOp {
                src,
                shape: op.shape,
            })),
            WorkflowOp::Redact(op) => arena.alloc(WorkflowOp::Redact(RedactOp {
                src,
                expr: op.expr,
            })),
            WorkflowOp::Unwind(op) => arena.alloc(WorkflowOp::Unwind(UnwindOp {
                src,
                field: op.field,
            })),
            WorkflowOp::Group(op) => arena.alloc(WorkflowOp::Group(GroupOp {
                src,
                grouped: op.grouped,
                by: op.by,
            })),
            WorkflowOp::Sort(op) => arena.alloc(WorkflowOp::Sort(SortOp { src, keys: op.keys })),
            WorkflowOp::Skip(op) => arena.alloc(WorkflowOp::Skip(SkipOp {
                src,
                count: op.count,
            })),
            WorkflowOp::Limit(op) => arena.alloc(WorkflowOp::Limit(LimitOp {
                src,
                count: op.count,
            })),
            WorkflowOp::GeoNear(op) => arena.alloc(WorkflowOp::GeoNear(GeoNearOp {
                src,
                near: op.near,
                dist_field: op.dist_field,
                limit: op.limit,
                query: op.query,
                spherical: op.spherical,
            })),
            WorkflowOp::Map(op) => arena.alloc(WorkflowOp::Map(MapOp { src, func: op.func })),
            WorkflowOp::FlatMap(op) => {
                arena.alloc(WorkflowOp::FlatMap(FlatMapOp { src, func: op.func }))
            }
            WorkflowOp::Reduce(op) => {
                arena.alloc(WorkflowOp::Reduce(ReduceOp { src, func: op.func }))
            }
            WorkflowOp::Pure(_)
            | WorkflowOp::Read(_)
            | WorkflowOp::FoldLeft(_)
            | WorkflowOp::Join(_) => arena.alloc(self.clone()),
        }
    }

    /// Counts the ops in the graph, revisiting shared sources. Used by tests
    /// to check that coalescing never grows a plan.
    pub fn op_count(&self) -> usize {
        match self {
            WorkflowOp::FoldLeft(op) => 1 + op.srcs.iter().map(|s| s.op_count()).sum::<usize>(),
            WorkflowOp::Join(op) => 1 + op.srcs.iter().map(|s| s.op_count()).sum::<usize>(),
            other => 1 + other.single_source().map_or(0, |s| s.op_count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Condition;
    use crate::bson::Bson;

    #[test]
    fn shape_preserving_is_a_subset_of_pipeline() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let ops = [
            WorkflowOp::match_op(&arena, read, Selector::everything()),
            WorkflowOp::limit(&arena, read, 1),
            WorkflowOp::skip(&arena, read, 1),
            WorkflowOp::sort(
                &arena,
                read,
                &[SortKey {
                    field: crate::expr::name_path(&arena, "x"),
                    dir: SortDir::Ascending,
                }],
            ),
            WorkflowOp::project(&arena, read, Reshape::empty_doc()),
        ];
        for op in &ops {
            if op.is_shape_preserving() {
                assert!(op.is_pipeline(), "{:?} SHOULD be a pipeline op", op);
            }
        }
    }

    #[test]
    fn sources_have_no_single_source() {
        let arena = Bump::new();
        assert!(WorkflowOp::read(&arena, "c").single_source().is_none());
        assert!(WorkflowOp::pure(&arena, Bson::Null).single_source().is_none());
    }

    #[test]
    fn reparent_preserves_payload() {
        let arena = Bump::new();
        let read_a = WorkflowOp::read(&arena, "a");
        let read_b = WorkflowOp::read(&arena, "b");
        let m = WorkflowOp::match_op(
            &arena,
            read_a,
            Selector::field(&arena, "x", Condition::Exists(true)),
        );
        let moved = m.reparent(&arena, read_b);
        match moved {
            WorkflowOp::Match(op) => {
                assert_eq!(op.src, read_b);
                match m {
                    WorkflowOp::Match(orig) => assert_eq!(op.selector, orig.selector),
                    _ => unreachable!(),
                }
            }
            other => panic!("expected Match, got {:?}", other),
        }
    }
}
