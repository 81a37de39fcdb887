//! # Reference Rewriting
//!
//! The reference rewriter substitutes document variables inside a single
//! op's payload. It is the primitive the merger is built on: after two
//! sources are merged, each side's op is relocated by prefixing every
//! reference with that side's base variable.
//!
//! Rewriting is strictly local: only the op at the root is touched, its
//! sources are returned as-is, and the op's variant never changes. Keys that
//! denote *input* fields (selector keys, sort keys, unwind fields, geo-near
//! query keys) follow the same substitution, via the var-then-deref rule;
//! keys that *name outputs* (project shapes, grouped aggregates) stay put.
//!
//! `refs` is the same traversal run with the identity substitution and a
//! collection sink.

use super::op::{
    GeoNearOp, GroupBy, GroupOp, MatchOp, ProjectOp, RedactOp, SortKey, SortOp, UnwindOp,
    WorkflowOp,
};
use crate::expr::{BsonField, DocVar};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

/// The substitution that relocates every reference under `base`.
pub fn prefix_base<'a>(
    arena: &'a Bump,
    base: DocVar<'a>,
) -> impl FnMut(DocVar<'a>) -> Option<DocVar<'a>> {
    move |v| Some(base.concat(arena, v))
}

fn rewrite_key<'a, F>(path: &'a [BsonField<'a>], subst: &mut F) -> Option<&'a [BsonField<'a>]>
where
    F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
{
    subst(DocVar::new(path)).and_then(|v| v.deref())
}

/// Rewrites every document variable in `op`'s payload. Children are left
/// untouched; the variant is preserved.
pub fn rewrite_refs<'a, F>(
    op: &'a WorkflowOp<'a>,
    arena: &'a Bump,
    subst: &mut F,
) -> &'a WorkflowOp<'a>
where
    F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
{
    match op {
        WorkflowOp::Match(m) => arena.alloc(WorkflowOp::Match(MatchOp {
            src: m.src,
            selector: m
                .selector
                .map_fields(arena, &mut |path| rewrite_key(path, subst)),
        })),
        WorkflowOp::Project(p) => arena.alloc(WorkflowOp::Project(ProjectOp {
            src: p.src,
            shape: p.shape.map_vars(arena, subst),
        })),
        WorkflowOp::Redact(r) => arena.alloc(WorkflowOp::Redact(RedactOp {
            src: r.src,
            expr: r.expr.map_vars(arena, subst),
        })),
        WorkflowOp::Unwind(u) => arena.alloc(WorkflowOp::Unwind(UnwindOp {
            src: u.src,
            field: subst(u.field).unwrap_or(u.field),
        })),
        WorkflowOp::Group(g) => arena.alloc(WorkflowOp::Group(GroupOp {
            src: g.src,
            grouped: g.grouped.map_vars(arena, subst),
            by: match g.by {
                GroupBy::Expr(e) => GroupBy::Expr(e.map_vars(arena, subst)),
                GroupBy::Shape(s) => GroupBy::Shape(s.map_vars(arena, subst)),
            },
        })),
        WorkflowOp::Sort(s) => {
            let mut keys = BumpVec::with_capacity_in(s.keys.len(), arena);
            for key in s.keys {
                keys.push(SortKey {
                    field: rewrite_key(key.field, subst).unwrap_or(key.field),
                    dir: key.dir,
                });
            }
            arena.alloc(WorkflowOp::Sort(SortOp {
                src: s.src,
                keys: keys.into_bump_slice(),
            }))
        }
        WorkflowOp::GeoNear(g) => arena.alloc(WorkflowOp::GeoNear(GeoNearOp {
            src: g.src,
            near: g.near,
            dist_field: g.dist_field,
            limit: g.limit,
            query: g
                .query
                .map(|q| q.map_fields(arena, &mut |path| rewrite_key(path, subst))),
            spherical: g.spherical,
        })),
        // No document variables in the payload: literals, collection names,
        // opaque JS functions, counts, and composite source lists.
        WorkflowOp::Pure(_)
        | WorkflowOp::Read(_)
        | WorkflowOp::Skip(_)
        | WorkflowOp::Limit(_)
        | WorkflowOp::Map(_)
        | WorkflowOp::FlatMap(_)
        | WorkflowOp::Reduce(_)
        | WorkflowOp::FoldLeft(_)
        | WorkflowOp::Join(_) => op,
    }
}

/// Every document variable in `op`'s payload, in traversal order. This is
/// the rewriter run with an identity substitution and a collection sink, so
/// the two can never disagree about what counts as a reference.
pub fn refs<'a>(op: &'a WorkflowOp<'a>, arena: &'a Bump) -> Vec<DocVar<'a>> {
    let mut out = Vec::new();
    rewrite_refs(op, arena, &mut |v| {
        out.push(v);
        None
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Condition, ExprOp, Reshape, Selector, ShapeValue};
    use crate::workflow::op::SortDir;

    #[test]
    fn rewrite_is_local_to_the_root_op() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let inner = WorkflowOp::match_op(
            &arena,
            read,
            Selector::field(&arena, "x", Condition::Exists(true)),
        );
        let sort = WorkflowOp::sort(
            &arena,
            inner,
            &[SortKey {
                field: crate::expr::name_path(&arena, "pop"),
                dir: SortDir::Ascending,
            }],
        );

        let base = DocVar::left();
        let rewritten = rewrite_refs(sort, &arena, &mut prefix_base(&arena, base));
        match rewritten {
            WorkflowOp::Sort(s) => {
                assert_eq!(crate::expr::render_path(s.keys[0].field), "lEft.pop");
                // source untouched
                assert_eq!(s.src, inner);
            }
            other => panic!("expected Sort, got {:?}", other),
        }
    }

    #[test]
    fn project_shape_keys_are_not_renamed() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let shape = Reshape::doc_in(
            &arena,
            &[("total", ShapeValue::Expr(ExprOp::field(&arena, "pop")))],
        );
        let proj = WorkflowOp::project(&arena, read, shape);

        let rewritten = rewrite_refs(proj, &arena, &mut prefix_base(&arena, DocVar::right()));
        match rewritten {
            WorkflowOp::Project(p) => {
                let leaves = p.shape.get_all();
                assert_eq!(leaves[0].0, vec![crate::expr::BsonField::Name("total")]);
                match leaves[0].1 {
                    ExprOp::Var(v) => assert_eq!(v.to_string(), "ROOT.rIght.pop"),
                    ref other => panic!("expected var, got {:?}", other),
                }
            }
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn refs_lists_payload_vars_in_traversal_order() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let sort = WorkflowOp::sort(
            &arena,
            read,
            &[
                SortKey {
                    field: crate::expr::name_path(&arena, "pop"),
                    dir: SortDir::Ascending,
                },
                SortKey {
                    field: crate::expr::name_path(&arena, "city"),
                    dir: SortDir::Ascending,
                },
            ],
        );
        let vars: Vec<String> = refs(sort, &arena).iter().map(|v| v.to_string()).collect();
        assert_eq!(vars, vec!["ROOT.pop", "ROOT.city"]);
    }
}
