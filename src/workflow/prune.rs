//! # Dead-Field Elimination
//!
//! Removes fields no downstream op reads. The pass walks the graph from the
//! root carrying the set of references some downstream op still needs; at
//! each shape-defining op (`Project`, `Group`) every defined field that is
//! neither a prefix nor an extension of a needed reference is dropped.
//!
//! The used set is an `Option`: `None` means "anything may be read" and
//! disables pruning at that node. The initial call passes `None` (nothing is
//! known about the plan's consumer), and JS-bearing ops pass `None` down —
//! their function bodies are opaque, so their source must conservatively
//! keep everything. Pruning resumes at the next `Project`/`Group` boundary,
//! which knows exactly what it reads regardless of what reaches it.

use super::op::{FoldLeftOp, GroupOp, JoinOp, ProjectOp, WorkflowOp};
use super::refs::refs;
use crate::expr::{BsonField, DocVar};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use hashbrown::HashSet;

/// References some downstream op reads from the current op's output.
pub type UsedSet<'a> = HashSet<DocVar<'a>>;

fn is_needed<'a>(path: &[BsonField<'a>], used: &UsedSet<'a>) -> bool {
    used.iter().any(|u| {
        let up = u.path();
        path.starts_with(up) || up.starts_with(path)
    })
}

/// Rewrites `op` with every provably unread defined field removed,
/// recursively. `used` is the set of references read downstream of `op`;
/// `None` disables pruning at this node.
pub fn prune<'a>(
    op: &'a WorkflowOp<'a>,
    used: Option<&UsedSet<'a>>,
    arena: &'a Bump,
) -> &'a WorkflowOp<'a> {
    match op {
        WorkflowOp::Pure(_) | WorkflowOp::Read(_) => op,

        WorkflowOp::Project(p) => {
            let shape = match used {
                Some(u) if !u.is_empty() => p.shape.retain_leaves(arena, &|path| is_needed(path, u)),
                _ => p.shape,
            };
            let this: &'a WorkflowOp<'a> = if shape == p.shape {
                op
            } else {
                arena.alloc(WorkflowOp::Project(ProjectOp { src: p.src, shape }))
            };
            // The project reads exactly its own references, whatever
            // reaches it from above.
            let child: UsedSet<'a> = refs(this, arena).into_iter().collect();
            reparent_pruned(this, p.src, prune(p.src, Some(&child), arena), arena)
        }

        WorkflowOp::Group(g) => {
            let this: &'a WorkflowOp<'a> = match used {
                Some(u) if !u.is_empty() => {
                    let mut kept = BumpVec::with_capacity_in(g.grouped.len(), arena);
                    for &(name, acc) in g.grouped.0 {
                        if is_needed(&[BsonField::Name(name)], u) {
                            kept.push((name, acc));
                        }
                    }
                    if kept.len() == g.grouped.len() {
                        op
                    } else {
                        arena.alloc(WorkflowOp::Group(GroupOp {
                            src: g.src,
                            grouped: crate::expr::Grouped(kept.into_bump_slice()),
                            by: g.by,
                        }))
                    }
                }
                _ => op,
            };
            let child: UsedSet<'a> = refs(this, arena).into_iter().collect();
            reparent_pruned(this, g.src, prune(g.src, Some(&child), arena), arena)
        }

        // Unwinding cannot credit its own field as used; the incoming set
        // passes through untouched.
        WorkflowOp::Unwind(u) => {
            reparent_pruned(op, u.src, prune(u.src, used, arena), arena)
        }

        // Opaque JS: the source must assume all of its fields are read.
        WorkflowOp::Map(m) => reparent_pruned(op, m.src, prune(m.src, None, arena), arena),
        WorkflowOp::FlatMap(m) => reparent_pruned(op, m.src, prune(m.src, None, arena), arena),
        WorkflowOp::Reduce(r) => reparent_pruned(op, r.src, prune(r.src, None, arena), arena),

        WorkflowOp::FoldLeft(f) => {
            let mut srcs = BumpVec::with_capacity_in(f.srcs.len(), arena);
            let mut changed = false;
            for s in f.srcs {
                let pruned = prune(s, None, arena);
                changed |= !std::ptr::eq(*s, pruned);
                srcs.push(pruned);
            }
            if changed {
                arena.alloc(WorkflowOp::FoldLeft(FoldLeftOp {
                    srcs: srcs.into_bump_slice(),
                }))
            } else {
                op
            }
        }

        WorkflowOp::Join(j) => {
            let mut srcs = BumpVec::with_capacity_in(j.srcs.len(), arena);
            let mut changed = false;
            for s in j.srcs {
                let pruned = prune(s, None, arena);
                changed |= !std::ptr::eq(*s, pruned);
                srcs.push(pruned);
            }
            if changed {
                arena.alloc(WorkflowOp::Join(JoinOp {
                    srcs: srcs.into_bump_slice(),
                }))
            } else {
                op
            }
        }

        // Pass-through ops: whatever is read downstream flows through, plus
        // whatever the op itself reads.
        WorkflowOp::Match(m) => pass_through(op, m.src, used, arena),
        WorkflowOp::Sort(s) => pass_through(op, s.src, used, arena),
        WorkflowOp::Skip(s) => pass_through(op, s.src, used, arena),
        WorkflowOp::Limit(l) => pass_through(op, l.src, used, arena),
        WorkflowOp::Redact(r) => pass_through(op, r.src, used, arena),
        WorkflowOp::GeoNear(g) => pass_through(op, g.src, used, arena),
    }
}

fn pass_through<'a>(
    op: &'a WorkflowOp<'a>,
    src: &'a WorkflowOp<'a>,
    used: Option<&UsedSet<'a>>,
    arena: &'a Bump,
) -> &'a WorkflowOp<'a> {
    let child = used.map(|u| {
        let mut set = u.clone();
        set.extend(refs(op, arena));
        set
    });
    reparent_pruned(op, src, prune(src, child.as_ref(), arena), arena)
}

fn reparent_pruned<'a>(
    op: &'a WorkflowOp<'a>,
    old: &'a WorkflowOp<'a>,
    new: &'a WorkflowOp<'a>,
    arena: &'a Bump,
) -> &'a WorkflowOp<'a> {
    if std::ptr::eq(old, new) {
        op
    } else {
        op.reparent(arena, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Accumulator, ExprOp, Grouped, Reshape, ShapeValue};
    use crate::js::JsExpr;
    use crate::workflow::op::GroupBy;

    fn used<'a>(vars: &[DocVar<'a>]) -> UsedSet<'a> {
        vars.iter().copied().collect()
    }

    #[test]
    fn project_drops_fields_nothing_reads() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let shape = Reshape::doc_in(
            &arena,
            &[
                ("keep", ShapeValue::Expr(ExprOp::field(&arena, "x"))),
                ("drop", ShapeValue::Expr(ExprOp::field(&arena, "y"))),
            ],
        );
        let proj = WorkflowOp::project(&arena, read, shape);
        let u = used(&[DocVar::field(&arena, "keep")]);
        let pruned = prune(proj, Some(&u), &arena);
        let expected = WorkflowOp::project(
            &arena,
            read,
            Reshape::doc_in(&arena, &[("keep", ShapeValue::Expr(ExprOp::field(&arena, "x")))]),
        );
        assert_eq!(pruned, expected);
    }

    #[test]
    fn prefixes_and_extensions_of_used_refs_survive() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let nested = Reshape::doc_in(
            &arena,
            &[("city", ShapeValue::Expr(ExprOp::field(&arena, "x")))],
        );
        let shape = Reshape::doc_in(
            &arena,
            &[("loc", ShapeValue::Shape(arena.alloc(nested)))],
        );
        let proj = WorkflowOp::project(&arena, read, shape);
        // A downstream reader of the whole `loc` document keeps its leaves.
        let u = used(&[DocVar::field(&arena, "loc")]);
        let pruned = prune(proj, Some(&u), &arena);
        assert_eq!(pruned, proj);
    }

    #[test]
    fn root_call_prunes_nothing() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let shape = Reshape::doc_in(
            &arena,
            &[("a", ShapeValue::Expr(ExprOp::field(&arena, "x")))],
        );
        let proj = WorkflowOp::project(&arena, read, shape);
        assert_eq!(prune(proj, None, &arena), proj);
    }

    #[test]
    fn group_entries_unused_downstream_are_removed() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let grouped = Grouped::new_in(
            &arena,
            &[
                ("n", Accumulator::Sum(arena.alloc(ExprOp::Literal(crate::bson::Bson::Int32(1))))),
                ("m", Accumulator::Push(arena.alloc(ExprOp::field(&arena, "x")))),
            ],
        );
        let group = WorkflowOp::group(
            &arena,
            read,
            grouped,
            GroupBy::Expr(ExprOp::field(&arena, "s")),
        );
        let u = used(&[DocVar::field(&arena, "n")]);
        let pruned = prune(group, Some(&u), &arena);
        match pruned {
            WorkflowOp::Group(g) => {
                assert_eq!(g.grouped.len(), 1);
                assert_eq!(g.grouped.keys().next(), Some("n"));
            }
            other => panic!("expected Group, got {:?}", other),
        }
    }

    #[test]
    fn opaque_js_ops_disable_pruning_below() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let shape = Reshape::doc_in(
            &arena,
            &[
                ("a", ShapeValue::Expr(ExprOp::field(&arena, "x"))),
                ("b", ShapeValue::Expr(ExprOp::field(&arena, "y"))),
            ],
        );
        let proj = WorkflowOp::project(&arena, read, shape);
        let mapped = WorkflowOp::map(&arena, proj, JsExpr::Raw("function(k) { return [k, this]; }"));
        let u = used(&[DocVar::field(&arena, "whatever")]);
        // The map is opaque: the project below keeps both fields.
        assert_eq!(prune(mapped, Some(&u), &arena), mapped);
    }

    #[test]
    fn unwind_forwards_used_set_unchanged() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let shape = Reshape::doc_in(
            &arena,
            &[
                ("tags", ShapeValue::Expr(ExprOp::field(&arena, "tags"))),
                ("extra", ShapeValue::Expr(ExprOp::field(&arena, "y"))),
            ],
        );
        let proj = WorkflowOp::project(&arena, read, shape);
        let unwound = WorkflowOp::unwind(&arena, proj, DocVar::field(&arena, "tags"));
        // Only `extra` is read downstream; the unwind does not credit its
        // own field, so `tags` is dropped below it.
        let u = used(&[DocVar::field(&arena, "extra")]);
        let pruned = prune(unwound, Some(&u), &arena);
        match pruned {
            WorkflowOp::Unwind(uw) => match uw.src {
                WorkflowOp::Project(p) => {
                    let keys: Vec<_> = p.shape.get_all().into_iter().map(|(k, _)| k).collect();
                    assert_eq!(keys, vec![vec![BsonField::Name("extra")]]);
                }
                other => panic!("expected Project, got {:?}", other),
            },
            other => panic!("expected Unwind, got {:?}", other),
        }
    }

    #[test]
    fn pass_through_ops_extend_the_used_set() {
        let arena = Bump::new();
        let read = WorkflowOp::read(&arena, "c");
        let shape = Reshape::doc_in(
            &arena,
            &[
                ("a", ShapeValue::Expr(ExprOp::field(&arena, "x"))),
                ("b", ShapeValue::Expr(ExprOp::field(&arena, "y"))),
            ],
        );
        let proj = WorkflowOp::project(&arena, read, shape);
        let sorted = WorkflowOp::sort(
            &arena,
            proj,
            &[crate::workflow::op::SortKey {
                field: crate::expr::name_path(&arena, "b"),
                dir: crate::workflow::op::SortDir::Ascending,
            }],
        );
        // `a` is read downstream of the sort; the sort itself reads `b`.
        let u = used(&[DocVar::field(&arena, "a")]);
        assert_eq!(prune(sorted, Some(&u), &arena), sorted);
    }
}
