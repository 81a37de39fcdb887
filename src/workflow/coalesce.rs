//! # Coalescing
//!
//! Local fusion rewrites over the op graph. Each rule looks at one op and
//! its (already coalesced) source and fuses the pair when the algebra
//! allows, so a chain of adjacent compatible ops collapses into the fewest
//! stages the engine can run.
//!
//! ## Rules
//!
//! | Pattern | Result |
//! |---------|--------|
//! | `Match(Match(s))` | one `Match` with the conjoined selector |
//! | `Match(Sort(s))` | `Sort(Match(s))` — matches run below sorts |
//! | `Limit(Limit(s))` | `Limit(s, min)` |
//! | `Limit(Skip(s))` | `Skip(Limit(s, skip + limit))` |
//! | `Skip(Skip(s))` | `Skip(s, sum)` |
//! | `Project(Project(s))` | one `Project`, inner expressions inlined |
//! | `Group(Project*(s))` | `Group(s)`, project run absorbed |
//! | `GeoNear(GeoNear(s))` | outer `GeoNear` only |
//! | `GeoNear(pipeline(s))` | pipeline op lifted above the `GeoNear` |
//! | `Map/FlatMap` pairs | one op with the composed JS function |
//! | `FoldLeft(FoldLeft(xs), ys)` | `FoldLeft(xs ++ ys)` |
//!
//! Everything else coalesces only recursively. Coalescing is idempotent and
//! never increases the op count.

use super::op::{FoldLeftOp, GroupBy, GroupOp, JoinOp, WorkflowOp};
use crate::expr::{DocVar, Grouped, Reshape, Selector};
use crate::js;
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use smallvec::SmallVec;

/// Rewrites `op` bottom-up until no fusion rule applies.
pub fn coalesce<'a>(op: &'a WorkflowOp<'a>, arena: &'a Bump) -> &'a WorkflowOp<'a> {
    match op {
        WorkflowOp::Pure(_) | WorkflowOp::Read(_) => op,

        WorkflowOp::Match(m) => {
            let src = coalesce(m.src, arena);
            match src {
                WorkflowOp::Match(inner) => {
                    let fused = WorkflowOp::match_op(
                        arena,
                        inner.src,
                        Selector::and(arena, inner.selector, m.selector),
                    );
                    coalesce(fused, arena)
                }
                WorkflowOp::Sort(inner) => {
                    let pushed =
                        coalesce(WorkflowOp::match_op(arena, inner.src, m.selector), arena);
                    WorkflowOp::sort(arena, pushed, inner.keys)
                }
                _ => with_source(op, m.src, src, arena),
            }
        }

        WorkflowOp::Limit(l) => {
            let src = coalesce(l.src, arena);
            match src {
                WorkflowOp::Limit(inner) => coalesce(
                    WorkflowOp::limit(arena, inner.src, l.count.min(inner.count)),
                    arena,
                ),
                WorkflowOp::Skip(inner) => {
                    let tightened = coalesce(
                        WorkflowOp::limit(arena, inner.src, inner.count + l.count),
                        arena,
                    );
                    WorkflowOp::skip(arena, tightened, inner.count)
                }
                _ => with_source(op, l.src, src, arena),
            }
        }

        WorkflowOp::Skip(s) => {
            let src = coalesce(s.src, arena);
            match src {
                WorkflowOp::Skip(inner) => coalesce(
                    WorkflowOp::skip(arena, inner.src, s.count + inner.count),
                    arena,
                ),
                _ => with_source(op, s.src, src, arena),
            }
        }

        WorkflowOp::Project(p) => {
            let src = coalesce(p.src, arena);
            if let WorkflowOp::Project(_) = src {
                let mut shapes: SmallVec<[Reshape<'a>; 4]> = SmallVec::new();
                shapes.push(p.shape);
                let base = collect_shapes(src, &mut shapes);
                if let Some(combined) = combined_shape_of_run(&shapes, arena) {
                    return WorkflowOp::project(arena, base, combined);
                }
            }
            with_source(op, p.src, src, arena)
        }

        WorkflowOp::Group(g) => {
            let src = coalesce(g.src, arena);
            if let WorkflowOp::Project(_) = src {
                if let Some((base, grouped, by)) = inline_group_projects(g, src, arena) {
                    return WorkflowOp::group(arena, base, grouped, by);
                }
            }
            with_source(op, g.src, src, arena)
        }

        WorkflowOp::GeoNear(g) => {
            let src = coalesce(g.src, arena);
            match src {
                // Two geo-nears cannot both anchor the pipeline; the outer
                // one wins.
                WorkflowOp::GeoNear(inner) => coalesce(op.reparent(arena, inner.src), arena),
                s if s.is_pipeline() => {
                    // Geo-near must execute first: sink it below the
                    // pipeline op.
                    let inner_src = match s.single_source() {
                        Some(inner) => inner,
                        None => return with_source(op, g.src, src, arena),
                    };
                    let sunk = coalesce(op.reparent(arena, inner_src), arena);
                    coalesce(s.reparent(arena, sunk), arena)
                }
                _ => with_source(op, g.src, src, arena),
            }
        }

        WorkflowOp::Sort(s) => with_source(op, s.src, coalesce(s.src, arena), arena),
        WorkflowOp::Redact(r) => with_source(op, r.src, coalesce(r.src, arena), arena),
        WorkflowOp::Unwind(u) => with_source(op, u.src, coalesce(u.src, arena), arena),

        WorkflowOp::Map(m) => {
            let src = coalesce(m.src, arena);
            match src {
                WorkflowOp::Map(inner) => coalesce(
                    WorkflowOp::map(arena, inner.src, js::compose_pair(arena, inner.func, m.func)),
                    arena,
                ),
                WorkflowOp::FlatMap(inner) => coalesce(
                    WorkflowOp::flat_map(
                        arena,
                        inner.src,
                        js::compose_each(arena, inner.func, m.func),
                    ),
                    arena,
                ),
                _ => with_source(op, m.src, src, arena),
            }
        }

        WorkflowOp::FlatMap(fm) => {
            let src = coalesce(fm.src, arena);
            match src {
                WorkflowOp::Map(inner) => coalesce(
                    WorkflowOp::flat_map(
                        arena,
                        inner.src,
                        js::compose_pair(arena, inner.func, fm.func),
                    ),
                    arena,
                ),
                WorkflowOp::FlatMap(inner) => coalesce(
                    WorkflowOp::flat_map(
                        arena,
                        inner.src,
                        js::compose_concat(arena, inner.func, fm.func),
                    ),
                    arena,
                ),
                _ => with_source(op, fm.src, src, arena),
            }
        }

        WorkflowOp::Reduce(r) => with_source(op, r.src, coalesce(r.src, arena), arena),

        WorkflowOp::FoldLeft(f) => {
            let mut srcs = BumpVec::with_capacity_in(f.srcs.len(), arena);
            let mut changed = false;
            for (i, s) in f.srcs.iter().enumerate() {
                let c = coalesce(s, arena);
                changed |= !std::ptr::eq(*s, c);
                match c {
                    WorkflowOp::FoldLeft(inner) if i == 0 => {
                        srcs.extend_from_slice(inner.srcs);
                        changed = true;
                    }
                    _ => srcs.push(c),
                }
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
                let c = coalesce(s, arena);
                changed |= !std::ptr::eq(*s, c);
                srcs.push(c);
            }
            if changed {
                arena.alloc(WorkflowOp::Join(JoinOp {
                    srcs: srcs.into_bump_slice(),
                }))
            } else {
                op
            }
        }
    }
}

fn with_source<'a>(
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

/// Walks the contiguous run of projects below `src`, pushing their shapes
/// outermost-first, and returns the first non-project ancestor.
fn collect_shapes<'a>(
    src: &'a WorkflowOp<'a>,
    shapes: &mut SmallVec<[Reshape<'a>; 4]>,
) -> &'a WorkflowOp<'a> {
    let mut base = src;
    while let WorkflowOp::Project(p) = base {
        shapes.push(p.shape);
        base = p.src;
    }
    base
}

/// Folds a run of shapes (outermost first) into one, substituting each
/// outer reference to a field the next shape defines with that shape's
/// expression. `None` when any reference cannot be resolved to a single
/// expression.
fn combined_shape_of_run<'a>(shapes: &[Reshape<'a>], arena: &'a Bump) -> Option<Reshape<'a>> {
    let mut iter = shapes.iter().rev();
    let mut acc = *iter.next()?;
    for outer in iter {
        let inner = acc;
        acc = outer.try_substitute(arena, &|v: DocVar<'a>| inner.get_expr(arena, v.deref()?))?;
    }
    Some(acc)
}

/// A group over a run of projects absorbs the run: the group's expressions
/// are rewritten through the collected shapes and the group lands on the
/// run's base (which may itself be another group).
fn inline_group_projects<'a>(
    g: &GroupOp<'a>,
    src: &'a WorkflowOp<'a>,
    arena: &'a Bump,
) -> Option<(&'a WorkflowOp<'a>, Grouped<'a>, GroupBy<'a>)> {
    let mut shapes: SmallVec<[Reshape<'a>; 4]> = SmallVec::new();
    let base = collect_shapes(src, &mut shapes);
    if shapes.is_empty() {
        return None;
    }
    let combined = combined_shape_of_run(&shapes, arena)?;
    let lookup = |v: DocVar<'a>| combined.get_expr(arena, v.deref()?);
    let grouped = g.grouped.try_substitute(arena, &lookup)?;
    let by = match g.by {
        GroupBy::Expr(e) => GroupBy::Expr(e.try_substitute(arena, &lookup)?),
        GroupBy::Shape(s) => GroupBy::Shape(s.try_substitute(arena, &lookup)?),
    };
    Some((base, grouped, by))
}
