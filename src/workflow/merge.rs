//! # Merging
//!
//! `merge` joins two independently built op graphs into one, returning the
//! merged graph plus a *base* variable per side. Rewriting any reference
//! that belonged to the left input by `lbase \\ v` (and the right by
//! `rbase \\ v`) resolves it correctly against the merged output, so callers
//! that combined two derived relations (joins, correlated expressions) can
//! keep addressing each side's fields.
//!
//! The algorithm is a first-match-wins case analysis. Identical inputs
//! merge to themselves; literals nest under a two-field document; projects
//! and groups combine their payloads; a path-stable pipeline op is stacked
//! over the merge of everything below it; and when nothing better applies,
//! the fallback emits a fold-left of the two branches wrapped under
//! `value.lEft` / `value.rIght` and recombined with the field-copy reduce.
//! Mirror-image inputs delegate to the swapped call, so the two orders
//! produce the same graph with the bases exchanged.
//!
//! Merge is total: every pair of ops lands in some case, and the fallback
//! never fails. Every op in the merged graph comes out coalesced.

use super::coalesce::coalesce;
use super::op::{GroupBy, GroupOp, ProjectOp, PureOp, WorkflowOp};
use super::refs::{prefix_base, rewrite_refs};
use super::Planner;
use crate::bson::Bson;
use crate::expr::{
    flatten_mapping, Accumulator, BsonField, DocVar, ExprOp, Grouped, Reshape, ShapeValue,
    LEFT_NAME, RIGHT_NAME, VALUE_NAME,
};
use crate::js;
use bumpalo::collections::Vec as BumpVec;

/// Base variables for the two merged sides.
pub type MergeBases<'a> = (DocVar<'a>, DocVar<'a>);

impl<'a> Planner<'a> {
    /// Merges two op graphs. See the module docs for the contract.
    pub fn merge(
        &self,
        a: &'a WorkflowOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let ((lb, rb), merged) = self.merge_cases(a, b);
        ((lb, rb), coalesce(merged, self.arena()))
    }

    fn swapped(
        &self,
        a: &'a WorkflowOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let ((rb, lb), merged) = self.merge(b, a);
        ((lb, rb), merged)
    }

    fn merge_cases(
        &self,
        a: &'a WorkflowOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();

        if a == b {
            return ((DocVar::root(), DocVar::root()), a);
        }

        match (a, b) {
            (WorkflowOp::Pure(pa), WorkflowOp::Pure(pb)) => {
                let value = Bson::doc_in(arena, &[(LEFT_NAME, pa.value), (RIGHT_NAME, pb.value)]);
                return (
                    (DocVar::left(), DocVar::right()),
                    WorkflowOp::pure(arena, value),
                );
            }
            (WorkflowOp::Pure(pa), _) => return self.merge_pure(pa, b),
            (_, WorkflowOp::Pure(_)) => return self.swapped(a, b),
            _ => {}
        }

        // A project merged with its own source: nest the shape beside an
        // identity copy of the source document.
        if let WorkflowOp::Project(p) = a {
            if p.src == b {
                let shape = Reshape::doc_in(
                    arena,
                    &[
                        (LEFT_NAME, ShapeValue::Shape(arena.alloc(p.shape))),
                        (RIGHT_NAME, ShapeValue::Expr(ExprOp::Var(DocVar::root()))),
                    ],
                );
                return (
                    (DocVar::left(), DocVar::right()),
                    WorkflowOp::project(arena, b, shape),
                );
            }
        }
        if let WorkflowOp::Project(p) = b {
            if p.src == a {
                return self.swapped(a, b);
            }
        }

        if let (WorkflowOp::Group(ga), WorkflowOp::Group(gb)) = (a, b) {
            if let Some(result) = self.merge_groups(ga, gb) {
                return result;
            }
        }
        if let WorkflowOp::Group(ga) = a {
            if b.is_pipeline() {
                return self.merge_group_pipeline(ga, b);
            }
        }
        if let WorkflowOp::Group(_) = b {
            if a.is_pipeline() {
                return self.swapped(a, b);
            }
        }

        if let (WorkflowOp::Project(pa), WorkflowOp::Project(pb)) = (a, b) {
            return self.merge_projects(pa, pb);
        }
        if let WorkflowOp::Project(pa) = a {
            if b.is_pipeline() {
                return self.merge_project_pipeline(pa, b);
            }
        }
        if let WorkflowOp::Project(_) = b {
            if a.is_pipeline() {
                return self.swapped(a, b);
            }
        }

        match (a, b) {
            (WorkflowOp::Map(_), WorkflowOp::Project(pb)) => {
                return self.merge_map_project(a, pb)
            }
            (WorkflowOp::Project(_), WorkflowOp::Map(_)) => return self.swapped(a, b),
            (WorkflowOp::Redact(ra), WorkflowOp::Redact(rb)) => {
                let ((lb, rb_), src) = self.merge(ra.src, rb.src);
                let ea = ra.expr.map_vars(arena, &mut prefix_base(arena, lb));
                let eb = rb.expr.map_vars(arena, &mut prefix_base(arena, rb_));
                let stacked =
                    WorkflowOp::redact(arena, WorkflowOp::redact(arena, src, ea), eb);
                return ((lb, rb_), stacked);
            }
            (WorkflowOp::Unwind(ua), WorkflowOp::Unwind(ub)) => {
                let ((lb, rb_), src) = self.merge(ua.src, ub.src);
                let fa = lb.concat(arena, ua.field);
                let fb = rb_.concat(arena, ub.field);
                let merged = if fa == fb {
                    WorkflowOp::unwind(arena, src, fa)
                } else {
                    WorkflowOp::unwind(arena, WorkflowOp::unwind(arena, src, fa), fb)
                };
                return ((lb, rb_), merged);
            }
            (WorkflowOp::Unwind(ua), WorkflowOp::Redact(_)) => {
                // The unwind stays outside the redact.
                let ((lb, rb_), src) = self.merge(ua.src, b);
                let merged = WorkflowOp::unwind(arena, src, lb.concat(arena, ua.field));
                return ((lb, rb_), merged);
            }
            (WorkflowOp::Redact(_), WorkflowOp::Unwind(_)) => return self.swapped(a, b),
            (WorkflowOp::Read(_), WorkflowOp::Map(_)) => return self.fold_left_merge(a, b),
            (WorkflowOp::Map(_), WorkflowOp::Read(_)) => return self.swapped(a, b),
            _ => {}
        }

        // A path-stable pipeline op can be stacked over the merge of
        // everything below it: its output keeps the merged document's paths
        // addressable, so both bases survive.
        if b.is_path_stable() {
            return self.stack_right(a, b);
        }
        if a.is_path_stable() {
            return self.swapped(a, b);
        }

        self.fold_left_merge(a, b)
    }

    /// A literal beside an arbitrary op: project the op's document under
    /// `rIght` and the literal under `lEft`.
    fn merge_pure(
        &self,
        pa: &PureOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let shape = Reshape::doc_in(
            arena,
            &[
                (LEFT_NAME, ShapeValue::Expr(ExprOp::Literal(pa.value))),
                (RIGHT_NAME, ShapeValue::Expr(ExprOp::Var(DocVar::root()))),
            ],
        );
        (
            (DocVar::left(), DocVar::right()),
            WorkflowOp::project(arena, b, shape),
        )
    }

    /// Two groups over the same key: one group computes both aggregate sets
    /// under fresh disjoint names, and a project maps the fresh names back
    /// to what each side called them.
    fn merge_groups(
        &self,
        ga: &GroupOp<'a>,
        gb: &GroupOp<'a>,
    ) -> Option<(MergeBases<'a>, &'a WorkflowOp<'a>)> {
        let arena = self.arena();
        let ((lb, rb), src) = self.merge(ga.src, gb.src);
        let grouped_a = ga.grouped.map_vars(arena, &mut prefix_base(arena, lb));
        let by_a = rewrite_by(arena, ga.by, lb);
        let grouped_b = gb.grouped.map_vars(arena, &mut prefix_base(arena, rb));
        let by_b = rewrite_by(arena, gb.by, rb);
        if by_a != by_b {
            return None;
        }

        let left_keys: Vec<&'a str> = grouped_a.keys().collect();
        let right_keys: Vec<&'a str> = grouped_b.keys().collect();
        let (lmap, rmap) = flatten_mapping(arena, &left_keys, &right_keys);

        let mut entries = BumpVec::with_capacity_in(lmap.len() + rmap.len(), arena);
        for ((_, fresh), (_, acc)) in lmap.iter().zip(grouped_a.0) {
            entries.push((*fresh, *acc));
        }
        for ((_, fresh), (_, acc)) in rmap.iter().zip(grouped_b.0) {
            entries.push((*fresh, *acc));
        }
        let combined = Grouped(entries.into_bump_slice());

        // Both sides keyed identically; the engine still sees a two-element
        // array so either original key expression remains addressable.
        let by_value = match by_a {
            GroupBy::Expr(e) => ShapeValue::Expr(e),
            GroupBy::Shape(s) => ShapeValue::Shape(arena.alloc(s)),
        };
        let by = GroupBy::Shape(Reshape::Arr(
            arena.alloc_slice_copy(&[(0u32, by_value), (1u32, by_value)]),
        ));
        let group = WorkflowOp::group(arena, src, combined, by);

        let rename_shape = |mapping: &[(&'a str, &'a str)]| -> Reshape<'a> {
            let mut fields = BumpVec::with_capacity_in(mapping.len(), arena);
            for &(original, fresh) in mapping {
                fields.push((
                    original,
                    ShapeValue::Expr(ExprOp::Var(DocVar::field(arena, fresh))),
                ));
            }
            Reshape::Doc(fields.into_bump_slice())
        };
        let shape = Reshape::doc_in(
            arena,
            &[
                (LEFT_NAME, ShapeValue::Shape(arena.alloc(rename_shape(&lmap)))),
                (RIGHT_NAME, ShapeValue::Shape(arena.alloc(rename_shape(&rmap)))),
            ],
        );
        Some((
            (DocVar::left(), DocVar::right()),
            WorkflowOp::project(arena, group, shape),
        ))
    }

    /// A group beside a pipeline op: the group gains a fresh `Push` of the
    /// pipeline side's document, and an unwind restores it to one document
    /// per input row. The right base moves under the fresh field.
    fn merge_group_pipeline(
        &self,
        ga: &GroupOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let ((lb, rb), src) = self.merge(ga.src, b);
        let grouped = ga.grouped.map_vars(arena, &mut prefix_base(arena, lb));
        let by = rewrite_by(arena, ga.by, lb);

        let keys: Vec<&'a str> = grouped.keys().collect();
        let unique = self.fresh_name(&keys);
        let mut entries = BumpVec::with_capacity_in(grouped.len() + 1, arena);
        entries.extend_from_slice(grouped.0);
        entries.push((
            unique,
            Accumulator::Push(arena.alloc(ExprOp::Var(rb))),
        ));

        let group = WorkflowOp::group(arena, src, Grouped(entries.into_bump_slice()), by);
        let unique_var = DocVar::field(arena, unique);
        let unwound = WorkflowOp::unwind(arena, group, unique_var);
        ((DocVar::root(), unique_var), unwound)
    }

    /// Two projects: one project with each side's shape nested under its
    /// label.
    fn merge_projects(
        &self,
        pa: &ProjectOp<'a>,
        pb: &ProjectOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let ((lb, rb), src) = self.merge(pa.src, pb.src);
        let left_shape = pa.shape.map_vars(arena, &mut prefix_base(arena, lb));
        let right_shape = pb.shape.map_vars(arena, &mut prefix_base(arena, rb));
        let shape = Reshape::doc_in(
            arena,
            &[
                (LEFT_NAME, ShapeValue::Shape(arena.alloc(left_shape))),
                (RIGHT_NAME, ShapeValue::Shape(arena.alloc(right_shape))),
            ],
        );
        (
            (DocVar::left(), DocVar::right()),
            WorkflowOp::project(arena, src, shape),
        )
    }

    /// A project beside a pipeline op: the pipeline op joins the source
    /// merge, the project keeps its shape under `lEft`, and `rIght` carries
    /// the merged document through unchanged.
    fn merge_project_pipeline(
        &self,
        pa: &ProjectOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let ((lb, rb), src) = self.merge(pa.src, b);
        let left_shape = pa.shape.map_vars(arena, &mut prefix_base(arena, lb));
        let shape = Reshape::doc_in(
            arena,
            &[
                (LEFT_NAME, ShapeValue::Shape(arena.alloc(left_shape))),
                (RIGHT_NAME, ShapeValue::Expr(ExprOp::Var(DocVar::root()))),
            ],
        );
        (
            (DocVar::left(), DocVar::right().concat(arena, rb)),
            WorkflowOp::project(arena, src, shape),
        )
    }

    /// A map beside a project: mirror image of
    /// [`Planner::merge_project_pipeline`], with the opaque side passed
    /// through whole.
    fn merge_map_project(
        &self,
        a: &'a WorkflowOp<'a>,
        pb: &ProjectOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let ((lb, rb), src) = self.merge(a, pb.src);
        let right_shape = pb.shape.map_vars(arena, &mut prefix_base(arena, rb));
        let shape = Reshape::doc_in(
            arena,
            &[
                (LEFT_NAME, ShapeValue::Expr(ExprOp::Var(DocVar::root()))),
                (RIGHT_NAME, ShapeValue::Shape(arena.alloc(right_shape))),
            ],
        );
        (
            (DocVar::left().concat(arena, lb), DocVar::right()),
            WorkflowOp::project(arena, src, shape),
        )
    }

    fn stack_right(
        &self,
        a: &'a WorkflowOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let Some(b_src) = b.single_source() else {
            return self.fold_left_merge(a, b);
        };
        let ((lb, rb), src) = self.merge(a, b_src);
        let restacked = rewrite_refs(b, arena, &mut prefix_base(arena, rb)).reparent(arena, src);
        ((lb, rb), restacked)
    }

    /// The always-safe fallback: fold the two branches together, each
    /// wrapped under its label inside `value`, recombined by the field-copy
    /// reduce.
    fn fold_left_merge(
        &self,
        a: &'a WorkflowOp<'a>,
        b: &'a WorkflowOp<'a>,
    ) -> (MergeBases<'a>, &'a WorkflowOp<'a>) {
        let arena = self.arena();
        let wrap = |label: &'a str| -> Reshape<'a> {
            Reshape::empty_doc().set(
                arena,
                &[BsonField::Name(VALUE_NAME), BsonField::Name(label)],
                ShapeValue::Expr(ExprOp::Var(DocVar::root())),
            )
        };
        let head = WorkflowOp::project(arena, a, wrap(LEFT_NAME));
        let tail = WorkflowOp::reduce(
            arena,
            WorkflowOp::project(arena, b, wrap(RIGHT_NAME)),
            js::fold_left_reduce(),
        );
        let merged = WorkflowOp::fold_left(arena, head, &[tail]);
        (
            (
                DocVar::value().concat(arena, DocVar::left()),
                DocVar::value().concat(arena, DocVar::right()),
            ),
            merged,
        )
    }
}

fn rewrite_by<'a>(
    arena: &'a bumpalo::Bump,
    by: GroupBy<'a>,
    base: DocVar<'a>,
) -> GroupBy<'a> {
    match by {
        GroupBy::Expr(e) => GroupBy::Expr(e.map_vars(arena, &mut prefix_base(arena, base))),
        GroupBy::Shape(s) => GroupBy::Shape(s.map_vars(arena, &mut prefix_base(arena, base))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Condition, Selector};
    use crate::workflow::op::{SortDir, SortKey};
    use bumpalo::Bump;

    fn planner(arena: &Bump) -> Planner<'_> {
        Planner::new(arena)
    }

    #[test]
    fn merging_an_op_with_itself_is_the_identity() {
        let arena = Bump::new();
        let p = planner(&arena);
        let read = WorkflowOp::read(&arena, "zips");
        let ((lb, rb), merged) = p.merge(read, read);
        assert!(lb.is_root());
        assert!(rb.is_root());
        assert_eq!(merged, read);
    }

    #[test]
    fn two_literals_merge_into_one_two_field_document() {
        let arena = Bump::new();
        let p = planner(&arena);
        let a = WorkflowOp::pure(&arena, Bson::Int32(1));
        let b = WorkflowOp::pure(&arena, Bson::Text("x"));
        let ((lb, rb), merged) = p.merge(a, b);
        assert_eq!(lb, DocVar::left());
        assert_eq!(rb, DocVar::right());
        let expected = WorkflowOp::pure(
            &arena,
            Bson::doc_in(&arena, &[(LEFT_NAME, Bson::Int32(1)), (RIGHT_NAME, Bson::Text("x"))]),
        );
        assert_eq!(merged, expected);
    }

    #[test]
    fn two_reads_merge_through_the_fold_left_fallback() {
        let arena = Bump::new();
        let p = planner(&arena);
        let a = WorkflowOp::read(&arena, "a");
        let b = WorkflowOp::read(&arena, "b");
        let ((lb, rb), merged) = p.merge(a, b);
        assert_eq!(lb.to_string(), "ROOT.value.lEft");
        assert_eq!(rb.to_string(), "ROOT.value.rIght");
        match merged {
            WorkflowOp::FoldLeft(f) => {
                assert_eq!(f.srcs.len(), 2);
                match f.srcs[0] {
                    WorkflowOp::Project(proj) => {
                        assert_eq!(proj.src, a);
                        let leaves = proj.shape.get_all();
                        assert_eq!(
                            leaves[0].0,
                            vec![BsonField::Name(VALUE_NAME), BsonField::Name(LEFT_NAME)]
                        );
                    }
                    other => panic!("expected projected head, got {:?}", other),
                }
                match f.srcs[1] {
                    WorkflowOp::Reduce(r) => {
                        assert_eq!(r.func, js::fold_left_reduce());
                        assert!(matches!(r.src, WorkflowOp::Project(_)));
                    }
                    other => panic!("expected reducing tail, got {:?}", other),
                }
            }
            other => panic!("expected fold-left, got {:?}", other),
        }
    }

    #[test]
    fn merge_is_symmetric_for_delegated_pairs() {
        let arena = Bump::new();
        let p = planner(&arena);
        let read = WorkflowOp::read(&arena, "a");
        let mapped = WorkflowOp::map(
            &arena,
            WorkflowOp::read(&arena, "b"),
            crate::js::JsExpr::Raw("function(k) { return [k, this]; }"),
        );
        let ((l1, r1), m1) = p.merge(read, mapped);
        let ((l2, r2), m2) = p.merge(mapped, read);
        assert_eq!(m1, m2, "both orders SHOULD produce the same graph");
        assert_eq!((l1, r1), (r2, l2), "bases SHOULD swap with the inputs");
    }

    #[test]
    fn equal_key_groups_merge_into_one_group_and_a_rename() {
        let arena = Bump::new();
        let p = planner(&arena);
        let read = WorkflowOp::read(&arena, "c");
        let by = GroupBy::Expr(ExprOp::field(&arena, "s"));
        let a = WorkflowOp::group(
            &arena,
            read,
            Grouped::new_in(
                &arena,
                &[("n", Accumulator::Sum(arena.alloc(ExprOp::Literal(Bson::Int32(1)))))],
            ),
            by,
        );
        let b = WorkflowOp::group(
            &arena,
            read,
            Grouped::new_in(
                &arena,
                &[("m", Accumulator::Push(arena.alloc(ExprOp::field(&arena, "x"))))],
            ),
            by,
        );
        let ((lb, rb), merged) = p.merge(a, b);
        assert_eq!(lb, DocVar::left());
        assert_eq!(rb, DocVar::right());
        match merged {
            WorkflowOp::Project(proj) => {
                match proj.src {
                    WorkflowOp::Group(g) => {
                        assert_eq!(g.src, read);
                        let keys: Vec<_> = g.grouped.keys().collect();
                        assert_eq!(keys, vec!["_0", "_1"]);
                        assert!(matches!(g.grouped.get("_0"), Some(Accumulator::Sum(_))));
                        assert!(matches!(g.grouped.get("_1"), Some(Accumulator::Push(_))));
                        match g.by {
                            GroupBy::Shape(Reshape::Arr(items)) => assert_eq!(items.len(), 2),
                            ref other => panic!("expected array key, got {:?}", other),
                        }
                    }
                    other => panic!("expected group under the project, got {:?}", other),
                }
                // The project maps fresh names back to the originals.
                let n = proj
                    .shape
                    .get_expr(&arena, &[BsonField::Name(LEFT_NAME), BsonField::Name("n")])
                    .unwrap();
                assert_eq!(n, ExprOp::Var(DocVar::field(&arena, "_0")));
                let m = proj
                    .shape
                    .get_expr(&arena, &[BsonField::Name(RIGHT_NAME), BsonField::Name("m")])
                    .unwrap();
                assert_eq!(m, ExprOp::Var(DocVar::field(&arena, "_1")));
            }
            other => panic!("expected project over group, got {:?}", other),
        }
    }

    #[test]
    fn group_beside_a_match_pushes_the_match_side_through() {
        let arena = Bump::new();
        let p = planner(&arena);
        let read = WorkflowOp::read(&arena, "c");
        let group = WorkflowOp::group(
            &arena,
            read,
            Grouped::new_in(
                &arena,
                &[("n", Accumulator::Sum(arena.alloc(ExprOp::field(&arena, "pop"))))],
            ),
            GroupBy::Expr(ExprOp::field(&arena, "s")),
        );
        let matched = WorkflowOp::match_op(
            &arena,
            read,
            Selector::field(&arena, "pop", Condition::Gt(Bson::Int32(0))),
        );
        let ((lb, rb), merged) = p.merge(group, matched);
        assert!(lb.is_root());
        assert_eq!(rb.to_string(), "ROOT.__tmp0");
        match merged {
            WorkflowOp::Unwind(u) => {
                assert_eq!(u.field, rb);
                match u.src {
                    WorkflowOp::Group(g) => {
                        let keys: Vec<_> = g.grouped.keys().collect();
                        assert_eq!(keys, vec!["n", "__tmp0"]);
                        match g.grouped.get("__tmp0") {
                            Some(Accumulator::Push(e)) => {
                                assert_eq!(*e, ExprOp::Var(DocVar::root()))
                            }
                            other => panic!("expected pushed document, got {:?}", other),
                        }
                        assert!(matches!(g.src, WorkflowOp::Match(_)));
                    }
                    other => panic!("expected group, got {:?}", other),
                }
            }
            other => panic!("expected unwind over group, got {:?}", other),
        }
    }

    #[test]
    fn two_projects_nest_under_left_and_right_labels() {
        let arena = Bump::new();
        let p = planner(&arena);
        let read = WorkflowOp::read(&arena, "c");
        let a = WorkflowOp::project(
            &arena,
            read,
            Reshape::doc_in(&arena, &[("a", ShapeValue::Expr(ExprOp::field(&arena, "x")))]),
        );
        let b = WorkflowOp::project(
            &arena,
            read,
            Reshape::doc_in(&arena, &[("b", ShapeValue::Expr(ExprOp::field(&arena, "y")))]),
        );
        let ((lb, rb), merged) = p.merge(a, b);
        assert_eq!(lb, DocVar::left());
        assert_eq!(rb, DocVar::right());
        match merged {
            WorkflowOp::Project(proj) => {
                assert_eq!(proj.src, read);
                let left = proj
                    .shape
                    .get_expr(&arena, &[BsonField::Name(LEFT_NAME), BsonField::Name("a")])
                    .unwrap();
                assert_eq!(left, ExprOp::field(&arena, "x"));
                let right = proj
                    .shape
                    .get_expr(&arena, &[BsonField::Name(RIGHT_NAME), BsonField::Name("b")])
                    .unwrap();
                assert_eq!(right, ExprOp::field(&arena, "y"));
            }
            other => panic!("expected single project, got {:?}", other),
        }
    }

    #[test]
    fn path_stable_ops_stack_over_the_merged_source() {
        let arena = Bump::new();
        let p = planner(&arena);
        let read = WorkflowOp::read(&arena, "c");
        let matched = WorkflowOp::match_op(
            &arena,
            read,
            Selector::field(&arena, "x", Condition::Exists(true)),
        );
        let sorted = WorkflowOp::sort(
            &arena,
            read,
            &[SortKey {
                field: crate::expr::name_path(&arena, "y"),
                dir: SortDir::Ascending,
            }],
        );
        let ((lb, rb), merged) = p.merge(matched, sorted);
        assert!(lb.is_root());
        assert!(rb.is_root());
        // Coalescing pushes the match below the sort afterwards.
        match merged {
            WorkflowOp::Sort(s) => match s.src {
                WorkflowOp::Match(m) => assert_eq!(m.src, read),
                other => panic!("expected match below sort, got {:?}", other),
            },
            other => panic!("expected sort on top, got {:?}", other),
        }
    }
}
