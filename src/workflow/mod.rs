//! # Workflow Planner
//!
//! This module implements the planner that turns an algebraic op graph into
//! an executable workflow for the target document engine.
//!
//! ## Architecture
//!
//! The planner is a pure, value-level compiler pass over arena-allocated
//! trees:
//!
//! ```text
//! WorkflowOp graph → [coalesce: local fusion] → [prune: dead fields] → [crush: lowering] → Workflow
//! ```
//!
//! - `op`: the operation algebra and classification
//! - `refs`: reference rewriting under a base variable
//! - `coalesce`: idempotent local fusion rewrites
//! - `prune`: dead-field elimination
//! - `merge`: joining two independently built graphs
//! - `task`: the executable task algebra
//! - `crush`: lowering ops to tasks
//!
//! ## Memory Model
//!
//! All nodes live in one `bumpalo` arena owned by the caller; rewrites
//! allocate new nodes and never mutate old ones, so shared subgraphs stay
//! valid across passes. Nothing here performs I/O, blocks, or keeps state
//! between invocations beyond the fresh-name counter.

pub mod coalesce;
pub mod crush;
pub mod merge;
pub mod op;
pub mod prune;
pub mod refs;
pub mod task;

pub use merge::MergeBases;
pub use op::{
    FlatMapOp, FoldLeftOp, GeoNearOp, GroupBy, GroupOp, JoinOp, LimitOp, MapOp, MatchOp,
    ProjectOp, PureOp, ReadOp, RedactOp, ReduceOp, SkipOp, SortDir, SortKey, SortOp, UnwindOp,
    WorkflowOp,
};
pub use prune::UsedSet;
pub use task::{
    FoldLeftTask, JoinTask, MapReduce, MapReduceTask, OutAction, PipelineStage, PipelineTask,
    PureTask, ReadTask, Workflow, WorkflowTask,
};

use bumpalo::Bump;
use eyre::Result;
use std::cell::Cell;

/// Normalization settles after one pass; the cap only guards against a
/// fusion rule losing idempotence.
const MAX_COALESCE_PASSES: usize = 10;

pub struct Planner<'a> {
    arena: &'a Bump,
    fresh: Cell<u32>,
}

impl<'a> Planner<'a> {
    pub fn new(arena: &'a Bump) -> Self {
        Self {
            arena,
            fresh: Cell::new(0),
        }
    }

    pub fn arena(&self) -> &'a Bump {
        self.arena
    }

    /// Applies the local fusion rewrites bottom-up.
    pub fn coalesce(&self, op: &'a WorkflowOp<'a>) -> &'a WorkflowOp<'a> {
        coalesce::coalesce(op, self.arena)
    }

    /// Removes fields no downstream op reads. `used` is the reference set of
    /// the plan's consumer; `None` when nothing is known about it.
    pub fn prune(
        &self,
        op: &'a WorkflowOp<'a>,
        used: Option<&UsedSet<'a>>,
    ) -> &'a WorkflowOp<'a> {
        prune::prune(op, used, self.arena)
    }

    /// Normalizes a plan: coalesce to a fixed point, then prune. The result
    /// is closed under both passes.
    pub fn finish(&self, op: &'a WorkflowOp<'a>) -> &'a WorkflowOp<'a> {
        let mut current = op;
        for iteration in 0..MAX_COALESCE_PASSES {
            let next = self.coalesce(current);
            if next == current {
                break;
            }
            current = next;

            if iteration == MAX_COALESCE_PASSES - 1 {
                eprintln!(
                    "[warn] coalesce did not settle after {} passes, stopping",
                    MAX_COALESCE_PASSES
                );
            }
        }
        self.prune(current, None)
    }

    /// Normalizes and lowers a plan to its executable workflow.
    pub fn workflow(&self, op: &'a WorkflowOp<'a>) -> Result<Workflow<'a>> {
        Ok(Workflow::new(self.crush(self.finish(op))?))
    }

    /// A field name unused by the given keys. Merging introduces these when
    /// it has to smuggle one side's document through the other's group.
    pub(crate) fn fresh_name(&self, avoid: &[&str]) -> &'a str {
        loop {
            let n = self.fresh.get();
            self.fresh.set(n + 1);
            let name: &'a str = self.arena.alloc_str(&format!("__tmp{}", n));
            if !avoid.contains(&name) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Bson;
    use crate::expr::{Condition, ExprOp, Reshape, Selector, ShapeValue};

    #[test]
    fn finish_is_idempotent() {
        let arena = Bump::new();
        let planner = Planner::new(&arena);
        let inner = WorkflowOp::project(
            &arena,
            WorkflowOp::read(&arena, "c"),
            Reshape::doc_in(&arena, &[("a", ShapeValue::Expr(ExprOp::field(&arena, "x")))]),
        );
        let plan = WorkflowOp::limit(
            &arena,
            WorkflowOp::limit(
                &arena,
                WorkflowOp::project(
                    &arena,
                    inner,
                    Reshape::doc_in(
                        &arena,
                        &[("b", ShapeValue::Expr(ExprOp::field(&arena, "a")))],
                    ),
                ),
                50,
            ),
            10,
        );
        let once = planner.finish(plan);
        let twice = planner.finish(once);
        assert_eq!(once, twice, "finish SHOULD be idempotent");
    }

    #[test]
    fn workflow_lowers_a_normalized_plan() {
        let arena = Bump::new();
        let planner = Planner::new(&arena);
        let plan = WorkflowOp::match_op(
            &arena,
            WorkflowOp::read(&arena, "zips"),
            Selector::field(&arena, "pop", Condition::Gte(Bson::Int32(1000))),
        );
        let workflow = planner.workflow(plan).unwrap();
        assert!(matches!(workflow.task, WorkflowTask::Pipeline(_)));
    }

    #[test]
    fn fresh_names_skip_the_avoid_list() {
        let arena = Bump::new();
        let planner = Planner::new(&arena);
        let first = planner.fresh_name(&[]);
        assert_eq!(first, "__tmp0");
        let second = planner.fresh_name(&["__tmp1"]);
        assert_eq!(second, "__tmp2");
    }
}
