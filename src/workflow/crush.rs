//! # Crushing
//!
//! The final lowering from the optimized op graph to executable tasks.
//!
//! ## Lowering Decisions
//!
//! - A pipeline op appends a stage to its source's pipeline task when one is
//!   already open, and starts a fresh one otherwise.
//! - A `Match` carrying a JS `Where` predicate cannot run as a pipeline
//!   stage; it becomes a no-op map/reduce job with a `selection` filter.
//! - `Map`/`FlatMap` peel a trailing `Limit?(Sort?(Match?(...)))` prefix of
//!   their source into the job's `selection`/`input_sort`/`limit`
//!   parameters, the order the engine applies them to job input.
//! - A `Map` over a finalizer-free map/reduce job becomes that job's
//!   finalizer instead of a second job.
//! - A `Reduce` claims its source job if the job still carries the identity
//!   reduce; otherwise it starts a fresh job.
//! - `FoldLeft` requires every tail branch to lower to a map/reduce job
//!   (its output action forced to `Reduce`); anything else is an internal
//!   planner error.

use super::op::{SortKey, WorkflowOp};
use super::task::{
    FoldLeftTask, JoinTask, MapReduce, MapReduceTask, OutAction, PipelineStage, PipelineTask,
    PureTask, ReadTask, WorkflowTask,
};
use super::Planner;
use crate::expr::Selector;
use crate::js::{self, JsExpr};
use bumpalo::collections::Vec as BumpVec;
use eyre::{bail, Result};

impl<'a> Planner<'a> {
    /// Lowers an op graph to a task tree. Call on `finish`ed plans; crushing
    /// does not optimize.
    pub fn crush(&self, op: &'a WorkflowOp<'a>) -> Result<&'a WorkflowTask<'a>> {
        let arena = self.arena();
        match op {
            WorkflowOp::Pure(p) => {
                Ok(arena.alloc(WorkflowTask::Pure(PureTask { value: p.value })))
            }
            WorkflowOp::Read(r) => Ok(arena.alloc(WorkflowTask::Read(ReadTask {
                collection: r.collection,
            }))),

            WorkflowOp::Match(m) => {
                if m.selector.contains_where() {
                    let source = self.crush(m.src)?;
                    let spec = MapReduce {
                        selection: Some(m.selector),
                        ..MapReduce::new(js::map_nop(), js::reduce_nop())
                    };
                    Ok(arena.alloc(WorkflowTask::MapReduce(MapReduceTask { source, spec })))
                } else {
                    let source = self.crush(m.src)?;
                    Ok(self.append_stage(source, PipelineStage::Match(m.selector)))
                }
            }
            WorkflowOp::Project(p) => {
                let source = self.crush(p.src)?;
                Ok(self.append_stage(source, PipelineStage::Project(p.shape)))
            }
            WorkflowOp::Redact(r) => {
                let source = self.crush(r.src)?;
                Ok(self.append_stage(source, PipelineStage::Redact(r.expr)))
            }
            WorkflowOp::Unwind(u) => {
                let source = self.crush(u.src)?;
                Ok(self.append_stage(source, PipelineStage::Unwind(u.field)))
            }
            WorkflowOp::Group(g) => {
                let source = self.crush(g.src)?;
                Ok(self.append_stage(
                    source,
                    PipelineStage::Group {
                        grouped: g.grouped,
                        by: g.by,
                    },
                ))
            }
            WorkflowOp::Sort(s) => {
                let source = self.crush(s.src)?;
                Ok(self.append_stage(source, PipelineStage::Sort(s.keys)))
            }
            WorkflowOp::Skip(s) => {
                let source = self.crush(s.src)?;
                Ok(self.append_stage(source, PipelineStage::Skip(s.count)))
            }
            WorkflowOp::Limit(l) => {
                let source = self.crush(l.src)?;
                Ok(self.append_stage(source, PipelineStage::Limit(l.count)))
            }
            WorkflowOp::GeoNear(g) => {
                let source = self.crush(g.src)?;
                Ok(self.append_stage(
                    source,
                    PipelineStage::GeoNear {
                        near: g.near,
                        dist_field: g.dist_field,
                        limit: g.limit,
                        query: g.query,
                        spherical: g.spherical,
                    },
                ))
            }

            WorkflowOp::Map(m) => {
                self.crush_job(m.src, js::wrap_map(arena, m.func), Some(m.func))
            }
            WorkflowOp::FlatMap(m) => {
                self.crush_job(m.src, js::wrap_flat_map(arena, m.func), None)
            }

            WorkflowOp::Reduce(r) => {
                let source = self.crush(r.src)?;
                if let WorkflowTask::MapReduce(mr) = source {
                    if mr.spec.is_reduce_free() && mr.spec.finalizer.is_none() {
                        let spec = MapReduce {
                            reduce: r.func,
                            ..mr.spec
                        };
                        return Ok(arena.alloc(WorkflowTask::MapReduce(MapReduceTask {
                            source: mr.source,
                            spec,
                        })));
                    }
                }
                let spec = MapReduce::new(js::map_nop(), r.func);
                Ok(arena.alloc(WorkflowTask::MapReduce(MapReduceTask { source, spec })))
            }

            WorkflowOp::FoldLeft(f) => {
                let Some((head_op, tail_ops)) = f.srcs.split_first() else {
                    bail!("fold-left op has no branches: {:?}", op);
                };
                let head = self.crush(head_op)?;
                let mut tail = BumpVec::with_capacity_in(tail_ops.len(), arena);
                for branch in tail_ops {
                    match self.crush(branch)? {
                        WorkflowTask::MapReduce(mr) => {
                            let forced = arena.alloc(WorkflowTask::MapReduce(MapReduceTask {
                                source: mr.source,
                                spec: MapReduce {
                                    out: OutAction::Reduce,
                                    ..mr.spec
                                },
                            }));
                            tail.push(&*forced);
                        }
                        other => bail!(
                            "fold-left branch must lower to a map/reduce job, got: {:?}",
                            other
                        ),
                    }
                }
                Ok(arena.alloc(WorkflowTask::FoldLeft(FoldLeftTask {
                    head,
                    tail: tail.into_bump_slice(),
                })))
            }

            WorkflowOp::Join(j) => {
                let mut branches = BumpVec::with_capacity_in(j.srcs.len(), arena);
                for s in j.srcs {
                    branches.push(&*self.crush(s)?);
                }
                Ok(arena.alloc(WorkflowTask::Join(JoinTask {
                    branches: branches.into_bump_slice(),
                })))
            }
        }
    }

    fn append_stage(
        &self,
        source: &'a WorkflowTask<'a>,
        stage: PipelineStage<'a>,
    ) -> &'a WorkflowTask<'a> {
        let arena = self.arena();
        match source {
            WorkflowTask::Pipeline(p) => {
                let mut stages = BumpVec::with_capacity_in(p.stages.len() + 1, arena);
                stages.extend_from_slice(p.stages);
                stages.push(stage);
                arena.alloc(WorkflowTask::Pipeline(PipelineTask {
                    source: p.source,
                    stages: stages.into_bump_slice(),
                }))
            }
            _ => arena.alloc(WorkflowTask::Pipeline(PipelineTask {
                source,
                stages: arena.alloc_slice_copy(&[stage]),
            })),
        }
    }

    /// Lowers a JS job op. `finalize_with` carries the raw map function when
    /// the op may instead become its source job's finalizer.
    fn crush_job(
        &self,
        src: &'a WorkflowOp<'a>,
        job_fn: JsExpr<'a>,
        finalize_with: Option<JsExpr<'a>>,
    ) -> Result<&'a WorkflowTask<'a>> {
        let arena = self.arena();
        let (base, selection, input_sort, limit) = peel_prefix(src);

        if std::ptr::eq(base, src) {
            let source = self.crush(src)?;
            if let (Some(op_fn), WorkflowTask::MapReduce(mr)) = (finalize_with, source) {
                if mr.spec.finalizer.is_none() {
                    let spec = MapReduce {
                        finalizer: Some(js::wrap_finalizer(arena, op_fn)),
                        ..mr.spec
                    };
                    return Ok(arena.alloc(WorkflowTask::MapReduce(MapReduceTask {
                        source: mr.source,
                        spec,
                    })));
                }
            }
            let spec = MapReduce::new(job_fn, js::reduce_nop());
            return Ok(arena.alloc(WorkflowTask::MapReduce(MapReduceTask { source, spec })));
        }

        let source = self.crush(base)?;
        let spec = MapReduce {
            selection,
            input_sort,
            limit,
            ..MapReduce::new(job_fn, js::reduce_nop())
        };
        Ok(arena.alloc(WorkflowTask::MapReduce(MapReduceTask { source, spec })))
    }
}

/// Splits a trailing `Limit?(Sort?(Match?(base)))` chain off a job source.
/// The chain is returned as job parameters; a `Where`-bearing match is never
/// peeled.
fn peel_prefix<'a>(
    src: &'a WorkflowOp<'a>,
) -> (
    &'a WorkflowOp<'a>,
    Option<Selector<'a>>,
    Option<&'a [SortKey<'a>]>,
    Option<i64>,
) {
    let mut cur = src;
    let mut limit = None;
    let mut input_sort = None;
    let mut selection = None;
    if let WorkflowOp::Limit(l) = cur {
        limit = Some(l.count);
        cur = l.src;
    }
    if let WorkflowOp::Sort(s) = cur {
        input_sort = Some(s.keys);
        cur = s.src;
    }
    if let WorkflowOp::Match(m) = cur {
        if !m.selector.contains_where() {
            selection = Some(m.selector);
            cur = m.src;
        }
    }
    (cur, selection, input_sort, limit)
}
