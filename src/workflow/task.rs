//! # Workflow Tasks
//!
//! This module defines the executable task algebra the crusher lowers to.
//! Tasks describe exactly what the execution layer runs against the target
//! engine: pipeline invocations, map/reduce jobs, fold-left chains, and
//! plain reads.
//!
//! ## Task Inventory
//!
//! | Task | Runs as |
//! |------|---------|
//! | Pure | inline literal, no engine round trip |
//! | Read | collection scan |
//! | Pipeline | native pipeline over its upstream |
//! | MapReduce | one map/reduce job over its upstream |
//! | FoldLeft | head task, then each tail job reducing into the result |
//! | Join | independent branches |
//!
//! The planner owns nothing beyond the values here; executing them is the
//! execution layer's business.

use super::op::{GroupBy, SortDir, SortKey};
use crate::bson::Bson;
use crate::expr::{render_path, BsonField, DocVar, ExprOp, Grouped, Reshape, Selector};
use crate::js::{self, JsExpr};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowTask<'a> {
    Pure(PureTask<'a>),
    Read(ReadTask<'a>),
    Pipeline(PipelineTask<'a>),
    MapReduce(MapReduceTask<'a>),
    FoldLeft(FoldLeftTask<'a>),
    Join(JoinTask<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PureTask<'a> {
    pub value: Bson<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadTask<'a> {
    pub collection: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTask<'a> {
    pub source: &'a WorkflowTask<'a>,
    pub stages: &'a [PipelineStage<'a>],
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceTask<'a> {
    pub source: &'a WorkflowTask<'a>,
    pub spec: MapReduce<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldLeftTask<'a> {
    pub head: &'a WorkflowTask<'a>,
    pub tail: &'a [&'a WorkflowTask<'a>],
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinTask<'a> {
    pub branches: &'a [&'a WorkflowTask<'a>],
}

/// A native pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineStage<'a> {
    Match(Selector<'a>),
    Project(Reshape<'a>),
    Redact(ExprOp<'a>),
    Unwind(DocVar<'a>),
    Group {
        grouped: Grouped<'a>,
        by: GroupBy<'a>,
    },
    Sort(&'a [SortKey<'a>]),
    Skip(i64),
    Limit(i64),
    GeoNear {
        near: (f64, f64),
        dist_field: &'a [BsonField<'a>],
        limit: Option<i64>,
        query: Option<Selector<'a>>,
        spherical: bool,
    },
}

/// Where a map/reduce job writes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutAction {
    Replace,
    Merge,
    Reduce,
}

/// The parameters of one map/reduce job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapReduce<'a> {
    pub map: JsExpr<'a>,
    pub reduce: JsExpr<'a>,
    pub selection: Option<Selector<'a>>,
    pub input_sort: Option<&'a [SortKey<'a>]>,
    pub limit: Option<i64>,
    pub finalizer: Option<JsExpr<'a>>,
    pub out: OutAction,
}

impl<'a> MapReduce<'a> {
    pub fn new(map: JsExpr<'a>, reduce: JsExpr<'a>) -> MapReduce<'a> {
        MapReduce {
            map,
            reduce,
            selection: None,
            input_sort: None,
            limit: None,
            finalizer: None,
            out: OutAction::Replace,
        }
    }

    /// True if the job still carries the identity reduce, i.e. a later
    /// `Reduce` op may claim it.
    pub fn is_reduce_free(&self) -> bool {
        self.reduce == js::reduce_nop()
    }
}

/// The planner's final product: the task tree the execution layer runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow<'a> {
    pub task: &'a WorkflowTask<'a>,
}

impl<'a> Workflow<'a> {
    pub fn new(task: &'a WorkflowTask<'a>) -> Workflow<'a> {
        Workflow { task }
    }

    /// Renders the task tree for diagnostics.
    pub fn explain(&self) -> String {
        let mut output = String::new();
        format_task(self.task, 0, &mut output);
        output
    }
}

fn format_task(task: &WorkflowTask<'_>, indent: usize, output: &mut String) {
    use std::fmt::Write;
    let prefix = "  ".repeat(indent);

    match task {
        WorkflowTask::Pure(t) => {
            let _ = writeln!(output, "{}-> Pure {}", prefix, t.value);
        }
        WorkflowTask::Read(t) => {
            let _ = writeln!(output, "{}-> Read {}", prefix, t.collection);
        }
        WorkflowTask::Pipeline(t) => {
            let _ = writeln!(output, "{}-> Pipeline", prefix);
            for stage in t.stages {
                let _ = writeln!(output, "{}   | {}", prefix, describe_stage(stage));
            }
            format_task(t.source, indent + 1, output);
        }
        WorkflowTask::MapReduce(t) => {
            let _ = writeln!(
                output,
                "{}-> MapReduce (selection={}, sort={}, limit={}, finalize={}, out={:?})",
                prefix,
                t.spec.selection.is_some(),
                t.spec.input_sort.is_some(),
                t.spec.limit.map_or("-".to_string(), |n| n.to_string()),
                t.spec.finalizer.is_some(),
                t.spec.out,
            );
            format_task(t.source, indent + 1, output);
        }
        WorkflowTask::FoldLeft(t) => {
            let _ = writeln!(output, "{}-> FoldLeft", prefix);
            format_task(t.head, indent + 1, output);
            for branch in t.tail {
                format_task(branch, indent + 1, output);
            }
        }
        WorkflowTask::Join(t) => {
            let _ = writeln!(output, "{}-> Join", prefix);
            for branch in t.branches {
                format_task(branch, indent + 1, output);
            }
        }
    }
}

fn describe_stage(stage: &PipelineStage<'_>) -> String {
    match stage {
        PipelineStage::Match(_) => "$match".to_string(),
        PipelineStage::Project(_) => "$project".to_string(),
        PipelineStage::Redact(_) => "$redact".to_string(),
        PipelineStage::Unwind(v) => format!("$unwind {}", v),
        PipelineStage::Group { grouped, .. } => format!("$group ({} aggregates)", grouped.len()),
        PipelineStage::Sort(keys) => {
            let rendered: Vec<String> = keys
                .iter()
                .map(|k| {
                    format!(
                        "{} {}",
                        render_path(k.field),
                        match k.dir {
                            SortDir::Ascending => "asc",
                            SortDir::Descending => "desc",
                        }
                    )
                })
                .collect();
            format!("$sort [{}]", rendered.join(", "))
        }
        PipelineStage::Skip(n) => format!("$skip {}", n),
        PipelineStage::Limit(n) => format!("$limit {}", n),
        PipelineStage::GeoNear { .. } => "$geoNear".to_string(),
    }
}
