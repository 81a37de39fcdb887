//! # docflow - Workflow Planner for Document Databases
//!
//! docflow is the workflow planner of a SQL-to-document-database query
//! compiler. It receives a logical, algebraic description of a query (built
//! by an upstream parser and logical optimizer) and emits an executable
//! *workflow*: an ordered plan of the target engine's native pipeline stages
//! and map/reduce jobs, sequenced so the engine can run them directly.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bumpalo::Bump;
//! use docflow::bson::Bson;
//! use docflow::expr::{Condition, Selector};
//! use docflow::workflow::{Planner, WorkflowOp};
//!
//! let arena = Bump::new();
//! let planner = Planner::new(&arena);
//!
//! let plan = WorkflowOp::limit(
//!     &arena,
//!     WorkflowOp::match_op(
//!         &arena,
//!         WorkflowOp::read(&arena, "zips"),
//!         Selector::field(&arena, "pop", Condition::Gte(Bson::Int32(1000))),
//!     ),
//!     10,
//! );
//!
//! let workflow = planner.workflow(plan)?;
//! println!("{}", workflow.explain());
//! ```
//!
//! ## Architecture
//!
//! The planner is a pure compiler pass over arena-allocated value trees:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Op Algebra (WorkflowOp)        │
//! ├─────────────────────┬───────────────┤
//! │  Reference Rewriter │   Coalescer   │
//! ├─────────────────────┼───────────────┤
//! │  Dead-Field Pruner  │    Merger     │
//! ├─────────────────────┴───────────────┤
//! │        Crusher (lowering)           │
//! ├─────────────────────────────────────┤
//! │     Task Algebra (WorkflowTask)     │
//! └─────────────────────────────────────┘
//! ```
//!
//! - **Op algebra**: a DAG of atomic query operations (`workflow::op`)
//! - **Reference rewriter**: relocates an op's field references under a base
//!   document variable (`workflow::refs`)
//! - **Coalescer**: idempotent local fusion of adjacent compatible ops
//!   (`workflow::coalesce`)
//! - **Merger**: joins two independently built graphs under `lEft`/`rIght`
//!   labels, returning per-side base offsets (`workflow::merge`)
//! - **Pruner**: removes fields no downstream op reads (`workflow::prune`)
//! - **Crusher**: lowers the optimized graph to pipeline invocations,
//!   map/reduce jobs, fold-left chains, and reads (`workflow::crush`)
//!
//! ## Concurrency
//!
//! Everything is a deterministic, allocation-only transformation over
//! immutable values: no I/O, no shared state, no coordination needed when
//! independent plans are built on independent arenas.
//!
//! ## Module Overview
//!
//! - [`bson`]: literal document values
//! - [`expr`]: field paths, document variables, expressions, selectors,
//!   reshapes
//! - [`js`]: the JS function AST carried by map/flat-map/reduce ops
//! - [`workflow`]: the op algebra, the optimizer passes, and the lowering

pub mod bson;
pub mod expr;
pub mod js;
pub mod workflow;

pub use bson::Bson;
pub use workflow::{Planner, Workflow, WorkflowOp, WorkflowTask};
