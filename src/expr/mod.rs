//! # Expression Layer
//!
//! The algebra the workflow ops are built over: field paths, document
//! variables, expressions, selectors, and reshaping/grouping payloads.
//! Everything here is an immutable arena-allocated value; rewrites produce
//! new values in the same arena.

pub mod exprop;
pub mod field;
pub mod reshape;
pub mod selector;
pub mod var;

pub use exprop::{Accumulator, ExprOp};
pub use field::{concat_paths, flatten_mapping, name_path, render_path, BsonField};
pub use reshape::{Grouped, Reshape, ShapeValue};
pub use selector::{Condition, Selector};
pub use var::{DocVar, LEFT_NAME, RIGHT_NAME, VALUE_NAME};
