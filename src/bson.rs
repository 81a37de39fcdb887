//! # BSON Literal Values
//!
//! This module provides `Bson<'a>`, the planner's representation for literal
//! document values. Literals appear in `Pure` ops, selector conditions, and
//! expression trees. All composite values borrow from the planning arena, so
//! a whole plan (ops, expressions, literals) shares one allocation lifetime.
//!
//! ## Design Goals
//!
//! 1. **Arena allocation**: composite values are `&'a` slices in the arena
//! 2. **Zero-copy strings**: text borrows from the arena or the caller
//! 3. **Order preservation**: documents are slices of pairs, never hashed
//!
//! ## Value Variants
//!
//! | Variant | Rust Type | Description |
//! |---------|-----------|-------------|
//! | Null | - | BSON null |
//! | Bool | bool | boolean |
//! | Int32 | i32 | 32-bit integer |
//! | Int64 | i64 | 64-bit integer |
//! | Double | f64 | 64-bit float |
//! | Text | &'a str | UTF-8 string |
//! | Arr | &'a [Bson] | array |
//! | Doc | &'a [(&'a str, Bson)] | document, insertion-ordered |

use bumpalo::Bump;
use std::fmt;

/// A literal BSON value, arena-allocated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bson<'a> {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Text(&'a str),
    Arr(&'a [Bson<'a>]),
    Doc(&'a [(&'a str, Bson<'a>)]),
}

impl<'a> Bson<'a> {
    /// Returns true if this value is BSON null.
    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    /// Builds an arena-allocated document from a slice of fields.
    pub fn doc_in(arena: &'a Bump, fields: &[(&'a str, Bson<'a>)]) -> Bson<'a> {
        Bson::Doc(arena.alloc_slice_copy(fields))
    }

    /// Builds an arena-allocated array from a slice of values.
    pub fn arr_in(arena: &'a Bump, values: &[Bson<'a>]) -> Bson<'a> {
        Bson::Arr(arena.alloc_slice_copy(values))
    }

    /// Looks up a top-level field of a document value.
    pub fn get_field(&self, name: &str) -> Option<Bson<'a>> {
        match self {
            Bson::Doc(fields) => fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v),
            _ => None,
        }
    }
}

impl fmt::Display for Bson<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Null => write!(f, "null"),
            Bson::Bool(b) => write!(f, "{}", b),
            Bson::Int32(n) => write!(f, "{}", n),
            Bson::Int64(n) => write!(f, "{}", n),
            Bson::Double(d) => write!(f, "{}", d),
            Bson::Text(s) => write!(f, "{:?}", s),
            Bson::Arr(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Bson::Doc(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}
