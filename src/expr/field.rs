//! # Field Paths
//!
//! A `BsonField` is one step into a document: a named field or an array
//! position. A *field path* is a non-empty arena slice of steps. Paths are
//! the common currency of sort keys, selector keys, and reshape addressing.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use std::fmt;

/// One step of a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BsonField<'a> {
    Name(&'a str),
    Index(u32),
}

impl<'a> BsonField<'a> {
    /// Returns the field name if this step is a named leaf.
    pub fn as_name(&self) -> Option<&'a str> {
        match self {
            BsonField::Name(n) => Some(n),
            BsonField::Index(_) => None,
        }
    }
}

impl fmt::Display for BsonField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BsonField::Name(n) => write!(f, "{}", n),
            BsonField::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Concatenates two paths in the arena.
pub fn concat_paths<'a>(
    arena: &'a Bump,
    a: &[BsonField<'a>],
    b: &[BsonField<'a>],
) -> &'a [BsonField<'a>] {
    let mut out = BumpVec::with_capacity_in(a.len() + b.len(), arena);
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out.into_bump_slice()
}

/// Allocates a single-name path.
pub fn name_path<'a>(arena: &'a Bump, name: &'a str) -> &'a [BsonField<'a>] {
    arena.alloc_slice_copy(&[BsonField::Name(name)])
}

/// Renders a path in dotted form.
pub fn render_path(path: &[BsonField<'_>]) -> String {
    let mut out = String::new();
    for (i, step) in path.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&step.to_string());
    }
    out
}

/// Renames two key spaces onto a common, disjoint namespace of fresh leaves
/// (`_0`, `_1`, ...). Returns the two renamings in input order; together they
/// form a bijection from the original keys onto the fresh names.
///
/// Used when two `Group` stages are fused and their aggregate outputs must
/// coexist in one document without colliding.
pub fn flatten_mapping<'a>(
    arena: &'a Bump,
    left: &[&'a str],
    right: &[&'a str],
) -> (Vec<(&'a str, &'a str)>, Vec<(&'a str, &'a str)>) {
    let mut next = 0u32;
    let mut rename = |keys: &[&'a str]| {
        keys.iter()
            .map(|k| {
                let fresh: &'a str = arena.alloc_str(&format!("_{}", next));
                next += 1;
                (*k, fresh)
            })
            .collect::<Vec<_>>()
    };
    let lmap = rename(left);
    let rmap = rename(right);
    (lmap, rmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_paths_appends_in_order() {
        let arena = Bump::new();
        let a = name_path(&arena, "user");
        let b = arena.alloc_slice_copy(&[BsonField::Name("emails"), BsonField::Index(0)]);
        let joined = concat_paths(&arena, a, b);
        assert_eq!(render_path(joined), "user.emails.0");
    }

    #[test]
    fn flatten_mapping_assigns_disjoint_fresh_names() {
        let arena = Bump::new();
        let (lmap, rmap) = flatten_mapping(&arena, &["n", "total"], &["m"]);
        assert_eq!(lmap, vec![("n", "_0"), ("total", "_1")]);
        assert_eq!(rmap, vec![("m", "_2")]);
    }
}
