//! # Selectors
//!
//! A `Selector` is the predicate language of `Match` stages: a tree of
//! boolean connectives over per-field conditions, plus the `Where` escape
//! hatch carrying a JS predicate. `Where` (even buried inside connectives)
//! makes a selector non-pipelinable, forcing the match down the map/reduce
//! path during lowering.

use super::field::BsonField;
use super::var::DocVar;
use crate::bson::Bson;
use crate::js::JsExpr;
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector<'a> {
    And(&'a [Selector<'a>]),
    Or(&'a [Selector<'a>]),
    Nor(&'a [Selector<'a>]),
    /// Per-field conditions, all of which must hold.
    Doc(&'a [(&'a [BsonField<'a>], Condition<'a>)]),
    /// A JS predicate evaluated per document. Non-pipelinable.
    Where(JsExpr<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition<'a> {
    Eq(Bson<'a>),
    Neq(Bson<'a>),
    Gt(Bson<'a>),
    Gte(Bson<'a>),
    Lt(Bson<'a>),
    Lte(Bson<'a>),
    In(&'a [Bson<'a>]),
    Exists(bool),
    Type(i32),
    Regex(&'a str),
    Size(u32),
}

impl<'a> Selector<'a> {
    /// The selector matching every document.
    pub fn everything() -> Selector<'a> {
        Selector::Doc(&[])
    }

    /// One condition on one top-level field.
    pub fn field(arena: &'a Bump, name: &'a str, cond: Condition<'a>) -> Selector<'a> {
        let path: &'a [BsonField<'a>] = arena.alloc_slice_copy(&[BsonField::Name(name)]);
        Selector::Doc(arena.alloc_slice_copy(&[(path, cond)]))
    }

    /// Conjunction, flattening nested `And`s so repeated fusion does not
    /// build left-leaning towers.
    pub fn and(arena: &'a Bump, a: Selector<'a>, b: Selector<'a>) -> Selector<'a> {
        let mut parts = BumpVec::new_in(arena);
        match a {
            Selector::And(items) => parts.extend_from_slice(items),
            other => parts.push(other),
        }
        match b {
            Selector::And(items) => parts.extend_from_slice(items),
            other => parts.push(other),
        }
        Selector::And(parts.into_bump_slice())
    }

    /// True if a JS `Where` predicate appears anywhere in the tree.
    pub fn contains_where(&self) -> bool {
        match self {
            Selector::Where(_) => true,
            Selector::And(items) | Selector::Or(items) | Selector::Nor(items) => {
                items.iter().any(Selector::contains_where)
            }
            Selector::Doc(_) => false,
        }
    }

    /// Rewrites every field key. `subst` returning `None` leaves a key
    /// unchanged.
    pub fn map_fields<F>(&self, arena: &'a Bump, subst: &mut F) -> Selector<'a>
    where
        F: FnMut(&'a [BsonField<'a>]) -> Option<&'a [BsonField<'a>]>,
    {
        match self {
            Selector::Where(js) => Selector::Where(*js),
            Selector::Doc(entries) => {
                let mut out = BumpVec::with_capacity_in(entries.len(), arena);
                for &(path, cond) in *entries {
                    out.push((subst(path).unwrap_or(path), cond));
                }
                Selector::Doc(out.into_bump_slice())
            }
            Selector::And(items) => Selector::And(Self::map_fields_slice(arena, items, subst)),
            Selector::Or(items) => Selector::Or(Self::map_fields_slice(arena, items, subst)),
            Selector::Nor(items) => Selector::Nor(Self::map_fields_slice(arena, items, subst)),
        }
    }

    fn map_fields_slice<F>(
        arena: &'a Bump,
        items: &[Selector<'a>],
        subst: &mut F,
    ) -> &'a [Selector<'a>]
    where
        F: FnMut(&'a [BsonField<'a>]) -> Option<&'a [BsonField<'a>]>,
    {
        let mut out = BumpVec::with_capacity_in(items.len(), arena);
        for item in items {
            out.push(item.map_fields(arena, subst));
        }
        out.into_bump_slice()
    }

    /// Appends every field key, as a document variable, in traversal order.
    pub fn collect_fields(&self, out: &mut Vec<DocVar<'a>>) {
        match self {
            Selector::Where(_) => {}
            Selector::Doc(entries) => {
                for &(path, _) in *entries {
                    out.push(DocVar::new(path));
                }
            }
            Selector::And(items) | Selector::Or(items) | Selector::Nor(items) => {
                for item in *items {
                    item.collect_fields(out);
                }
            }
        }
    }
}
