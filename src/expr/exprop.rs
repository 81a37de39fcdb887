//! # Expression Algebra
//!
//! `ExprOp` is the expression language of pipeline stages: projections
//! compute them, groups aggregate over them, redactions branch on them.
//! Expressions are arena-allocated trees over document variables and
//! literals.
//!
//! The two traversals every optimizer pass is built on:
//!
//! - `map_vars` rewrites every `DocVar` leaf under a substitution (the
//!   reference rewriter uses this to relocate an op's payload under a base)
//! - `try_substitute` replaces every `DocVar` leaf with a whole expression,
//!   failing when a variable has no image (project inlining uses this)
//!
//! `Accumulator` is the separate family of group operators. Keeping it a
//! distinct type means a variable rewrite maps an accumulator's argument and
//! can never change the accumulator into a plain expression.

use super::var::DocVar;
use crate::bson::Bson;
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprOp<'a> {
    Literal(Bson<'a>),
    Var(DocVar<'a>),
    Add(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Subtract(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Multiply(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Divide(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Eq(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Neq(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Lt(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Lte(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Gt(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Gte(&'a ExprOp<'a>, &'a ExprOp<'a>),
    And(&'a [ExprOp<'a>]),
    Or(&'a [ExprOp<'a>]),
    Not(&'a ExprOp<'a>),
    Concat(&'a [ExprOp<'a>]),
    ToLower(&'a ExprOp<'a>),
    ToUpper(&'a ExprOp<'a>),
    IfNull(&'a ExprOp<'a>, &'a ExprOp<'a>),
    Cond(&'a ExprOp<'a>, &'a ExprOp<'a>, &'a ExprOp<'a>),
}

impl<'a> ExprOp<'a> {
    /// A reference to one top-level field.
    pub fn field(arena: &'a Bump, name: &'a str) -> ExprOp<'a> {
        ExprOp::Var(DocVar::field(arena, name))
    }

    /// Rewrites every document variable in the tree. `subst` returning
    /// `None` leaves the variable unchanged.
    pub fn map_vars<F>(&self, arena: &'a Bump, subst: &mut F) -> ExprOp<'a>
    where
        F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
    {
        let mk = |arena: &'a Bump, e: ExprOp<'a>| -> &'a ExprOp<'a> { arena.alloc(e) };
        match *self {
            ExprOp::Literal(v) => ExprOp::Literal(v),
            ExprOp::Var(v) => ExprOp::Var(subst(v).unwrap_or(v)),
            ExprOp::Add(a, b) => {
                ExprOp::Add(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::Subtract(a, b) => ExprOp::Subtract(
                mk(arena, a.map_vars(arena, subst)),
                mk(arena, b.map_vars(arena, subst)),
            ),
            ExprOp::Multiply(a, b) => ExprOp::Multiply(
                mk(arena, a.map_vars(arena, subst)),
                mk(arena, b.map_vars(arena, subst)),
            ),
            ExprOp::Divide(a, b) => ExprOp::Divide(
                mk(arena, a.map_vars(arena, subst)),
                mk(arena, b.map_vars(arena, subst)),
            ),
            ExprOp::Eq(a, b) => {
                ExprOp::Eq(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::Neq(a, b) => {
                ExprOp::Neq(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::Lt(a, b) => {
                ExprOp::Lt(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::Lte(a, b) => {
                ExprOp::Lte(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::Gt(a, b) => {
                ExprOp::Gt(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::Gte(a, b) => {
                ExprOp::Gte(mk(arena, a.map_vars(arena, subst)), mk(arena, b.map_vars(arena, subst)))
            }
            ExprOp::And(items) => ExprOp::And(Self::map_slice(arena, items, subst)),
            ExprOp::Or(items) => ExprOp::Or(Self::map_slice(arena, items, subst)),
            ExprOp::Not(e) => ExprOp::Not(mk(arena, e.map_vars(arena, subst))),
            ExprOp::Concat(items) => ExprOp::Concat(Self::map_slice(arena, items, subst)),
            ExprOp::ToLower(e) => ExprOp::ToLower(mk(arena, e.map_vars(arena, subst))),
            ExprOp::ToUpper(e) => ExprOp::ToUpper(mk(arena, e.map_vars(arena, subst))),
            ExprOp::IfNull(a, b) => ExprOp::IfNull(
                mk(arena, a.map_vars(arena, subst)),
                mk(arena, b.map_vars(arena, subst)),
            ),
            ExprOp::Cond(c, t, e) => ExprOp::Cond(
                mk(arena, c.map_vars(arena, subst)),
                mk(arena, t.map_vars(arena, subst)),
                mk(arena, e.map_vars(arena, subst)),
            ),
        }
    }

    fn map_slice<F>(arena: &'a Bump, items: &[ExprOp<'a>], subst: &mut F) -> &'a [ExprOp<'a>]
    where
        F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
    {
        let mut out = BumpVec::with_capacity_in(items.len(), arena);
        for item in items {
            out.push(item.map_vars(arena, subst));
        }
        out.into_bump_slice()
    }

    /// Replaces every document variable with a whole expression. Returns
    /// `None` as soon as any variable has no image, leaving the caller to
    /// keep the original tree.
    pub fn try_substitute<F>(&self, arena: &'a Bump, lookup: &F) -> Option<ExprOp<'a>>
    where
        F: Fn(DocVar<'a>) -> Option<ExprOp<'a>>,
    {
        let mk = |arena: &'a Bump, e: ExprOp<'a>| -> &'a ExprOp<'a> { arena.alloc(e) };
        Some(match *self {
            ExprOp::Literal(v) => ExprOp::Literal(v),
            ExprOp::Var(v) => lookup(v)?,
            ExprOp::Add(a, b) => ExprOp::Add(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Subtract(a, b) => ExprOp::Subtract(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Multiply(a, b) => ExprOp::Multiply(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Divide(a, b) => ExprOp::Divide(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Eq(a, b) => ExprOp::Eq(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Neq(a, b) => ExprOp::Neq(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Lt(a, b) => ExprOp::Lt(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Lte(a, b) => ExprOp::Lte(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Gt(a, b) => ExprOp::Gt(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Gte(a, b) => ExprOp::Gte(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::And(items) => ExprOp::And(Self::substitute_slice(arena, items, lookup)?),
            ExprOp::Or(items) => ExprOp::Or(Self::substitute_slice(arena, items, lookup)?),
            ExprOp::Not(e) => ExprOp::Not(mk(arena, e.try_substitute(arena, lookup)?)),
            ExprOp::Concat(items) => ExprOp::Concat(Self::substitute_slice(arena, items, lookup)?),
            ExprOp::ToLower(e) => ExprOp::ToLower(mk(arena, e.try_substitute(arena, lookup)?)),
            ExprOp::ToUpper(e) => ExprOp::ToUpper(mk(arena, e.try_substitute(arena, lookup)?)),
            ExprOp::IfNull(a, b) => ExprOp::IfNull(
                mk(arena, a.try_substitute(arena, lookup)?),
                mk(arena, b.try_substitute(arena, lookup)?),
            ),
            ExprOp::Cond(c, t, e) => ExprOp::Cond(
                mk(arena, c.try_substitute(arena, lookup)?),
                mk(arena, t.try_substitute(arena, lookup)?),
                mk(arena, e.try_substitute(arena, lookup)?),
            ),
        })
    }

    fn substitute_slice<F>(
        arena: &'a Bump,
        items: &[ExprOp<'a>],
        lookup: &F,
    ) -> Option<&'a [ExprOp<'a>]>
    where
        F: Fn(DocVar<'a>) -> Option<ExprOp<'a>>,
    {
        let mut out = BumpVec::with_capacity_in(items.len(), arena);
        for item in items {
            out.push(item.try_substitute(arena, lookup)?);
        }
        Some(out.into_bump_slice())
    }

    /// Appends every document variable in traversal order.
    pub fn collect_vars(&self, out: &mut Vec<DocVar<'a>>) {
        match *self {
            ExprOp::Literal(_) => {}
            ExprOp::Var(v) => out.push(v),
            ExprOp::Add(a, b)
            | ExprOp::Subtract(a, b)
            | ExprOp::Multiply(a, b)
            | ExprOp::Divide(a, b)
            | ExprOp::Eq(a, b)
            | ExprOp::Neq(a, b)
            | ExprOp::Lt(a, b)
            | ExprOp::Lte(a, b)
            | ExprOp::Gt(a, b)
            | ExprOp::Gte(a, b)
            | ExprOp::IfNull(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            ExprOp::And(items) | ExprOp::Or(items) | ExprOp::Concat(items) => {
                for item in items {
                    item.collect_vars(out);
                }
            }
            ExprOp::Not(e) | ExprOp::ToLower(e) | ExprOp::ToUpper(e) => e.collect_vars(out),
            ExprOp::Cond(c, t, e) => {
                c.collect_vars(out);
                t.collect_vars(out);
                e.collect_vars(out);
            }
        }
    }
}

/// Group operators. Each aggregates its argument expression over the rows of
/// one group. A variable rewrite maps the argument in place; the operator
/// itself is fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accumulator<'a> {
    AddToSet(&'a ExprOp<'a>),
    Push(&'a ExprOp<'a>),
    First(&'a ExprOp<'a>),
    Last(&'a ExprOp<'a>),
    Max(&'a ExprOp<'a>),
    Min(&'a ExprOp<'a>),
    Avg(&'a ExprOp<'a>),
    Sum(&'a ExprOp<'a>),
}

impl<'a> Accumulator<'a> {
    pub fn expr(&self) -> &'a ExprOp<'a> {
        match self {
            Accumulator::AddToSet(e)
            | Accumulator::Push(e)
            | Accumulator::First(e)
            | Accumulator::Last(e)
            | Accumulator::Max(e)
            | Accumulator::Min(e)
            | Accumulator::Avg(e)
            | Accumulator::Sum(e) => e,
        }
    }

    /// The same operator over a new argument.
    pub fn with_expr(&self, arena: &'a Bump, expr: ExprOp<'a>) -> Accumulator<'a> {
        let e = arena.alloc(expr);
        match self {
            Accumulator::AddToSet(_) => Accumulator::AddToSet(e),
            Accumulator::Push(_) => Accumulator::Push(e),
            Accumulator::First(_) => Accumulator::First(e),
            Accumulator::Last(_) => Accumulator::Last(e),
            Accumulator::Max(_) => Accumulator::Max(e),
            Accumulator::Min(_) => Accumulator::Min(e),
            Accumulator::Avg(_) => Accumulator::Avg(e),
            Accumulator::Sum(_) => Accumulator::Sum(e),
        }
    }

    pub fn map_vars<F>(&self, arena: &'a Bump, subst: &mut F) -> Accumulator<'a>
    where
        F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
    {
        self.with_expr(arena, self.expr().map_vars(arena, subst))
    }

    pub fn try_substitute<F>(&self, arena: &'a Bump, lookup: &F) -> Option<Accumulator<'a>>
    where
        F: Fn(DocVar<'a>) -> Option<ExprOp<'a>>,
    {
        Some(self.with_expr(arena, self.expr().try_substitute(arena, lookup)?))
    }
}
