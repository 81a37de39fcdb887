//! # Reshapes and Groupings
//!
//! A `Reshape` is the payload of a `Project` stage: an ordered mapping from
//! field names (document form) or positions (array form) to either an
//! expression or a nested reshape. A `Grouped` is the payload of a `Group`
//! stage: an ordered mapping from leaf names to accumulators.
//!
//! The central operation is `set`, which writes a value at a (possibly deep)
//! path, creating intermediate containers as it goes. Merging two plans
//! builds its combined output documents almost entirely through `set`.

use super::exprop::{Accumulator, ExprOp};
use super::field::BsonField;
use super::var::DocVar;
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeValue<'a> {
    Expr(ExprOp<'a>),
    Shape(&'a Reshape<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reshape<'a> {
    Doc(&'a [(&'a str, ShapeValue<'a>)]),
    Arr(&'a [(u32, ShapeValue<'a>)]),
}

impl<'a> Reshape<'a> {
    pub fn empty_doc() -> Reshape<'a> {
        Reshape::Doc(&[])
    }

    pub fn empty_arr() -> Reshape<'a> {
        Reshape::Arr(&[])
    }

    /// Builds a document reshape from a slice of named values.
    pub fn doc_in(arena: &'a Bump, fields: &[(&'a str, ShapeValue<'a>)]) -> Reshape<'a> {
        Reshape::Doc(arena.alloc_slice_copy(fields))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Reshape::Doc(fields) => fields.is_empty(),
            Reshape::Arr(items) => items.is_empty(),
        }
    }

    /// Looks up one step.
    pub fn get(&self, step: BsonField<'a>) -> Option<ShapeValue<'a>> {
        match (self, step) {
            (Reshape::Doc(fields), BsonField::Name(name)) => {
                fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
            }
            (Reshape::Arr(items), BsonField::Index(idx)) => {
                items.iter().find(|(k, _)| *k == idx).map(|(_, v)| *v)
            }
            _ => None,
        }
    }

    /// Resolves a path to the expression it denotes. A path that continues
    /// past a variable leaf extends the variable; a path that continues past
    /// any other expression, stops inside a nested shape, or misses entirely
    /// resolves to nothing.
    pub fn get_expr(&self, arena: &'a Bump, path: &[BsonField<'a>]) -> Option<ExprOp<'a>> {
        let (head, rest) = path.split_first()?;
        match self.get(*head)? {
            ShapeValue::Expr(e) => {
                if rest.is_empty() {
                    Some(e)
                } else if let ExprOp::Var(v) = e {
                    Some(ExprOp::Var(v.concat(arena, DocVar::new(arena.alloc_slice_copy(rest)))))
                } else {
                    None
                }
            }
            ShapeValue::Shape(s) => {
                if rest.is_empty() {
                    None
                } else {
                    s.get_expr(arena, rest)
                }
            }
        }
    }

    fn with_entry(&self, arena: &'a Bump, step: BsonField<'a>, value: ShapeValue<'a>) -> Reshape<'a> {
        match (self, step) {
            (Reshape::Doc(fields), BsonField::Name(name)) => {
                let mut out = BumpVec::with_capacity_in(fields.len() + 1, arena);
                let mut replaced = false;
                for (k, v) in *fields {
                    if *k == name {
                        out.push((name, value));
                        replaced = true;
                    } else {
                        out.push((*k, *v));
                    }
                }
                if !replaced {
                    out.push((name, value));
                }
                Reshape::Doc(out.into_bump_slice())
            }
            (Reshape::Arr(items), BsonField::Index(idx)) => {
                let mut out = BumpVec::with_capacity_in(items.len() + 1, arena);
                let mut replaced = false;
                for (k, v) in *items {
                    if *k == idx {
                        out.push((idx, value));
                        replaced = true;
                    } else {
                        out.push((*k, *v));
                    }
                }
                if !replaced {
                    out.push((idx, value));
                }
                Reshape::Arr(out.into_bump_slice())
            }
            // Container kind disagrees with the step kind: restart with the
            // kind the step demands.
            (_, BsonField::Name(name)) => {
                Reshape::Doc(arena.alloc_slice_copy(&[(name, value)]))
            }
            (_, BsonField::Index(idx)) => {
                Reshape::Arr(arena.alloc_slice_copy(&[(idx, value)]))
            }
        }
    }

    /// Writes a value at `path`, creating intermediate containers as needed.
    /// An empty path returns the reshape unchanged.
    pub fn set(
        &self,
        arena: &'a Bump,
        path: &[BsonField<'a>],
        value: ShapeValue<'a>,
    ) -> Reshape<'a> {
        let Some((head, rest)) = path.split_first() else {
            return *self;
        };
        if rest.is_empty() {
            return self.with_entry(arena, *head, value);
        }
        let child = match self.get(*head) {
            Some(ShapeValue::Shape(s)) => *s,
            _ => match rest[0] {
                BsonField::Name(_) => Reshape::empty_doc(),
                BsonField::Index(_) => Reshape::empty_arr(),
            },
        };
        let rebuilt = child.set(arena, rest, value);
        self.with_entry(arena, *head, ShapeValue::Shape(arena.alloc(rebuilt)))
    }

    /// Enumerates every expression leaf as a (path, expression) pair, in
    /// definition order.
    pub fn get_all(&self) -> Vec<(Vec<BsonField<'a>>, ExprOp<'a>)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.get_all_into(&mut prefix, &mut out);
        out
    }

    fn get_all_into(
        &self,
        prefix: &mut Vec<BsonField<'a>>,
        out: &mut Vec<(Vec<BsonField<'a>>, ExprOp<'a>)>,
    ) {
        let mut visit = |step: BsonField<'a>, value: ShapeValue<'a>| {
            prefix.push(step);
            match value {
                ShapeValue::Expr(e) => out.push((prefix.clone(), e)),
                ShapeValue::Shape(s) => s.get_all_into(prefix, out),
            }
            prefix.pop();
        };
        match self {
            Reshape::Doc(fields) => {
                for (k, v) in *fields {
                    visit(BsonField::Name(*k), *v);
                }
            }
            Reshape::Arr(items) => {
                for (k, v) in *items {
                    visit(BsonField::Index(*k), *v);
                }
            }
        }
    }

    /// Rebuilds the reshape keeping only the expression leaves `keep`
    /// accepts. Nested shapes left without any leaf are dropped entirely.
    pub fn retain_leaves<F>(&self, arena: &'a Bump, keep: &F) -> Reshape<'a>
    where
        F: Fn(&[BsonField<'a>]) -> bool,
    {
        let mut prefix = Vec::new();
        self.retain_inner(arena, &mut prefix, keep)
    }

    fn retain_inner<F>(
        &self,
        arena: &'a Bump,
        prefix: &mut Vec<BsonField<'a>>,
        keep: &F,
    ) -> Reshape<'a>
    where
        F: Fn(&[BsonField<'a>]) -> bool,
    {
        match self {
            Reshape::Doc(fields) => {
                let mut out = BumpVec::with_capacity_in(fields.len(), arena);
                for (k, v) in *fields {
                    prefix.push(BsonField::Name(*k));
                    match v {
                        ShapeValue::Expr(e) => {
                            if keep(prefix) {
                                out.push((*k, ShapeValue::Expr(*e)));
                            }
                        }
                        ShapeValue::Shape(s) => {
                            let kept = s.retain_inner(arena, prefix, keep);
                            if !kept.is_empty() {
                                out.push((*k, ShapeValue::Shape(arena.alloc(kept))));
                            }
                        }
                    }
                    prefix.pop();
                }
                Reshape::Doc(out.into_bump_slice())
            }
            Reshape::Arr(items) => {
                let mut out = BumpVec::with_capacity_in(items.len(), arena);
                for (k, v) in *items {
                    prefix.push(BsonField::Index(*k));
                    match v {
                        ShapeValue::Expr(e) => {
                            if keep(prefix) {
                                out.push((*k, ShapeValue::Expr(*e)));
                            }
                        }
                        ShapeValue::Shape(s) => {
                            let kept = s.retain_inner(arena, prefix, keep);
                            if !kept.is_empty() {
                                out.push((*k, ShapeValue::Shape(arena.alloc(kept))));
                            }
                        }
                    }
                    prefix.pop();
                }
                Reshape::Arr(out.into_bump_slice())
            }
        }
    }

    /// Rewrites every document variable in every expression leaf.
    pub fn map_vars<F>(&self, arena: &'a Bump, subst: &mut F) -> Reshape<'a>
    where
        F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
    {
        match self {
            Reshape::Doc(fields) => {
                let mut out = BumpVec::with_capacity_in(fields.len(), arena);
                for (k, v) in *fields {
                    out.push((*k, Self::map_value(arena, *v, subst)));
                }
                Reshape::Doc(out.into_bump_slice())
            }
            Reshape::Arr(items) => {
                let mut out = BumpVec::with_capacity_in(items.len(), arena);
                for (k, v) in *items {
                    out.push((*k, Self::map_value(arena, *v, subst)));
                }
                Reshape::Arr(out.into_bump_slice())
            }
        }
    }

    fn map_value<F>(arena: &'a Bump, value: ShapeValue<'a>, subst: &mut F) -> ShapeValue<'a>
    where
        F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
    {
        match value {
            ShapeValue::Expr(e) => ShapeValue::Expr(e.map_vars(arena, subst)),
            ShapeValue::Shape(s) => ShapeValue::Shape(arena.alloc(s.map_vars(arena, subst))),
        }
    }

    /// Substitutes every variable leaf with a whole expression, failing if
    /// any variable has no image.
    pub fn try_substitute<F>(&self, arena: &'a Bump, lookup: &F) -> Option<Reshape<'a>>
    where
        F: Fn(DocVar<'a>) -> Option<ExprOp<'a>>,
    {
        match self {
            Reshape::Doc(fields) => {
                let mut out = BumpVec::with_capacity_in(fields.len(), arena);
                for (k, v) in *fields {
                    out.push((*k, Self::substitute_value(arena, *v, lookup)?));
                }
                Some(Reshape::Doc(out.into_bump_slice()))
            }
            Reshape::Arr(items) => {
                let mut out = BumpVec::with_capacity_in(items.len(), arena);
                for (k, v) in *items {
                    out.push((*k, Self::substitute_value(arena, *v, lookup)?));
                }
                Some(Reshape::Arr(out.into_bump_slice()))
            }
        }
    }

    fn substitute_value<F>(
        arena: &'a Bump,
        value: ShapeValue<'a>,
        lookup: &F,
    ) -> Option<ShapeValue<'a>>
    where
        F: Fn(DocVar<'a>) -> Option<ExprOp<'a>>,
    {
        Some(match value {
            ShapeValue::Expr(e) => ShapeValue::Expr(e.try_substitute(arena, lookup)?),
            ShapeValue::Shape(s) => ShapeValue::Shape(arena.alloc(s.try_substitute(arena, lookup)?)),
        })
    }

    /// Appends every variable referenced by any expression leaf.
    pub fn collect_vars(&self, out: &mut Vec<DocVar<'a>>) {
        for (_, expr) in self.get_all() {
            expr.collect_vars(out);
        }
    }
}

/// The aggregation payload of a `Group` stage: leaf names mapped to
/// accumulators, in definition order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grouped<'a>(pub &'a [(&'a str, Accumulator<'a>)]);

impl<'a> Grouped<'a> {
    pub fn new_in(arena: &'a Bump, entries: &[(&'a str, Accumulator<'a>)]) -> Grouped<'a> {
        Grouped(arena.alloc_slice_copy(entries))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.0.iter().map(|(k, _)| *k)
    }

    pub fn get(&self, name: &str) -> Option<Accumulator<'a>> {
        self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn map_vars<F>(&self, arena: &'a Bump, subst: &mut F) -> Grouped<'a>
    where
        F: FnMut(DocVar<'a>) -> Option<DocVar<'a>>,
    {
        let mut out = BumpVec::with_capacity_in(self.0.len(), arena);
        for (k, acc) in self.0 {
            out.push((*k, acc.map_vars(arena, subst)));
        }
        Grouped(out.into_bump_slice())
    }

    pub fn try_substitute<F>(&self, arena: &'a Bump, lookup: &F) -> Option<Grouped<'a>>
    where
        F: Fn(DocVar<'a>) -> Option<ExprOp<'a>>,
    {
        let mut out = BumpVec::with_capacity_in(self.0.len(), arena);
        for (k, acc) in self.0 {
            out.push((*k, acc.try_substitute(arena, lookup)?));
        }
        Some(Grouped(out.into_bump_slice()))
    }

    pub fn collect_vars(&self, out: &mut Vec<DocVar<'a>>) {
        for (_, acc) in self.0 {
            acc.expr().collect_vars(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Bson;

    fn name(n: &str) -> BsonField<'_> {
        BsonField::Name(n)
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let arena = Bump::new();
        let shape = Reshape::empty_doc().set(
            &arena,
            &[name("value"), name("lEft")],
            ShapeValue::Expr(ExprOp::Var(DocVar::root())),
        );
        let leaves = shape.get_all();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].0, vec![name("value"), name("lEft")]);
    }

    #[test]
    fn set_replaces_existing_entries_in_place() {
        let arena = Bump::new();
        let shape = Reshape::empty_doc()
            .set(&arena, &[name("a")], ShapeValue::Expr(ExprOp::Literal(Bson::Int32(1))))
            .set(&arena, &[name("b")], ShapeValue::Expr(ExprOp::Literal(Bson::Int32(2))))
            .set(&arena, &[name("a")], ShapeValue::Expr(ExprOp::Literal(Bson::Int32(3))));
        let leaves = shape.get_all();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].1, ExprOp::Literal(Bson::Int32(3)));
        assert_eq!(leaves[1].1, ExprOp::Literal(Bson::Int32(2)));
    }

    #[test]
    fn get_expr_extends_variable_leaves() {
        let arena = Bump::new();
        let shape = Reshape::empty_doc().set(
            &arena,
            &[name("a")],
            ShapeValue::Expr(ExprOp::field(&arena, "x")),
        );
        let resolved = shape.get_expr(&arena, &[name("a"), name("b")]).unwrap();
        match resolved {
            ExprOp::Var(v) => assert_eq!(v.to_string(), "ROOT.x.b"),
            other => panic!("expected extended var, got {:?}", other),
        }
    }

    #[test]
    fn retain_leaves_drops_emptied_subshapes() {
        let arena = Bump::new();
        let shape = Reshape::empty_doc()
            .set(&arena, &[name("keep")], ShapeValue::Expr(ExprOp::field(&arena, "x")))
            .set(
                &arena,
                &[name("sub"), name("drop")],
                ShapeValue::Expr(ExprOp::field(&arena, "y")),
            );
        let kept = shape.retain_leaves(&arena, &|path| path[0] == name("keep"));
        let leaves = kept.get_all();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].0, vec![name("keep")]);
    }
}
