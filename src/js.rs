//! # JavaScript Function AST
//!
//! Map, flat-map, and reduce ops carry JavaScript functions that the target
//! engine evaluates server-side. The planner never parses or simplifies user
//! JS: supplied function bodies are carried verbatim as `Raw` leaves, and the
//! planner only ever *composes* them structurally (`.call(...)` chains) when
//! fusing adjacent ops or wrapping them into engine job parameters.
//!
//! ## Conventions
//!
//! A map function takes the current key and returns a `[newKey, newValue]`
//! pair, with `this` bound to the current document. A flat-map function
//! returns an array of such pairs. A reduce function takes `(key, values)`
//! and returns a single value. These conventions are the only thing fusion
//! relies on.

use bumpalo::Bump;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsExpr<'a> {
    /// Verbatim JS source, carried untouched. Used for caller-supplied
    /// functions and the canned no-op map/reduce bodies.
    Raw(&'a str),
    Ident(&'a str),
    This,
    Null,
    Num(i64),
    Str(&'a str),
    Select(&'a JsExpr<'a>, &'a str),
    Index(&'a JsExpr<'a>, u32),
    Call(&'a JsExpr<'a>, &'a [JsExpr<'a>]),
    Array(&'a [JsExpr<'a>]),
    Fun(&'a JsFun<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JsFun<'a> {
    pub params: &'a [&'a str],
    pub body: &'a [JsStmt<'a>],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsStmt<'a> {
    Var(&'a str, JsExpr<'a>),
    Return(JsExpr<'a>),
    Expr(JsExpr<'a>),
}

impl<'a> JsExpr<'a> {
    /// True for expressions that need parentheses in member/call position.
    fn needs_parens(&self) -> bool {
        matches!(self, JsExpr::Raw(_) | JsExpr::Fun(_))
    }

    fn fmt_member_base(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_parens() {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for JsExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsExpr::Raw(src) => write!(f, "{}", src),
            JsExpr::Ident(name) => write!(f, "{}", name),
            JsExpr::This => write!(f, "this"),
            JsExpr::Null => write!(f, "null"),
            JsExpr::Num(n) => write!(f, "{}", n),
            JsExpr::Str(s) => write!(f, "{:?}", s),
            JsExpr::Select(base, name) => {
                base.fmt_member_base(f)?;
                write!(f, ".{}", name)
            }
            JsExpr::Index(base, idx) => {
                base.fmt_member_base(f)?;
                write!(f, "[{}]", idx)
            }
            JsExpr::Call(callee, args) => {
                callee.fmt_member_base(f)?;
                write!(f, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            JsExpr::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            JsExpr::Fun(fun) => {
                write!(f, "function(")?;
                for (i, p) in fun.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") {{")?;
                for stmt in fun.body {
                    write!(f, " {}", stmt)?;
                }
                write!(f, " }}")
            }
        }
    }
}

impl fmt::Display for JsStmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsStmt::Var(name, init) => write!(f, "var {} = {};", name, init),
            JsStmt::Return(e) => write!(f, "return {};", e),
            JsStmt::Expr(e) => write!(f, "{};", e),
        }
    }
}

/// The identity map job body: emits every document under its own key.
pub fn map_nop() -> JsExpr<'static> {
    JsExpr::Raw("function() { emit(this._id, this); }")
}

/// The identity reduce: assumes one value per key.
pub fn reduce_nop() -> JsExpr<'static> {
    JsExpr::Raw("function(key, values) { return values[0]; }")
}

/// The fold-left combining reduce: copies every attribute of every incoming
/// value into one document, so branch outputs sharing a key are unioned.
pub fn fold_left_reduce() -> JsExpr<'static> {
    JsExpr::Raw(
        "function(key, values) { var rez = {}; values.map(function(value) { for (var attr in value) { rez[attr] = value[attr]; } }); return rez; }",
    )
}

fn alloc_expr<'a>(arena: &'a Bump, e: JsExpr<'a>) -> &'a JsExpr<'a> {
    arena.alloc(e)
}

fn call<'a>(arena: &'a Bump, callee: JsExpr<'a>, args: &[JsExpr<'a>]) -> JsExpr<'a> {
    JsExpr::Call(alloc_expr(arena, callee), arena.alloc_slice_copy(args))
}

fn method<'a>(arena: &'a Bump, base: JsExpr<'a>, name: &'a str, args: &[JsExpr<'a>]) -> JsExpr<'a> {
    call(arena, JsExpr::Select(alloc_expr(arena, base), name), args)
}

fn fun<'a>(arena: &'a Bump, params: &[&'a str], body: &[JsStmt<'a>]) -> JsExpr<'a> {
    JsExpr::Fun(arena.alloc(JsFun {
        params: arena.alloc_slice_copy(params),
        body: arena.alloc_slice_copy(body),
    }))
}

/// `function(p) { return outer.call(p[1], p[0]); }` — applies a map-shaped
/// function to one `[key, value]` pair.
fn apply_to_pair<'a>(arena: &'a Bump, outer: JsExpr<'a>) -> JsExpr<'a> {
    let p = JsExpr::Ident("p");
    let applied = method(
        arena,
        outer,
        "call",
        &[
            JsExpr::Index(alloc_expr(arena, p), 1),
            JsExpr::Index(alloc_expr(arena, p), 0),
        ],
    );
    fun(arena, &["p"], &[JsStmt::Return(applied)])
}

/// Fuses two single-pair functions: the inner runs first, the outer consumes
/// its `[key, value]` result with key and value positions swapped into
/// `this`/argument form.
///
/// `function(key) { var rez = inner.call(this, key); return outer.call(rez[1], rez[0]); }`
pub fn compose_pair<'a>(arena: &'a Bump, inner: JsExpr<'a>, outer: JsExpr<'a>) -> JsExpr<'a> {
    let rez = JsExpr::Ident("rez");
    let run_inner = method(arena, inner, "call", &[JsExpr::This, JsExpr::Ident("key")]);
    let run_outer = method(
        arena,
        outer,
        "call",
        &[
            JsExpr::Index(alloc_expr(arena, rez), 1),
            JsExpr::Index(alloc_expr(arena, rez), 0),
        ],
    );
    fun(
        arena,
        &["key"],
        &[JsStmt::Var("rez", run_inner), JsStmt::Return(run_outer)],
    )
}

/// Fuses a pair-per-element function over a flat-map's output array.
///
/// `function(key) { return inner.call(this, key).map(function(p) { ... }); }`
pub fn compose_each<'a>(arena: &'a Bump, inner: JsExpr<'a>, outer: JsExpr<'a>) -> JsExpr<'a> {
    let run_inner = method(arena, inner, "call", &[JsExpr::This, JsExpr::Ident("key")]);
    let mapped = method(arena, run_inner, "map", &[apply_to_pair(arena, outer)]);
    fun(arena, &["key"], &[JsStmt::Return(mapped)])
}

/// Fuses two flat-maps: per-pair arrays are flattened with
/// `[].concat.apply(null, ...)`.
pub fn compose_concat<'a>(arena: &'a Bump, inner: JsExpr<'a>, outer: JsExpr<'a>) -> JsExpr<'a> {
    let run_inner = method(arena, inner, "call", &[JsExpr::This, JsExpr::Ident("key")]);
    let mapped = method(arena, run_inner, "map", &[apply_to_pair(arena, outer)]);
    let concat = JsExpr::Select(alloc_expr(arena, JsExpr::Array(&[])), "concat");
    let flattened = method(arena, concat, "apply", &[JsExpr::Null, mapped]);
    fun(arena, &["key"], &[JsStmt::Return(flattened)])
}

/// Wraps a map-convention function into an engine map job body:
/// `function() { emit.apply(null, f.call(this, this._id)); }`
pub fn wrap_map<'a>(arena: &'a Bump, f: JsExpr<'a>) -> JsExpr<'a> {
    let key = JsExpr::Select(alloc_expr(arena, JsExpr::This), "_id");
    let pair = method(arena, f, "call", &[JsExpr::This, key]);
    let emit = method(arena, JsExpr::Ident("emit"), "apply", &[JsExpr::Null, pair]);
    fun(arena, &[], &[JsStmt::Expr(emit)])
}

/// Wraps a flat-map-convention function into an engine map job body that
/// emits once per produced pair.
pub fn wrap_flat_map<'a>(arena: &'a Bump, f: JsExpr<'a>) -> JsExpr<'a> {
    let key = JsExpr::Select(alloc_expr(arena, JsExpr::This), "_id");
    let pairs = method(arena, f, "call", &[JsExpr::This, key]);
    let emit_pair = {
        let p = JsExpr::Ident("p");
        let emit = method(arena, JsExpr::Ident("emit"), "apply", &[JsExpr::Null, p]);
        fun(arena, &["p"], &[JsStmt::Expr(emit)])
    };
    let each = method(arena, pairs, "map", &[emit_pair]);
    fun(arena, &[], &[JsStmt::Expr(each)])
}

/// Wraps a map-convention function into a job finalizer:
/// `function(key, value) { return f.call(value, key)[1]; }`
pub fn wrap_finalizer<'a>(arena: &'a Bump, f: JsExpr<'a>) -> JsExpr<'a> {
    let applied = method(arena, f, "call", &[JsExpr::Ident("value"), JsExpr::Ident("key")]);
    let value = JsExpr::Index(alloc_expr(arena, applied), 1);
    fun(arena, &["key", "value"], &[JsStmt::Return(value)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_pair_threads_key_and_value_between_calls() {
        let arena = Bump::new();
        let inner = JsExpr::Raw("function(k) { return [k, this.x]; }");
        let outer = JsExpr::Raw("function(k) { return [k, this + 1]; }");
        let fused = compose_pair(&arena, inner, outer);
        assert_eq!(
            fused.to_string(),
            "function(key) { var rez = (function(k) { return [k, this.x]; }).call(this, key); \
             return (function(k) { return [k, this + 1]; }).call(rez[1], rez[0]); }"
        );
    }

    #[test]
    fn compose_concat_flattens_nested_pair_arrays() {
        let arena = Bump::new();
        let fused = compose_concat(&arena, JsExpr::Ident("i"), JsExpr::Ident("o"));
        assert_eq!(
            fused.to_string(),
            "function(key) { return [].concat.apply(null, i.call(this, key)\
             .map(function(p) { return o.call(p[1], p[0]); })); }"
        );
    }

    #[test]
    fn wrap_map_emits_the_produced_pair() {
        let arena = Bump::new();
        let wrapped = wrap_map(&arena, JsExpr::Ident("f"));
        assert_eq!(
            wrapped.to_string(),
            "function() { emit.apply(null, f.call(this, this._id)); }"
        );
    }
}
