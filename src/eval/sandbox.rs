//! Sandboxed expression evaluator, spec §4.F, §5.
//!
//! A small tree-walking interpreter over [`Expr`], deliberately not an
//! embedded scripting engine (spec §1 Non-goals): no loops, no mutation, no
//! ambient I/O or filesystem capability. The only way an expression reaches
//! outside its own literals is through an [`EvalContext`], which the caller
//! (cell pipeline, validators) controls — this is the sandbox boundary.
//!
//! Every evaluation is metered against a [`Budget`] (spec §4.I: "a bounded
//! operation budget per scope, not wall-clock time") so a pathological
//! expression cannot hang the pipeline.

use thiserror::Error;

use crate::value::Value;

use super::ast::{BinOp, Expr, UnOp};
use super::parser;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("operation budget exhausted")]
    BudgetExhausted,
    #[error("unknown identifier `{0}`")]
    UnknownIdent(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
    #[error("wrong argument count for `{0}`: expected {1}")]
    WrongArgCount(String, String),
    #[error("type error: {0}")]
    TypeError(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    ParseError(String),
}

/// A per-evaluation operation budget (spec §4.I quotas: 1,000 for row-level
/// validators, 10,000 for file-level, 100,000 for package-level).
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    remaining: u32,
}

impl Budget {
    pub fn new(limit: u32) -> Self {
        Self { remaining: limit }
    }

    pub fn consume(&mut self) -> Result<(), EvalError> {
        if self.remaining == 0 {
            return Err(EvalError::BudgetExhausted);
        }
        self.remaining -= 1;
        Ok(())
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// The sandbox boundary: how an expression reaches outside its own literals.
/// Implemented by the cell pipeline (binding `self`/`row`) and by the
/// validator runner (additionally binding `rows`/`file`/`files`/`package`/
/// `rowIndex`/`fileName`/`packageId`/`ctx`).
pub trait EvalContext {
    /// Resolve `self.name`.
    fn self_field(&self, name: &str) -> Option<Value>;
    /// Resolve `self[i]` (1-based).
    fn self_index(&self, idx: i64) -> Option<Value>;
    /// Resolve a bare identifier other than `self` (`row`, `rows`, `file`,
    /// `files`, `package`, `rowIndex`, `fileName`, `packageId`, `ctx`).
    fn ident(&self, name: &str) -> Option<Value>;
    /// Resolve a function call this context provides that isn't one of the
    /// generic value helpers in [`builtin_call`] — e.g. `listMembersOfTag`,
    /// `isMemberOfTag`, which need package/tag data the evaluator itself has
    /// no notion of. Returning `None` falls through to "unknown function".
    fn call(&self, name: &str, args: &[Value], budget: &mut Budget) -> Option<Result<Value, EvalError>> {
        let _ = (name, args, budget);
        None
    }
}

/// A context binding nothing — useful for evaluating a closed expression
/// (no `self`/`row` references) such as a manifest-level constant.
pub struct EmptyContext;

impl EvalContext for EmptyContext {
    fn self_field(&self, _name: &str) -> Option<Value> {
        None
    }
    fn self_index(&self, _idx: i64) -> Option<Value> {
        None
    }
    fn ident(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Binds `self` to a single element, for the predicate sub-expressions
/// accepted by `filter`/`find`/`all`/`any`/`none`/`unique`/`groupBy` as
/// string-literal arguments (see module docs on the predicate design). All
/// other identifiers fall through to the enclosing context. Elements with
/// no fields of their own (scalars in a plain list) are reached through the
/// bare identifier `it` instead, since `self` alone is not valid grammar
/// without a following `.field` or `[index]`.
struct ElementContext<'a> {
    element: &'a Value,
    outer: &'a dyn EvalContext,
}

impl EvalContext for ElementContext<'_> {
    fn self_field(&self, name: &str) -> Option<Value> {
        match self.element {
            Value::Record(m) | Value::Map(m) => m.get(name).cloned(),
            _ => None,
        }
    }

    fn self_index(&self, idx: i64) -> Option<Value> {
        match self.element {
            Value::Tuple(items) | Value::List(items) => {
                let i = usize::try_from(idx - 1).ok()?;
                items.get(i).cloned()
            }
            _ => None,
        }
    }

    fn ident(&self, name: &str) -> Option<Value> {
        if name == "it" {
            Some(self.element.clone())
        } else {
            self.outer.ident(name)
        }
    }

    fn call(&self, name: &str, args: &[Value], budget: &mut Budget) -> Option<Result<Value, EvalError>> {
        self.outer.call(name, args, budget)
    }
}

/// Parse and evaluate a predicate expression (carried as a string-literal
/// call argument) against a single element, returning its boolean result.
fn eval_predicate(predicate: &str, element: &Value, ctx: &dyn EvalContext, budget: &mut Budget) -> Result<bool, EvalError> {
    let expr = parser::parse(predicate).map_err(|e| EvalError::ParseError(e.to_string()))?;
    let elem_ctx = ElementContext { element, outer: ctx };
    let result = eval(&expr, &elem_ctx, budget)?;
    match result {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeError(format!("predicate must yield a boolean, got {}", other.type_name()))),
    }
}

fn eval_field_expr(expr_text: &str, element: &Value, ctx: &dyn EvalContext, budget: &mut Budget) -> Result<Value, EvalError> {
    let expr = parser::parse(expr_text).map_err(|e| EvalError::ParseError(e.to_string()))?;
    let elem_ctx = ElementContext { element, outer: ctx };
    eval(&expr, &elem_ctx, budget)
}

/// Parse an expression body (caller strips the leading `=`, spec §4.F) and
/// evaluate it to a `Value`. This is the entry point used by the cell
/// pipeline and the validator runner alike.
pub fn eval_source(source: &str, ctx: &dyn EvalContext, budget: &mut Budget) -> Result<Value, EvalError> {
    let expr = parser::parse(source).map_err(|e| EvalError::ParseError(e.to_string()))?;
    eval(&expr, ctx, budget)
}

pub fn eval(expr: &Expr, ctx: &dyn EvalContext, budget: &mut Budget) -> Result<Value, EvalError> {
    budget.consume()?;
    match expr {
        Expr::Nil => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::SelfField(name) => ctx.self_field(name).ok_or_else(|| EvalError::UnknownField(name.clone())),
        Expr::SelfIndex(idx) => ctx.self_index(*idx).ok_or(EvalError::IndexOutOfRange(*idx)),
        Expr::Ident(name) => ctx.ident(name).ok_or_else(|| EvalError::UnknownIdent(name.clone())),
        Expr::FieldAccess { base, field } => {
            let base_val = eval(base, ctx, budget)?;
            match &base_val {
                Value::Record(m) | Value::Map(m) => {
                    m.get(field).cloned().ok_or_else(|| EvalError::UnknownField(field.clone()))
                }
                other => Err(EvalError::TypeError(format!("cannot access field `{field}` on {}", other.type_name()))),
            }
        }
        Expr::Index { base, index } => {
            let base_val = eval(base, ctx, budget)?;
            let index_val = eval(index, ctx, budget)?;
            index_into(&base_val, &index_val)
        }
        Expr::UnaryOp { op, expr } => {
            let v = eval(expr, ctx, budget)?;
            apply_unop(*op, &v)
        }
        Expr::BinaryOp { op: BinOp::And, lhs, rhs } => {
            let l = eval(lhs, ctx, budget)?;
            match l {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => eval(rhs, ctx, budget),
                other => Err(EvalError::TypeError(format!("`&&` expects booleans, got {}", other.type_name()))),
            }
        }
        Expr::BinaryOp { op: BinOp::Or, lhs, rhs } => {
            let l = eval(lhs, ctx, budget)?;
            match l {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => eval(rhs, ctx, budget),
                other => Err(EvalError::TypeError(format!("`||` expects booleans, got {}", other.type_name()))),
            }
        }
        Expr::BinaryOp { op, lhs, rhs } => {
            let l = eval(lhs, ctx, budget)?;
            let r = eval(rhs, ctx, budget)?;
            apply_binop(*op, &l, &r)
        }
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, ctx, budget)?);
            }
            if let Some(result) = builtin_call(name, &values, ctx, budget) {
                return result;
            }
            if let Some(result) = ctx.call(name, &values, budget) {
                return result;
            }
            Err(EvalError::UnknownFunction(name.clone()))
        }
    }
}

fn index_into(base: &Value, index: &Value) -> Result<Value, EvalError> {
    match (base, index) {
        (Value::List(items) | Value::Tuple(items), Value::Int(i)) => {
            let idx = usize::try_from(*i - 1).map_err(|_| EvalError::IndexOutOfRange(*i))?;
            items.get(idx).cloned().ok_or(EvalError::IndexOutOfRange(*i))
        }
        (Value::Map(m) | Value::Record(m), Value::Str(key)) => {
            m.get(key).cloned().ok_or_else(|| EvalError::UnknownField(key.clone()))
        }
        (other, _) => Err(EvalError::TypeError(format!("cannot index into {}", other.type_name()))),
    }
}

fn apply_unop(op: UnOp, v: &Value) -> Result<Value, EvalError> {
    match (op, v) {
        (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, other) => Err(EvalError::TypeError(format!("cannot apply {op:?} to {}", other.type_name()))),
    }
}

fn numeric_pair(l: &Value, r: &Value) -> Option<(f64, f64, bool)> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some((*a as f64, *b as f64, true)),
        (Value::Int(a), Value::Float(b)) => Some((*a as f64, *b, false)),
        (Value::Float(a), Value::Int(b)) => Some((*a, *b as f64, false)),
        (Value::Float(a), Value::Float(b)) => Some((*a, *b, false)),
        _ => None,
    }
}

fn apply_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div | Mod => {
            let (a, b, both_int) = numeric_pair(l, r)
                .ok_or_else(|| EvalError::TypeError(format!("arithmetic on {} and {}", l.type_name(), r.type_name())))?;
            match op {
                Add if both_int => Ok(Value::Int(a as i64 + b as i64)),
                Add => Ok(Value::Float(a + b)),
                Sub if both_int => Ok(Value::Int(a as i64 - b as i64)),
                Sub => Ok(Value::Float(a - b)),
                Mul if both_int => Ok(Value::Int(a as i64 * b as i64)),
                Mul => Ok(Value::Float(a * b)),
                Div => {
                    if b == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    Ok(Value::Float(a / b))
                }
                Mod => {
                    if b == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    if both_int {
                        Ok(Value::Int(a as i64 % b as i64))
                    } else {
                        Ok(Value::Float(a % b))
                    }
                }
                _ => unreachable!(),
            }
        }
        Concat => Ok(Value::Str(format!("{l}{r}"))),
        Eq => Ok(Value::Bool(values_equal(l, r))),
        Ne => Ok(Value::Bool(!values_equal(l, r))),
        Lt | Le | Gt | Ge => {
            let ordering = compare_values(l, r)?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And | Or => unreachable!("short-circuited in eval()"),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    if let Some((a, b, _)) = numeric_pair(l, r) {
        return a == b;
    }
    l == r
}

fn compare_values(l: &Value, r: &Value) -> Result<std::cmp::Ordering, EvalError> {
    if let Some((a, b, _)) = numeric_pair(l, r) {
        return a.partial_cmp(&b).ok_or_else(|| EvalError::TypeError("cannot compare NaN".to_string()));
    }
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        _ => Err(EvalError::TypeError(format!("cannot compare {} and {}", l.type_name(), r.type_name()))),
    }
}

fn as_list(v: &Value) -> Result<&[Value], EvalError> {
    match v {
        Value::List(items) | Value::Tuple(items) => Ok(items),
        other => Err(EvalError::TypeError(format!("expected a list, got {}", other.type_name()))),
    }
}

fn as_predicate_str(v: &Value) -> Result<&str, EvalError> {
    v.as_str().ok_or_else(|| EvalError::TypeError("expected a predicate expression string".to_string()))
}

fn numeric_sum(items: &[Value], field: Option<&str>, ctx: &dyn EvalContext, budget: &mut Budget) -> Result<f64, EvalError> {
    let mut total = 0.0;
    for item in items {
        let v = match field {
            Some(expr_text) => eval_field_expr(expr_text, item, ctx, budget)?,
            None => item.clone(),
        };
        total += v.as_float().ok_or_else(|| EvalError::TypeError(format!("expected a number, got {}", v.type_name())))?;
    }
    Ok(total)
}

/// Generic list/aggregate helpers (spec §4.I) that operate purely on
/// `Value`, plus a small set of scalar conveniences. `listMembersOfTag` and
/// `isMemberOfTag` are not here — they need package/tag data only the
/// caller's [`EvalContext`] has, so they fall through to `ctx.call`.
fn builtin_call(name: &str, args: &[Value], ctx: &dyn EvalContext, budget: &mut Budget) -> Option<Result<Value, EvalError>> {
    let result = match name {
        "abs" => args.first().and_then(Value::as_float).map(|f| Ok(Value::Float(f.abs()))),
        "floor" => args.first().and_then(Value::as_float).map(|f| Ok(Value::Int(f.floor() as i64))),
        "ceil" => args.first().and_then(Value::as_float).map(|f| Ok(Value::Int(f.ceil() as i64))),
        "round" => args.first().and_then(Value::as_float).map(|f| Ok(Value::Int(f.round() as i64))),
        "len" => Some(match args.first() {
            Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
            Some(Value::List(items) | Value::Tuple(items)) => Ok(Value::Int(items.len() as i64)),
            Some(Value::Map(m) | Value::Record(m)) => Ok(Value::Int(m.len() as i64)),
            Some(other) => Err(EvalError::TypeError(format!("`len` does not apply to {}", other.type_name()))),
            None => Err(EvalError::WrongArgCount("len".to_string(), "1".to_string())),
        }),
        "unique" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("unique".to_string(), "1 or 2".to_string()))?)?;
            let key_expr = args.get(1).map(as_predicate_str).transpose()?;
            let mut seen = Vec::new();
            let mut out = Vec::new();
            for item in items {
                let key = match key_expr {
                    Some(expr_text) => eval_field_expr(expr_text, item, ctx, budget)?,
                    None => item.clone(),
                };
                if !seen.contains(&key) {
                    seen.push(key);
                    out.push(item.clone());
                }
            }
            Ok(Value::List(out))
        })()),
        "sum" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("sum".to_string(), "1 or 2".to_string()))?)?;
            let field = args.get(1).map(as_predicate_str).transpose()?;
            Ok(Value::Float(numeric_sum(items, field, ctx, budget)?))
        })()),
        "avg" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("avg".to_string(), "1 or 2".to_string()))?)?;
            if items.is_empty() {
                return Ok(Value::Null);
            }
            let field = args.get(1).map(as_predicate_str).transpose()?;
            Ok(Value::Float(numeric_sum(items, field, ctx, budget)? / items.len() as f64))
        })()),
        "min" | "max" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount(name.to_string(), "1 or 2".to_string()))?)?;
            let field = args.get(1).map(as_predicate_str).transpose()?;
            let mut best: Option<f64> = None;
            for item in items {
                let v = match field {
                    Some(expr_text) => eval_field_expr(expr_text, item, ctx, budget)?,
                    None => item.clone(),
                };
                let f = v.as_float().ok_or_else(|| EvalError::TypeError(format!("expected a number, got {}", v.type_name())))?;
                best = Some(match (best, name) {
                    (None, _) => f,
                    (Some(b), "min") => b.min(f),
                    (Some(b), _) => b.max(f),
                });
            }
            match best {
                Some(f) => Ok(Value::Float(f)),
                None => Ok(Value::Null),
            }
        })()),
        "count" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("count".to_string(), "1 or 2".to_string()))?)?;
            match args.get(1) {
                None => Ok(Value::Int(items.len() as i64)),
                Some(pred) => {
                    let predicate = as_predicate_str(pred)?;
                    let mut n = 0i64;
                    for item in items {
                        if eval_predicate(predicate, item, ctx, budget)? {
                            n += 1;
                        }
                    }
                    Ok(Value::Int(n))
                }
            }
        })()),
        "all" | "any" | "none" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount(name.to_string(), "2".to_string()))?)?;
            let predicate = as_predicate_str(args.get(1).ok_or_else(|| EvalError::WrongArgCount(name.to_string(), "2".to_string()))?)?;
            let mut matched = 0usize;
            for item in items {
                if eval_predicate(predicate, item, ctx, budget)? {
                    matched += 1;
                }
            }
            let result = match name {
                "all" => matched == items.len(),
                "any" => matched > 0,
                _ => matched == 0,
            };
            Ok(Value::Bool(result))
        })()),
        "filter" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("filter".to_string(), "2".to_string()))?)?;
            let predicate = as_predicate_str(args.get(1).ok_or_else(|| EvalError::WrongArgCount("filter".to_string(), "2".to_string()))?)?;
            let mut out = Vec::new();
            for item in items {
                if eval_predicate(predicate, item, ctx, budget)? {
                    out.push(item.clone());
                }
            }
            Ok(Value::List(out))
        })()),
        "find" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("find".to_string(), "2".to_string()))?)?;
            let predicate = as_predicate_str(args.get(1).ok_or_else(|| EvalError::WrongArgCount("find".to_string(), "2".to_string()))?)?;
            for item in items {
                if eval_predicate(predicate, item, ctx, budget)? {
                    return Ok(item.clone());
                }
            }
            Ok(Value::Null)
        })()),
        "lookup" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("lookup".to_string(), "3".to_string()))?)?;
            let key = args.get(1).ok_or_else(|| EvalError::WrongArgCount("lookup".to_string(), "3".to_string()))?;
            let field_expr = as_predicate_str(args.get(2).ok_or_else(|| EvalError::WrongArgCount("lookup".to_string(), "3".to_string()))?)?;
            for item in items {
                let v = eval_field_expr(field_expr, item, ctx, budget)?;
                if values_equal(&v, key) {
                    return Ok(item.clone());
                }
            }
            Ok(Value::Null)
        })()),
        "groupBy" => Some((|| {
            let items = as_list(args.first().ok_or_else(|| EvalError::WrongArgCount("groupBy".to_string(), "2".to_string()))?)?;
            let field_expr = as_predicate_str(args.get(1).ok_or_else(|| EvalError::WrongArgCount("groupBy".to_string(), "2".to_string()))?)?;
            let mut groups: indexmap::IndexMap<String, Value> = indexmap::IndexMap::new();
            for item in items {
                let key_val = eval_field_expr(field_expr, item, ctx, budget)?;
                let key = key_val.key_string().unwrap_or_else(|| key_val.to_string());
                match groups.get_mut(&key) {
                    Some(Value::List(list)) => list.push(item.clone()),
                    _ => {
                        groups.insert(key, Value::List(vec![item.clone()]));
                    }
                }
            }
            Ok(Value::Map(groups))
        })()),
        _ => None,
    };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopContext;
    impl EvalContext for NoopContext {
        fn self_field(&self, _name: &str) -> Option<Value> {
            None
        }
        fn self_index(&self, _idx: i64) -> Option<Value> {
            None
        }
        fn ident(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn evaluates_arithmetic() {
        let v = eval_source("1 + 2 * 3", &NoopContext, &mut Budget::new(100)).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn budget_is_exhausted_on_deep_expression() {
        let mut budget = Budget::new(2);
        let err = eval_source("1 + 2 + 3", &NoopContext, &mut budget).unwrap_err();
        assert_eq!(err, EvalError::BudgetExhausted);
    }

    #[test]
    fn sum_over_list_with_field_predicate() {
        let mut m1 = indexmap::IndexMap::new();
        m1.insert("price".to_string(), Value::Int(10));
        let mut m2 = indexmap::IndexMap::new();
        m2.insert("price".to_string(), Value::Int(5));
        let list = Value::List(vec![Value::Record(m1), Value::Record(m2)]);
        let result = builtin_call("sum", &[list, Value::Str("self.price".to_string())], &NoopContext, &mut Budget::new(1000))
            .unwrap()
            .unwrap();
        assert_eq!(result, Value::Float(15.0));
    }

    #[test]
    fn filter_keeps_matching_elements() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = builtin_call("filter", &[list, Value::Str("it > 1".to_string())], &NoopContext, &mut Budget::new(1000))
            .unwrap()
            .unwrap();
        assert_eq!(result, Value::List(vec![Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn and_short_circuits() {
        let expr = parser::parse("false && self.missing").unwrap();
        let v = eval(&expr, &NoopContext, &mut Budget::new(10)).unwrap();
        assert_eq!(v, Value::Bool(false));
    }
}
