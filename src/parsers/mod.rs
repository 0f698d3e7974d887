//! Cell parsers, spec §4.D.
//!
//! Each parser exposes a uniform `parse(sink, input, mode) -> (parsed,
//! reformatted)` contract. `tsv` mode expects the cell's raw text; `parsed`
//! mode expects an already-typed [`Value`] produced by expression
//! evaluation, and validates/coerces/reformats it.

pub mod composite;
pub mod compound;
pub mod numeric;
pub mod strings;

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::Diagnostics;
use crate::value::Value;

/// Which form a parser is being fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Raw textual cell content.
    Tsv,
    /// An already-typed value, produced by expression evaluation.
    Parsed,
}

/// Input to a cell parser: text in `tsv` mode, a `Value` in `parsed` mode.
#[derive(Debug, Clone)]
pub enum ParseInput<'a> {
    Text(&'a str),
    Value(&'a Value),
}

/// A resolved cell parser. Trait objects are shared (`Arc`) and owned by the
/// [`crate::registry::TypeRegistry`]; columns borrow by reference (spec
/// §9: "columns borrow by index").
pub trait CellParser: Send + Sync + fmt::Debug {
    /// Parse `input` (text in `Tsv` mode, a `Value` in `Parsed` mode) into a
    /// canonical `(parsed, reformatted)` pair. Errors are reported to
    /// `sink`, not returned — the parser always yields a best-effort value
    /// (spec §4.D, §7).
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String);

    /// The type name this parser was resolved for, used in diagnostics and
    /// `withColType` scoping.
    fn type_name(&self) -> String;
}

pub type ParserRef = Arc<dyn CellParser>;

/// Helper: report a failure and fall back to `Value::Null` with a
/// passthrough reformat (spec §4.D: "a best-effort value plus a marker in
/// `reformatted`").
pub fn fail(sink: &Diagnostics, raw: impl fmt::Display, err: impl fmt::Display) -> (Value, String) {
    let msg = sink.report(&raw, &err);
    (Value::Null, format!("<error: {msg}>"))
}
