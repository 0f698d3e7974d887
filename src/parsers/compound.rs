//! Compound-type cell parsers: array, tuple, map, record.
//!
//! These back a column whose declared type is itself a brace construct
//! (spec §4.B) rather than an exploded set of flat columns (spec §4.E).
//! Plain TSV text has no literal syntax for nested structures — such a
//! cell is only meaningfully populated via an `=`-expression that
//! evaluates to the matching shape; `tsv` mode only accepts an empty cell
//! (absent/`nil`).

use indexmap::IndexMap;

use crate::diagnostics::Diagnostics;
use crate::value::Value;

use super::{CellParser, ParseInput, ParseMode, ParserRef, fail};

#[derive(Debug, Clone)]
pub struct ArrayParser {
    pub element: ParserRef,
}

impl CellParser for ArrayParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim().is_empty() => (Value::List(vec![]), String::new()),
            (ParseInput::Text(text), ParseMode::Tsv) => {
                fail(sink, text, "array cells must come from an exploded column or an expression")
            }
            (ParseInput::Value(Value::List(items)), ParseMode::Parsed) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let (v, _) = self.element.parse(sink, ParseInput::Value(item), ParseMode::Parsed);
                    out.push(v);
                }
                let reformatted = Value::List(out.clone()).to_string();
                (Value::List(out), reformatted)
            }
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected an array"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        format!("{{{}}}", self.element.type_name())
    }
}

#[derive(Debug, Clone)]
pub struct TupleParser {
    pub elements: Vec<ParserRef>,
}

impl CellParser for TupleParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim().is_empty() => {
                (Value::Tuple(vec![Value::Null; self.elements.len()]), String::new())
            }
            (ParseInput::Text(text), ParseMode::Tsv) => {
                fail(sink, text, "tuple cells must come from an exploded column or an expression")
            }
            (ParseInput::Value(Value::Tuple(items)), ParseMode::Parsed) => {
                if items.len() != self.elements.len() {
                    return fail(sink, Value::Tuple(items.clone()), "wrong tuple arity");
                }
                let mut out = Vec::with_capacity(items.len());
                for (item, parser) in items.iter().zip(&self.elements) {
                    let (v, _) = parser.parse(sink, ParseInput::Value(item), ParseMode::Parsed);
                    out.push(v);
                }
                let reformatted = Value::Tuple(out.clone()).to_string();
                (Value::Tuple(out), reformatted)
            }
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected a tuple"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        format!("{{{}}}", self.elements.iter().map(|p| p.type_name()).collect::<Vec<_>>().join(","))
    }
}

#[derive(Debug, Clone)]
pub struct MapParser {
    pub key: ParserRef,
    pub value: ParserRef,
}

impl CellParser for MapParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim().is_empty() => (Value::Map(IndexMap::new()), String::new()),
            (ParseInput::Text(text), ParseMode::Tsv) => {
                fail(sink, text, "map cells must come from an exploded column or an expression")
            }
            (ParseInput::Value(Value::Map(entries)), ParseMode::Parsed) => {
                let mut out = IndexMap::new();
                for (k, v) in entries {
                    let (_, key_text) = self.key.parse(sink, ParseInput::Value(&Value::Str(k.clone())), ParseMode::Parsed);
                    let (value, _) = self.value.parse(sink, ParseInput::Value(v), ParseMode::Parsed);
                    out.insert(key_text, value);
                }
                let reformatted = Value::Map(out.clone()).to_string();
                (Value::Map(out), reformatted)
            }
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected a map"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        format!("{{{}:{}}}", self.key.type_name(), self.value.type_name())
    }
}

#[derive(Debug, Clone)]
pub struct RecordParser {
    pub fields: Vec<(String, ParserRef)>,
}

impl CellParser for RecordParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim().is_empty() => {
                let mut m = IndexMap::new();
                for (name, _) in &self.fields {
                    m.insert(name.clone(), Value::Null);
                }
                (Value::Record(m), String::new())
            }
            (ParseInput::Text(text), ParseMode::Tsv) => {
                fail(sink, text, "record cells must come from an exploded column or an expression")
            }
            (ParseInput::Value(Value::Record(entries)), ParseMode::Parsed) => {
                let mut out = IndexMap::new();
                for (name, parser) in &self.fields {
                    let field_value = entries.get(name).unwrap_or(&Value::Null);
                    let (v, _) = parser.parse(sink, ParseInput::Value(field_value), ParseMode::Parsed);
                    out.insert(name.clone(), v);
                }
                let reformatted = Value::Record(out.clone()).to_string();
                (Value::Record(out), reformatted)
            }
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected a record"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        let body = self.fields.iter().map(|(n, p)| format!("{n}:{}", p.type_name())).collect::<Vec<_>>().join(",");
        format!("{{{body}}}")
    }
}

/// Untyped table — accepts any compound value unchanged.
#[derive(Debug, Clone, Copy)]
pub struct UntypedTableParser;

impl CellParser for UntypedTableParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim().is_empty() => (Value::Null, String::new()),
            (ParseInput::Value(v), ParseMode::Parsed) => (v.clone(), v.to_string()),
            (ParseInput::Text(text), ParseMode::Tsv) => fail(sink, text, "`{}` cells must come from an expression"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "{}".to_string()
    }
}
