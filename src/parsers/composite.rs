//! Parsers composed from other parsers: enums, restrictions, unions.
//! Spec §4.C: "Enum parsers and restricted parsers compose by wrapping."

use regex::Regex;

use crate::diagnostics::Diagnostics;
use crate::value::Value;

use super::{CellParser, ParseInput, ParseMode, ParserRef, fail};

/// `{enum:L1|L2|...}` — rejects any value outside the enum label set.
#[derive(Debug, Clone)]
pub struct EnumParser {
    pub name: String,
    pub labels: Vec<String>,
}

impl CellParser for EnumParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        let text = match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => text.to_string(),
            (ParseInput::Value(Value::Str(s)), ParseMode::Parsed) => s.clone(),
            (ParseInput::Value(v), ParseMode::Parsed) => return fail(sink, v, "expected an enum label string"),
            (ParseInput::Text(t), ParseMode::Parsed) => return fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => return fail(sink, v, "expected text, not a typed value"),
        };
        if self.labels.iter().any(|l| l == &text) {
            (Value::Str(text.clone()), text)
        } else {
            fail(sink, &text, format!("not a member of enum `{}` ({})", self.name, self.labels.join("|")))
        }
    }

    fn type_name(&self) -> String {
        self.name.clone()
    }
}

/// Numeric `{min, max}` restriction, wrapping any numeric-producing parser.
#[derive(Debug, Clone)]
pub struct NumericRestriction {
    pub name: String,
    pub inner: ParserRef,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl CellParser for NumericRestriction {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        let (value, reformatted) = self.inner.parse(sink, input, mode);
        let Some(n) = value.as_float() else {
            return (value, reformatted);
        };
        if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) {
            return fail(sink, n, format!("out of range for `{}`", self.name));
        }
        (value, reformatted)
    }

    fn type_name(&self) -> String {
        self.name.clone()
    }
}

/// String `{minLen, maxLen, pattern, values}` restriction.
#[derive(Debug, Clone)]
pub struct StringRestriction {
    pub name: String,
    pub inner: ParserRef,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub pattern: Option<Regex>,
    pub values: Option<Vec<String>>,
}

impl CellParser for StringRestriction {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        let (value, reformatted) = self.inner.parse(sink, input, mode);
        let Some(s) = value.as_str() else {
            return (value, reformatted);
        };
        if self.min_len.is_some_and(|min| s.chars().count() < min) {
            return fail(sink, s, format!("shorter than minimum length for `{}`", self.name));
        }
        if self.max_len.is_some_and(|max| s.chars().count() > max) {
            return fail(sink, s, format!("longer than maximum length for `{}`", self.name));
        }
        if let Some(re) = &self.pattern {
            if !re.is_match(s) {
                return fail(sink, s, format!("does not match restriction pattern for `{}`", self.name));
            }
        }
        if let Some(values) = &self.values {
            if !values.iter().any(|v| v == s) {
                return fail(sink, s, format!("not one of the allowed values for `{}`", self.name));
            }
        }
        (value, reformatted)
    }

    fn type_name(&self) -> String {
        self.name.clone()
    }
}

/// Union restriction: a value matches if any branch parses it without
/// error. The first matching branch wins (checked via a silent diagnostics
/// sink per branch, spec §4.J "exploratory type parsing").
#[derive(Debug, Clone)]
pub struct UnionParser {
    pub name: String,
    pub branches: Vec<ParserRef>,
}

impl CellParser for UnionParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        for branch in &self.branches {
            let probe = Diagnostics::silent();
            let input_clone = match &input {
                ParseInput::Text(t) => ParseInput::Text(t),
                ParseInput::Value(v) => ParseInput::Value(v),
            };
            let (value, reformatted) = branch.parse(&probe, input_clone, mode);
            if !probe.has_errors() {
                return (value, reformatted);
            }
        }
        let shown: String = match input {
            ParseInput::Text(t) => t.to_string(),
            ParseInput::Value(v) => v.to_string(),
        };
        fail(sink, &shown, format!("does not match any branch of union `{}`", self.name))
    }

    fn type_name(&self) -> String {
        self.name.clone()
    }
}

/// `ratio` — requires the sum of its named `percent` fields to equal 1
/// within a tolerance (spec §4.D, §9: ε = 1e-9 per `SPEC_FULL.md`).
#[derive(Debug, Clone)]
pub struct RatioRestriction {
    pub inner: ParserRef,
    pub epsilon: f64,
}

impl RatioRestriction {
    pub const DEFAULT_EPSILON: f64 = 1e-9;
}

impl CellParser for RatioRestriction {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        let (value, reformatted) = self.inner.parse(sink, input, mode);
        if let Value::Record(fields) = &value {
            let sum: f64 = fields.values().filter_map(|v| v.as_float()).sum();
            if (sum - 1.0).abs() > self.epsilon {
                return fail(sink, sum, "ratio fields do not sum to 1");
            }
        }
        (value, reformatted)
    }

    fn type_name(&self) -> String {
        "ratio".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::numeric::IntegerParser;
    use std::sync::Arc;

    #[test]
    fn enum_rejects_unknown_label() {
        let sink = Diagnostics::new();
        let p = EnumParser { name: "Color".into(), labels: vec!["red".into(), "green".into()] };
        let (value, _) = p.parse(&sink, ParseInput::Text("blue"), ParseMode::Tsv);
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn numeric_restriction_enforces_range() {
        let sink = Diagnostics::new();
        let restriction = NumericRestriction {
            name: "level".into(),
            inner: Arc::new(IntegerParser::unbounded()),
            min: Some(1.0),
            max: Some(99.0),
        };
        let (value, _) = restriction.parse(&sink, ParseInput::Text("150"), ParseMode::Tsv);
        assert_eq!(value, Value::Null);
        assert_eq!(sink.error_count(), 1);
    }
}
