//! Numeric cell parsers, spec §4.D.

use crate::diagnostics::Diagnostics;
use crate::value::{Value, format_float};

use super::{CellParser, ParseInput, ParseMode, fail};

/// `boolean`.
#[derive(Debug, Clone, Copy)]
pub struct BooleanParser;

impl CellParser for BooleanParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => match text.trim() {
                "true" => (Value::Bool(true), "true".to_string()),
                "false" => (Value::Bool(false), "false".to_string()),
                other => fail(sink, other, "expected `true` or `false`"),
            },
            (ParseInput::Value(Value::Bool(b)), ParseMode::Parsed) => (Value::Bool(*b), b.to_string()),
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected a boolean"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed boolean, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "boolean".to_string()
    }
}

/// `integer`, and sized two's-complement subranges (`int8`, `int16`,
/// `int32`, `int64`, `uint8`, `uint16`, `uint32`, `uint64`).
#[derive(Debug, Clone)]
pub struct IntegerParser {
    pub name: String,
    pub min: i64,
    pub max: i64,
}

impl IntegerParser {
    pub fn unbounded() -> Self {
        Self { name: "integer".to_string(), min: i64::MIN, max: i64::MAX }
    }

    pub fn sized(name: &str, min: i64, max: i64) -> Self {
        Self { name: name.to_string(), min, max }
    }

    fn in_range(&self, n: i64) -> bool {
        n >= self.min && n <= self.max
    }
}

impl CellParser for IntegerParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => {
                let trimmed = text.trim();
                match trimmed.parse::<i64>() {
                    Ok(n) if self.in_range(n) => (Value::Int(n), n.to_string()),
                    Ok(n) => fail(sink, n, format!("out of range for `{}`", self.name)),
                    Err(_) => fail(sink, trimmed, "not a valid integer"),
                }
            }
            (ParseInput::Value(v), ParseMode::Parsed) => match v {
                Value::Int(n) if self.in_range(*n) => (Value::Int(*n), n.to_string()),
                Value::Int(n) => fail(sink, n, format!("out of range for `{}`", self.name)),
                Value::Float(f) if f.fract() == 0.0 && self.in_range(*f as i64) => {
                    let n = *f as i64;
                    (Value::Int(n), n.to_string())
                }
                other => fail(sink, other, "expected an integer-valued number"),
            },
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        self.name.clone()
    }
}

/// `number` — IEEE 754 double.
#[derive(Debug, Clone, Copy)]
pub struct NumberParser;

impl CellParser for NumberParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => {
                let trimmed = text.trim();
                match trimmed.parse::<f64>() {
                    Ok(f) => (Value::Float(f), format_float(f)),
                    Err(_) => fail(sink, trimmed, "not a valid number"),
                }
            }
            (ParseInput::Value(v), ParseMode::Parsed) => match v.as_float() {
                Some(f) => (Value::Float(f), format_float(f)),
                None => fail(sink, v, "expected a number"),
            },
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "number".to_string()
    }
}

/// `percent` — accepts `N%`, `N.M%`, or `N/M` (`M != 0`), canonicalized to
/// an exact fraction in `[0,1]`-or-beyond stored as `Value::Float`.
///
/// A negative denominator (`-1/-2`) is rejected (spec §9, open question
/// resolved in `SPEC_FULL.md`).
#[derive(Debug, Clone, Copy)]
pub struct PercentParser;

impl PercentParser {
    fn parse_text(text: &str) -> Result<f64, String> {
        let t = text.trim();
        if let Some(stripped) = t.strip_suffix('%') {
            return stripped
                .trim()
                .parse::<f64>()
                .map(|n| n / 100.0)
                .map_err(|_| format!("`{t}` is not a valid percent"));
        }
        if let Some((num, den)) = t.split_once('/') {
            let n: f64 = num.trim().parse().map_err(|_| format!("`{t}` is not a valid fraction"))?;
            let d: f64 = den.trim().parse().map_err(|_| format!("`{t}` is not a valid fraction"))?;
            if d == 0.0 {
                return Err(format!("`{t}`: denominator is zero"));
            }
            if d < 0.0 {
                return Err(format!("`{t}`: negative denominator is not supported"));
            }
            return Ok(n / d);
        }
        Err(format!("`{t}` is not a percent, expected `N%` or `N/M`"))
    }
}

impl CellParser for PercentParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => match Self::parse_text(text) {
                Ok(f) => (Value::Float(f), format!("{}%", f * 100.0)),
                Err(e) => fail(sink, text, e),
            },
            (ParseInput::Value(v), ParseMode::Parsed) => match v.as_float() {
                Some(f) => (Value::Float(f), format!("{}%", f * 100.0)),
                None => fail(sink, v, "expected a percent-valued number"),
            },
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "percent".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_rejects_out_of_range_sized() {
        let sink = Diagnostics::new();
        let p = IntegerParser::sized("int8", -128, 127);
        let (value, _) = p.parse(&sink, ParseInput::Text("200"), ParseMode::Tsv);
        assert_eq!(value, Value::Null);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn percent_parses_fraction() {
        let sink = Diagnostics::new();
        let p = PercentParser;
        let (value, reformatted) = p.parse(&sink, ParseInput::Text("1/4"), ParseMode::Tsv);
        assert_eq!(value, Value::Float(0.25));
        assert_eq!(reformatted, "25%");
    }

    #[test]
    fn percent_rejects_negative_denominator() {
        let sink = Diagnostics::new();
        let p = PercentParser;
        let (value, _) = p.parse(&sink, ParseInput::Text("-1/-2"), ParseMode::Tsv);
        assert_eq!(value, Value::Null);
    }
}
