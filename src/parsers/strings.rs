//! String-family cell parsers, spec §4.D.

use std::sync::OnceLock;

use regex::Regex;

use crate::diagnostics::Diagnostics;
use crate::typespec;
use crate::value::Value;

use super::{CellParser, ParseInput, ParseMode, fail};

/// Unescape `\t`, `\n`, `\\` the way `text`/`markdown` cells do.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse of [`unescape`], for canonical reformatting.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Bare `string` — no escape processing, text is taken verbatim.
#[derive(Debug, Clone, Copy)]
pub struct StringParser;

impl CellParser for StringParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => (Value::Str(text.to_string()), text.to_string()),
            (ParseInput::Value(Value::Str(s)), ParseMode::Parsed) => (Value::Str(s.clone()), s.clone()),
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected a string"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "string".to_string()
    }
}

/// `text` (and `markdown`, which shares the same escape handling and
/// differs only in name for documentation/UI purposes).
#[derive(Debug, Clone, Copy)]
pub struct TextParser {
    pub markdown: bool,
}

impl CellParser for TextParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => {
                let unescaped = unescape(text);
                (Value::Str(unescaped), text.to_string())
            }
            (ParseInput::Value(Value::Str(s)), ParseMode::Parsed) => (Value::Str(s.clone()), escape(s)),
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected a string"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        if self.markdown { "markdown".to_string() } else { "text".to_string() }
    }
}

/// A string validated against a fixed pattern: `identifier`, `name`,
/// `http`, `version`, `cmp_version`, `comment`.
#[derive(Debug, Clone)]
pub struct PatternStringParser {
    pub name: &'static str,
    pattern: &'static str,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_ '\-]*$").unwrap())
}

fn http_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://\S+$").unwrap())
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z.\-]+)?(\+[0-9A-Za-z.\-]+)?$").unwrap())
}

fn cmp_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(=|>=|<=|>|<|~|\^)\d+\.\d+\.\d+$").unwrap())
}

impl PatternStringParser {
    pub fn identifier() -> Self {
        Self { name: "identifier", pattern: "" }
    }
    pub fn name_type() -> Self {
        Self { name: "name", pattern: "" }
    }
    pub fn http() -> Self {
        Self { name: "http", pattern: "" }
    }
    pub fn version() -> Self {
        Self { name: "version", pattern: "" }
    }
    pub fn cmp_version() -> Self {
        Self { name: "cmp_version", pattern: "" }
    }
    pub fn comment() -> Self {
        Self { name: "comment", pattern: "" }
    }

    fn matches(&self, s: &str) -> bool {
        match self.name {
            "identifier" => identifier_re().is_match(s),
            "name" => name_re().is_match(s),
            "http" => http_re().is_match(s),
            "version" => version_re().is_match(s),
            "cmp_version" => cmp_version_re().is_match(s),
            "comment" => true,
            _ => false,
        }
    }
}

impl CellParser for PatternStringParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        let _ = self.pattern;
        let text = match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => text.to_string(),
            (ParseInput::Value(Value::Str(s)), ParseMode::Parsed) => s.clone(),
            (ParseInput::Value(v), ParseMode::Parsed) => return fail(sink, v, format!("expected a {} string", self.name)),
            (ParseInput::Text(t), ParseMode::Parsed) => return fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => return fail(sink, v, "expected text, not a typed value"),
        };
        if self.matches(&text) {
            (Value::Str(text.clone()), text)
        } else {
            fail(sink, &text, format!("does not match `{}` pattern", self.name))
        }
    }

    fn type_name(&self) -> String {
        self.name.to_string()
    }
}

/// `type_spec`/`type` — validate by invoking the type-spec grammar (spec
/// §4.B) on the cell text.
#[derive(Debug, Clone, Copy)]
pub struct TypeSpecStringParser;

impl CellParser for TypeSpecStringParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        let text = match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) => text.to_string(),
            (ParseInput::Value(Value::Str(s)), ParseMode::Parsed) => s.clone(),
            (ParseInput::Value(v), ParseMode::Parsed) => return fail(sink, v, "expected a type-spec string"),
            (ParseInput::Text(t), ParseMode::Parsed) => return fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => return fail(sink, v, "expected text, not a typed value"),
        };
        match typespec::parse(&text) {
            Ok(spec) => {
                let canonical = spec.to_spec_text();
                (Value::Str(canonical.clone()), canonical)
            }
            Err(e) => fail(sink, &text, e),
        }
    }

    fn type_name(&self) -> String {
        "type_spec".to_string()
    }
}

/// `nil` — only the empty/absent value.
#[derive(Debug, Clone, Copy)]
pub struct NilParser;

impl CellParser for NilParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim().is_empty() => (Value::Null, String::new()),
            (ParseInput::Text(text), ParseMode::Tsv) => fail(sink, text, "expected nil (empty cell)"),
            (ParseInput::Value(Value::Null), ParseMode::Parsed) => (Value::Null, String::new()),
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected nil"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "nil".to_string()
    }
}

/// `true` — the single literal boolean `true` (used as a union member for
/// flag-like columns, e.g. `true|nil`).
#[derive(Debug, Clone, Copy)]
pub struct TrueLiteralParser;

impl CellParser for TrueLiteralParser {
    fn parse(&self, sink: &Diagnostics, input: ParseInput<'_>, mode: ParseMode) -> (Value, String) {
        let _scope = sink.with_col_type(self.type_name());
        match (input, mode) {
            (ParseInput::Text(text), ParseMode::Tsv) if text.trim() == "true" => (Value::Bool(true), "true".to_string()),
            (ParseInput::Text(text), ParseMode::Tsv) => fail(sink, text, "expected literal `true`"),
            (ParseInput::Value(Value::Bool(true)), ParseMode::Parsed) => (Value::Bool(true), "true".to_string()),
            (ParseInput::Value(v), ParseMode::Parsed) => fail(sink, v, "expected literal `true`"),
            (ParseInput::Text(t), ParseMode::Parsed) => fail(sink, t, "expected a typed value, not text"),
            (ParseInput::Value(v), ParseMode::Tsv) => fail(sink, v, "expected text, not a typed value"),
        }
    }

    fn type_name(&self) -> String {
        "true".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_unescapes_tab_and_newline() {
        let sink = Diagnostics::new();
        let p = TextParser { markdown: false };
        let (value, _) = p.parse(&sink, ParseInput::Text("a\\tb\\nc"), ParseMode::Tsv);
        assert_eq!(value, Value::Str("a\tb\nc".to_string()));
    }

    #[test]
    fn identifier_rejects_leading_digit() {
        let sink = Diagnostics::new();
        let p = PatternStringParser::identifier();
        let (value, _) = p.parse(&sink, ParseInput::Text("1abc"), ParseMode::Tsv);
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn type_spec_parser_validates_grammar() {
        let sink = Diagnostics::new();
        let p = TypeSpecStringParser;
        let (value, _) = p.parse(&sink, ParseInput::Text("{integer,string}"), ParseMode::Tsv);
        assert_eq!(value, Value::Str("{integer,string}".to_string()));
    }
}
