//! Type registry, spec §4.C.
//!
//! Holds built-in parsers, user type aliases, enum parsers, and numeric/
//! string/union restrictions. Resolution order for a type reference:
//! exact alias → built-in → enum → reject (spec §4.C). Alias cycles are
//! forbidden, detected with a visiting set during resolution.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::diagnostics::Diagnostics;
use crate::parsers::{
    ParserRef,
    composite::{EnumParser, NumericRestriction, RatioRestriction, StringRestriction, UnionParser},
    compound::{ArrayParser, MapParser, RecordParser, TupleParser, UntypedTableParser},
    numeric::{BooleanParser, IntegerParser, NumberParser, PercentParser},
    strings::{NilParser, PatternStringParser, StringParser, TextParser, TrueLiteralParser, TypeSpecStringParser},
};
use crate::typespec::{self, TypeSpec};

/// A numeric restriction declaration, as would come from a manifest's
/// `custom_types` table.
#[derive(Debug, Clone, Default)]
pub struct NumericRestrictionSpec {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// A string restriction declaration.
#[derive(Debug, Clone, Default)]
pub struct StringRestrictionSpec {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub pattern: Option<String>,
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
enum AliasDef {
    Spec(TypeSpec),
    NumericRestriction { base: String, restriction: NumericRestrictionSpec },
    StringRestriction { base: String, restriction: StringRestrictionSpec },
    Enum { labels: Vec<String> },
}

/// The shape of a resolved type, for introspection (spec §4.C).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Scalar,
    Array,
    Map,
    Tuple,
    Record,
    Union,
    Enum,
    Table,
}

pub struct TypeRegistry {
    builtins: IndexMap<String, ParserRef>,
    aliases: RefCell<IndexMap<String, AliasDef>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut builtins: IndexMap<String, ParserRef> = IndexMap::new();
        let mut put = |name: &str, parser: ParserRef| {
            builtins.insert(name.to_string(), parser);
        };
        put("boolean", Arc::new(BooleanParser));
        put("integer", Arc::new(IntegerParser::unbounded()));
        put("int8", Arc::new(IntegerParser::sized("int8", i8::MIN as i64, i8::MAX as i64)));
        put("int16", Arc::new(IntegerParser::sized("int16", i16::MIN as i64, i16::MAX as i64)));
        put("int32", Arc::new(IntegerParser::sized("int32", i32::MIN as i64, i32::MAX as i64)));
        put("int64", Arc::new(IntegerParser::sized("int64", i64::MIN, i64::MAX)));
        put("uint8", Arc::new(IntegerParser::sized("uint8", 0, u8::MAX as i64)));
        put("uint16", Arc::new(IntegerParser::sized("uint16", 0, u16::MAX as i64)));
        put("uint32", Arc::new(IntegerParser::sized("uint32", 0, u32::MAX as i64)));
        put("uint64", Arc::new(IntegerParser::sized("uint64", 0, i64::MAX)));
        put("number", Arc::new(NumberParser));
        put("string", Arc::new(StringParser));
        put("text", Arc::new(TextParser { markdown: false }));
        put("markdown", Arc::new(TextParser { markdown: true }));
        put("identifier", Arc::new(PatternStringParser::identifier()));
        put("name", Arc::new(PatternStringParser::name_type()));
        put("http", Arc::new(PatternStringParser::http()));
        put("version", Arc::new(PatternStringParser::version()));
        put("cmp_version", Arc::new(PatternStringParser::cmp_version()));
        put("comment", Arc::new(PatternStringParser::comment()));
        put("type_spec", Arc::new(TypeSpecStringParser));
        put("type", Arc::new(TypeSpecStringParser));
        put("percent", Arc::new(PercentParser));
        put("nil", Arc::new(NilParser));
        put("true", Arc::new(TrueLiteralParser));
        put("table", Arc::new(UntypedTableParser));

        Self { builtins, aliases: RefCell::new(IndexMap::new()) }
    }

    pub fn is_built_in_type(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    /// Register a plain alias `name -> spec`. Rejects aliasing a built-in.
    /// If `name` is already a registered alias, the first registration
    /// wins and this one is reported as a warning (spec §9 open question,
    /// resolved in `SPEC_FULL.md`).
    pub fn register_alias(&self, sink: &Diagnostics, name: &str, spec_text: &str) {
        if self.is_built_in_type(name) {
            sink.report(name, "cannot alias a built-in type");
            return;
        }
        let spec = match typespec::parse(spec_text) {
            Ok(s) => s,
            Err(e) => {
                sink.report(spec_text, e);
                return;
            }
        };
        let mut aliases = self.aliases.borrow_mut();
        if aliases.contains_key(name) {
            sink.report_warning(format!(
                "alias `{name}` already registered; keeping the first definition"
            ));
            return;
        }
        aliases.insert(name.to_string(), AliasDef::Spec(spec));
    }

    pub fn register_numeric_restriction(
        &self,
        sink: &Diagnostics,
        name: &str,
        base: &str,
        restriction: NumericRestrictionSpec,
    ) {
        self.register_restriction_def(
            sink,
            name,
            AliasDef::NumericRestriction { base: base.to_string(), restriction },
        );
    }

    pub fn register_string_restriction(
        &self,
        sink: &Diagnostics,
        name: &str,
        base: &str,
        restriction: StringRestrictionSpec,
    ) {
        self.register_restriction_def(
            sink,
            name,
            AliasDef::StringRestriction { base: base.to_string(), restriction },
        );
    }

    fn register_restriction_def(&self, sink: &Diagnostics, name: &str, def: AliasDef) {
        if self.is_built_in_type(name) {
            sink.report(name, "cannot alias a built-in type");
            return;
        }
        let mut aliases = self.aliases.borrow_mut();
        if aliases.contains_key(name) {
            sink.report_warning(format!(
                "alias `{name}` already registered; keeping the first definition"
            ));
            return;
        }
        aliases.insert(name.to_string(), def);
    }

    /// Register an enum parser (spec §4.C).
    pub fn register_enum_parser(&self, sink: &Diagnostics, name: &str, labels: Vec<String>) {
        if self.is_built_in_type(name) {
            sink.report(name, "cannot alias a built-in type");
            return;
        }
        let mut aliases = self.aliases.borrow_mut();
        if aliases.contains_key(name) {
            sink.report_warning(format!(
                "enum `{name}` already registered; keeping the first definition"
            ));
            return;
        }
        aliases.insert(name.to_string(), AliasDef::Enum { labels });
    }

    /// Resolve a type-spec string into a parser, reporting and returning
    /// `None` on failure. `partial` mirrors spec §4.C's `parseType(...,
    /// partial?)`: when true, trailing text after a valid prefix is
    /// ignored rather than treated as an error (used while splitting a
    /// header's `name:TYPE:default_expr`).
    pub fn parse_type(&self, sink: &Diagnostics, spec_text: &str, partial: bool) -> Option<ParserRef> {
        let spec = if partial {
            match typespec::parse_partial(spec_text) {
                Ok((s, _)) => s,
                Err(e) => {
                    sink.report(spec_text, e);
                    return None;
                }
            }
        } else {
            match typespec::parse(spec_text) {
                Ok(s) => s,
                Err(e) => {
                    sink.report(spec_text, e);
                    return None;
                }
            }
        };
        let mut visiting = HashSet::new();
        self.build_parser(sink, &spec, &mut visiting)
    }

    fn resolve_name(&self, sink: &Diagnostics, name: &str, visiting: &mut HashSet<String>) -> Option<ParserRef> {
        if visiting.contains(name) {
            sink.report(name, "cyclic type alias");
            return None;
        }
        if let Some(parser) = self.builtins.get(name) {
            return Some(parser.clone());
        }
        let def = self.aliases.borrow().get(name).cloned();
        match def {
            Some(AliasDef::Spec(spec)) => {
                visiting.insert(name.to_string());
                let result = self.build_parser(sink, &spec, visiting);
                visiting.remove(name);
                result
            }
            Some(AliasDef::NumericRestriction { base, restriction }) => {
                visiting.insert(name.to_string());
                let inner = self.resolve_name(sink, &base, visiting);
                visiting.remove(name);
                inner.map(|inner| {
                    Arc::new(NumericRestriction {
                        name: name.to_string(),
                        inner,
                        min: restriction.min,
                        max: restriction.max,
                    }) as ParserRef
                })
            }
            Some(AliasDef::StringRestriction { base, restriction }) => {
                visiting.insert(name.to_string());
                let inner = self.resolve_name(sink, &base, visiting);
                visiting.remove(name);
                inner.map(|inner| {
                    let pattern = restriction.pattern.as_deref().and_then(|p| Regex::new(p).ok());
                    Arc::new(StringRestriction {
                        name: name.to_string(),
                        inner,
                        min_len: restriction.min_len,
                        max_len: restriction.max_len,
                        pattern,
                        values: restriction.values,
                    }) as ParserRef
                })
            }
            Some(AliasDef::Enum { labels }) => {
                Some(Arc::new(EnumParser { name: name.to_string(), labels }))
            }
            None => {
                sink.report(name, "unknown type");
                None
            }
        }
    }

    fn build_parser(&self, sink: &Diagnostics, spec: &TypeSpec, visiting: &mut HashSet<String>) -> Option<ParserRef> {
        match spec {
            TypeSpec::Name(n) if n == "ratio" => {
                // `ratio` needs an underlying record shape; without one in
                // context it degenerates to validating any record passed to
                // it. Columns that want a concrete ratio shape alias a
                // record type and wrap it via `register_numeric_restriction`-
                // style composition is not applicable here, so `ratio` alone
                // validates whatever record an expression hands it.
                Some(Arc::new(RatioRestriction {
                    inner: Arc::new(UntypedTableParser),
                    epsilon: RatioRestriction::DEFAULT_EPSILON,
                }))
            }
            TypeSpec::Name(n) => self.resolve_name(sink, n, visiting),
            TypeSpec::SelfRef(n) => {
                sink.report(format!("self.{n}"), "self-reference must be resolved before parser construction");
                None
            }
            TypeSpec::Array(elem) => {
                let element = self.build_parser(sink, elem, visiting)?;
                Some(Arc::new(ArrayParser { element }))
            }
            TypeSpec::Tuple(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.build_parser(sink, item, visiting)?);
                }
                Some(Arc::new(TupleParser { elements }))
            }
            TypeSpec::Map(k, v) => {
                let key = self.build_parser(sink, k, visiting)?;
                let value = self.build_parser(sink, v, visiting)?;
                Some(Arc::new(MapParser { key, value }))
            }
            TypeSpec::Record(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, ty) in fields {
                    out.push((name.clone(), self.build_parser(sink, ty, visiting)?));
                }
                Some(Arc::new(RecordParser { fields: out }))
            }
            TypeSpec::Union(options) => {
                let mut branches = Vec::with_capacity(options.len());
                for opt in options {
                    branches.push(self.build_parser(sink, opt, visiting)?);
                }
                Some(Arc::new(UnionParser { name: spec.to_spec_text(), branches }))
            }
            TypeSpec::Table => Some(Arc::new(UntypedTableParser)),
            TypeSpec::Enum(labels) => Some(Arc::new(EnumParser { name: spec.to_spec_text(), labels: labels.clone() })),
            TypeSpec::Extends(base) => self.build_parser(sink, base, visiting),
            TypeSpec::ExtendsTuple { base, fields } => {
                let Some(TypeSpec::Tuple(base_fields)) = self.lookup_spec(base) else {
                    sink.report(base.to_spec_text(), "extends base is not a registered tuple");
                    return None;
                };
                let mut all = base_fields.clone();
                all.extend(fields.clone());
                self.build_parser(sink, &TypeSpec::Tuple(all), visiting)
            }
            TypeSpec::ExtendsRecord { base, fields } => {
                let Some(TypeSpec::Record(base_fields)) = self.lookup_spec(base) else {
                    sink.report(base.to_spec_text(), "extends base is not a registered record");
                    return None;
                };
                let mut all = base_fields.clone();
                all.extend(fields.clone());
                self.build_parser(sink, &TypeSpec::Record(all), visiting)
            }
        }
    }

    /// Look up a registered alias's underlying spec (used by
    /// `{extends,...}` resolution, which needs the base's shape, not just
    /// its parser).
    fn lookup_spec(&self, base: &TypeSpec) -> Option<TypeSpec> {
        let TypeSpec::Name(name) = base else { return None };
        match self.aliases.borrow().get(name) {
            Some(AliasDef::Spec(spec)) => Some(spec.clone()),
            _ => None,
        }
    }

    /// Introspection: the declared shape of an alias, for exploded-column
    /// analysis and `--explain-type` (spec §4.C).
    pub fn get_type_kind(&self, name: &str) -> Option<TypeKind> {
        if self.is_built_in_type(name) {
            return Some(TypeKind::Scalar);
        }
        match self.aliases.borrow().get(name)? {
            AliasDef::Spec(spec) => Some(kind_of(spec)),
            AliasDef::NumericRestriction { .. } | AliasDef::StringRestriction { .. } => Some(TypeKind::Scalar),
            AliasDef::Enum { .. } => Some(TypeKind::Enum),
        }
    }

    pub fn alias_names(&self) -> Vec<String> {
        self.aliases.borrow().keys().cloned().collect()
    }
}

fn kind_of(spec: &TypeSpec) -> TypeKind {
    match spec {
        TypeSpec::Array(_) => TypeKind::Array,
        TypeSpec::Map(_, _) => TypeKind::Map,
        TypeSpec::Tuple(_) | TypeSpec::ExtendsTuple { .. } => TypeKind::Tuple,
        TypeSpec::Record(_) | TypeSpec::ExtendsRecord { .. } => TypeKind::Record,
        TypeSpec::Union(_) => TypeKind::Union,
        TypeSpec::Enum(_) => TypeKind::Enum,
        TypeSpec::Table => TypeKind::Table,
        _ => TypeKind::Scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{ParseInput, ParseMode};
    use crate::value::Value;

    #[test]
    fn resolves_builtin() {
        let registry = TypeRegistry::new();
        let sink = Diagnostics::new();
        let parser = registry.parse_type(&sink, "integer", false).unwrap();
        let (value, _) = parser.parse(&sink, ParseInput::Text("42"), ParseMode::Tsv);
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn rejects_aliasing_builtin() {
        let registry = TypeRegistry::new();
        let sink = Diagnostics::new();
        registry.register_alias(&sink, "integer", "string");
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn first_alias_registration_wins() {
        let registry = TypeRegistry::new();
        let sink = Diagnostics::new();
        registry.register_alias(&sink, "Level", "integer");
        registry.register_alias(&sink, "Level", "string");
        assert_eq!(sink.warnings().len(), 1);
        let parser = registry.parse_type(&sink, "Level", false).unwrap();
        let (value, _) = parser.parse(&sink, ParseInput::Text("5"), ParseMode::Tsv);
        assert_eq!(value, Value::Int(5));
    }

    #[test]
    fn detects_alias_cycle() {
        let registry = TypeRegistry::new();
        let sink = Diagnostics::new();
        registry.register_alias(&sink, "A", "B");
        registry.register_alias(&sink, "B", "A");
        let result = registry.parse_type(&sink, "A", false);
        assert!(result.is_none());
    }

    #[test]
    fn registers_enum_parser() {
        let registry = TypeRegistry::new();
        let sink = Diagnostics::new();
        registry.register_enum_parser(&sink, "Color", vec!["red".into(), "green".into()]);
        let parser = registry.parse_type(&sink, "Color", false).unwrap();
        let (value, _) = parser.parse(&sink, ParseInput::Text("red"), ParseMode::Tsv);
        assert_eq!(value, Value::Str("red".into()));
        let (bad, _) = parser.parse(&sink, ParseInput::Text("blue"), ParseMode::Tsv);
        assert_eq!(bad, Value::Null);
    }
}
