//! Type-spec lexer+parser, spec §4.B.
//!
//! A small hand-written recursive-descent parser (see `SPEC_FULL.md` §4 for
//! why this isn't built on a PEG crate). Exposes both a full parse and the
//! "partial" variant spec §4.B calls out: consume a valid type-spec prefix
//! and hand back the unconsumed remainder, used by header parsing to split
//! `name:TYPE:default_expr`.

use thiserror::Error;

use super::ast::TypeSpec;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeSpecError {
    #[error("empty type spec")]
    Empty,
    #[error("unbalanced braces in `{0}`")]
    UnbalancedBraces(String),
    #[error("`nil` must be last in a union: `{0}`")]
    NilNotLast(String),
    #[error("`string` must be last or second-to-last in a union: `{0}`")]
    StringMisplaced(String),
    #[error("braced body mixes colon and non-colon elements: `{0}`")]
    MixedColonBody(String),
    #[error("a tuple/record/union/array/map needs at least one element: `{0}`")]
    EmptyElement(String),
    #[error("`self.X` is not valid as a top-level type: `{0}`")]
    SelfRefAtTopLevel(String),
    #[error("unexpected trailing text after type spec: `{0}`")]
    TrailingText(String),
    #[error("tuple inheritance requires at least one base: `{0}`")]
    ExtendsMissingBase(String),
}

/// Parse a complete type-spec string, erroring if anything is left over.
pub fn parse(input: &str) -> Result<TypeSpec, TypeSpecError> {
    let (spec, remainder) = parse_partial(input)?;
    if let Some(rest) = remainder {
        if !rest.is_empty() {
            return Err(TypeSpecError::TrailingText(rest.to_string()));
        }
    }
    reject_top_level_selfref(&spec, input)?;
    Ok(spec)
}

/// Consume a valid type-spec prefix from `input`, returning the parsed spec
/// and everything after the first depth-0 `:` as the remainder (spec §4.B:
/// "consume a valid prefix and return the unconsumed remainder", used to
/// split `name:TYPE:default_expr`).
pub fn parse_partial(input: &str) -> Result<(TypeSpec, Option<&str>), TypeSpecError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TypeSpecError::Empty);
    }
    check_balanced(trimmed)?;

    let split_at = find_top_level_colon(trimmed);
    let (type_part, remainder) = match split_at {
        Some(idx) => (trimmed[..idx].trim(), Some(trimmed[idx + 1..].as_ref())),
        None => (trimmed, None),
    };

    let spec = parse_union(type_part)?;
    Ok((spec, remainder))
}

fn reject_top_level_selfref(spec: &TypeSpec, original: &str) -> Result<(), TypeSpecError> {
    if matches!(spec, TypeSpec::SelfRef(_)) {
        return Err(TypeSpecError::SelfRefAtTopLevel(original.to_string()));
    }
    if let TypeSpec::Union(parts) = spec {
        if parts.iter().any(|p| matches!(p, TypeSpec::SelfRef(_))) {
            return Err(TypeSpecError::SelfRefAtTopLevel(original.to_string()));
        }
    }
    Ok(())
}

fn check_balanced(s: &str) -> Result<(), TypeSpecError> {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(TypeSpecError::UnbalancedBraces(s.to_string()));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(TypeSpecError::UnbalancedBraces(s.to_string()));
    }
    Ok(())
}

/// Find the first `:` at brace depth 0.
fn find_top_level_colon(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ':' if depth == 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Split `s` on `delim` only where brace depth is 0.
fn split_top_level(s: &str, delim: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            c if c == delim && depth == 0 => {
                parts.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_union(s: &str) -> Result<TypeSpec, TypeSpecError> {
    let parts = split_top_level(s, '|');
    if parts.len() == 1 {
        return parse_atom(parts[0].trim());
    }
    let mut specs = Vec::with_capacity(parts.len());
    for p in &parts {
        specs.push(parse_atom(p.trim())?);
    }
    validate_union(&specs, s)?;
    Ok(TypeSpec::Union(specs))
}

fn validate_union(specs: &[TypeSpec], original: &str) -> Result<(), TypeSpecError> {
    for (i, spec) in specs.iter().enumerate() {
        if matches!(spec, TypeSpec::Name(n) if n == "nil") && i != specs.len() - 1 {
            return Err(TypeSpecError::NilNotLast(original.to_string()));
        }
        if matches!(spec, TypeSpec::Name(n) if n == "string") {
            let is_last = i == specs.len() - 1;
            let is_second_to_last = i + 2 == specs.len();
            if !is_last && !is_second_to_last {
                return Err(TypeSpecError::StringMisplaced(original.to_string()));
            }
        }
    }
    Ok(())
}

fn parse_atom(s: &str) -> Result<TypeSpec, TypeSpecError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TypeSpecError::EmptyElement(s.to_string()));
    }
    if let Some(stripped) = s.strip_prefix('{') {
        let body = stripped
            .strip_suffix('}')
            .ok_or_else(|| TypeSpecError::UnbalancedBraces(s.to_string()))?;
        parse_braced(body.trim())
    } else if let Some(rest) = s.strip_prefix("self.") {
        Ok(TypeSpec::SelfRef(rest.to_string()))
    } else {
        Ok(TypeSpec::Name(s.to_string()))
    }
}

fn parse_braced(body: &str) -> Result<TypeSpec, TypeSpecError> {
    if body.is_empty() {
        return Ok(TypeSpec::Table);
    }
    if let Some(labels) = body.strip_prefix("enum:") {
        let labels = labels.split('|').map(|l| l.trim().to_string()).collect();
        return Ok(TypeSpec::Enum(labels));
    }
    if let Some(rest) = body.strip_prefix("extends,") {
        return parse_extends_comma(rest);
    }
    if let Some(rest) = body.strip_prefix("extends:") {
        return parse_extends_colon(rest);
    }

    let elements = split_top_level(body, ',');
    let mut has_colon = Vec::with_capacity(elements.len());
    for e in &elements {
        has_colon.push(find_top_level_colon(e.trim()).is_some());
    }
    let all_colon = has_colon.iter().all(|b| *b);
    let none_colon = has_colon.iter().all(|b| !*b);
    if !all_colon && !none_colon {
        return Err(TypeSpecError::MixedColonBody(body.to_string()));
    }

    if elements.len() == 1 {
        return if none_colon {
            Ok(TypeSpec::Array(Box::new(parse_union(elements[0].trim())?)))
        } else {
            let idx = find_top_level_colon(elements[0].trim()).unwrap();
            let (k, v) = elements[0].trim().split_at(idx);
            Ok(TypeSpec::Map(
                Box::new(parse_union(k.trim())?),
                Box::new(parse_union(v[1..].trim())?),
            ))
        };
    }

    if none_colon {
        let mut items = Vec::with_capacity(elements.len());
        for e in &elements {
            items.push(parse_union(e.trim())?);
        }
        return Ok(TypeSpec::Tuple(items));
    }

    let mut fields = Vec::with_capacity(elements.len());
    for e in &elements {
        let e = e.trim();
        let idx = find_top_level_colon(e).ok_or_else(|| TypeSpecError::MixedColonBody(body.to_string()))?;
        let (name, ty) = e.split_at(idx);
        fields.push((name.trim().to_string(), parse_union(ty[1..].trim())?));
    }
    Ok(TypeSpec::Record(fields))
}

fn parse_extends_comma(rest: &str) -> Result<TypeSpec, TypeSpecError> {
    let elements = split_top_level(rest, ',');
    if elements.is_empty() || elements[0].trim().is_empty() {
        return Err(TypeSpecError::ExtendsMissingBase(rest.to_string()));
    }
    let base = parse_union(elements[0].trim())?;
    if elements.len() == 1 {
        return Ok(TypeSpec::Extends(Box::new(base)));
    }
    let mut fields = Vec::with_capacity(elements.len() - 1);
    for e in &elements[1..] {
        fields.push(parse_union(e.trim())?);
    }
    Ok(TypeSpec::ExtendsTuple { base: Box::new(base), fields })
}

fn parse_extends_colon(rest: &str) -> Result<TypeSpec, TypeSpecError> {
    let elements = split_top_level(rest, ',');
    if elements.is_empty() || elements[0].trim().is_empty() {
        return Err(TypeSpecError::ExtendsMissingBase(rest.to_string()));
    }
    let base = parse_union(elements[0].trim())?;
    if elements.len() == 1 {
        return Ok(TypeSpec::Extends(Box::new(base)));
    }
    let mut fields = Vec::with_capacity(elements.len() - 1);
    for e in &elements[1..] {
        let e = e.trim();
        let idx = find_top_level_colon(e)
            .ok_or_else(|| TypeSpecError::MixedColonBody(rest.to_string()))?;
        let (name, ty) = e.split_at(idx);
        fields.push((name.trim().to_string(), parse_union(ty[1..].trim())?));
    }
    Ok(TypeSpec::ExtendsRecord { base: Box::new(base), fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitive() {
        assert_eq!(parse("integer").unwrap(), TypeSpec::Name("integer".into()));
    }

    #[test]
    fn parses_union_with_nil_last() {
        let spec = parse("string|integer|nil").unwrap();
        assert_eq!(
            spec,
            TypeSpec::Union(vec![
                TypeSpec::Name("string".into()),
                TypeSpec::Name("integer".into()),
                TypeSpec::Name("nil".into()),
            ])
        );
    }

    #[test]
    fn rejects_nil_not_last() {
        assert!(parse("nil|integer").is_err());
    }

    #[test]
    fn parses_array() {
        assert_eq!(parse("{integer}").unwrap(), TypeSpec::Array(Box::new(TypeSpec::Name("integer".into()))));
    }

    #[test]
    fn parses_map() {
        assert_eq!(
            parse("{string:integer}").unwrap(),
            TypeSpec::Map(Box::new(TypeSpec::Name("string".into())), Box::new(TypeSpec::Name("integer".into())))
        );
    }

    #[test]
    fn parses_tuple() {
        assert_eq!(
            parse("{integer,integer}").unwrap(),
            TypeSpec::Tuple(vec![TypeSpec::Name("integer".into()), TypeSpec::Name("integer".into())])
        );
    }

    #[test]
    fn parses_record() {
        let spec = parse("{level:name,position:integer}").unwrap();
        match spec {
            TypeSpec::Record(fields) => {
                assert_eq!(fields[0].0, "level");
                assert_eq!(fields[1].0, "position");
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn parses_nested_record_of_tuples() {
        let spec = parse("{level:name,position:{_1:integer,_2:integer}}").unwrap();
        match spec {
            TypeSpec::Record(fields) => match &fields[1].1 {
                TypeSpec::Record(inner) => assert_eq!(inner.len(), 2),
                other => panic!("expected nested record, got {other:?}"),
            },
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn rejects_mixed_colon_body() {
        assert!(parse("{a:integer,b}").is_err());
    }

    #[test]
    fn parses_enum() {
        assert_eq!(
            parse("{enum:red|green|blue}").unwrap(),
            TypeSpec::Enum(vec!["red".into(), "green".into(), "blue".into()])
        );
    }

    #[test]
    fn parses_extends_colon() {
        assert_eq!(
            parse("{extends:Animal}").unwrap(),
            TypeSpec::Extends(Box::new(TypeSpec::Name("Animal".into())))
        );
    }

    #[test]
    fn parses_extends_record() {
        let spec = parse("{extends:BaseRecord,extra:integer}").unwrap();
        match spec {
            TypeSpec::ExtendsRecord { base, fields } => {
                assert_eq!(*base, TypeSpec::Name("BaseRecord".into()));
                assert_eq!(fields[0].0, "extra");
            }
            _ => panic!("expected extends-record"),
        }
    }

    #[test]
    fn parses_extends_tuple() {
        let spec = parse("{extends,BaseTuple,integer,string}").unwrap();
        match spec {
            TypeSpec::ExtendsTuple { base, fields } => {
                assert_eq!(*base, TypeSpec::Name("BaseTuple".into()));
                assert_eq!(fields.len(), 2);
            }
            _ => panic!("expected extends-tuple"),
        }
    }

    #[test]
    fn rejects_self_ref_at_top_level() {
        assert!(parse("self.price").is_err());
    }

    #[test]
    fn allows_self_ref_nested_in_tuple() {
        let spec = parse("{integer,self._1}").unwrap();
        match spec {
            TypeSpec::Tuple(items) => assert_eq!(items[1], TypeSpec::SelfRef("_1".into())),
            _ => panic!("expected tuple"),
        }
    }

    #[test]
    fn partial_splits_on_default_expr() {
        let (spec, remainder) = parse_partial("float:=0").unwrap();
        assert_eq!(spec, TypeSpec::Name("float".into()));
        assert_eq!(remainder, Some("=0"));
    }

    #[test]
    fn partial_handles_braced_type_with_default() {
        let (spec, remainder) = parse_partial("{integer,integer}:=1,2").unwrap();
        assert_eq!(spec, TypeSpec::Tuple(vec![TypeSpec::Name("integer".into()), TypeSpec::Name("integer".into())]));
        assert_eq!(remainder, Some("=1,2"));
    }

    #[test]
    fn partial_with_no_default() {
        let (spec, remainder) = parse_partial("string").unwrap();
        assert_eq!(spec, TypeSpec::Name("string".into()));
        assert_eq!(remainder, None);
    }

    #[test]
    fn round_trips_to_spec_text() {
        for text in ["integer", "{integer}", "{string:integer}", "string|nil"] {
            let spec = parse(text).unwrap();
            assert_eq!(spec.to_spec_text(), text);
        }
    }
}
