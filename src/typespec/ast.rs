//! Type-spec AST, spec §4.B.
//!
//! A tagged AST over the variant set `{name, array, tuple, union, map,
//! record, table, enum, selfref}`. Each variant also retains its original
//! source text (`spec_text`) so `Column::type_spec`/`Header::__type_spec`
//! can reproduce the exact declared spelling.

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    /// A bare name: a primitive, an alias, an enum name, or (handled
    /// specially, see `SelfRef`) `self.X`.
    Name(String),
    Array(Box<TypeSpec>),
    Tuple(Vec<TypeSpec>),
    Union(Vec<TypeSpec>),
    Map(Box<TypeSpec>, Box<TypeSpec>),
    Record(Vec<(String, TypeSpec)>),
    /// Untyped `{}`.
    Table,
    Enum(Vec<String>),
    /// `{extends,T}` / `{extends:T}` — ancestor constraint with no added
    /// shape of its own.
    Extends(Box<TypeSpec>),
    /// `{extends,BaseTuple,T1,T2,...}`.
    ExtendsTuple { base: Box<TypeSpec>, fields: Vec<TypeSpec> },
    /// `{extends:BaseRecord,field:T,...}`.
    ExtendsRecord { base: Box<TypeSpec>, fields: Vec<(String, TypeSpec)> },
    /// `self.X` or `self._N`, only valid nested inside a tuple/record field.
    SelfRef(String),
}

impl TypeSpec {
    pub fn name(s: impl Into<String>) -> Self {
        TypeSpec::Name(s.into())
    }

    /// Reserialize the AST back to the canonical spec-text grammar (used
    /// when synthesizing `collapsed_column_spec`, spec §4.E, and
    /// `__type_spec`, spec §3).
    pub fn to_spec_text(&self) -> String {
        match self {
            TypeSpec::Name(n) => n.clone(),
            TypeSpec::SelfRef(n) => format!("self.{n}"),
            TypeSpec::Array(t) => format!("{{{}}}", t.to_spec_text()),
            TypeSpec::Tuple(ts) => {
                format!("{{{}}}", ts.iter().map(|t| t.to_spec_text()).collect::<Vec<_>>().join(","))
            }
            TypeSpec::Union(ts) => ts.iter().map(|t| t.to_spec_text()).collect::<Vec<_>>().join("|"),
            TypeSpec::Map(k, v) => format!("{{{}:{}}}", k.to_spec_text(), v.to_spec_text()),
            TypeSpec::Record(fields) => {
                let body = fields
                    .iter()
                    .map(|(n, t)| format!("{n}:{}", t.to_spec_text()))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{{{body}}}")
            }
            TypeSpec::Table => "{}".to_string(),
            TypeSpec::Enum(labels) => format!("{{enum:{}}}", labels.join("|")),
            TypeSpec::Extends(base) => format!("{{extends:{}}}", base.to_spec_text()),
            TypeSpec::ExtendsTuple { base, fields } => {
                let mut parts = vec![base.to_spec_text()];
                parts.extend(fields.iter().map(|t| t.to_spec_text()));
                format!("{{extends,{}}}", parts.join(","))
            }
            TypeSpec::ExtendsRecord { base, fields } => {
                let mut parts = vec![base.to_spec_text()];
                parts.extend(fields.iter().map(|(n, t)| format!("{n}:{}", t.to_spec_text())));
                format!("{{extends:{}}}", parts.join(","))
            }
        }
    }
}

impl std::fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_spec_text())
    }
}
