//! Structured error sink ("badVal"), spec §4.J.
//!
//! A stateful, per-run diagnostic accumulator carrying a stack of expected
//! column types, formatting precise "Bad `<type>` at ..." messages the way
//! the teacher's `Finding`/`ReportError` types carry file/line/rule-id
//! context rather than a bare string.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// One reported bad-value diagnostic (spec §4.J message shape).
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub source_name: String,
    pub line_no: usize,
    pub row_key: String,
    pub col_name: String,
    pub col_idx: usize,
    pub expected_type: String,
    pub value: String,
    pub error: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bad `{}` at `{}`:{} (`{}`), col `{}`/{}: {} ({})",
            self.expected_type,
            self.source_name,
            self.line_no,
            self.row_key,
            self.col_name,
            self.col_idx,
            self.value,
            self.error
        )
    }
}

/// Errors that halt processing of an entire file (Structural/Schema kinds,
/// spec §7 kinds 1-2). These are propagated via `Result`, unlike per-cell
/// Value/Expression errors which go through [`Diagnostics::report`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructuralError {
    #[error("{source_name}: not valid UTF-8")]
    NotUtf8 { source_name: String },

    #[error("{source_name}: cell at line {line_no} col {col_idx} contains a forbidden character")]
    ForbiddenChar { source_name: String, line_no: usize, col_idx: usize },

    #[error("{source_name}: duplicate column name `{name}`")]
    DuplicateColumnName { source_name: String, name: String },

    #[error("{source_name}: duplicate primary key `{key}` (first at line {first_line}, again at line {line_no})")]
    DuplicatePrimaryKey { source_name: String, key: String, first_line: usize, line_no: usize },

    #[error("{source_name}: row {line_no} has cyclic cell dependencies")]
    CyclicRowDependency { source_name: String, line_no: usize },

    #[error("package dependency cycle: {0}")]
    CyclicPackageDependency(String),

    #[error("unknown type `{name}` referenced in {source_name}")]
    UnknownType { source_name: String, name: String },

    #[error("cannot alias `{name}`: it is a built-in type")]
    AliasCollidesWithBuiltin { name: String },

    #[error("{source_name}: collection `{root}` has a gap or non-contiguous index")]
    InconsistentCollectionIndices { source_name: String, root: String },

    #[error("{source_name}: map `{root}` index {index} is missing its {missing} column")]
    MissingCollectionSide { source_name: String, root: String, index: usize, missing: &'static str },

    #[error("package `{package_id}` depends on unknown package `{dep}`")]
    MissingDependency { package_id: String, dep: String },

    #[error("descriptor in package `{package_id}` targets file `{path}` outside its package")]
    DescriptorOutsidePackage { package_id: String, path: String },
}

/// A stack-scoped "expected type" guard. Pushes on construction, pops on
/// drop — the idiomatic replacement for spec §4.J's `withColType` helper,
/// which promises "guaranteed pop on all exits".
pub struct TypeScope<'a> {
    sink: &'a Diagnostics,
}

impl Drop for TypeScope<'_> {
    fn drop(&mut self) {
        self.sink.col_types.borrow_mut().pop();
    }
}

/// The error sink itself. Cheaply clonable (shares interior state) so it
/// can be threaded through the orchestrator without `&mut` plumbing.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    source_name: RefCell<String>,
    line_no: RefCell<usize>,
    row_key: RefCell<String>,
    col_name: RefCell<String>,
    col_idx: RefCell<usize>,
    col_types: RefCell<Vec<String>>,
    transposed: RefCell<bool>,
    errors: RefCell<Vec<Diagnostic>>,
    warnings: RefCell<Vec<String>>,
    /// Null-sink mode: count but do not retain full diagnostics (spec §4.J:
    /// "a null sink variant counts errors without logging, for exploratory
    /// type parsing").
    silent: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            source_name: RefCell::new(String::new()),
            line_no: RefCell::new(0),
            row_key: RefCell::new(String::new()),
            col_name: RefCell::new(String::new()),
            col_idx: RefCell::new(0),
            col_types: RefCell::new(Vec::new()),
            transposed: RefCell::new(false),
            errors: RefCell::new(Vec::new()),
            warnings: RefCell::new(Vec::new()),
            silent: false,
        }
    }

    /// A sink that counts errors but never stores them — used when
    /// exploratory-parsing a type that may legitimately fail (spec §4.J).
    pub fn silent() -> Self {
        Self { silent: true, ..Self::new() }
    }

    pub fn set_source(&self, name: impl Into<String>) {
        *self.source_name.borrow_mut() = name.into();
    }

    pub fn set_line(&self, line_no: usize) {
        *self.line_no.borrow_mut() = line_no;
    }

    pub fn set_row_key(&self, key: impl Into<String>) {
        *self.row_key.borrow_mut() = key.into();
    }

    pub fn set_column(&self, name: impl Into<String>, idx: usize) {
        *self.col_name.borrow_mut() = name.into();
        *self.col_idx.borrow_mut() = idx;
    }

    pub fn set_transposed(&self, transposed: bool) {
        *self.transposed.borrow_mut() = transposed;
    }

    /// Push an expected type for the duration of the returned guard.
    pub fn with_col_type(&self, ty: impl Into<String>) -> TypeScope<'_> {
        self.col_types.borrow_mut().push(ty.into());
        TypeScope { sink: self }
    }

    fn top_type(&self) -> String {
        self.col_types
            .borrow()
            .last()
            .cloned()
            .unwrap_or_else(|| "?".to_string())
    }

    /// Report a bad value. Returns the formatted message (mirroring the
    /// source's callable-sink pattern, where invocation both records and
    /// yields the message for embedding elsewhere).
    pub fn report(&self, value: impl std::fmt::Display, err: impl std::fmt::Display) -> String {
        let diag = Diagnostic {
            source_name: self.source_name.borrow().clone(),
            line_no: *self.line_no.borrow(),
            row_key: self.row_key.borrow().clone(),
            col_name: self.col_name.borrow().clone(),
            col_idx: *self.col_idx.borrow(),
            expected_type: self.top_type(),
            value: value.to_string(),
            error: err.to_string(),
        };
        let msg = diag.to_string();
        if !self.silent {
            log::warn!("{msg}");
            self.errors.borrow_mut().push(diag);
        } else {
            self.errors.borrow_mut().push(diag);
        }
        msg
    }

    pub fn report_warning(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("{msg}");
        self.warnings.borrow_mut().push(msg);
    }

    pub fn error_count(&self) -> usize {
        self.errors.borrow().len()
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.errors.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

/// Resolve a file path for error messages the same way regardless of OS
/// separators (mirrors the teacher's `serialize_path_forward_slash`).
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn path_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| display_path(path))
}

/// Convenience: a path plus the directory it was discovered under, used by
/// the manifest loader (spec §4.H step 1) to remember where each candidate
/// file physically lives.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_formats_precisely() {
        let sink = Diagnostics::new();
        sink.set_source("Items.tsv");
        sink.set_line(5);
        sink.set_row_key("sword");
        sink.set_column("price", 2);
        let _scope = sink.with_col_type("float");
        let msg = sink.report("abc", "not a number");
        assert_eq!(
            msg,
            "Bad `float` at `Items.tsv`:5 (`sword`), col `price`/2: abc (not a number)"
        );
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn type_scope_pops_on_drop() {
        let sink = Diagnostics::new();
        {
            let _s1 = sink.with_col_type("outer");
            {
                let _s2 = sink.with_col_type("inner");
                assert_eq!(sink.top_type(), "inner");
            }
            assert_eq!(sink.top_type(), "outer");
        }
        assert_eq!(sink.top_type(), "?");
    }

    #[test]
    fn silent_sink_counts_without_warn_noise() {
        let sink = Diagnostics::silent();
        sink.report("x", "bad");
        assert_eq!(sink.error_count(), 1);
    }
}
