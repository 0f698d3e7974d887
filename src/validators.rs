//! Validator executor, spec §4.I.
//!
//! Row/file/package validator specs are plain sandboxed expressions (§4.F)
//! evaluated under a scope-specific [`EvalContext`] exposing the bindings
//! spec §4.I names (`self`/`row`/`rows`/`file`/`files`/`package`/
//! `rowIndex`/`fileName`/`packageId`/`ctx`), with a per-scope operation
//! quota.

use indexmap::IndexMap;

use crate::diagnostics::Diagnostics;
use crate::eval::{self, Budget, EvalContext, EvalError};
use crate::manifest::{ValidatorLevel, ValidatorSpec};
use crate::model::Row;
use crate::value::Value;

pub const ROW_QUOTA: u32 = 1_000;
pub const FILE_QUOTA: u32 = 10_000;
pub const PACKAGE_QUOTA: u32 = 100_000;

/// Arbitrary caller-supplied bindings threaded into every scope as `ctx`,
/// plus the tag-membership table backing `listMembersOfTag`/`isMemberOfTag`
/// (spec §4.I names both helpers without defining "tag" further; here a tag
/// is a named group of member ids declared by the caller — typically
/// derived from a package's own data, assembled before validators run).
#[derive(Debug, Clone, Default)]
pub struct ValidatorEnv {
    pub ctx: IndexMap<String, Value>,
    pub tags: IndexMap<String, Vec<String>>,
}

impl ValidatorEnv {
    fn call_tag_helper(&self, name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
        match name {
            "listMembersOfTag" => {
                let tag = args.first()?.as_str()?;
                let members = self.tags.get(tag).cloned().unwrap_or_default();
                Some(Ok(Value::List(members.into_iter().map(Value::Str).collect())))
            }
            "isMemberOfTag" => {
                let id = args.first()?.as_str()?;
                let tag = args.get(1)?.as_str()?;
                let is_member = self.tags.get(tag).map(|m| m.iter().any(|x| x == id)).unwrap_or(false);
                Some(Ok(Value::Bool(is_member)))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValidatorScope {
    Row { row_index: usize },
    File { file_name: String },
    Package { package_id: String },
}

#[derive(Debug, Clone)]
pub struct ValidatorWarning {
    pub validator: String,
    pub message: String,
    pub scope: ValidatorScope,
}

enum Outcome {
    Pass,
    Fail(String),
    Error(String),
}

fn interpret(result: Result<Value, EvalError>) -> Outcome {
    match result {
        Ok(Value::Bool(true)) => Outcome::Pass,
        Ok(Value::Str(s)) if s.is_empty() => Outcome::Pass,
        Ok(Value::Bool(false)) | Ok(Value::Null) => Outcome::Fail("validation failed".to_string()),
        Ok(Value::Str(s)) => Outcome::Fail(s),
        Ok(other) => Outcome::Error(format!("validator must return a boolean or string, got {}", other.type_name())),
        Err(e) => Outcome::Error(e.to_string()),
    }
}

/// Evaluate `specs` in order against `ctx`; stop at the first error-level
/// failure (spec §4.I step 6), collecting warn-level failures along the way.
fn run_scope(
    sink: &Diagnostics,
    specs: &[ValidatorSpec],
    ctx: &dyn EvalContext,
    quota: u32,
    scope: impl Fn() -> ValidatorScope,
) -> (bool, Vec<ValidatorWarning>) {
    let mut warnings = Vec::new();
    for spec in specs {
        let mut budget = Budget::new(quota);
        let outcome = interpret(eval::eval_source(&spec.expr, ctx, &mut budget));
        match outcome {
            Outcome::Pass => {}
            Outcome::Fail(msg) => match spec.level {
                ValidatorLevel::Warn => {
                    warnings.push(ValidatorWarning { validator: spec.expr.clone(), message: msg, scope: scope() });
                }
                ValidatorLevel::Error => {
                    sink.report(&spec.expr, &msg);
                    return (false, warnings);
                }
            },
            Outcome::Error(err) => {
                sink.report(&spec.expr, &err);
                return (false, warnings);
            }
        }
    }
    (true, warnings)
}

struct RowEnv<'a> {
    row_value: &'a Value,
    rows_value: &'a Value,
    file_name: &'a str,
    row_index: usize,
    extra: &'a ValidatorEnv,
}

fn record_field(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Record(m) | Value::Map(m) => m.get(name).cloned(),
        _ => None,
    }
}

impl EvalContext for RowEnv<'_> {
    fn self_field(&self, name: &str) -> Option<Value> {
        record_field(self.row_value, name)
    }

    fn self_index(&self, _idx: i64) -> Option<Value> {
        None
    }

    fn ident(&self, name: &str) -> Option<Value> {
        match name {
            "row" => Some(self.row_value.clone()),
            "rows" => Some(self.rows_value.clone()),
            "file" | "fileName" => Some(Value::Str(self.file_name.to_string())),
            "rowIndex" => Some(Value::Int(self.row_index as i64)),
            "ctx" => Some(Value::Record(self.extra.ctx.clone())),
            _ => None,
        }
    }

    fn call(&self, name: &str, args: &[Value], _budget: &mut Budget) -> Option<Result<Value, EvalError>> {
        self.extra.call_tag_helper(name, args)
    }
}

/// `runRowValidators`, spec §4.I.
pub fn run_row_validators(
    sink: &Diagnostics,
    specs: &[ValidatorSpec],
    row: &Row,
    row_index: usize,
    file_name: &str,
    all_rows: &Value,
    extra: &ValidatorEnv,
) -> (bool, Vec<ValidatorWarning>) {
    let row_value = row.to_record();
    let ctx = RowEnv { row_value: &row_value, rows_value: all_rows, file_name, row_index, extra };
    run_scope(sink, specs, &ctx, ROW_QUOTA, || ValidatorScope::Row { row_index })
}

struct FileEnv<'a> {
    rows_value: &'a Value,
    file_name: &'a str,
    extra: &'a ValidatorEnv,
}

impl EvalContext for FileEnv<'_> {
    fn self_field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn self_index(&self, idx: i64) -> Option<Value> {
        let Value::List(items) = self.rows_value else { return None };
        let i = usize::try_from(idx).ok()?;
        items.get(i.checked_sub(1)?).cloned()
    }

    fn ident(&self, name: &str) -> Option<Value> {
        match name {
            "rows" => Some(self.rows_value.clone()),
            "file" | "fileName" => Some(Value::Str(self.file_name.to_string())),
            "ctx" => Some(Value::Record(self.extra.ctx.clone())),
            _ => None,
        }
    }

    fn call(&self, name: &str, args: &[Value], _budget: &mut Budget) -> Option<Result<Value, EvalError>> {
        self.extra.call_tag_helper(name, args)
    }
}

/// `runFileValidators`, spec §4.I.
pub fn run_file_validators(
    sink: &Diagnostics,
    specs: &[ValidatorSpec],
    rows: &[Row],
    file_name: &str,
    extra: &ValidatorEnv,
) -> (bool, Vec<ValidatorWarning>) {
    let rows_value = Value::List(rows.iter().map(Row::to_record).collect());
    let ctx = FileEnv { rows_value: &rows_value, file_name, extra };
    run_scope(sink, specs, &ctx, FILE_QUOTA, || ValidatorScope::File { file_name: file_name.to_string() })
}

struct PackageEnv<'a> {
    files_value: &'a Value,
    package_id: &'a str,
    extra: &'a ValidatorEnv,
}

impl EvalContext for PackageEnv<'_> {
    fn self_field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn self_index(&self, idx: i64) -> Option<Value> {
        let Value::List(items) = self.files_value else { return None };
        let i = usize::try_from(idx).ok()?;
        items.get(i.checked_sub(1)?).cloned()
    }

    fn ident(&self, name: &str) -> Option<Value> {
        match name {
            "files" => Some(self.files_value.clone()),
            "package" | "packageId" => Some(Value::Str(self.package_id.to_string())),
            "ctx" => Some(Value::Record(self.extra.ctx.clone())),
            _ => None,
        }
    }

    fn call(&self, name: &str, args: &[Value], _budget: &mut Budget) -> Option<Result<Value, EvalError>> {
        self.extra.call_tag_helper(name, args)
    }
}

/// `runPackageValidators`, spec §4.I. `files` is `{name, rowCount}` per
/// data file in the package, in descriptor order.
pub fn run_package_validators(
    sink: &Diagnostics,
    specs: &[ValidatorSpec],
    files: &[(String, usize)],
    package_id: &str,
    extra: &ValidatorEnv,
) -> (bool, Vec<ValidatorWarning>) {
    let files_value = Value::List(
        files
            .iter()
            .map(|(name, row_count)| {
                let mut m = IndexMap::new();
                m.insert("name".to_string(), Value::Str(name.clone()));
                m.insert("rowCount".to_string(), Value::Int(*row_count as i64));
                Value::Record(m)
            })
            .collect(),
    );
    let ctx = PackageEnv { files_value: &files_value, package_id, extra };
    run_scope(sink, specs, &ctx, PACKAGE_QUOTA, || ValidatorScope::Package { package_id: package_id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::registry::TypeRegistry;
    use std::path::Path;

    fn one_row_dataset() -> crate::model::Dataset {
        let sink = Diagnostics::new();
        let reg = TypeRegistry::new();
        let text = "name:string\tprice:float\nsword\t10\n";
        let grid = crate::codec::decode(text);
        crate::model::build_dataset(&sink, &reg, Path::new("Items.tsv"), &grid, false).unwrap()
    }

    #[test]
    fn row_validator_passes_on_true() {
        let dataset = one_row_dataset();
        let row = dataset.row(2).unwrap();
        let sink = Diagnostics::new();
        let specs = vec![ValidatorSpec { expr: "self.price > 0".to_string(), level: ValidatorLevel::Error }];
        let extra = ValidatorEnv::default();
        let all_rows = Value::List(vec![row.to_record()]);
        let (passed, warnings) = run_row_validators(&sink, &specs, row, 2, "Items.tsv", &all_rows, &extra);
        assert!(passed);
        assert!(warnings.is_empty());
    }

    #[test]
    fn row_validator_warns_without_failing_scope() {
        let dataset = one_row_dataset();
        let row = dataset.row(2).unwrap();
        let sink = Diagnostics::new();
        let specs = vec![ValidatorSpec { expr: "self.price > 100".to_string(), level: ValidatorLevel::Warn }];
        let extra = ValidatorEnv::default();
        let all_rows = Value::List(vec![row.to_record()]);
        let (passed, warnings) = run_row_validators(&sink, &specs, row, 2, "Items.tsv", &all_rows, &extra);
        assert!(passed);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn row_validator_error_fails_scope_and_reports() {
        let dataset = one_row_dataset();
        let row = dataset.row(2).unwrap();
        let sink = Diagnostics::new();
        let specs = vec![ValidatorSpec { expr: "self.price > 100".to_string(), level: ValidatorLevel::Error }];
        let extra = ValidatorEnv::default();
        let all_rows = Value::List(vec![row.to_record()]);
        let (passed, _) = run_row_validators(&sink, &specs, row, 2, "Items.tsv", &all_rows, &extra);
        assert!(!passed);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn tag_helpers_resolve_membership() {
        let mut extra = ValidatorEnv::default();
        extra.tags.insert("weapons".to_string(), vec!["sword".to_string()]);
        let dataset = one_row_dataset();
        let row = dataset.row(2).unwrap();
        let sink = Diagnostics::new();
        let specs = vec![ValidatorSpec { expr: "isMemberOfTag(self.name, \"weapons\")".to_string(), level: ValidatorLevel::Error }];
        let all_rows = Value::List(vec![row.to_record()]);
        let (passed, _) = run_row_validators(&sink, &specs, row, 2, "Items.tsv", &all_rows, &extra);
        assert!(passed);
    }
}
