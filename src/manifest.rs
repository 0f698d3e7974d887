//! Manifest & descriptor loader, spec §4.H.
//!
//! Discovers `Manifest.transposed.tsv` files under the input directories,
//! parses each through the same [`crate::model`] pipeline used for data
//! files (sans validators), and resolves a package load order from the
//! declared `dependencies`/`load_after` DAG. Mirrors the teacher's
//! `input::MigrationLoader` split: directory discovery is a free function,
//! not a trait, since TabuLua only ever loads from the filesystem.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::diagnostics::StructuralError;
use crate::model::Dataset;
use crate::value::Value;

pub const MANIFEST_FILE_NAME: &str = "Manifest.transposed.tsv";
pub const FILES_DESCRIPTOR_NAME: &str = "Files.tsv";

/// A semver comparison operator, spec §3 Manifest.dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    Tilde,
    Caret,
}

impl DependencyOp {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "=" => Some(Self::Eq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "~" => Some(Self::Tilde),
            "^" => Some(Self::Caret),
            _ => None,
        }
    }

    pub fn satisfied_by(&self, req: &semver::Version, actual: &semver::Version) -> bool {
        match self {
            Self::Eq => actual == req,
            Self::Gt => actual > req,
            Self::Ge => actual >= req,
            Self::Lt => actual < req,
            Self::Le => actual <= req,
            Self::Tilde => actual.major == req.major && actual.minor == req.minor && actual >= req,
            Self::Caret => actual.major == req.major && actual >= req,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub package_id: String,
    pub req_op: DependencyOp,
    pub req_version: semver::Version,
}

#[derive(Debug, Clone)]
pub struct CodeLibrary {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorLevel {
    Error,
    Warn,
}

#[derive(Debug, Clone)]
pub struct ValidatorSpec {
    pub expr: String,
    pub level: ValidatorLevel,
}

impl ValidatorSpec {
    /// Normalize a bare expression string (level=error) or a `{expr,level}`
    /// record (spec §3 Validator spec).
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Str(s) => Some(ValidatorSpec { expr: s.clone(), level: ValidatorLevel::Error }),
            Value::Record(m) => {
                let expr = m.get("expr")?.as_str()?.to_string();
                let level = match m.get("level").and_then(|v| v.as_str()) {
                    Some("warn") => ValidatorLevel::Warn,
                    _ => ValidatorLevel::Error,
                };
                Some(ValidatorSpec { expr, level })
            }
            _ => None,
        }
    }
}

/// Spec §3 Manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub package_id: String,
    pub name: String,
    pub version: semver::Version,
    pub description: String,
    pub url: Option<String>,
    /// Each entry is `name:type_spec`, registered into the [`crate::registry::TypeRegistry`]
    /// via `register_alias` before any data file of the package is parsed.
    pub custom_types: Vec<String>,
    pub code_libraries: Vec<CodeLibrary>,
    pub dependencies: Vec<Dependency>,
    pub load_after: Vec<String>,
    pub package_validators: Vec<ValidatorSpec>,
}

fn string_list(v: Option<Value>) -> Vec<String> {
    match v {
        Some(Value::List(items)) => items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Some(Value::Str(s)) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    }
}

fn record_list(v: Option<Value>) -> Vec<IndexMap<String, Value>> {
    match v {
        Some(Value::List(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Record(m) => Some(m),
                _ => None,
            })
            .collect(),
        Some(Value::Record(m)) => vec![m],
        _ => Vec::new(),
    }
}

/// Build a [`Manifest`] from the single data row of a parsed
/// `Manifest.transposed.tsv` dataset (spec §4.H step 2).
pub fn manifest_from_dataset(dataset: &Dataset, dir: &Path) -> Result<Manifest, StructuralError> {
    let source_name = crate::diagnostics::path_file_name(dataset.source());
    let row = dataset.row(2).ok_or_else(|| StructuralError::DuplicateColumnName {
        source_name: source_name.clone(),
        name: "<manifest has no data row>".to_string(),
    })?;

    let package_id = row.get("package_id").and_then(|v| v.as_str().map(str::to_string)).ok_or_else(|| {
        StructuralError::MissingDependency { package_id: "<unknown>".to_string(), dep: "package_id".to_string() }
    })?;
    let name = row.get("name").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| package_id.clone());
    let version_text = row.get("version").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
    let version = semver::Version::parse(&version_text).unwrap_or(semver::Version::new(0, 0, 0));
    let description = row.get("description").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
    let url = row.get("url").and_then(|v| v.as_str().map(str::to_string));

    let custom_types = string_list(row.get("custom_types"));
    let load_after = string_list(row.get("load_after"));

    let code_libraries = record_list(row.get("code_libraries"))
        .into_iter()
        .filter_map(|m| {
            let name = m.get("name")?.as_str()?.to_string();
            let path = m.get("path")?.as_str()?.to_string();
            Some(CodeLibrary { name, path })
        })
        .collect();

    let dependencies = record_list(row.get("dependencies"))
        .into_iter()
        .filter_map(|m| {
            let package_id = m.get("package_id")?.as_str()?.to_string();
            let op_text = m.get("req_op")?.as_str()?;
            let req_op = DependencyOp::parse(op_text)?;
            let req_version = semver::Version::parse(m.get("req_version")?.as_str()?).ok()?;
            Some(Dependency { package_id, req_op, req_version })
        })
        .collect();

    let package_validators =
        record_list(row.get("package_validators")).into_iter().filter_map(|m| ValidatorSpec::from_value(&Value::Record(m))).collect();
    let package_validators = if package_validators.is_empty() {
        match row.get("package_validators") {
            Some(Value::List(items)) => items.iter().filter_map(ValidatorSpec::from_value).collect(),
            _ => Vec::new(),
        }
    } else {
        package_validators
    };

    Ok(Manifest {
        path: dataset.source().to_path_buf(),
        dir: dir.to_path_buf(),
        package_id,
        name,
        version,
        description,
        url,
        custom_types,
        code_libraries,
        dependencies,
        load_after,
        package_validators,
    })
}

const KNOWN_EXTENSION_SUFFIX: &str = ".tsv";

/// Collect all `.tsv`/`.transposed.tsv` files under `dirs`, recursively
/// (spec §4.H step 1). Mirrors the teacher's `collect_sql_files`, widened
/// to recurse since TabuLua packages are themselves directories.
pub fn discover_candidate_files(dirs: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in dirs {
        walk_dir(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
        } else if path.to_string_lossy().to_ascii_lowercase().ends_with(KNOWN_EXTENSION_SUFFIX) {
            out.push(path);
        }
    }
    Ok(())
}

/// Resolve package load order from each package's `dependencies` +
/// `load_after` (spec §4.H step 3, §8 property 5: topological, ties broken
/// alphabetically by `package_id`).
pub fn resolve_package_order(manifests: &IndexMap<String, Manifest>) -> Result<Vec<String>, StructuralError> {
    let mut indegree: HashMap<String, usize> = manifests.keys().map(|k| (k.clone(), 0)).collect();
    let mut edges: HashMap<String, Vec<String>> = manifests.keys().map(|k| (k.clone(), Vec::new())).collect();

    for (pkg_id, manifest) in manifests {
        for dep in &manifest.dependencies {
            let Some(dep_manifest) = manifests.get(&dep.package_id) else {
                return Err(StructuralError::MissingDependency {
                    package_id: pkg_id.clone(),
                    dep: dep.package_id.clone(),
                });
            };
            if !dep.req_op.satisfied_by(&dep.req_version, &dep_manifest.version) {
                return Err(StructuralError::MissingDependency {
                    package_id: pkg_id.clone(),
                    dep: format!("{} (requires {:?} {})", dep.package_id, dep.req_op, dep.req_version),
                });
            }
            edges.get_mut(&dep.package_id).unwrap().push(pkg_id.clone());
            *indegree.get_mut(pkg_id).unwrap() += 1;
        }
        for after in &manifest.load_after {
            if !manifests.contains_key(after) {
                return Err(StructuralError::MissingDependency { package_id: pkg_id.clone(), dep: after.clone() });
            }
            edges.get_mut(after).unwrap().push(pkg_id.clone());
            *indegree.get_mut(pkg_id).unwrap() += 1;
        }
    }

    let mut ready: Vec<String> = indegree.iter().filter(|(_, &d)| d == 0).map(|(k, _)| k.clone()).collect();
    ready.sort();
    let mut order = Vec::with_capacity(manifests.len());
    let mut seen: HashSet<String> = HashSet::new();

    while !ready.is_empty() {
        let next = ready.remove(0);
        seen.insert(next.clone());
        order.push(next.clone());
        let mut newly_ready = Vec::new();
        for dependent in &edges[&next] {
            let d = indegree.get_mut(dependent).unwrap();
            *d -= 1;
            if *d == 0 {
                newly_ready.push(dependent.clone());
            }
        }
        ready.extend(newly_ready);
        ready.sort();
        ready.dedup();
    }

    if order.len() != manifests.len() {
        let stuck: Vec<&str> = manifests.keys().filter(|k| !seen.contains(*k)).map(|s| s.as_str()).collect();
        return Err(StructuralError::CyclicPackageDependency(stuck.join(", ")));
    }

    Ok(order)
}

/// A row from a package's `Files.tsv` descriptor (spec §4.H step 5-6).
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub declared_path: String,
    pub resolved_path: Option<PathBuf>,
    pub type_name: Option<String>,
    pub publish_context: Option<String>,
    pub publish_column: Option<String>,
    pub join_into: Option<String>,
    pub join_column: Option<String>,
    pub export: Option<String>,
    pub joined_type_name: Option<String>,
    pub row_validators: Vec<ValidatorSpec>,
    pub file_validators: Vec<ValidatorSpec>,
}

/// Parse a package's `Files.tsv` descriptor dataset into its rows (spec
/// §4.H step 5).
pub fn descriptors_from_dataset(dataset: &Dataset) -> Vec<FileDescriptor> {
    dataset
        .rows()
        .map(|row| FileDescriptor {
            declared_path: row.get("path").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default(),
            resolved_path: None,
            type_name: row.get("type_name").and_then(|v| v.as_str().map(str::to_string)),
            publish_context: row.get("publish_context").and_then(|v| v.as_str().map(str::to_string)),
            publish_column: row.get("publish_column").and_then(|v| v.as_str().map(str::to_string)),
            join_into: row.get("join_into").and_then(|v| v.as_str().map(str::to_string)),
            join_column: row.get("join_column").and_then(|v| v.as_str().map(str::to_string)),
            export: row.get("export").and_then(|v| v.as_str().map(str::to_string)),
            joined_type_name: row.get("joined_type_name").and_then(|v| v.as_str().map(str::to_string)),
            row_validators: match row.get("row_validators") {
                Some(Value::List(items)) => items.iter().filter_map(ValidatorSpec::from_value).collect(),
                Some(other) => ValidatorSpec::from_value(&other).into_iter().collect(),
                None => Vec::new(),
            },
            file_validators: match row.get("file_validators") {
                Some(Value::List(items)) => items.iter().filter_map(ValidatorSpec::from_value).collect(),
                Some(other) => ValidatorSpec::from_value(&other).into_iter().collect(),
                None => Vec::new(),
            },
        })
        .collect()
}

/// Resolve a descriptor's declared `path` to a physical file within
/// `package_dir` by case-insensitive suffix matching (spec §4.H step 5).
pub fn resolve_descriptor_path(descriptor: &FileDescriptor, candidates: &[PathBuf]) -> Option<PathBuf> {
    let declared_lower = descriptor.declared_path.to_ascii_lowercase();
    candidates
        .iter()
        .find(|p| p.to_string_lossy().to_ascii_lowercase().ends_with(&declared_lower))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, deps: Vec<&str>) -> Manifest {
        Manifest {
            path: PathBuf::from(format!("{id}/Manifest.transposed.tsv")),
            dir: PathBuf::from(id),
            package_id: id.to_string(),
            name: id.to_string(),
            version: semver::Version::new(1, 0, 0),
            description: String::new(),
            url: None,
            custom_types: Vec::new(),
            code_libraries: Vec::new(),
            dependencies: deps
                .into_iter()
                .map(|d| Dependency {
                    package_id: d.to_string(),
                    req_op: DependencyOp::Ge,
                    req_version: semver::Version::new(1, 0, 0),
                })
                .collect(),
            load_after: Vec::new(),
            package_validators: Vec::new(),
        }
    }

    #[test]
    fn topological_order_respects_dependencies_with_alphabetical_ties() {
        let mut manifests = IndexMap::new();
        manifests.insert("b".to_string(), manifest("b", vec!["a"]));
        manifests.insert("a".to_string(), manifest("a", vec![]));
        manifests.insert("c".to_string(), manifest("c", vec!["a"]));
        let order = resolve_package_order(&manifests).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cyclic_dependency_is_rejected() {
        let mut manifests = IndexMap::new();
        manifests.insert("a".to_string(), manifest("a", vec!["b"]));
        manifests.insert("b".to_string(), manifest("b", vec!["a"]));
        let err = resolve_package_order(&manifests).unwrap_err();
        assert!(matches!(err, StructuralError::CyclicPackageDependency(_)));
    }

    #[test]
    fn missing_dependency_is_reported() {
        let mut manifests = IndexMap::new();
        manifests.insert("a".to_string(), manifest("a", vec!["ghost"]));
        let err = resolve_package_order(&manifests).unwrap_err();
        assert!(matches!(err, StructuralError::MissingDependency { .. }));
    }
}
