//! Orchestrator, spec §4.L.
//!
//! `process_files` is the single entry point the CLI calls: discover
//! candidate files, resolve package manifests and their load order, parse
//! every data file through [`crate::model`], register package-declared
//! types into the shared [`TypeRegistry`], then run row/file/package
//! validators. Mirrors the shape of the teacher's `LintPipeline`
//! (`new` → one method that replays/walks inputs → a result), but TabuLua's
//! orchestration is a pure function of its inputs rather than a struct that
//! accumulates catalog state across a changeset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::codec::{self, Grid};
use crate::diagnostics::{self, Diagnostics};
use crate::manifest::{self, FileDescriptor, Manifest, MANIFEST_FILE_NAME};
use crate::model::{self, Dataset};
use crate::registry::TypeRegistry;
use crate::template;
use crate::validators::{self, ValidatorEnv, ValidatorWarning};

/// Metadata about a descriptor-declared join: which file's rows get
/// attached onto another published column (spec §4.H step 6, §3
/// Manifest/FileDescriptor `join_into`/`join_column`/`export`).
#[derive(Debug, Clone)]
pub struct JoinMeta {
    pub file: PathBuf,
    pub join_into: String,
    pub join_column: String,
    pub export: Option<String>,
    pub joined_type_name: Option<String>,
}

/// The sealed result of a full `process_files` run (spec §3 ProcessResult).
#[derive(Debug)]
pub struct ProcessResult {
    pub raw_files: HashMap<PathBuf, String>,
    pub tsv_files: HashMap<PathBuf, Dataset>,
    pub package_order: Vec<String>,
    pub packages: IndexMap<String, Manifest>,
    pub join_meta: Vec<JoinMeta>,
    pub file2dir: HashMap<PathBuf, PathBuf>,
    pub validation_passed: bool,
    pub validation_warnings: Vec<ValidatorWarning>,
}

fn is_transposed_path(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_lowercase().ends_with(".transposed.tsv")
}

fn file_stem_type_name(path: &Path) -> String {
    let name = diagnostics::path_file_name(path);
    name.strip_suffix(".transposed.tsv").or_else(|| name.strip_suffix(".tsv")).unwrap_or(name.as_str()).to_string()
}

/// Decode + run one template pass + parse a single candidate file into a
/// [`Dataset`], registering its record shape into `registry` under
/// `type_name` (spec §4.L step 6, §4.H step 2 reused for data files).
fn load_dataset(
    sink: &Diagnostics,
    registry: &TypeRegistry,
    path: &Path,
    type_name: &str,
    raw_files: &mut HashMap<PathBuf, String>,
) -> Result<Dataset, diagnostics::StructuralError> {
    let raw = std::fs::read_to_string(path).unwrap_or_default();
    let rendered = template::process(&raw);
    raw_files.insert(path.to_path_buf(), rendered.clone());

    let transposed = is_transposed_path(path);
    let physical: Grid = codec::decode(&rendered);
    let logical = if transposed { codec::reverse_transpose(&physical) } else { physical };

    let dataset = model::build_dataset(sink, registry, path, &logical, transposed)?;

    if !registry.is_built_in_type(type_name) {
        registry.register_alias(sink, type_name, &dataset.header.type_spec);
    }
    Ok(dataset)
}

/// Priority for files not named by any package's `Files.tsv` descriptor:
/// files whose declared type looks like it defines a type other files
/// depend on (`Enum`/`Type` suffix) load before ordinary record files.
fn file_priority(type_name: &str) -> u8 {
    let lower = type_name.to_ascii_lowercase();
    if lower.ends_with("enum") || lower.ends_with("type") {
        0
    } else {
        1
    }
}

/// `processFiles`, spec §4.L.
pub fn process_files(directories: &[PathBuf], sink: Option<&Diagnostics>) -> Option<ProcessResult> {
    let owned_sink;
    let sink: &Diagnostics = match sink {
        Some(s) => s,
        None => {
            owned_sink = Diagnostics::new();
            &owned_sink
        }
    };
    let registry = TypeRegistry::new();

    let candidates = match manifest::discover_candidate_files(directories) {
        Ok(files) => files,
        Err(e) => {
            sink.report_warning(format!("failed to scan input directories: {e}"));
            return None;
        }
    };

    let manifest_paths: Vec<&PathBuf> =
        candidates.iter().filter(|p| diagnostics::path_file_name(p) == MANIFEST_FILE_NAME).collect();

    let mut raw_files: HashMap<PathBuf, String> = HashMap::new();
    let mut file2dir: HashMap<PathBuf, PathBuf> = HashMap::new();

    let mut manifests: IndexMap<String, Manifest> = IndexMap::new();
    for path in &manifest_paths {
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let dataset = match load_dataset(sink, &registry, path, "Manifest", &mut raw_files) {
            Ok(d) => d,
            Err(e) => {
                sink.report_warning(format!("{e}"));
                continue;
            }
        };
        match manifest::manifest_from_dataset(&dataset, &dir) {
            Ok(m) => {
                file2dir.insert((**path).clone(), dir.clone());
                manifests.insert(m.package_id.clone(), m);
            }
            Err(e) => sink.report_warning(format!("{e}")),
        }
    }

    let package_order = match manifest::resolve_package_order(&manifests) {
        Ok(order) => order,
        Err(e) => {
            sink.report_warning(format!("{e}"));
            return None;
        }
    };

    for pkg_id in &package_order {
        let m = &manifests[pkg_id];
        for custom_type in &m.custom_types {
            if let Some((name, spec_text)) = custom_type.split_once(':') {
                registry.register_alias(sink, name.trim(), spec_text.trim());
            }
        }
    }

    // Resolve each package's `Files.tsv` descriptor, in package order.
    let mut descriptors_by_package: IndexMap<String, Vec<FileDescriptor>> = IndexMap::new();
    let mut descriptor_paths: Vec<PathBuf> = Vec::new();
    for pkg_id in &package_order {
        let dir = manifests[pkg_id].dir.clone();
        let Some(descriptor_path) = candidates
            .iter()
            .find(|p| {
                p.starts_with(&dir) && diagnostics::path_file_name(p).eq_ignore_ascii_case(manifest::FILES_DESCRIPTOR_NAME)
            })
            .cloned()
        else {
            descriptors_by_package.insert(pkg_id.clone(), Vec::new());
            continue;
        };
        let package_candidates: Vec<PathBuf> = candidates.iter().filter(|p| p.starts_with(&dir)).cloned().collect();
        let dataset = match load_dataset(sink, &registry, &descriptor_path, "Files", &mut raw_files) {
            Ok(d) => d,
            Err(e) => {
                sink.report_warning(format!("{e}"));
                descriptors_by_package.insert(pkg_id.clone(), Vec::new());
                continue;
            }
        };
        file2dir.insert(descriptor_path.clone(), dir.clone());
        descriptor_paths.push(descriptor_path);

        let mut descriptors = manifest::descriptors_from_dataset(&dataset);
        for d in &mut descriptors {
            d.resolved_path = manifest::resolve_descriptor_path(d, &package_candidates);
        }
        descriptors_by_package.insert(pkg_id.clone(), descriptors);
    }

    let reserved: std::collections::HashSet<PathBuf> =
        manifest_paths.iter().map(|p| (**p).clone()).chain(descriptor_paths.iter().cloned()).collect();

    // Process descriptor-named files first (in package, then descriptor order),
    // then remaining candidate files by priority/alphabetical order.
    let mut tsv_files: HashMap<PathBuf, Dataset> = HashMap::new();
    let mut join_meta: Vec<JoinMeta> = Vec::new();
    let mut package_files: HashMap<String, Vec<(String, usize)>> = HashMap::new();

    for pkg_id in &package_order {
        let dir = manifests[pkg_id].dir.clone();
        let descriptors = descriptors_by_package.get(pkg_id).cloned().unwrap_or_default();
        let mut processed_here: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();

        for descriptor in &descriptors {
            let Some(path) = descriptor.resolved_path.clone() else {
                sink.report_warning(format!("{}: could not resolve declared file '{}'", pkg_id, descriptor.declared_path));
                continue;
            };
            let type_name = descriptor.type_name.clone().unwrap_or_else(|| file_stem_type_name(&path));
            let dataset = match load_dataset(sink, &registry, &path, &type_name, &mut raw_files) {
                Ok(d) => d,
                Err(e) => {
                    sink.report_warning(format!("{e}"));
                    continue;
                }
            };
            file2dir.insert(path.clone(), dir.clone());
            package_files.entry(pkg_id.clone()).or_default().push((diagnostics::path_file_name(&path), dataset.rows().count()));
            if let Some(join_into) = &descriptor.join_into {
                join_meta.push(JoinMeta {
                    file: path.clone(),
                    join_into: join_into.clone(),
                    join_column: descriptor.join_column.clone().unwrap_or_default(),
                    export: descriptor.export.clone(),
                    joined_type_name: descriptor.joined_type_name.clone(),
                });
            }
            processed_here.insert(path.clone());
            tsv_files.insert(path, dataset);
        }

        let mut remaining: Vec<PathBuf> = candidates
            .iter()
            .filter(|p| p.starts_with(&dir) && !reserved.contains(*p) && !processed_here.contains(*p) && !tsv_files.contains_key(*p))
            .cloned()
            .collect();
        remaining.sort_by(|a, b| {
            let pa = file_priority(&file_stem_type_name(a));
            let pb = file_priority(&file_stem_type_name(b));
            pa.cmp(&pb).then_with(|| a.cmp(b))
        });

        for path in remaining {
            let type_name = file_stem_type_name(&path);
            let dataset = match load_dataset(sink, &registry, &path, &type_name, &mut raw_files) {
                Ok(d) => d,
                Err(e) => {
                    sink.report_warning(format!("{e}"));
                    continue;
                }
            };
            file2dir.insert(path.clone(), dir.clone());
            package_files.entry(pkg_id.clone()).or_default().push((diagnostics::path_file_name(&path), dataset.rows().count()));
            tsv_files.insert(path, dataset);
        }
    }

    // Validators: row, then file, then package, in package order (spec §4.I/§4.L step 7).
    let mut validation_passed = true;
    let mut validation_warnings = Vec::new();
    let extra = ValidatorEnv::default();

    for pkg_id in &package_order {
        let descriptors = descriptors_by_package.get(pkg_id).cloned().unwrap_or_default();
        for descriptor in &descriptors {
            let Some(path) = &descriptor.resolved_path else { continue };
            let Some(dataset) = tsv_files.get(path) else { continue };
            let file_name = diagnostics::path_file_name(path);
            let rows: Vec<_> = dataset.rows().cloned().collect();
            let rows_value = crate::value::Value::List(rows.iter().map(model::Row::to_record).collect());

            if !descriptor.row_validators.is_empty() {
                for (i, row) in rows.iter().enumerate() {
                    let (passed, warnings) =
                        validators::run_row_validators(sink, &descriptor.row_validators, row, i + 2, &file_name, &rows_value, &extra);
                    validation_warnings.extend(warnings);
                    if !passed {
                        validation_passed = false;
                    }
                }
            }

            if !descriptor.file_validators.is_empty() {
                let (passed, warnings) = validators::run_file_validators(sink, &descriptor.file_validators, &rows, &file_name, &extra);
                validation_warnings.extend(warnings);
                if !passed {
                    validation_passed = false;
                }
            }
        }

        let manifest = &manifests[pkg_id];
        if !manifest.package_validators.is_empty() {
            let files = package_files.get(pkg_id).cloned().unwrap_or_default();
            let (passed, warnings) = validators::run_package_validators(sink, &manifest.package_validators, &files, pkg_id, &extra);
            validation_warnings.extend(warnings);
            if !passed {
                validation_passed = false;
            }
        }
    }

    if sink.has_errors() {
        validation_passed = false;
    }

    Some(ProcessResult {
        raw_files,
        tsv_files,
        package_order,
        packages: manifests,
        join_meta,
        file2dir,
        validation_passed,
        validation_warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn processes_a_package_with_no_manifest() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("items.tsv"), "name:string\tprice:float\nsword\t10\n");
        let result = process_files(&[dir.path().to_path_buf()], None).expect("process_files should succeed");
        assert_eq!(result.tsv_files.len(), 1);
        assert!(result.package_order.is_empty());
    }

    #[test]
    fn package_order_and_manifest_are_loaded() {
        let dir = tempdir().unwrap();
        let pkg_dir = dir.path().join("core");
        write_file(
            &pkg_dir.join("Manifest.transposed.tsv"),
            "package_id:string\tcore\nname:string\tCore\nversion:string\t1.0.0\ndescription:string\tCore package\n",
        );
        write_file(&pkg_dir.join("items.tsv"), "name:string\tprice:float\nsword\t10\n");
        let result = process_files(&[dir.path().to_path_buf()], None).expect("process_files should succeed");
        assert_eq!(result.package_order, vec!["core".to_string()]);
        assert!(result.packages.contains_key("core"));
    }
}
