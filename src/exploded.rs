//! Exploded/collection column analyzer, spec §4.E.
//!
//! Flat column names encode nested structure: a dotted path (`a.b.c`)
//! explodes into nested records/tuples; a bracketed suffix (`base[N]` /
//! `base[N]=`) marks an array element, a map key, or a map value. This
//! module turns a header's flat column list into a `root → Structure` map,
//! and lazily assembles a `Structure` into a [`Value`] for a given row.
//!
//! Deliberately decoupled from [`crate::model`]: the builder only needs a
//! column's index, declared name, and type-spec text; assembly only needs a
//! way to read a column's parsed value by index. [`crate::model::Row`]
//! implements [`CellSource`] once rows exist.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

use crate::diagnostics::StructuralError;
use crate::value::Value;

/// A column's declared name, 1-based index, and type-spec text — the only
/// facts the analyzer needs (spec §3 Column).
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub idx: usize,
    pub name: String,
    pub type_spec: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSuffix {
    pub index: usize,
    pub is_map_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Dotted path segments. The last segment's bracket suffix, if any, is
    /// stripped and recorded separately in `collection`.
    pub segments: Vec<String>,
    pub collection: Option<CollectionSuffix>,
}

impl ParsedName {
    pub fn is_exploded(&self) -> bool {
        self.segments.len() > 1 || self.collection.is_some()
    }
}

fn collection_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\[(\d+)\](=)?$").unwrap())
}

fn positional_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^_([1-9][0-9]*)$").unwrap())
}

/// Positional tuple index (`_1`, `_2`, ...), 1-based, if `segment` matches.
pub fn positional_index(segment: &str) -> Option<usize> {
    positional_re().captures(segment).and_then(|c| c[1].parse().ok())
}

pub fn parse_column_path(name: &str) -> ParsedName {
    let mut segments: Vec<String> = name.split('.').map(|s| s.to_string()).collect();
    let mut collection = None;
    if let Some(last) = segments.last_mut() {
        if let Some(caps) = collection_suffix_re().captures(last) {
            let base = caps[1].to_string();
            let index: usize = caps[2].parse().unwrap_or(0);
            let is_map_value = caps.get(3).is_some();
            collection = Some(CollectionSuffix { index, is_map_value });
            *last = base;
        }
    }
    ParsedName { segments, collection }
}

/// A nested immutable value type synthesized from exploded columns (spec §3
/// Structure). Each variant carries its own synthesized `type_spec` text,
/// used for `Header.__type_spec`/`collapsed_column_spec` (spec §4.E).
#[derive(Debug, Clone, PartialEq)]
pub enum Structure {
    Leaf { col_idx: usize, type_spec: String },
    Record { type_spec: String, fields: IndexMap<String, Structure> },
    Tuple { type_spec: String, fields: Vec<Structure> },
    Array { type_spec: String, element_type: String, max_index: usize, element_columns: BTreeMap<usize, usize> },
    Map {
        type_spec: String,
        key_type: String,
        value_type: String,
        max_index: usize,
        key_columns: BTreeMap<usize, usize>,
        value_columns: BTreeMap<usize, usize>,
    },
}

impl Structure {
    pub fn type_spec(&self) -> &str {
        match self {
            Structure::Leaf { type_spec, .. }
            | Structure::Record { type_spec, .. }
            | Structure::Tuple { type_spec, .. }
            | Structure::Array { type_spec, .. }
            | Structure::Map { type_spec, .. } => type_spec,
        }
    }

    /// `collapsed_column_spec(root, structure)`, spec §4.E.
    pub fn collapsed_column_spec(&self, root: &str) -> String {
        format!("{root}:{}", self.type_spec())
    }
}

#[derive(Debug, Default)]
struct CollectionGroup {
    is_map: bool,
    max_index: usize,
    key_columns: BTreeMap<usize, (usize, String)>,
    value_columns: BTreeMap<usize, (usize, String)>,
    element_columns: BTreeMap<usize, (usize, String)>,
}

/// Build `root → Structure` for a header's columns (spec §4.E, two passes).
pub fn build_exploded_map(
    source_name: &str,
    columns: &[ColumnInfo],
) -> Result<IndexMap<String, Structure>, StructuralError> {
    let mut leaves: Vec<(Vec<String>, usize, String)> = Vec::new();
    let mut groups: IndexMap<Vec<String>, CollectionGroup> = IndexMap::new();

    for col in columns {
        let parsed = parse_column_path(&col.name);
        if !parsed.is_exploded() {
            continue;
        }
        match parsed.collection {
            None => leaves.push((parsed.segments, col.idx, col.type_spec.clone())),
            Some(suffix) => {
                let group = groups.entry(parsed.segments.clone()).or_default();
                group.max_index = group.max_index.max(suffix.index);
                if suffix.is_map_value {
                    group.is_map = true;
                    group.value_columns.insert(suffix.index, (col.idx, col.type_spec.clone()));
                } else {
                    group.element_columns.insert(suffix.index, (col.idx, col.type_spec.clone()));
                }
            }
        }
    }

    // Pass 1: validate each collection group and turn it into a Structure.
    let mut collection_structures: IndexMap<Vec<String>, Structure> = IndexMap::new();
    for (base_path, mut group) in groups {
        let root_text = base_path.join(".");
        if group.is_map {
            // Keys recorded under element_columns when is_map_value was false;
            // move them into key_columns (spec §4.E step 2: "move
            // element_columns into key_columns for maps").
            group.key_columns.append(&mut group.element_columns);
            for i in 1..=group.max_index {
                let has_key = group.key_columns.contains_key(&i);
                let has_value = group.value_columns.contains_key(&i);
                if !has_key {
                    return Err(StructuralError::MissingCollectionSide {
                        source_name: source_name.to_string(),
                        root: root_text.clone(),
                        index: i,
                        missing: "key",
                    });
                }
                if !has_value {
                    return Err(StructuralError::MissingCollectionSide {
                        source_name: source_name.to_string(),
                        root: root_text.clone(),
                        index: i,
                        missing: "value",
                    });
                }
            }
            let key_type = group.key_columns.get(&1).map(|(_, t)| t.clone()).unwrap_or_default();
            let value_type = group.value_columns.get(&1).map(|(_, t)| t.clone()).unwrap_or_default();
            let structure = Structure::Map {
                type_spec: format!("{{{key_type}:{value_type}}}"),
                key_type,
                value_type,
                max_index: group.max_index,
                key_columns: group.key_columns.iter().map(|(i, (c, _))| (*i, *c)).collect(),
                value_columns: group.value_columns.iter().map(|(i, (c, _))| (*i, *c)).collect(),
            };
            collection_structures.insert(base_path, structure);
        } else {
            for i in 1..=group.max_index {
                if !group.element_columns.contains_key(&i) {
                    return Err(StructuralError::InconsistentCollectionIndices {
                        source_name: source_name.to_string(),
                        root: root_text.clone(),
                    });
                }
            }
            let element_type = group.element_columns.get(&1).map(|(_, t)| t.clone()).unwrap_or_default();
            let structure = Structure::Array {
                type_spec: format!("{{{element_type}}}"),
                element_type,
                max_index: group.max_index,
                element_columns: group.element_columns.iter().map(|(i, (c, _))| (*i, *c)).collect(),
            };
            collection_structures.insert(base_path, structure);
        }
    }

    // Pass 2: build a path tree over leaves + collection markers, rooted at
    // each distinct top-level segment.
    let mut roots: Vec<String> = Vec::new();
    for (path, _, _) in &leaves {
        if !roots.contains(&path[0]) {
            roots.push(path[0].clone());
        }
    }
    for path in collection_structures.keys() {
        if !roots.contains(&path[0]) {
            roots.push(path[0].clone());
        }
    }

    let mut exploded_map = IndexMap::new();
    for root in roots {
        let structure = build_node(&[root.clone()], &leaves, &collection_structures);
        exploded_map.insert(root, structure);
    }
    Ok(exploded_map)
}

fn build_node(
    prefix: &[String],
    leaves: &[(Vec<String>, usize, String)],
    collections: &IndexMap<Vec<String>, Structure>,
) -> Structure {
    if let Some(structure) = collections.get(prefix) {
        return structure.clone();
    }
    // Leaves whose path is exactly `prefix` are handled by the caller before
    // recursing; here we gather this node's direct children.
    let mut children: IndexMap<String, Structure> = IndexMap::new();
    let mut child_order: Vec<String> = Vec::new();

    // Direct leaves: path length == prefix.len() + 1.
    for (path, col_idx, type_spec) in leaves {
        if path.len() == prefix.len() + 1 && path[..prefix.len()] == *prefix {
            let seg = path[prefix.len()].clone();
            if !children.contains_key(&seg) {
                child_order.push(seg.clone());
            }
            children.insert(seg, Structure::Leaf { col_idx: *col_idx, type_spec: type_spec.clone() });
        }
    }

    // Direct collection markers one level down.
    for path in collections.keys() {
        if path.len() == prefix.len() + 1 && path[..prefix.len()] == *prefix {
            let seg = path[prefix.len()].clone();
            if !children.contains_key(&seg) {
                child_order.push(seg.clone());
                children.insert(seg.clone(), collections[path].clone());
            }
        }
    }

    // Deeper paths: recurse, one child per distinct next segment.
    let mut seen_deep: Vec<String> = Vec::new();
    for (path, _, _) in leaves {
        if path.len() > prefix.len() + 1 && path[..prefix.len()] == *prefix {
            let seg = path[prefix.len()].clone();
            if !seen_deep.contains(&seg) && !children.contains_key(&seg) {
                seen_deep.push(seg);
            }
        }
    }
    for path in collections.keys() {
        if path.len() > prefix.len() + 1 && path[..prefix.len()] == *prefix {
            let seg = path[prefix.len()].clone();
            if !seen_deep.contains(&seg) && !children.contains_key(&seg) {
                seen_deep.push(seg);
            }
        }
    }
    for seg in seen_deep {
        let mut child_prefix = prefix.to_vec();
        child_prefix.push(seg.clone());
        let structure = build_node(&child_prefix, leaves, collections);
        child_order.push(seg.clone());
        children.insert(seg, structure);
    }

    // Classify: tuple iff every child segment is `_1.._N` contiguous from 1.
    let mut positions: Vec<(usize, String)> = Vec::new();
    let mut all_positional = !child_order.is_empty();
    for seg in &child_order {
        match positional_index(seg) {
            Some(n) => positions.push((n, seg.clone())),
            None => {
                all_positional = false;
                break;
            }
        }
    }
    if all_positional {
        positions.sort_by_key(|(n, _)| *n);
        let contiguous = positions.iter().enumerate().all(|(i, (n, _))| *n == i + 1);
        if contiguous {
            let fields: Vec<Structure> = positions.iter().map(|(_, seg)| children.get(seg).unwrap().clone()).collect();
            let type_spec = format!("{{{}}}", fields.iter().map(|f| f.type_spec().to_string()).collect::<Vec<_>>().join(","));
            return Structure::Tuple { type_spec, fields };
        }
    }

    let mut ordered_fields = IndexMap::new();
    for seg in &child_order {
        ordered_fields.insert(seg.clone(), children.get(seg).unwrap().clone());
    }
    let type_spec = format!(
        "{{{}}}",
        ordered_fields.iter().map(|(n, s)| format!("{n}:{}", s.type_spec())).collect::<Vec<_>>().join(",")
    );
    Structure::Record { type_spec, fields: ordered_fields }
}

/// How [`assemble`] reads a leaf value: by 1-based column index. Implemented
/// by [`crate::model::Row`].
pub trait CellSource {
    fn cell_parsed(&self, col_idx: usize) -> Value;
}

/// `assemble(row, structure)`, spec §4.E: materialize a `Structure` into a
/// `Value` by reading leaf columns from `source`.
pub fn assemble(source: &dyn CellSource, structure: &Structure) -> Value {
    match structure {
        Structure::Leaf { col_idx, .. } => source.cell_parsed(*col_idx),
        Structure::Record { fields, .. } => {
            let mut m = IndexMap::new();
            for (name, child) in fields {
                m.insert(name.clone(), assemble(source, child));
            }
            Value::Record(m)
        }
        Structure::Tuple { fields, .. } => Value::Tuple(fields.iter().map(|f| assemble(source, f)).collect()),
        Structure::Array { max_index, element_columns, .. } => {
            let mut items = Vec::with_capacity(*max_index);
            for i in 1..=*max_index {
                let col_idx = element_columns[&i];
                items.push(source.cell_parsed(col_idx));
            }
            Value::List(items)
        }
        Structure::Map { max_index, key_columns, value_columns, .. } => {
            let mut m = IndexMap::new();
            for i in 1..=*max_index {
                let key_val = source.cell_parsed(key_columns[&i]);
                let Some(key) = key_val.key_string() else { continue };
                let value = source.cell_parsed(value_columns[&i]);
                m.insert(key, value);
            }
            Value::Map(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRow(std::collections::HashMap<usize, Value>);
    impl CellSource for FakeRow {
        fn cell_parsed(&self, col_idx: usize) -> Value {
            self.0.get(&col_idx).cloned().unwrap_or(Value::Null)
        }
    }

    #[test]
    fn exploded_record_with_nested_tuple() {
        let columns = vec![
            ColumnInfo { idx: 1, name: "id".to_string(), type_spec: "name".to_string() },
            ColumnInfo { idx: 2, name: "location.level".to_string(), type_spec: "name".to_string() },
            ColumnInfo { idx: 3, name: "location.position._1".to_string(), type_spec: "integer".to_string() },
            ColumnInfo { idx: 4, name: "location.position._2".to_string(), type_spec: "integer".to_string() },
        ];
        let map = build_exploded_map("test.tsv", &columns).unwrap();
        let structure = &map["location"];
        assert_eq!(structure.type_spec(), "{level:name,position:{integer,integer}}");

        let row = FakeRow(std::collections::HashMap::from([
            (2, Value::Str("ground".to_string())),
            (3, Value::Int(3)),
            (4, Value::Int(5)),
        ]));
        let value = assemble(&row, structure);
        match value {
            Value::Record(m) => {
                assert_eq!(m["level"], Value::Str("ground".to_string()));
                assert_eq!(m["position"], Value::Tuple(vec![Value::Int(3), Value::Int(5)]));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn exploded_map_from_bracket_columns() {
        let columns = vec![
            ColumnInfo { idx: 1, name: "stats[1]".to_string(), type_spec: "string".to_string() },
            ColumnInfo { idx: 2, name: "stats[1]=".to_string(), type_spec: "integer".to_string() },
            ColumnInfo { idx: 3, name: "stats[2]".to_string(), type_spec: "string".to_string() },
            ColumnInfo { idx: 4, name: "stats[2]=".to_string(), type_spec: "integer".to_string() },
        ];
        let map = build_exploded_map("test.tsv", &columns).unwrap();
        let structure = &map["stats"];
        let row = FakeRow(std::collections::HashMap::from([
            (1, Value::Str("hp".to_string())),
            (2, Value::Int(10)),
            (3, Value::Str("mp".to_string())),
            (4, Value::Int(5)),
        ]));
        let value = assemble(&row, structure);
        match value {
            Value::Map(m) => {
                assert_eq!(m["hp"], Value::Int(10));
                assert_eq!(m["mp"], Value::Int(5));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn rejects_gap_in_array_indices() {
        let columns = vec![
            ColumnInfo { idx: 1, name: "items[1]".to_string(), type_spec: "integer".to_string() },
            ColumnInfo { idx: 2, name: "items[3]".to_string(), type_spec: "integer".to_string() },
        ];
        let err = build_exploded_map("test.tsv", &columns).unwrap_err();
        assert!(matches!(err, StructuralError::InconsistentCollectionIndices { .. }));
    }

    #[test]
    fn rejects_missing_map_value_side() {
        let columns = vec![ColumnInfo { idx: 1, name: "stats[1]".to_string(), type_spec: "string".to_string() }];
        // Not a map at all (no `=` sibling) -- treated as array, passes.
        assert!(build_exploded_map("test.tsv", &columns).is_ok());

        let columns = vec![
            ColumnInfo { idx: 1, name: "stats[1]".to_string(), type_spec: "string".to_string() },
            ColumnInfo { idx: 2, name: "stats[1]=".to_string(), type_spec: "integer".to_string() },
            ColumnInfo { idx: 3, name: "stats[2]=".to_string(), type_spec: "integer".to_string() },
        ];
        let err = build_exploded_map("test.tsv", &columns).unwrap_err();
        assert!(matches!(err, StructuralError::MissingCollectionSide { missing: "key", .. }));
    }
}
