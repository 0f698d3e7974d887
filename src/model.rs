//! Header/row/dataset builder, spec §4.G.
//!
//! Ties together the type registry (§4.C), cell parsers (§4.D), the
//! exploded-column analyzer (§4.E), and the expression evaluator (§4.F)
//! into the immutable value objects a processed file yields: `Header`,
//! `Row`, `Cell`, `Dataset`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::codec::{self, Grid, Line};
use crate::diagnostics::{self, Diagnostics, StructuralError};
use crate::eval::{self, Budget, EvalContext};
use crate::exploded::{self, CellSource, ColumnInfo, Structure};
use crate::parsers::{ParseInput, ParseMode, ParserRef};
use crate::registry::TypeRegistry;
use crate::typespec::{self, TypeSpec};
use crate::value::Value;

fn column_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*(\[[0-9]+\]=?)?$").unwrap())
}

/// `collection_info`, spec §3 Column.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub base_path: Vec<String>,
    pub index: usize,
    pub is_map_value: bool,
}

/// An immutable column descriptor (spec §3 Column).
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub idx: usize,
    pub type_spec: String,
    pub default_expr: Option<String>,
    pub published: bool,
    pub valid_name: bool,
    pub is_exploded: bool,
    pub exploded_path: Option<Vec<String>>,
    pub is_collection: bool,
    pub collection_info: Option<CollectionInfo>,
    pub parser: Option<ParserRef>,
}

/// The declared shape of a column, for `Header.__type_spec` round-tripping
/// (spec §6.2): `name[!]:type_spec[:default_expr]`.
impl Column {
    pub fn collapsed_spec(&self) -> String {
        let mark = if self.published { "!" } else { "" };
        match &self.default_expr {
            Some(default) => format!("{}{mark}:{}:{default}", self.name, self.type_spec),
            None => format!("{}{mark}:{}", self.name, self.type_spec),
        }
    }
}

/// Ordered sequence of columns plus lookup tables (spec §3 Header).
#[derive(Debug)]
pub struct Header {
    pub source: PathBuf,
    pub columns: Vec<Column>,
    pub name_index: HashMap<String, usize>,
    pub exploded_map: IndexMap<String, Structure>,
    pub type_spec: String,
}

impl Header {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.name_index.get(name).and_then(|&idx| self.columns.get(idx - 1))
    }

    pub fn col_idx(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }
}

fn admits_nil(type_spec_text: &str) -> bool {
    match typespec::parse(type_spec_text) {
        Ok(TypeSpec::Name(n)) => n == "nil",
        Ok(TypeSpec::Union(options)) => options.iter().any(|o| matches!(o, TypeSpec::Name(n) if n == "nil")),
        _ => false,
    }
}

/// Header build (`newHeader`, spec §4.G step 1-4).
pub fn new_header(
    sink: &Diagnostics,
    registry: &TypeRegistry,
    source: &Path,
    header_cells: &[String],
) -> Result<Header, StructuralError> {
    let source_name = diagnostics::path_file_name(source);
    let mut columns = Vec::with_capacity(header_cells.len());
    let mut name_index = HashMap::new();

    for (i, raw) in header_cells.iter().enumerate() {
        let idx = i + 1;
        let (name_part, rest) = raw.split_once(':').unwrap_or((raw.as_str(), ""));
        let published = name_part.ends_with('!');
        let name = if published { name_part.trim_end_matches('!').to_string() } else { name_part.to_string() };

        let (type_spec_text, default_expr) = match typespec::parse_partial(rest) {
            Ok((spec, remainder)) => (spec.to_spec_text(), remainder.map(|r| r.to_string())),
            Err(e) => {
                sink.report(rest, e);
                (rest.to_string(), None)
            }
        };

        let valid_name = column_name_re().is_match(&name);
        if !valid_name {
            sink.report(&name, "invalid column name");
        }
        if name_index.contains_key(&name) {
            return Err(StructuralError::DuplicateColumnName { source_name, name });
        }
        name_index.insert(name.clone(), idx);

        let parsed_path = exploded::parse_column_path(&name);
        let is_exploded = parsed_path.is_exploded();
        let is_collection = parsed_path.collection.is_some();
        let exploded_path = if is_exploded { Some(parsed_path.segments.clone()) } else { None };
        let collection_info = parsed_path.collection.map(|c| CollectionInfo {
            base_path: parsed_path.segments.clone(),
            index: c.index,
            is_map_value: c.is_map_value,
        });

        let parser = registry.parse_type(sink, &type_spec_text, false);

        columns.push(Column {
            name,
            idx,
            type_spec: type_spec_text,
            default_expr,
            published,
            valid_name,
            is_exploded,
            exploded_path,
            is_collection,
            collection_info,
            parser,
        });
    }

    let column_infos: Vec<ColumnInfo> =
        columns.iter().map(|c| ColumnInfo { idx: c.idx, name: c.name.clone(), type_spec: c.type_spec.clone() }).collect();
    let exploded_map = exploded::build_exploded_map(&source_name, &column_infos)?;

    let exploded_roots: std::collections::HashSet<&str> = exploded_map.keys().map(|s| s.as_str()).collect();
    let mut top_level: Vec<(String, String)> = Vec::new();
    for col in &columns {
        let root = col.exploded_path.as_ref().map(|p| p[0].as_str()).unwrap_or(col.name.as_str());
        if exploded_roots.contains(root) {
            continue;
        }
        top_level.push((col.name.clone(), col.type_spec.clone()));
    }
    for (root, structure) in &exploded_map {
        top_level.push((root.clone(), structure.type_spec().to_string()));
    }
    top_level.sort_by(|a, b| a.0.cmp(&b.0));
    let type_spec =
        format!("{{{}}}", top_level.iter().map(|(n, t)| format!("{n}:{t}")).collect::<Vec<_>>().join(","));

    Ok(Header { source: source.to_path_buf(), columns, name_index, exploded_map, type_spec })
}

/// An immutable four-slot cell (spec §3 Cell).
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: String,
    pub evaluated: Value,
    pub parsed: Value,
    pub reformatted: String,
}

/// A reference to a column, by 1-based index or by name — the two forms a
/// dataset's callable `(line, col)` access accepts (spec §3 Dataset).
#[derive(Debug, Clone)]
pub enum ColRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ColRef {
    fn from(i: usize) -> Self {
        ColRef::Index(i)
    }
}

impl From<&str> for ColRef {
    fn from(s: &str) -> Self {
        ColRef::Name(s.to_string())
    }
}

impl From<String> for ColRef {
    fn from(s: String) -> Self {
        ColRef::Name(s)
    }
}

/// An immutable row: a sequence of cells plus name-keyed lookup through its
/// header (spec §3 Row).
#[derive(Debug)]
pub struct Row {
    pub idx: usize,
    pub cells: Vec<Cell>,
    header: Rc<Header>,
}

impl Row {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn cell(&self, col: impl Into<ColRef>) -> Option<&Cell> {
        let idx = match col.into() {
            ColRef::Index(i) => i,
            ColRef::Name(n) => *self.header.name_index.get(&n)?,
        };
        self.cells.get(idx.checked_sub(1)?)
    }

    /// `row[1].evaluated`, spec §3 Row: must be a basic scalar.
    pub fn primary_key(&self) -> Option<String> {
        self.cells.first()?.evaluated.key_string()
    }

    /// Top-level column names in declaration order, exploded children
    /// collapsed to their root (mirrors `Header.__type_spec`'s field set,
    /// spec §3 Header), used to project a row into a `Value::Record` for
    /// the validator sandbox (spec §4.I: "row.colName returns the cell's
    /// parsed value directly").
    pub fn to_record(&self) -> Value {
        let mut seen = std::collections::HashSet::new();
        let mut m = IndexMap::new();
        for col in &self.header.columns {
            let root = col.exploded_path.as_ref().map(|p| p[0].as_str()).unwrap_or(col.name.as_str());
            if !seen.insert(root.to_string()) {
                continue;
            }
            if let Some(v) = self.get(root) {
                m.insert(root.to_string(), v);
            }
        }
        Value::Record(m)
    }

    /// Resolve a name: an ordinary column's parsed value, or (if `name` is
    /// an exploded root) the lazily assembled nested value (spec §4.E).
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(structure) = self.header.exploded_map.get(name) {
            return Some(exploded::assemble(self, structure));
        }
        let idx = *self.header.name_index.get(name)?;
        self.cells.get(idx - 1).map(|c| c.parsed.clone())
    }
}

impl CellSource for Row {
    fn cell_parsed(&self, col_idx: usize) -> Value {
        self.cells.get(col_idx.wrapping_sub(1)).map(|c| c.parsed.clone()).unwrap_or(Value::Null)
    }
}

/// Binds `self.X`/`self[i]` to sibling cells already computed by the
/// scheduler. Cell-level expressions get no other bindings (spec §4.F:
/// "for cell expressions, a narrower set").
struct RowEvalContext<'a> {
    eval_row: &'a HashMap<usize, Value>,
    header: &'a Header,
}

impl EvalContext for RowEvalContext<'_> {
    fn self_field(&self, name: &str) -> Option<Value> {
        let idx = *self.header.name_index.get(name)?;
        self.eval_row.get(&idx).cloned()
    }

    fn self_index(&self, idx: i64) -> Option<Value> {
        let i = usize::try_from(idx).ok()?;
        self.eval_row.get(&i).cloned()
    }

    fn ident(&self, _name: &str) -> Option<Value> {
        None
    }
}

struct PendingCell {
    value: String,
    evaluated: Value,
    parsed: Value,
    reformatted: String,
}

/// Row build with the cell-level dependency scheduler (spec §4.G).
pub fn build_row(sink: &Diagnostics, header: &Rc<Header>, line_no: usize, raw_cells: &[String]) -> Row {
    sink.set_line(line_no);
    let n = header.columns.len();
    let mut done = vec![false; n + 1];
    let mut eval_row: HashMap<usize, Value> = HashMap::new();
    let mut pending: Vec<Option<PendingCell>> = (0..=n).map(|_| None).collect();

    let mut remaining: Vec<usize> = (1..=n).collect();
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut still_remaining = Vec::new();

        for &ci in &remaining {
            let column = &header.columns[ci - 1];
            let present = ci - 1 < raw_cells.len();
            let raw = if present { raw_cells[ci - 1].clone() } else { String::new() };

            let expr_source: Option<String> = if !present {
                None
            } else if let Some(body) = raw.strip_prefix('=') {
                Some(body.to_string())
            } else if raw.is_empty() {
                column.default_expr.as_deref().and_then(|d| d.strip_prefix('=')).map(|d| d.to_string())
            } else {
                None
            };

            let processable = match &expr_source {
                None => true,
                Some(text) => match eval::parse(text) {
                    Ok(expr) => {
                        let mut names = Vec::new();
                        let mut indices = Vec::new();
                        eval::referenced_columns(&expr, &mut names, &mut indices);
                        names.iter().all(|name| header.name_index.get(name).map(|&i| done[i]).unwrap_or(false))
                            && indices.iter().all(|&i| {
                                let i = i as usize;
                                i >= 1 && i <= n && done[i]
                            })
                    }
                    Err(_) => true,
                },
            };

            if !processable {
                still_remaining.push(ci);
                continue;
            }
            progressed = true;
            sink.set_column(column.name.clone(), ci);

            if !present {
                if !admits_nil(&column.type_spec) {
                    let _scope = sink.with_col_type(column.type_spec.clone());
                    sink.report(Value::Null, "missing required cell");
                }
                pending[ci] = Some(PendingCell {
                    value: String::new(),
                    evaluated: Value::Null,
                    parsed: Value::Null,
                    reformatted: String::new(),
                });
                eval_row.insert(ci, Value::Null);
                done[ci] = true;
                continue;
            }

            let is_default_applied = raw.is_empty() && column.default_expr.is_some();
            let is_literal_default = raw.is_empty() && expr_source.is_none() && column.default_expr.is_some();

            let (evaluated, parsed, reformatted) = if let Some(text) = &expr_source {
                let ctx = RowEvalContext { eval_row: &eval_row, header };
                let mut budget = Budget::new(10_000);
                let evaluated = match eval::eval_source(text, &ctx, &mut budget) {
                    Ok(v) => v,
                    Err(e) => {
                        let _scope = sink.with_col_type(column.type_spec.clone());
                        sink.report(&raw, e);
                        Value::Null
                    }
                };
                let (parsed, canonical) = match &column.parser {
                    Some(p) => p.parse(sink, ParseInput::Value(&evaluated), ParseMode::Parsed),
                    None => (evaluated.clone(), evaluated.to_string()),
                };
                let reformatted = if raw.starts_with('=') { raw.clone() } else { String::new() };
                let _ = canonical;
                (evaluated, parsed, reformatted)
            } else if is_literal_default {
                let default_text = column.default_expr.clone().unwrap_or_default();
                let (parsed, _) = match &column.parser {
                    Some(p) => p.parse(sink, ParseInput::Text(&default_text), ParseMode::Tsv),
                    None => (Value::Str(default_text.clone()), default_text.clone()),
                };
                (Value::Str(default_text), parsed, String::new())
            } else {
                let evaluated = Value::Str(raw.clone());
                let (parsed, canonical) = match &column.parser {
                    Some(p) => p.parse(sink, ParseInput::Text(&raw), ParseMode::Tsv),
                    None => (evaluated.clone(), raw.clone()),
                };
                (evaluated, parsed, canonical)
            };
            let _ = is_default_applied;

            eval_row.insert(ci, parsed.clone());
            pending[ci] = Some(PendingCell { value: raw, evaluated, parsed, reformatted });
            done[ci] = true;
        }

        if !progressed {
            let err = StructuralError::CyclicRowDependency {
                source_name: diagnostics::path_file_name(&header.source),
                line_no,
            };
            sink.report(line_no, &err);
            for &ci in &still_remaining {
                pending[ci] = Some(PendingCell {
                    value: String::new(),
                    evaluated: Value::Null,
                    parsed: Value::Null,
                    reformatted: String::new(),
                });
            }
            break;
        }
        remaining = still_remaining;
    }

    let mut cells = Vec::with_capacity(n);
    for slot in pending.into_iter().skip(1) {
        let p = slot.unwrap_or(PendingCell {
            value: String::new(),
            evaluated: Value::Null,
            parsed: Value::Null,
            reformatted: String::new(),
        });
        cells.push(Cell { value: p.value, evaluated: p.evaluated, parsed: p.parsed, reformatted: p.reformatted });
    }

    Row { idx: line_no, cells, header: Rc::clone(header) }
}

/// A dataset slot: either a built row, or a raw comment/blank line preserved
/// verbatim for round-trip (spec §3 Dataset).
#[derive(Debug)]
pub enum Slot {
    Row(Row),
    Raw(String),
}

/// An immutable dataset: a header plus its rows/raw lines, indexed both
/// positionally and by primary key (spec §3 Dataset).
#[derive(Debug)]
pub struct Dataset {
    pub header: Rc<Header>,
    pub slots: Vec<Slot>,
    pub transposed: bool,
    primary_key_index: HashMap<String, usize>,
    source: PathBuf,
}

impl Dataset {
    /// Resolve a line reference (1-based position or primary-key string) to
    /// a slot index.
    fn resolve_line(&self, line: &LineRef) -> Option<usize> {
        match line {
            LineRef::Index(i) => i.checked_sub(2),
            LineRef::Key(k) => self.primary_key_index.get(k).copied(),
        }
    }

    pub fn row(&self, line: impl Into<LineRef>) -> Option<&Row> {
        let slot_idx = self.resolve_line(&line.into())?;
        match self.slots.get(slot_idx)? {
            Slot::Row(r) => Some(r),
            Slot::Raw(_) => None,
        }
    }

    pub fn cell(&self, line: impl Into<LineRef>, col: impl Into<ColRef>) -> Option<&Cell> {
        self.row(line)?.cell(col)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Row(r) => Some(r),
            Slot::Raw(_) => None,
        })
    }

    /// `tostring(dataset)`, spec §4.G: regenerate the source file text,
    /// re-transposing and restoring comment markers for transposed sources.
    pub fn to_string_tsv(&self) -> Result<String, crate::codec::CodecError> {
        let mut grid = Grid::with_capacity(self.slots.len() + 1);
        let header_cells: Vec<String> = self.header.columns.iter().map(|c| c.collapsed_spec()).collect();
        grid.push(Line::Cells(header_cells));
        for slot in &self.slots {
            match slot {
                Slot::Row(r) => grid.push(Line::Cells(r.cells.iter().map(|c| c.reformatted.clone()).collect())),
                Slot::Raw(text) => grid.push(Line::Raw(text.clone())),
            }
        }
        if self.transposed {
            grid = codec::transpose(&grid);
        }
        codec::encode(&grid)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// A dataset line reference: 1-based physical position, or a primary-key
/// string (spec §3 Dataset: "callable `(line)`... resolving by index or
/// name").
#[derive(Debug, Clone)]
pub enum LineRef {
    Index(usize),
    Key(String),
}

impl From<usize> for LineRef {
    fn from(i: usize) -> Self {
        LineRef::Index(i)
    }
}

impl From<&str> for LineRef {
    fn from(s: &str) -> Self {
        LineRef::Key(s.to_string())
    }
}

impl From<String> for LineRef {
    fn from(s: String) -> Self {
        LineRef::Key(s)
    }
}

/// Build a `Dataset` from already-decoded, already-(reverse-)transposed
/// grid lines. `transposed` records whether the source was a
/// `.transposed.tsv` file, so `to_string_tsv` re-transposes on the way out.
pub fn build_dataset(
    sink: &Diagnostics,
    registry: &TypeRegistry,
    source: &Path,
    grid: &Grid,
    transposed: bool,
) -> Result<Dataset, StructuralError> {
    sink.set_source(diagnostics::path_file_name(source));
    sink.set_transposed(transposed);

    let mut lines = grid.iter();
    let header_cells = loop {
        match lines.next() {
            Some(Line::Cells(cells)) => break cells.clone(),
            Some(Line::Raw(_)) => continue,
            None => {
                return Err(StructuralError::DuplicateColumnName {
                    source_name: diagnostics::path_file_name(source),
                    name: "<missing header>".to_string(),
                });
            }
        }
    };
    let header = Rc::new(new_header(sink, registry, source, &header_cells)?);

    let mut slots = Vec::new();
    let mut primary_key_index = HashMap::new();
    let mut line_no = 2usize;
    for line in lines {
        match line {
            Line::Raw(text) => slots.push(Slot::Raw(text.clone())),
            Line::Cells(cells) => {
                let row = build_row(sink, &header, line_no, cells);
                if let Some(key) = row.primary_key() {
                    if primary_key_index.contains_key(&key) {
                        sink.set_row_key(key.clone());
                        sink.report(&key, "duplicate primary key");
                    } else {
                        primary_key_index.insert(key, slots.len());
                    }
                }
                slots.push(Slot::Row(row));
            }
        }
        line_no += 1;
    }

    Ok(Dataset { header, slots, transposed, primary_key_index, source: source.to_path_buf() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
    }

    #[test]
    fn s1_defaults_and_expressions() {
        let sink = Diagnostics::new();
        let reg = registry();
        let text = "name:string\tprice:float\tdouble:float\nsword\t=10\t=self.price*2\n";
        let grid = codec::decode(text);
        let dataset = build_dataset(&sink, &reg, Path::new("Items.tsv"), &grid, false).unwrap();
        let row = dataset.row(2).unwrap();
        assert_eq!(row.cell(1).unwrap().parsed, Value::Str("sword".to_string()));
        assert_eq!(row.cell(2).unwrap().parsed, Value::Float(10.0));
        assert_eq!(row.cell(3).unwrap().parsed, Value::Float(20.0));
        assert_eq!(row.cell(2).unwrap().reformatted, "=10");
        assert_eq!(row.cell(3).unwrap().reformatted, "=self.price*2");
    }

    #[test]
    fn s2_exploded_record() {
        let sink = Diagnostics::new();
        let reg = registry();
        let text = "id:name\tlocation.level:name\tlocation.position._1:integer\tlocation.position._2:integer\na\tground\t3\t5\n";
        let grid = codec::decode(text);
        let dataset = build_dataset(&sink, &reg, Path::new("Things.tsv"), &grid, false).unwrap();
        assert!(dataset.header.type_spec.contains("location:{level:name,position:{integer,integer}}"));
        let row = dataset.row(2).unwrap();
        let location = row.get("location").unwrap();
        match location {
            Value::Record(m) => {
                assert_eq!(m["level"], Value::Str("ground".to_string()));
                assert_eq!(m["position"], Value::Tuple(vec![Value::Int(3), Value::Int(5)]));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn s3_exploded_map() {
        let sink = Diagnostics::new();
        let reg = registry();
        let text = "stats[1]:string\tstats[1]=:integer\tstats[2]:string\tstats[2]=:integer\nhp\t10\tmp\t5\n";
        let grid = codec::decode(text);
        let dataset = build_dataset(&sink, &reg, Path::new("Stats.tsv"), &grid, false).unwrap();
        let row = dataset.row(2).unwrap();
        let stats = row.get("stats").unwrap();
        match stats {
            Value::Map(m) => {
                assert_eq!(m["hp"], Value::Int(10));
                assert_eq!(m["mp"], Value::Int(5));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn s6_cyclic_row_dependency_yields_empty_row_but_file_loads() {
        let sink = Diagnostics::new();
        let reg = registry();
        let text = "a:integer\tb:integer\n=self.b\t=self.a\n3\t4\n";
        let grid = codec::decode(text);
        let dataset = build_dataset(&sink, &reg, Path::new("Cyclic.tsv"), &grid, false).unwrap();
        assert_eq!(sink.error_count(), 1);
        let bad_row = dataset.row(2).unwrap();
        assert_eq!(bad_row.cell(1).unwrap().parsed, Value::Null);
        let good_row = dataset.row(3).unwrap();
        assert_eq!(good_row.cell(1).unwrap().parsed, Value::Int(3));
    }

    #[test]
    fn duplicate_primary_key_is_reported() {
        let sink = Diagnostics::new();
        let reg = registry();
        let text = "name:string\tprice:float\nsword\t10\nsword\t20\n";
        let grid = codec::decode(text);
        let _dataset = build_dataset(&sink, &reg, Path::new("Items.tsv"), &grid, false).unwrap();
        assert_eq!(sink.error_count(), 1);
    }
}
