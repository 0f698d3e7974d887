//! Raw tabular codec, spec §4.A.
//!
//! UTF-8 validated split/join of rows and tab-delimited cells, plus
//! transposition for `.transposed.tsv` sources (spec §6.1).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("line {line} contains a forbidden character (tab, CR or LF) inside a cell")]
    ForbiddenChar { line: usize },
}

/// One physical line of a decoded grid: either a comment/blank line kept
/// verbatim, or a parsed sequence of tab-separated cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Raw(String),
    Cells(Vec<String>),
}

impl Line {
    pub fn is_comment_or_blank(text: &str) -> bool {
        let trimmed = text.trim_end_matches(['\r', '\n']);
        trimmed.is_empty() || trimmed.starts_with('#')
    }
}

/// A decoded grid: one [`Line`] per physical row, in source order.
pub type Grid = Vec<Line>;

/// Decode TSV text into a [`Grid`]. Accepts `\r\n` and `\r` on input and
/// normalizes to `\n` internally (spec §6.1).
pub fn decode(text: &str) -> Grid {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut grid = Grid::new();
    for raw_line in normalized.split('\n') {
        if raw_line.is_empty() && normalized.ends_with('\n') {
            // Trailing newline produces one empty trailing split segment;
            // drop it rather than emit a synthetic final blank line.
            continue;
        }
        if Line::is_comment_or_blank(raw_line) {
            grid.push(Line::Raw(raw_line.to_string()));
        } else {
            let cells = raw_line.split('\t').map(|c| c.to_string()).collect();
            grid.push(Line::Cells(cells));
        }
    }
    grid
}

/// Encode a [`Grid`] back to TSV text, `\n`-terminated. Rejects cells
/// containing `\t`, `\r`, or `\n` (spec §4.A).
pub fn encode(grid: &Grid) -> Result<String, CodecError> {
    let mut out = String::new();
    for (idx, line) in grid.iter().enumerate() {
        match line {
            Line::Raw(text) => {
                out.push_str(text);
            }
            Line::Cells(cells) => {
                for cell in cells {
                    if cell.contains(['\t', '\r', '\n']) {
                        return Err(CodecError::ForbiddenChar { line: idx + 1 });
                    }
                }
                out.push_str(&cells.join("\t"));
            }
        }
        out.push('\n');
    }
    Ok(out)
}

/// Transpose a grid: rows become columns. Raw (comment/blank) lines become
/// synthetic rows whose first cell is `dummyN:comment`, second cell is the
/// original text, and remaining cells are empty (spec §4.A).
pub fn transpose(grid: &Grid) -> Grid {
    let width = grid
        .iter()
        .map(|line| match line {
            Line::Cells(cells) => cells.len(),
            Line::Raw(_) => 2,
        })
        .max()
        .unwrap_or(0);

    let mut comment_counter = 0usize;
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(grid.len());
    for line in grid {
        let mut row = vec![String::new(); width];
        match line {
            Line::Cells(cells) => {
                for (i, c) in cells.iter().enumerate() {
                    row[i] = c.clone();
                }
            }
            Line::Raw(text) => {
                row[0] = format!("dummy{comment_counter}:comment");
                if width > 1 {
                    row[1] = text.clone();
                }
                comment_counter += 1;
            }
        }
        rows.push(row);
    }

    let height = rows.len();
    let mut out = Grid::with_capacity(width);
    for col in 0..width {
        let mut cells = Vec::with_capacity(height);
        for row in rows.iter().take(height) {
            cells.push(row.get(col).cloned().unwrap_or_default());
        }
        out.push(Line::Cells(cells));
    }
    out
}

/// Reverse a transposition applied by [`transpose`], restoring `dummyN:comment`
/// synthetic rows back into raw comment/blank lines (spec §4.A, §4.G
/// `tostring`).
pub fn reverse_transpose(grid: &Grid) -> Grid {
    let back = transpose(grid);
    back.into_iter()
        .map(|line| match line {
            Line::Cells(cells) if cells.first().map(|c| c.starts_with("dummy") && c.ends_with(":comment")).unwrap_or(false) => {
                Line::Raw(cells.get(1).cloned().unwrap_or_default())
            }
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_tsv() {
        let text = "name:string\tprice:float\nsword\t10\n";
        let grid = decode(text);
        let encoded = encode(&grid).unwrap();
        assert_eq!(encoded, text);
    }

    #[test]
    fn comments_and_blanks_preserved_in_position() {
        let text = "# header comment\nname:string\n\nsword\n";
        let grid = decode(text);
        assert_eq!(grid[0], Line::Raw("# header comment".to_string()));
        assert_eq!(grid[2], Line::Raw(String::new()));
        let encoded = encode(&grid).unwrap();
        assert_eq!(encoded, text);
    }

    #[test]
    fn encode_rejects_tab_in_cell() {
        let grid = vec![Line::Cells(vec!["a\tb".to_string()])];
        assert!(encode(&grid).is_err());
    }

    #[test]
    fn transpose_round_trip_preserves_comments() {
        let text = "# comment line\npath\tpackage_id\na\tpkg-a\n";
        let grid = decode(text);
        let transposed = transpose(&grid);
        let restored = reverse_transpose(&transposed);
        assert_eq!(restored, grid);
    }
}
