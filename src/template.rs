//! Template preprocessing pass, spec §6.3.
//!
//! Mirrors COG: a line-comment marker (one of `---`, `###`, `///`) opens a
//! code block with `xxx[[[`, closes it with `xxx]]]`, and the region between
//! the close marker and a trailing `xxx[[[end]]]` is auto-generated output
//! that gets replaced on every pass. Unlike COG's general-purpose scripting,
//! the code block here is a single sandboxed expression (spec §4.F).

use crate::eval::{self, Budget, EmptyContext};

const MARKERS: [&str; 3] = ["---", "###", "///"];

/// Run one substitution pass over `text`. Files with no `xxx[[[end]]]`
/// marker for any recognized prefix are returned unchanged.
pub fn process(text: &str) -> String {
    let Some(marker) = MARKERS.iter().find(|m| text.contains(&format!("{m}[[[end]]]"))) else {
        return text.to_string();
    };
    let start_marker = format!("{marker}[[[");
    let code_end_marker = format!("{marker}]]]");
    let end_marker = format!("{marker}[[[end]]]");

    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim_end() != start_marker {
            out.push(line.to_string());
            i += 1;
            continue;
        }

        out.push(line.to_string());
        i += 1;
        let mut code_lines = Vec::new();
        while i < lines.len() && lines[i].trim_end() != code_end_marker {
            code_lines.push(lines[i].strip_prefix(*marker).unwrap_or(lines[i]).to_string());
            out.push(lines[i].to_string());
            i += 1;
        }
        if i < lines.len() {
            out.push(lines[i].to_string());
            i += 1;
        }
        while i < lines.len() && lines[i].trim_end() != end_marker {
            i += 1;
        }

        let code = code_lines.join("\n");
        let rendered = render(&code);
        out.push(rendered);

        if i < lines.len() {
            out.push(lines[i].to_string());
            i += 1;
        }
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

fn render(code: &str) -> String {
    match eval::parse(code) {
        Ok(expr) => {
            let mut budget = Budget::new(10_000);
            match eval::eval(&expr, &EmptyContext, &mut budget) {
                Ok(v) => v.to_string(),
                Err(e) => format!("<template error: {e}>"),
            }
        }
        Err(e) => format!("<template error: {e}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_without_markers_is_untouched() {
        let text = "a\tb\n1\t2\n";
        assert_eq!(process(text), text);
    }

    #[test]
    fn substitutes_rendered_expression_between_markers() {
        let text = "header\t1\n---[[[\n---1+1\n---]]]\nstale\n---[[[end]]]\n";
        let rendered = process(text);
        assert!(rendered.contains("\n2\n"));
        assert!(!rendered.contains("stale"));
    }
}
