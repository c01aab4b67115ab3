//! Line-based import recognition, used to populate `Import` entities for
//! languages whose tree-sitter grammar we don't walk (spec's `entities`
//! table isn't restricted to AST-parsed languages) and as a fallback when
//! an AST-supported file's grammar can't be resolved for one import line.

use crate::language::Language;
use std::collections::HashSet;

/// Scan `lines` for statements matching `language`'s import patterns,
/// normalize each to a single semicolon-free line, and return up to
/// `limit` distinct entries in source order.
pub fn extract_imports_from_lines(language: Language, lines: &[&str], limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(limit.min(lines.len()));

    for raw in lines {
        if out.len() == limit {
            break;
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() || !is_import_line(language, trimmed) {
            continue;
        }
        let normalized = normalize_import_line(trimmed);
        if !normalized.is_empty() && seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }

    out
}

/// Drop the trailing `;` and anything past the first physical line, mirroring
/// the single-line shape AST-derived import entities already use.
fn normalize_import_line(line: &str) -> String {
    line.trim_end_matches(';')
        .lines()
        .next()
        .unwrap_or(line)
        .trim()
        .to_string()
}

/// A pattern either opens a statement (checked with `starts_with`) or can
/// appear mid-line, like JS/TS's `require(` call — those patterns end in `(`
/// and are checked with `contains` instead.
fn is_import_line(language: Language, line: &str) -> bool {
    let line = line.strip_prefix("pub ").unwrap_or(line);
    language.import_patterns().into_iter().any(|pattern| {
        if pattern.ends_with('(') {
            line.contains(pattern)
        } else {
            line.starts_with(pattern)
        }
    })
}
