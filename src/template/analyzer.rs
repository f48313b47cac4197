//! Placeholder discovery and text linearization.

use crate::document::{Block, Document, Table};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// `[name]` where the name holds no brackets.
pub fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\[\]]+)\]").expect("placeholder pattern is valid"))
}

/// Distinct placeholder names across every paragraph (body and table cells),
/// sorted. Empty means the template is in implicit mode.
pub fn extract_placeholders(document: &Document) -> Vec<String> {
    let pattern = placeholder_pattern();
    let names: BTreeSet<String> = document
        .paragraphs()
        .iter()
        .flat_map(|paragraph| {
            let text = paragraph.text();
            pattern
                .captures_iter(&text)
                .map(|captures| captures[1].to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    names.into_iter().collect()
}

/// Body paragraphs one per line, then each table row as `cell | cell`.
/// Blank paragraphs, empty cells and empty rows are skipped.
pub fn full_text(document: &Document) -> String {
    let mut lines: Vec<String> = document
        .body_paragraphs()
        .map(|paragraph| paragraph.text())
        .filter(|text| !text.trim().is_empty())
        .collect();

    for table in document.tables() {
        push_table_rows(document, table, &mut lines);
    }

    lines.join("\n")
}

fn push_table_rows(document: &Document, table: &Table, lines: &mut Vec<String>) {
    for row in &table.rows {
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| {
                cell.blocks
                    .iter()
                    .filter_map(|block| match block {
                        Block::Paragraph(id) => document.paragraph(*id).map(|p| p.text()),
                        Block::Table(_) => None,
                    })
                    .filter(|text| !text.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|text| !text.is_empty())
            .collect();

        if !cells.is_empty() {
            lines.push(cells.join(" | "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::testing::{docx, paragraph, table};

    fn open(blocks: &[String]) -> Document {
        Document::from_bytes(&docx(blocks)).unwrap()
    }

    #[test]
    fn test_placeholders_are_deduplicated_and_sorted() {
        let document = open(&[
            paragraph("Patient: [Name]"),
            paragraph("DOB: [Name]"),
            paragraph("Visit: [Date]"),
        ]);
        assert_eq!(extract_placeholders(&document), vec!["Date", "Name"]);
    }

    #[test]
    fn test_placeholders_found_in_table_cells() {
        let document = open(&[table(&[&["Diagnosis", "[Diagnosis]"]])]);
        assert_eq!(extract_placeholders(&document), vec!["Diagnosis"]);
    }

    #[test]
    fn test_no_brackets_means_no_placeholders() {
        let document = open(&[paragraph("Patient: John Doe"), paragraph("[]")]);
        assert!(extract_placeholders(&document).is_empty());
    }

    #[test]
    fn test_nested_brackets_yield_innermost_name() {
        let document = open(&[paragraph("See [[Ref]] and [a[b]")]);
        assert_eq!(extract_placeholders(&document), vec!["Ref", "b"]);
    }

    #[test]
    fn test_full_text_linearizes_body_then_tables() {
        let document = open(&[
            paragraph("Medical Note"),
            paragraph("   "),
            table(&[&["Name", "John"], &["", ""], &["Age", ""]]),
            paragraph("Signed"),
        ]);
        assert_eq!(full_text(&document), "Medical Note\nSigned\nName | John\nAge");
    }
}
