//! # Substitution Engine
//!
//! Writes field values into a template in two passes:
//!
//! 1. **Literal spans** (implicit templates): every occurrence of a field's
//!    current literal value is replaced, in body paragraphs and table cells.
//! 2. **Bracket tokens** (explicit templates): `[name]` tokens with a known
//!    value are replaced and the paragraph is rebuilt with a bold label.
//!
//! Paragraphs that neither pass touches are written back byte for byte.

use super::analyzer::placeholder_pattern;
use super::fields::{FieldSpecs, FieldValues};
use crate::document::{Document, RunSpec};
use tracing::debug;

const LABEL_SEPARATOR: &str = ": ";

/// Counters describing what a [`fill`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    pub literal_replacements: usize,
    pub bracket_replacements: usize,
    pub paragraphs_rebuilt: usize,
}

impl FillReport {
    pub fn is_empty(&self) -> bool {
        self.literal_replacements == 0 && self.bracket_replacements == 0
    }
}

/// Fill `document` in place. `specs` enables the literal-span pass.
pub fn fill(document: &mut Document, values: &FieldValues, specs: Option<&FieldSpecs>) -> FillReport {
    let mut report = FillReport::default();

    if let Some(specs) = specs {
        report.literal_replacements = replace_literal_spans(document, values, specs);
    }

    let (replacements, rebuilt) = replace_bracket_tokens(document, values);
    report.bracket_replacements = replacements;
    report.paragraphs_rebuilt = rebuilt;

    report
}

fn replace_literal_spans(document: &mut Document, values: &FieldValues, specs: &FieldSpecs) -> usize {
    let mut replaced = 0;

    for spec in specs.iter() {
        if spec.original.is_empty() {
            continue;
        }
        let value = values.get(spec.name.trim()).unwrap_or(&spec.new);
        if *value == spec.original {
            continue;
        }

        let matching: Vec<usize> = document
            .paragraphs()
            .iter()
            .enumerate()
            .filter(|(_, paragraph)| paragraph.text().contains(spec.original.as_str()))
            .map(|(id, _)| id)
            .collect();

        if matching.len() > 1 {
            debug!(
                field = %spec.name,
                paragraphs = matching.len(),
                "Literal value occurs in more than one paragraph"
            );
        }

        for id in matching {
            if document.replace_text(id, &spec.original, value) {
                replaced += 1;
            }
        }
    }

    replaced
}

fn replace_bracket_tokens(document: &mut Document, values: &FieldValues) -> (usize, usize) {
    let pattern = placeholder_pattern();
    let mut replaced = 0;
    let mut rebuilt = 0;

    for id in 0..document.paragraphs().len() {
        let text = match document.paragraph(id) {
            Some(paragraph) => paragraph.text(),
            None => continue,
        };
        if !text.contains('[') {
            continue;
        }

        let mut new_text = text.clone();
        let mut hits = 0;
        for captures in pattern.captures_iter(&text) {
            let name = &captures[1];
            let Some(value) = values.get(name.trim()) else {
                continue;
            };
            // A repeated token was already replaced with its first match.
            let token = format!("[{name}]");
            if new_text.contains(&token) {
                new_text = new_text.replace(&token, value);
                hits += 1;
            }
        }
        if hits == 0 {
            continue;
        }

        document.rebuild_paragraph(id, &label_runs(&new_text));
        replaced += hits;
        rebuilt += 1;
    }

    (replaced, rebuilt)
}

/// Bold `label: ` followed by a plain value, or a single plain run.
fn label_runs(text: &str) -> Vec<RunSpec> {
    match text.find(LABEL_SEPARATOR) {
        Some(index) => {
            let (label, value) = text.split_at(index + LABEL_SEPARATOR.len());
            vec![RunSpec::styled(label, true), RunSpec::styled(value, false)]
        }
        None => vec![RunSpec::plain(text)],
    }
}
