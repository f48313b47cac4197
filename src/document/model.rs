//! Body model for a word-processing document.
//!
//! Paragraphs keep the byte span they occupy in `word/document.xml` so that an
//! unedited paragraph can be written back exactly as it was read. Edits switch
//! the paragraph into one of two render modes: only the touched runs are
//! re-rendered, or the whole run list is rebuilt.

use std::ops::Range;

/// Index of a paragraph inside [`super::Document`], in document order.
pub type ParagraphId = usize;

/// A styled run of text.
#[derive(Debug, Clone)]
pub struct Run {
    /// Byte span of `<w:r>..</w:r>` in the source XML. Empty for synthesized runs.
    pub(crate) span: Range<usize>,
    /// Raw `<w:rPr>` element, if any.
    pub(crate) props: Option<String>,
    pub(crate) text: String,
    pub(crate) bold: bool,
    pub(crate) edited: bool,
}

impl Run {
    pub(crate) fn synthesized(text: impl Into<String>, bold: Option<bool>) -> Self {
        let props = bold.map(|on| {
            if on {
                "<w:rPr><w:b/></w:rPr>".to_string()
            } else {
                "<w:rPr><w:b w:val=\"0\"/></w:rPr>".to_string()
            }
        });
        Self {
            span: 0..0,
            props,
            text: text.into(),
            bold: bold.unwrap_or(false),
            edited: true,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_bold(&self) -> bool {
        self.bold
    }
}

/// How a paragraph is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EditState {
    Original,
    RunsEdited,
    Rebuilt,
}

#[derive(Debug, Clone)]
pub struct Paragraph {
    pub(crate) span: Range<usize>,
    /// `<w:p ...>` opening tag, used when the paragraph is rebuilt.
    pub(crate) open_tag: String,
    /// Raw `<w:pPr>` element, kept across rebuilds.
    pub(crate) props: Option<String>,
    pub(crate) runs: Vec<Run>,
    pub(crate) state: EditState,
}

impl Paragraph {
    /// Concatenated text of every run.
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn is_edited(&self) -> bool {
        self.state != EditState::Original
    }

    /// Replace every occurrence of `from` with `to`.
    ///
    /// When each occurrence sits inside a single run the runs are edited in
    /// place and keep their formatting. Otherwise the paragraph collapses into
    /// one plain run holding the replaced text. Returns whether the text changed.
    pub(crate) fn replace_text(&mut self, from: &str, to: &str) -> bool {
        if from.is_empty() || from == to {
            return false;
        }
        let current = self.text();
        if !current.contains(from) {
            return false;
        }
        let wanted = current.replace(from, to);

        let mut edited_runs = self.runs.clone();
        for run in edited_runs.iter_mut() {
            if run.text.contains(from) {
                run.text = run.text.replace(from, to);
                run.edited = true;
            }
        }
        let in_place: String = edited_runs.iter().map(|run| run.text.as_str()).collect();

        if in_place == wanted {
            self.runs = edited_runs;
            if self.state == EditState::Original {
                self.state = EditState::RunsEdited;
            }
        } else {
            self.rebuild(vec![Run::synthesized(wanted, None)]);
        }
        true
    }

    /// Discard every run and emit `runs` after the paragraph properties.
    pub(crate) fn rebuild(&mut self, runs: Vec<Run>) {
        self.runs = runs;
        self.state = EditState::Rebuilt;
    }

    pub(crate) fn render(&self, source: &str, out: &mut String) {
        match self.state {
            EditState::Original => out.push_str(&source[self.span.clone()]),
            EditState::RunsEdited => {
                let mut cursor = self.span.start;
                for run in self.runs.iter().filter(|run| run.edited) {
                    out.push_str(&source[cursor..run.span.start]);
                    render_run(run, out);
                    cursor = run.span.end;
                }
                out.push_str(&source[cursor..self.span.end]);
            }
            EditState::Rebuilt => {
                out.push_str(&self.open_tag);
                if let Some(props) = &self.props {
                    out.push_str(props);
                }
                for run in &self.runs {
                    render_run(run, out);
                }
                out.push_str("</w:p>");
            }
        }
    }
}

fn render_run(run: &Run, out: &mut String) {
    out.push_str("<w:r>");
    if let Some(props) = &run.props {
        out.push_str(props);
    }
    let mut pending = String::new();
    for ch in run.text.chars() {
        match ch {
            '\t' | '\n' => {
                flush_text(&mut pending, out);
                out.push_str(if ch == '\t' { "<w:tab/>" } else { "<w:br/>" });
            }
            _ => pending.push(ch),
        }
    }
    flush_text(&mut pending, out);
    out.push_str("</w:r>");
}

fn flush_text(pending: &mut String, out: &mut String) {
    if pending.is_empty() {
        return;
    }
    out.push_str("<w:t xml:space=\"preserve\">");
    out.push_str(&quick_xml::escape::escape(pending.as_str()));
    out.push_str("</w:t>");
    pending.clear();
}

/// A block-level element of the body or of a table cell.
#[derive(Debug, Clone)]
pub enum Block {
    Paragraph(ParagraphId),
    Table(Table),
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct Row {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub blocks: Vec<Block>,
}

impl Cell {
    /// Paragraphs of this cell, including those of nested tables, in order.
    pub fn paragraph_ids(&self) -> Vec<ParagraphId> {
        let mut ids = Vec::new();
        collect_ids(&self.blocks, &mut ids);
        ids
    }
}

fn collect_ids(blocks: &[Block], ids: &mut Vec<ParagraphId>) {
    for block in blocks {
        match block {
            Block::Paragraph(id) => ids.push(*id),
            Block::Table(table) => {
                for cell in table.rows.iter().flat_map(|row| row.cells.iter()) {
                    collect_ids(&cell.blocks, ids);
                }
            }
        }
    }
}
