//! Streaming reader for `word/document.xml`.
//!
//! Only the structure the template engine needs is modelled: paragraphs,
//! tables, rows, cells and text runs. Everything else stays in the source
//! text and is copied through untouched on save.

use super::model::{Block, Cell, EditState, Paragraph, Row, Run, Table};
use super::DocumentError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub(crate) struct ParsedBody {
    pub blocks: Vec<Block>,
    pub paragraphs: Vec<Paragraph>,
}

struct TableFrame {
    table: Table,
    row: Option<Row>,
    cell: Option<Cell>,
}

struct ParagraphBuilder {
    start: usize,
    open_tag: String,
    props: Option<String>,
    props_start: Option<usize>,
    runs: Vec<Run>,
    /// Depth of paragraphs nested inside this one (text boxes).
    nested: usize,
}

struct RunBuilder {
    start: usize,
    props: Option<String>,
    props_start: Option<usize>,
    text: String,
    bold: bool,
    in_text: bool,
}

#[derive(Default)]
struct BodyBuilder {
    blocks: Vec<Block>,
    paragraphs: Vec<Paragraph>,
    tables: Vec<TableFrame>,
    paragraph: Option<ParagraphBuilder>,
    run: Option<RunBuilder>,
}

impl BodyBuilder {
    fn push_block(&mut self, block: Block) {
        match self.tables.last_mut().and_then(|frame| frame.cell.as_mut()) {
            Some(cell) => cell.blocks.push(block),
            None => self.blocks.push(block),
        }
    }

    /// True when run-level events belong to the current top-level paragraph.
    fn in_direct_paragraph(&self) -> bool {
        matches!(&self.paragraph, Some(p) if p.nested == 0)
    }

    fn start(&mut self, source: &str, e: &BytesStart<'_>, start: usize, end: usize) {
        let name = e.name();
        let name = name.as_ref();

        if let Some(paragraph) = self.paragraph.as_mut() {
            if name == b"w:p" {
                paragraph.nested += 1;
                return;
            }
            if paragraph.nested > 0 {
                return;
            }
            match (name, self.run.as_mut()) {
                (b"w:pPr", None) => paragraph.props_start = Some(start),
                (b"w:r", None) => {
                    self.run = Some(RunBuilder {
                        start,
                        props: None,
                        props_start: None,
                        text: String::new(),
                        bold: false,
                        in_text: false,
                    })
                }
                (b"w:rPr", Some(run)) => run.props_start = Some(start),
                (b"w:b", Some(run)) if run.props_start.is_some() => run.bold = bold_value(e),
                (b"w:t", Some(run)) if run.props_start.is_none() => run.in_text = true,
                _ => {}
            }
            return;
        }

        match name {
            b"w:p" => {
                self.paragraph = Some(ParagraphBuilder {
                    start,
                    open_tag: source[start..end].to_string(),
                    props: None,
                    props_start: None,
                    runs: Vec::new(),
                    nested: 0,
                })
            }
            b"w:tbl" => self.tables.push(TableFrame {
                table: Table::default(),
                row: None,
                cell: None,
            }),
            b"w:tr" => {
                if let Some(frame) = self.tables.last_mut() {
                    frame.row = Some(Row::default());
                }
            }
            b"w:tc" => {
                if let Some(frame) = self.tables.last_mut() {
                    frame.cell = Some(Cell::default());
                }
            }
            _ => {}
        }
    }

    fn empty(&mut self, source: &str, e: &BytesStart<'_>, start: usize, end: usize) {
        let name = e.name();
        let name = name.as_ref();

        if self.paragraph.is_none() {
            if name == b"w:p" {
                let raw = &source[start..end];
                let open_tag = format!("{}>", raw.trim_end_matches("/>").trim_end());
                let id = self.paragraphs.len();
                self.paragraphs.push(Paragraph {
                    span: start..end,
                    open_tag,
                    props: None,
                    runs: Vec::new(),
                    state: EditState::Original,
                });
                self.push_block(Block::Paragraph(id));
            }
            return;
        }
        if !self.in_direct_paragraph() {
            return;
        }

        match (name, self.run.as_mut()) {
            (b"w:pPr", None) => {
                if let Some(paragraph) = self.paragraph.as_mut() {
                    paragraph.props = Some(source[start..end].to_string());
                }
            }
            (b"w:rPr", Some(run)) => run.props = Some(source[start..end].to_string()),
            (b"w:b", Some(run)) if run.props_start.is_some() => run.bold = bold_value(e),
            (b"w:tab", Some(run)) if run.props_start.is_none() => run.text.push('\t'),
            (b"w:br" | b"w:cr", Some(run)) if run.props_start.is_none() => run.text.push('\n'),
            _ => {}
        }
    }

    fn end(&mut self, source: &str, name: &[u8], end: usize) {
        if let Some(paragraph) = self.paragraph.as_mut() {
            if paragraph.nested > 0 {
                if name == b"w:p" {
                    paragraph.nested -= 1;
                }
                return;
            }
            match name {
                b"w:p" => {
                    if let Some(builder) = self.paragraph.take() {
                        self.run = None;
                        let id = self.paragraphs.len();
                        self.paragraphs.push(Paragraph {
                            span: builder.start..end,
                            open_tag: builder.open_tag,
                            props: builder.props,
                            runs: builder.runs,
                            state: EditState::Original,
                        });
                        self.push_block(Block::Paragraph(id));
                    }
                }
                b"w:pPr" if self.run.is_none() => {
                    if let Some(start) = paragraph.props_start.take() {
                        paragraph.props = Some(source[start..end].to_string());
                    }
                }
                b"w:r" => {
                    if let Some(run) = self.run.take() {
                        paragraph.runs.push(Run {
                            span: run.start..end,
                            props: run.props,
                            text: run.text,
                            bold: run.bold,
                            edited: false,
                        });
                    }
                }
                b"w:rPr" => {
                    if let Some(run) = self.run.as_mut() {
                        if let Some(start) = run.props_start.take() {
                            run.props = Some(source[start..end].to_string());
                        }
                    }
                }
                b"w:t" => {
                    if let Some(run) = self.run.as_mut() {
                        run.in_text = false;
                    }
                }
                _ => {}
            }
            return;
        }

        match name {
            b"w:tc" => {
                if let Some(frame) = self.tables.last_mut() {
                    if let (Some(cell), Some(row)) = (frame.cell.take(), frame.row.as_mut()) {
                        row.cells.push(cell);
                    }
                }
            }
            b"w:tr" => {
                if let Some(frame) = self.tables.last_mut() {
                    if let Some(row) = frame.row.take() {
                        frame.table.rows.push(row);
                    }
                }
            }
            b"w:tbl" => {
                if let Some(frame) = self.tables.pop() {
                    self.push_block(Block::Table(frame.table));
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if !self.in_direct_paragraph() {
            return;
        }
        if let Some(run) = self.run.as_mut() {
            if run.in_text {
                run.text.push_str(text);
            }
        }
    }
}

/// `<w:b/>` is bold unless its `w:val` switches it off.
fn bold_value(e: &BytesStart<'_>) -> bool {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"w:val")
        .map(|attr| !matches!(attr.value.as_ref(), b"0" | b"false" | b"off"))
        .unwrap_or(true)
}

pub(crate) fn parse_body(source: &str) -> Result<ParsedBody, DocumentError> {
    let mut reader = Reader::from_str(source);
    let mut body = BodyBuilder::default();

    loop {
        let event = reader.read_event()?;
        let end = reader.buffer_position();
        match event {
            Event::Start(e) => {
                // `<` + name/attributes + `>`
                let start = end - (e.len() + 2);
                body.start(source, &e, start, end);
            }
            Event::Empty(e) => {
                // `<` + name/attributes + `/>`
                let start = end - (e.len() + 3);
                body.empty(source, &e, start, end);
            }
            Event::End(e) => body.end(source, e.name().as_ref(), end),
            Event::Text(e) => {
                let text = e.unescape()?;
                body.text(&text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e);
                body.text(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if body.paragraph.is_some() || !body.tables.is_empty() {
        return Err(DocumentError::Malformed(
            "document body ended inside an open paragraph or table".to_string(),
        ));
    }

    Ok(ParsedBody {
        blocks: body.blocks,
        paragraphs: body.paragraphs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: &str = "xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"";

    fn wrap(body: &str) -> String {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><w:document {W}><w:body>{body}</w:body></w:document>")
    }

    #[test]
    fn test_paragraph_spans_cover_exact_source() {
        let para = "<w:p w:rsidR=\"00A1\"><w:pPr><w:jc w:val=\"left\"/></w:pPr><w:r><w:t>Hello</w:t></w:r></w:p>";
        let xml = wrap(para);
        let parsed = parse_body(&xml).unwrap();

        assert_eq!(parsed.paragraphs.len(), 1);
        let paragraph = &parsed.paragraphs[0];
        assert_eq!(&xml[paragraph.span.clone()], para);
        assert_eq!(paragraph.open_tag, "<w:p w:rsidR=\"00A1\">");
        assert_eq!(paragraph.props.as_deref(), Some("<w:pPr><w:jc w:val=\"left\"/></w:pPr>"));
        assert_eq!(paragraph.text(), "Hello");
    }

    #[test]
    fn test_runs_capture_bold_tabs_breaks_and_entities() {
        let xml = wrap(
            "<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>A &amp; B:</w:t></w:r>\
             <w:r><w:rPr><w:b w:val=\"0\"/></w:rPr><w:tab/><w:t xml:space=\"preserve\"> x</w:t><w:br/></w:r></w:p>",
        );
        let parsed = parse_body(&xml).unwrap();
        let runs = parsed.paragraphs[0].runs();

        assert_eq!(runs.len(), 2);
        assert!(runs[0].is_bold());
        assert_eq!(runs[0].text(), "A & B:");
        assert!(!runs[1].is_bold());
        assert_eq!(runs[1].text(), "\t x\n");
        assert_eq!(runs[0].props.as_deref(), Some("<w:rPr><w:b/></w:rPr>"));
    }

    #[test]
    fn test_tables_rows_and_cells_are_structured() {
        let xml = wrap(
            "<w:p><w:r><w:t>Intro</w:t></w:r></w:p>\
             <w:tbl><w:tblPr/><w:tr><w:tc><w:p><w:r><w:t>Name</w:t></w:r></w:p></w:tc>\
             <w:tc><w:p><w:r><w:t>John</w:t></w:r></w:p><w:p/></w:tc></w:tr></w:tbl>",
        );
        let parsed = parse_body(&xml).unwrap();

        assert_eq!(parsed.paragraphs.len(), 4);
        assert_eq!(parsed.blocks.len(), 2);
        match &parsed.blocks[1] {
            Block::Table(table) => {
                assert_eq!(table.rows.len(), 1);
                assert_eq!(table.rows[0].cells.len(), 2);
                assert_eq!(table.rows[0].cells[1].paragraph_ids(), vec![2, 3]);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_text_box_paragraphs_do_not_leak_into_outer_run() {
        let xml = wrap(
            "<w:p><w:r><w:t>Outer</w:t><w:pict><w:txbxContent><w:p><w:r><w:t>Inner</w:t></w:r></w:p>\
             </w:txbxContent></w:pict></w:r></w:p>",
        );
        let parsed = parse_body(&xml).unwrap();

        assert_eq!(parsed.paragraphs.len(), 1);
        assert_eq!(parsed.paragraphs[0].text(), "Outer");
    }

    #[test]
    fn test_unclosed_paragraph_is_rejected() {
        let xml = format!("<w:document {W}><w:body><w:p><w:r><w:t>x</w:t></w:r>");
        assert!(parse_body(&xml).is_err());
    }
}
