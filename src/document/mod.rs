//! # Word-Processing Documents
//!
//! Opens `.docx` packages, exposes the body as paragraphs, tables and runs,
//! and writes the package back out. Only `word/document.xml` is ever
//! rewritten; every other part is copied byte for byte, and inside the body
//! only paragraphs that were edited are re-rendered.

mod model;
mod parse;
#[cfg(test)]
pub mod testing;

pub use model::{Block, Cell, Paragraph, ParagraphId, Row, Run, Table};

use model::Run as RunModel;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Package part holding the main document body.
pub const DOCUMENT_PART: &str = "word/document.xml";

/// MIME type of a `.docx` package.
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("not a word-processing package: {0}")]
    NotAPackage(#[from] zip::result::ZipError),

    #[error("package has no {0} part")]
    MissingPart(&'static str),

    #[error("document part is not valid UTF-8")]
    Encoding,

    #[error("document XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct PackageEntry {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
    is_dir: bool,
}

/// An opened `.docx` package.
pub struct Document {
    entries: Vec<PackageEntry>,
    source: String,
    blocks: Vec<Block>,
    paragraphs: Vec<Paragraph>,
}

/// A run to emit when rebuilding a paragraph. `bold: None` leaves the run
/// without properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub text: String,
    pub bold: Option<bool>,
}

impl RunSpec {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), bold: None }
    }

    pub fn styled(text: impl Into<String>, bold: bool) -> Self {
        Self { text: text.into(), bold: Some(bold) }
    }
}

impl Document {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        let mut source = None;

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;

            if file.name() == DOCUMENT_PART {
                let text = String::from_utf8(data.clone()).map_err(|_| DocumentError::Encoding)?;
                source = Some(text);
            }

            entries.push(PackageEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                is_dir: file.is_dir(),
                data,
            });
        }

        let source = source.ok_or(DocumentError::MissingPart(DOCUMENT_PART))?;
        let parsed = parse::parse_body(&source)?;

        Ok(Self {
            entries,
            source,
            blocks: parsed.blocks,
            paragraphs: parsed.paragraphs,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Top-level body blocks in document order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Every paragraph of the body and of table cells, in document order.
    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    pub fn paragraph(&self, id: ParagraphId) -> Option<&Paragraph> {
        self.paragraphs.get(id)
    }

    /// Paragraphs that sit directly in the body (not inside a table).
    pub fn body_paragraphs(&self) -> impl Iterator<Item = &Paragraph> + '_ {
        self.blocks.iter().filter_map(move |block| match block {
            Block::Paragraph(id) => self.paragraphs.get(*id),
            Block::Table(_) => None,
        })
    }

    /// Tables that sit directly in the body.
    pub fn tables(&self) -> impl Iterator<Item = &Table> + '_ {
        self.blocks.iter().filter_map(|block| match block {
            Block::Table(table) => Some(table),
            Block::Paragraph(_) => None,
        })
    }

    /// Replace every occurrence of `from` in one paragraph. See
    /// [`Paragraph`] for how formatting is kept.
    pub fn replace_text(&mut self, id: ParagraphId, from: &str, to: &str) -> bool {
        self.paragraphs
            .get_mut(id)
            .map(|paragraph| paragraph.replace_text(from, to))
            .unwrap_or(false)
    }

    /// Drop a paragraph's content (keeping its paragraph properties) and emit
    /// `runs` in its place.
    pub fn rebuild_paragraph(&mut self, id: ParagraphId, runs: &[RunSpec]) {
        if let Some(paragraph) = self.paragraphs.get_mut(id) {
            let runs = runs
                .iter()
                .map(|spec| RunModel::synthesized(spec.text.clone(), spec.bold))
                .collect();
            paragraph.rebuild(runs);
        }
    }

    /// Current `word/document.xml` text.
    pub fn document_xml(&self) -> String {
        let mut out = String::with_capacity(self.source.len() + 256);
        let mut cursor = 0;
        for paragraph in &self.paragraphs {
            out.push_str(&self.source[cursor..paragraph.span.start]);
            paragraph.render(&self.source, &mut out);
            cursor = paragraph.span.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        let xml = self.document_xml();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &self.entries {
            let method = match entry.compression {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            let options = FileOptions::default().compression_method(method);

            if entry.is_dir {
                writer.add_directory(entry.name.clone(), options)?;
                continue;
            }

            writer.start_file(entry.name.clone(), options)?;
            if entry.name == DOCUMENT_PART {
                writer.write_all(xml.as_bytes())?;
            } else {
                writer.write_all(&entry.data)?;
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
