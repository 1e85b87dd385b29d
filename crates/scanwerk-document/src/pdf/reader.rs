// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF inspector — structural checks on assembled documents. The
// cross-reference table is read straight from the file bytes so that every
// recorded offset can be verified; the page tree is then walked with `lopdf`.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use scanwerk_core::error::ScanwerkError;
use tracing::{debug, instrument};

/// What a page of an assembled document contains.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub object_number: u32,
    pub media_width: f32,
    pub media_height: f32,
    pub image_width: u32,
    pub image_height: u32,
    pub color_space: Option<String>,
}

/// Structure of a verified PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfLayout {
    /// Header version, e.g. `"1.5"`.
    pub version: String,
    /// In-use entries of the cross-reference table.
    pub xref_entries: usize,
    pub root_object: u32,
    pub page_count: usize,
    /// Page object numbers in reading order.
    pub page_objects: Vec<u32>,
    pub pages: Vec<PageInfo>,
}

/// Verifies assembled documents.
pub struct PdfInspector;

impl PdfInspector {
    /// Inspect a PDF on disk.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn inspect_file(path: impl AsRef<Path>) -> Result<PdfLayout, ScanwerkError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::inspect(&bytes)
    }

    /// Verify `bytes` and describe their page structure.
    ///
    /// Fails with `Pdf` when the header is missing, when `startxref` does not
    /// point at the table, when any in-use entry does not point at
    /// `N G obj`, or when the page tree cannot be followed from `/Root`.
    #[instrument(skip_all, fields(bytes_len = bytes.len()))]
    pub fn inspect(bytes: &[u8]) -> Result<PdfLayout, ScanwerkError> {
        let version = parse_header(bytes)?;
        let xref_offset = parse_startxref(bytes)?;
        let (entries, trailer_at) = parse_xref_table(bytes, xref_offset)?;

        for &(number, offset, generation) in &entries {
            let expected = format!("{} {} obj", number, generation);
            let at = bytes.get(offset..).unwrap_or_default();
            if !at.starts_with(expected.as_bytes()) {
                return Err(pdf_err(format!(
                    "xref entry for object {number} points at byte {offset}, which is not `{expected}`"
                )));
            }
        }

        let root_object = parse_trailer_root(&bytes[trailer_at..])?;
        if !entries.iter().any(|&(n, _, _)| n == root_object) {
            return Err(pdf_err(format!(
                "trailer /Root {root_object} is not in the cross-reference table"
            )));
        }

        let document = Document::load_mem(bytes)
            .map_err(|err| pdf_err(format!("failed to parse PDF: {}", err)))?;
        let kids = page_kids(&document, root_object)?;

        let mut pages = Vec::with_capacity(kids.len());
        for id in &kids {
            pages.push(page_info(&document, *id)?);
        }

        debug!(
            xref_entries = entries.len(),
            pages = pages.len(),
            "PDF structure verified"
        );

        Ok(PdfLayout {
            version,
            xref_entries: entries.len(),
            root_object,
            page_count: kids.len(),
            page_objects: kids.iter().map(|id| id.0).collect(),
            pages,
        })
    }
}

fn pdf_err(message: String) -> ScanwerkError {
    ScanwerkError::Pdf(message)
}

fn parse_header(bytes: &[u8]) -> Result<String, ScanwerkError> {
    let rest = bytes
        .strip_prefix(b"%PDF-")
        .ok_or_else(|| pdf_err("missing %PDF- header".into()))?;
    let version: String = rest
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    if version.is_empty() {
        return Err(pdf_err("header carries no version".into()));
    }
    Ok(version)
}

/// Offset recorded after the last `startxref` keyword.
fn parse_startxref(bytes: &[u8]) -> Result<usize, ScanwerkError> {
    let at = rfind(bytes, b"startxref").ok_or_else(|| pdf_err("missing startxref".into()))?;
    let mut tokens = Tokens::new(bytes, at + b"startxref".len());
    tokens
        .next_number()
        .ok_or_else(|| pdf_err("startxref has no offset".into()))
}

/// Read every subsection of a classic table at `offset`. Returns the in-use
/// entries as `(object number, byte offset, generation)` and the position of
/// the `trailer` keyword.
fn parse_xref_table(
    bytes: &[u8],
    offset: usize,
) -> Result<(Vec<(u32, usize, u32)>, usize), ScanwerkError> {
    if !bytes.get(offset..).unwrap_or_default().starts_with(b"xref") {
        return Err(pdf_err(format!(
            "startxref offset {offset} does not point at a cross-reference table"
        )));
    }

    let mut tokens = Tokens::new(bytes, offset + b"xref".len());
    let mut entries = Vec::new();

    loop {
        let position = tokens.position();
        let Some(word) = tokens.next_word() else {
            return Err(pdf_err("cross-reference table is not followed by a trailer".into()));
        };
        if word == b"trailer" {
            return Ok((entries, position));
        }

        let first = parse_usize(word)?;
        let count = tokens
            .next_number()
            .ok_or_else(|| pdf_err("truncated xref subsection header".into()))?;

        for i in 0..count {
            let entry_offset = tokens.next_number();
            let generation = tokens.next_number();
            let kind = tokens.next_word();
            match (entry_offset, generation, kind) {
                (Some(off), Some(generation), Some(b"n")) => {
                    entries.push(((first + i) as u32, off, generation as u32));
                }
                (Some(_), Some(_), Some(b"f")) => {}
                _ => {
                    return Err(pdf_err(format!(
                        "malformed xref entry for object {}",
                        first + i
                    )));
                }
            }
        }
    }
}

fn parse_trailer_root(trailer: &[u8]) -> Result<u32, ScanwerkError> {
    let at = find(trailer, b"/Root").ok_or_else(|| pdf_err("trailer has no /Root".into()))?;
    let mut tokens = Tokens::new(trailer, at + b"/Root".len());
    let number = tokens.next_number();
    let generation = tokens.next_number();
    let marker = tokens.next_word();
    match (number, generation, marker) {
        (Some(n), Some(_), Some(b"R")) => Ok(n as u32),
        _ => Err(pdf_err("trailer /Root is not an indirect reference".into())),
    }
}

fn page_kids(document: &Document, root_object: u32) -> Result<Vec<ObjectId>, ScanwerkError> {
    let catalog = document
        .get_dictionary((root_object, 0))
        .map_err(|err| pdf_err(format!("catalog unreadable: {}", err)))?;
    let pages_id = catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|err| pdf_err(format!("catalog has no /Pages: {}", err)))?;
    let pages = document
        .get_dictionary(pages_id)
        .map_err(|err| pdf_err(format!("page tree unreadable: {}", err)))?;

    let kids = pages
        .get(b"Kids")
        .and_then(Object::as_array)
        .map_err(|err| pdf_err(format!("page tree has no /Kids: {}", err)))?;
    let ids = kids
        .iter()
        .map(|kid| {
            kid.as_reference()
                .map_err(|err| pdf_err(format!("page tree kid is not a reference: {}", err)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let count = pages
        .get(b"Count")
        .and_then(Object::as_i64)
        .map_err(|err| pdf_err(format!("page tree has no /Count: {}", err)))?;
    if count != ids.len() as i64 {
        return Err(pdf_err(format!(
            "page tree /Count {count} disagrees with {} kids",
            ids.len()
        )));
    }
    Ok(ids)
}

fn page_info(document: &Document, id: ObjectId) -> Result<PageInfo, ScanwerkError> {
    let page = document
        .get_dictionary(id)
        .map_err(|err| pdf_err(format!("page {} unreadable: {}", id.0, err)))?;

    let media_box = page
        .get(b"MediaBox")
        .and_then(Object::as_array)
        .map_err(|err| pdf_err(format!("page {} has no /MediaBox: {}", id.0, err)))?;
    let number = |o: &Object| o.as_float().or_else(|_| o.as_i64().map(|v| v as f32)).unwrap_or(0.0);
    let (media_width, media_height) = match media_box.as_slice() {
        [x0, y0, x1, y1] => (number(x1) - number(x0), number(y1) - number(y0)),
        _ => return Err(pdf_err(format!("page {} has a malformed /MediaBox", id.0))),
    };

    let image = first_image(document, page)
        .ok_or_else(|| pdf_err(format!("page {} has no image XObject", id.0)))?;
    let dim = |key: &[u8]| image.get(key).and_then(Object::as_i64).unwrap_or(0) as u32;
    let color_space = image
        .get(b"ColorSpace")
        .and_then(Object::as_name)
        .ok()
        .map(|name| String::from_utf8_lossy(name).into_owned());

    Ok(PageInfo {
        object_number: id.0,
        media_width,
        media_height,
        image_width: dim(b"Width"),
        image_height: dim(b"Height"),
        color_space,
    })
}

fn first_image<'a>(document: &'a Document, page: &'a Dictionary) -> Option<&'a Dictionary> {
    let resources = match page.get(b"Resources").ok()? {
        Object::Reference(id) => document.get_dictionary(*id).ok()?,
        other => other.as_dict().ok()?,
    };
    let xobjects = resources.get(b"XObject").ok()?.as_dict().ok()?;
    xobjects.iter().find_map(|(_, value)| {
        let id = value.as_reference().ok()?;
        match document.get_object(id).ok()? {
            Object::Stream(stream) => Some(&stream.dict),
            _ => None,
        }
    })
}

// -- Byte scanning ------------------------------------------------------------

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn parse_usize(word: &[u8]) -> Result<usize, ScanwerkError> {
    std::str::from_utf8(word)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| pdf_err(format!("expected a number, found {:?}", String::from_utf8_lossy(word))))
}

/// Whitespace-separated words starting at a byte position.
struct Tokens<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Position of the next word.
    fn position(&mut self) -> usize {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        self.pos
    }

    fn next_word(&mut self) -> Option<&'a [u8]> {
        let start = self.position();
        let mut end = start;
        while end < self.bytes.len()
            && !self.bytes[end].is_ascii_whitespace()
            && !matches!(self.bytes[end], b'/' | b'<' | b'>' | b'[' | b']')
        {
            end += 1;
        }
        self.pos = end;
        (end > start).then(|| &self.bytes[start..end])
    }

    fn next_number(&mut self) -> Option<usize> {
        let word = self.next_word()?;
        std::str::from_utf8(word).ok()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn minimal_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(612), Object::Integer(792)],
        });
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1i64,
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc.reference_table.cross_reference_type = lopdf::xref::XrefType::CrossReferenceTable;
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn header_and_startxref_are_parsed() {
        let bytes = minimal_pdf();
        assert_eq!(parse_header(&bytes).unwrap(), "1.5");
        let offset = parse_startxref(&bytes).unwrap();
        assert!(bytes[offset..].starts_with(b"xref"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let bytes = minimal_pdf();
        let offset = parse_startxref(&bytes).unwrap();
        let (entries, _) = parse_xref_table(&bytes, offset).unwrap();
        assert_eq!(entries.len(), 3);
        for (number, at, _) in entries {
            assert!(bytes[at..].starts_with(format!("{number} 0 obj").as_bytes()));
        }
    }

    #[test]
    fn page_without_image_is_reported() {
        let err = PdfInspector::inspect(&minimal_pdf()).unwrap_err();
        assert!(err.to_string().contains("no image XObject"));
    }

    #[test]
    fn shifted_offsets_are_detected() {
        let mut bytes = minimal_pdf();
        // Insert a byte right after the header; every object moves by one
        // while the table still records the old offsets.
        let eol = bytes.iter().position(|b| *b == b'\n').unwrap();
        bytes.insert(eol + 1, b'\n');
        let err = PdfInspector::inspect(&bytes).unwrap_err();
        assert!(matches!(err, ScanwerkError::Pdf(_)));
    }

    #[test]
    fn non_pdf_is_rejected() {
        assert!(PdfInspector::inspect(b"hello world").is_err());
    }
}
