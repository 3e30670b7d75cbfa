//! Plain-text extraction from uploaded bytes.
//!
//! Everything is decoded in memory; nothing touches the filesystem.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{KnowledgeError, KnowledgeResult};

/// Extensions with a reader.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "docx"];

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";

/// Extract text from `bytes` according to the lowercase `extension`.
pub fn extract_text(bytes: &[u8], extension: &str, filename: &str) -> KnowledgeResult<String> {
    match extension {
        "pdf" => extract_pdf(bytes, filename),
        "txt" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "docx" => extract_docx(bytes, filename),
        other => Err(KnowledgeError::UnsupportedFileType(if other.is_empty() {
            filename.to_string()
        } else {
            other.to_string()
        })),
    }
}

fn extraction_error(filename: &str, reason: impl ToString) -> KnowledgeError {
    KnowledgeError::Extraction {
        file: filename.to_string(),
        reason: reason.to_string(),
    }
}

fn extract_pdf(bytes: &[u8], filename: &str) -> KnowledgeResult<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| extraction_error(filename, e))
}

fn extract_docx(bytes: &[u8], filename: &str) -> KnowledgeResult<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| extraction_error(filename, e))?;

    let entry = archive
        .by_name(DOCX_BODY)
        .map_err(|_| extraction_error(filename, format!("{} not found", DOCX_BODY)))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| extraction_error(filename, e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(extraction_error(
            filename,
            format!("{} exceeds size limit", DOCX_BODY),
        ));
    }

    docx_paragraphs(&xml).map_err(|e| extraction_error(filename, e))
}

/// Collect `w:t` runs, one line per `w:p` paragraph. Tabs and breaks inside a
/// paragraph become whitespace.
fn docx_paragraphs(xml: &[u8]) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(&t.unescape()?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
