//! DOCX loader.
//!
//! A .docx is a zip archive; the body lives in `word/document.xml`. Text is
//! pulled from `w:t` runs, paragraphs become lines, and `Heading<N>`
//! paragraph styles are rendered as `#`-prefixed lines so the chunker's
//! section handling applies uniformly.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;

use ctxc_core::{Error, LoadErrorKind, Result};

use super::{file_mtime_ms, normalize_text, read_bytes, LoadedDoc};

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub(super) fn load(path: &Path) -> Result<LoadedDoc> {
    let bytes = read_bytes(path)?;
    let cursor = std::io::Cursor::new(&bytes);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|e| {
        Error::load(
            LoadErrorKind::DecodeError,
            format!("{}: {e}", path.display()),
        )
    })?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| {
            Error::load(
                LoadErrorKind::DecodeError,
                format!("{} has no word/document.xml: {e}", path.display()),
            )
        })?
        .read_to_string(&mut xml)
        .map_err(|e| {
            Error::load(
                LoadErrorKind::DecodeError,
                format!("{}: {e}", path.display()),
            )
        })?;

    let text = flatten_document_xml(&xml, path)?;

    Ok(LoadedDoc {
        text: normalize_text(&text),
        mime: DOCX_MIME.to_string(),
        title: path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from),
        author: None,
        created_ts: None,
        modified_ts: file_mtime_ms(path),
        external_id: path.to_string_lossy().to_string(),
        meta: json!({ "path": path.to_string_lossy() }),
        bytes,
    })
}

/// Flatten `word/document.xml` into paragraph-per-line text with heading
/// depth markers.
fn flatten_document_xml(xml: &str, path: &Path) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut heading_depth: Option<usize> = None;
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => {
                    current.clear();
                    heading_depth = None;
                }
                b"w:t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"w:pStyle" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"w:val" {
                            let style = String::from_utf8_lossy(&attr.value).to_string();
                            heading_depth = heading_level(&style);
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if in_text_run {
                    current.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        match heading_depth {
                            Some(depth) => {
                                paragraphs.push(format!("{} {}", "#".repeat(depth), trimmed))
                            }
                            None => paragraphs.push(trimmed.to_string()),
                        }
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::load(
                    LoadErrorKind::DecodeError,
                    format!("{}: malformed document.xml: {e}", path.display()),
                ))
            }
            Ok(_) => {}
        }
    }

    Ok(paragraphs.join("\n\n"))
}

fn heading_level(style: &str) -> Option<usize> {
    let depth: usize = style.strip_prefix("Heading")?.parse().ok()?;
    (1..=6).contains(&depth).then_some(depth)
}
