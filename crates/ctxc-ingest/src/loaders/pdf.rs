//! PDF loader.
//!
//! Pages are extracted individually and joined with blank lines; the span
//! of every page inside the joined text goes into `meta.pages` so the
//! chunker can map chunk spans back to page numbers.

use std::path::Path;

use lopdf::Document;
use serde_json::{json, Value as JsonValue};

use ctxc_core::{Error, LoadErrorKind, Result};

use super::{file_mtime_ms, normalize_text, read_bytes, LoadedDoc};

/// Char span of one page inside the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    /// 1-based page number.
    pub index: i64,
    pub start_char: i64,
    pub end_char: i64,
}

pub(super) fn load(path: &Path) -> Result<LoadedDoc> {
    let bytes = read_bytes(path)?;
    let document = Document::load_mem(&bytes).map_err(|e| {
        Error::load(
            LoadErrorKind::DecodeError,
            format!("{}: {e}", path.display()),
        )
    })?;

    let mut text = String::new();
    let mut pages = Vec::new();
    for (page_no, _object_id) in document.get_pages() {
        let page_text = document.extract_text(&[page_no]).map_err(|e| {
            Error::load(
                LoadErrorKind::DecodeError,
                format!("{} page {page_no}: {e}", path.display()),
            )
        })?;
        let normalized = normalize_text(page_text.trim());
        if normalized.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        let start = text.len() as i64;
        text.push_str(&normalized);
        pages.push(json!({
            "index": page_no as i64,
            "start_char": start,
            "end_char": text.len() as i64,
        }));
    }

    Ok(LoadedDoc {
        text,
        mime: "application/pdf".to_string(),
        title: path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from),
        author: None,
        created_ts: None,
        modified_ts: file_mtime_ms(path),
        external_id: path.to_string_lossy().to_string(),
        meta: json!({
            "path": path.to_string_lossy(),
            "pages": pages,
        }),
        bytes,
    })
}

/// Parse the loader's `meta.pages` back into spans.
pub fn page_spans(meta: &JsonValue) -> Vec<PageSpan> {
    meta.get("pages")
        .and_then(JsonValue::as_array)
        .map(|pages| {
            pages
                .iter()
                .filter_map(|p| {
                    Some(PageSpan {
                        index: p.get("index")?.as_i64()?,
                        start_char: p.get("start_char")?.as_i64()?,
                        end_char: p.get("end_char")?.as_i64()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
