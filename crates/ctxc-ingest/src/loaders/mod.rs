//! Document loaders.
//!
//! Dispatch is by file extension. Every loader produces one or more
//! `LoadedDoc`s with normalised text (LF line endings, no BOM) plus the raw
//! bytes for content addressing. A single file may yield several documents
//! (mbox), each with a stable external id.

mod docx;
mod email;
mod markdown;
mod pdf;
mod text;

pub use pdf::{page_spans as pdf_pages, PageSpan};

use std::path::Path;

use serde_json::Value as JsonValue;

use ctxc_core::{Error, LoadErrorKind, Result};

/// A document extracted from a source file, before chunking.
#[derive(Debug, Clone)]
pub struct LoadedDoc {
    /// Normalised text; chunk spans index into this exact string.
    pub text: String,
    pub mime: String,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Unix milliseconds, when the format carries a creation time.
    pub created_ts: Option<i64>,
    pub modified_ts: Option<i64>,
    /// Stable identity within the source (file path, or path#offset for
    /// mbox messages).
    pub external_id: String,
    pub meta: JsonValue,
    /// Raw bytes backing this document; sha-256 of these is the
    /// content-address.
    pub bytes: Vec<u8>,
}

/// Registry mapping file extensions to loaders.
pub struct LoaderRegistry;

impl LoaderRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Whether a path has a supported extension.
    pub fn supports(&self, path: &Path) -> bool {
        matches!(
            extension(path).as_deref(),
            Some(
                "md" | "markdown" | "mdx" | "txt" | "text" | "log" | "pdf" | "docx" | "eml"
                    | "mbox"
            )
        )
    }

    /// Load every document contained in the file.
    pub fn load(&self, path: &Path) -> Result<Vec<LoadedDoc>> {
        let ext = extension(path).ok_or_else(|| {
            Error::load(
                LoadErrorKind::UnsupportedMime,
                format!("no extension on {}", path.display()),
            )
        })?;

        let mut docs = match ext.as_str() {
            "md" | "markdown" | "mdx" => vec![markdown::load(path)?],
            "txt" | "text" | "log" => vec![text::load(path)?],
            "pdf" => vec![pdf::load(path)?],
            "docx" => vec![docx::load(path)?],
            "eml" => vec![email::load_eml(path)?],
            "mbox" => email::load_mbox(path)?,
            other => {
                return Err(Error::load(
                    LoadErrorKind::UnsupportedMime,
                    format!("no loader for .{other}"),
                ))
            }
        };

        // Bodiless mbox messages are dropped; a file with no text at all
        // is an error.
        docs.retain(|doc| !doc.text.trim().is_empty());
        if docs.is_empty() {
            return Err(Error::load(
                LoadErrorKind::Empty,
                format!("{} decoded to empty text", path.display()),
            ));
        }
        Ok(docs)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Strip a UTF-8 BOM and canonicalise line endings to LF.
pub(crate) fn normalize_text(raw: &str) -> String {
    let without_bom = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    without_bom.replace("\r\n", "\n").replace('\r', "\n")
}

/// Read a file with the transient-IO failures surfaced as `Load { Io }`.
pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::load(LoadErrorKind::Io, format!("{}: {e}", path.display())))
}

/// File mtime in Unix milliseconds, if available.
pub(crate) fn file_mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let ms = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .ok()?
        .as_millis();
    Some(ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("\u{feff}a\r\nb\rc"), "a\nb\nc");
        assert_eq!(normalize_text("plain"), "plain");
    }

    #[test]
    fn test_registry_supports_known_extensions() {
        let registry = LoaderRegistry::new();
        assert!(registry.supports(Path::new("note.md")));
        assert!(registry.supports(Path::new("Report.PDF")));
        assert!(registry.supports(Path::new("mail.mbox")));
        assert!(!registry.supports(Path::new("image.png")));
        assert!(!registry.supports(Path::new("Makefile")));
    }

    #[test]
    fn test_unsupported_extension_is_load_error() {
        let registry = LoaderRegistry::new();
        let err = registry.load(Path::new("/nonexistent/image.png")).unwrap_err();
        match err {
            Error::Load { kind, .. } => assert_eq!(kind, LoadErrorKind::UnsupportedMime),
            other => panic!("expected load error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_load_error() {
        let registry = LoaderRegistry::new();
        let err = registry
            .load(Path::new("/nonexistent/note.md"))
            .unwrap_err();
        match err {
            Error::Load { kind, .. } => assert_eq!(kind, LoadErrorKind::Io),
            other => panic!("expected load error, got {other:?}"),
        }
    }
}
