//! Plain-text loader.

use std::path::Path;

use serde_json::json;

use ctxc_core::Result;

use super::{file_mtime_ms, normalize_text, read_bytes, LoadedDoc};

pub(super) fn load(path: &Path) -> Result<LoadedDoc> {
    let bytes = read_bytes(path)?;
    let raw = String::from_utf8_lossy(&bytes);
    let text = normalize_text(&raw);

    Ok(LoadedDoc {
        text,
        mime: "text/plain".to_string(),
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
