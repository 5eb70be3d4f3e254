//! Markdown loader.
//!
//! Headings are preserved in the text so the chunker can section on them.
//! YAML front matter is stripped from the body and mapped into metadata
//! (`title`, `author`, `tags`, `created`).

use std::path::Path;

use serde_json::{json, Value as JsonValue};
use serde_yaml::Value as YamlValue;

use ctxc_core::Result;

use super::{file_mtime_ms, normalize_text, read_bytes, LoadedDoc};

pub(super) fn load(path: &Path) -> Result<LoadedDoc> {
    let bytes = read_bytes(path)?;
    let raw = String::from_utf8_lossy(&bytes);
    let normalized = normalize_text(&raw);
    let (front_matter, body) = split_front_matter(&normalized);

    let stem_title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(String::from);

    let mut meta = json!({ "path": path.to_string_lossy() });
    let mut title = stem_title;
    let mut author = None;
    let mut created_ts = None;

    if let Some(fm) = front_matter {
        if let Some(t) = fm.get("title").and_then(YamlValue::as_str) {
            title = Some(t.to_string());
        }
        if let Some(a) = fm.get("author").and_then(YamlValue::as_str) {
            author = Some(a.to_string());
        }
        if let Some(c) = fm.get("created") {
            created_ts = yaml_to_ms(c);
        }
        if let Some(tags) = extract_tags(&fm) {
            meta["tags"] = JsonValue::Array(tags.into_iter().map(JsonValue::String).collect());
        }
    }

    Ok(LoadedDoc {
        text: body.to_string(),
        mime: "text/markdown".to_string(),
        title,
        author,
        created_ts,
        modified_ts: file_mtime_ms(path),
        external_id: path.to_string_lossy().to_string(),
        meta,
        bytes,
    })
}

/// Split `---` delimited YAML front matter off the body.
fn split_front_matter(text: &str) -> (Option<serde_yaml::Mapping>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text);
    };
    let Some(end) = rest.find("\n---") else {
        return (None, text);
    };
    let yaml_block = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);

    match serde_yaml::from_str::<YamlValue>(yaml_block) {
        Ok(YamlValue::Mapping(mapping)) => (Some(mapping), body),
        _ => (None, text),
    }
}

fn extract_tags(fm: &serde_yaml::Mapping) -> Option<Vec<String>> {
    match fm.get("tags")? {
        YamlValue::Sequence(items) => Some(
            items
                .iter()
                .filter_map(YamlValue::as_str)
                .map(String::from)
                .collect(),
        ),
        YamlValue::String(s) => Some(
            s.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        ),
        _ => None,
    }
}

fn yaml_to_ms(value: &YamlValue) -> Option<i64> {
    match value {
        YamlValue::Number(n) => n.as_i64().map(|secs| secs * 1000),
        YamlValue::String(s) => chrono_parse_ms(s),
        _ => None,
    }
}

fn chrono_parse_ms(s: &str) -> Option<i64> {
    // Front matter dates are commonly bare dates or RFC 3339.
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}
