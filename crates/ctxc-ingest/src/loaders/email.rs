//! EML and MBOX loaders.
//!
//! Single messages map headers to document fields: Subject becomes the
//! title, From the author, Date the creation timestamp. Mailboxes yield one
//! document per message with a stable external id (the Message-ID when
//! present, otherwise `<path>#<byte offset>`), so re-ingesting a grown mbox
//! only adds the new messages.

use std::path::Path;

use mail_parser::MessageParser;
use serde_json::json;

use ctxc_core::{Error, LoadErrorKind, Result};

use super::{file_mtime_ms, normalize_text, read_bytes, LoadedDoc};

pub(super) fn load_eml(path: &Path) -> Result<LoadedDoc> {
    let bytes = read_bytes(path)?;
    let doc = parse_message(&bytes, path, path.to_string_lossy().to_string(), "message/rfc822")?;
    Ok(doc)
}

pub(super) fn load_mbox(path: &Path) -> Result<Vec<LoadedDoc>> {
    let bytes = read_bytes(path)?;
    let mut documents = Vec::new();

    for (offset, message_bytes) in split_mbox(&bytes) {
        let fallback_id = format!("{}#{offset}", path.display());
        match parse_message(message_bytes, path, fallback_id, "message/rfc822+item") {
            Ok(doc) => documents.push(doc),
            // One undecodable message should not sink the mailbox.
            Err(Error::Load { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    if documents.is_empty() {
        return Err(Error::load(
            LoadErrorKind::Empty,
            format!("{} contains no readable messages", path.display()),
        ));
    }
    Ok(documents)
}

fn parse_message(
    bytes: &[u8],
    path: &Path,
    fallback_external_id: String,
    mime: &str,
) -> Result<LoadedDoc> {
    let message = MessageParser::default().parse(bytes).ok_or_else(|| {
        Error::load(
            LoadErrorKind::DecodeError,
            format!("{}: unparseable message", path.display()),
        )
    })?;

    let subject = message.subject().map(String::from);
    let author = message
        .from()
        .and_then(|a| a.first())
        .and_then(|addr| {
            addr.name()
                .map(String::from)
                .or_else(|| addr.address().map(String::from))
        });
    let created_ts = message.date().map(|d| d.to_timestamp() * 1000);
    let external_id = message
        .message_id()
        .map(String::from)
        .unwrap_or(fallback_external_id);

    // body_text flattens HTML-only messages to plain text.
    let body = message
        .body_text(0)
        .map(|b| b.to_string())
        .unwrap_or_default();
    let text = normalize_text(&body);

    Ok(LoadedDoc {
        text,
        mime: mime.to_string(),
        title: subject.or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
        }),
        author,
        created_ts,
        modified_ts: file_mtime_ms(path),
        external_id: external_id.clone(),
        meta: json!({
            "path": path.to_string_lossy(),
            "message_id": external_id,
        }),
        bytes: bytes.to_vec(),
    })
}

/// Split an mbox into `(byte offset, message bytes)` pairs on `From `
/// separator lines.
fn split_mbox(bytes: &[u8]) -> Vec<(usize, &[u8])> {
    let mut boundaries: Vec<usize> = Vec::new();
    if bytes.starts_with(b"From ") {
        boundaries.push(0);
    }
    for i in 0..bytes.len().saturating_sub(6) {
        if bytes[i] == b'\n' && bytes[i + 1..].starts_with(b"From ") {
            boundaries.push(i + 1);
        }
    }

    let mut messages = Vec::with_capacity(boundaries.len());
    for (n, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(n + 1).copied().unwrap_or(bytes.len());
        // Skip the "From ..." separator line itself.
        let body_start = bytes[start..end]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p + 1)
            .unwrap_or(end);
        if body_start < end {
            messages.push((start, &bytes[body_start..end]));
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MESSAGE: &str = "From: Ada Lovelace <ada@example.org>\r\n\
Subject: Engine notes\r\n\
Date: Tue, 2 Jul 2024 10:00:00 +0000\r\n\
Message-ID: <note-1@example.org>\r\n\
Content-Type: text/plain\r\n\
\r\n\
The analytical engine weaves algebraic patterns.\r\n";

    #[test]
    fn test_load_eml_maps_headers() {
        let mut file = tempfile::Builder::new().suffix(".eml").tempfile().unwrap();
        file.write_all(MESSAGE.as_bytes()).unwrap();

        let doc = load_eml(file.path()).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Engine notes"));
        assert_eq!(doc.author.as_deref(), Some("Ada Lovelace"));
        assert!(doc.created_ts.is_some());
        assert_eq!(doc.external_id, "note-1@example.org");
        assert!(doc.text.contains("analytical engine"));
    }

    #[test]
    fn test_split_mbox_finds_offsets() {
        let mbox = b"From a@b Thu Jan  1 00:00:00 1970\nSubject: one\n\nbody one\n\
From c@d Thu Jan  1 00:00:00 1970\nSubject: two\n\nbody two\n";
        let messages = split_mbox(mbox);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, 0);
        assert!(messages[1].0 > 0);
        assert!(messages[0].1.starts_with(b"Subject: one"));
    }

    #[test]
    fn test_load_mbox_yields_one_doc_per_message() {
        let mut file = tempfile::Builder::new().suffix(".mbox").tempfile().unwrap();
        let mbox = format!(
            "From ada@example.org Tue Jul  2 10:00:00 2024\n{}\nFrom ada@example.org Tue Jul  2 11:00:00 2024\n{}",
            MESSAGE.replace("note-1", "note-a"),
            MESSAGE.replace("note-1", "note-b"),
        );
        file.write_all(mbox.as_bytes()).unwrap();

        let docs = load_mbox(file.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].external_id, "note-a@example.org");
        assert_eq!(docs[1].external_id, "note-b@example.org");
    }

    #[test]
    fn test_empty_mbox_is_load_error() {
        let mut file = tempfile::Builder::new().suffix(".mbox").tempfile().unwrap();
        file.write_all(b"not an mbox at all").unwrap();
        assert!(load_mbox(file.path()).is_err());
    }
}
