use crate::error::SyncError;
use std::collections::HashMap;
use tracing::error;

/// Parse an RFC 8288 style `Link` header as Shopify emits it:
///
/// `<https://shop/admin/api/...page_info=abc>; rel="next", <...>; rel="previous"`
///
/// Entries are separated by `", "` and each must be exactly `<url>; rel="name"`.
/// Any malformed entry fails the whole header; no partial map is returned.
/// A relation repeated later in the header replaces the earlier URL.
pub fn parse_link_header(header: &str) -> Result<HashMap<String, String>, SyncError> {
    if header.trim().is_empty() {
        error!("link header is empty");
        return Err(SyncError::format("link header is empty"));
    }

    let mut links = HashMap::new();
    for entry in header.split(", ") {
        let (url, rel) = parse_entry(entry).inspect_err(|e| {
            error!(entry, error = %e, "malformed link header entry");
        })?;
        links.insert(rel.to_string(), url.to_string());
    }
    Ok(links)
}

fn parse_entry(entry: &str) -> Result<(&str, &str), SyncError> {
    if !entry.contains(';') {
        return Err(SyncError::format(format!(
            "link entry has no `;` separator: '{entry}'"
        )));
    }
    let mut parts = entry.split("; ");
    let (Some(url_part), Some(rel_part), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(SyncError::format(format!(
            "link entry is not `<url>; rel=\"...\"`: '{entry}'"
        )));
    };

    let url = url_part.trim_matches(|c| c == '<' || c == '>');
    let rel = rel_part
        .split('=')
        .nth(1)
        .map(|value| value.trim_matches('"'))
        .unwrap_or_default();
    if url.is_empty() || rel.is_empty() {
        return Err(SyncError::format(format!(
            "link entry has an empty url or relation: '{entry}'"
        )));
    }
    Ok((url, rel))
}
