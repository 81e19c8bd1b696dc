//! The CID URL extension ↔ MIME table.

/// MIME type served for a CID URL extension. Unknown extensions fall back
/// to `mime_guess`, then to `application/octet-stream`.
pub fn mime_type_for_extension(extension: &str) -> String {
    let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    match normalized.as_str() {
        "txt" => "text/plain; charset=utf-8".to_string(),
        "html" | "htm" => "text/html; charset=utf-8".to_string(),
        "md" => "text/markdown; charset=utf-8".to_string(),
        "json" => "application/json".to_string(),
        "png" => "image/png".to_string(),
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "gif" => "image/gif".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "qr" => "text/html; charset=utf-8".to_string(),
        "csv" => "text/csv; charset=utf-8".to_string(),
        "xml" => "application/xml".to_string(),
        "pdf" => "application/pdf".to_string(),
        _ => mime_guess::from_ext(&normalized)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

/// CID URL extension derived from a content type, used when redirecting to
/// a server's result CID.
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/markdown" => Some("md"),
        "application/json" => Some("json"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/svg+xml" => Some("svg"),
        "text/csv" => Some("csv"),
        "application/xml" | "text/xml" => Some("xml"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}
