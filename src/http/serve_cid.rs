//! Serving stored CID content.
//!
//! Responses are immutable and cacheable: the ETag is the CID itself and a
//! matching `If-None-Match` short-circuits to 304. The URL extension
//! selects the MIME type; a second dotted component turns the response
//! into an attachment named by everything after the CID. Markdown renders
//! as a full HTML document when the URL carries no extension (and the
//! content looks like Markdown) or when `.md` is requested explicitly.

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use pulldown_cmark::{html, Options, Parser};

use crate::store::CidStore;

use super::mime::mime_type_for_extension;

/// Render a Markdown document into a standalone HTML page.
pub fn render_markdown_document(markdown_text: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(markdown_text, options);
    let mut fragment = String::with_capacity(markdown_text.len() * 2);
    html::push_html(&mut fragment, parser);

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         </head>\n<body>\n<main class=\"markdown-body\">\n{fragment}</main>\n</body>\n</html>\n"
    )
}

/// Heuristic Markdown sniff for extensionless serving.
pub fn looks_like_markdown(content: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(content) else {
        return false;
    };
    let trimmed = text.trim_start();
    trimmed.starts_with("# ")
        || trimmed.starts_with("## ")
        || text.contains("\n# ")
        || text.contains("\n## ")
        || text.contains("```")
        || text.contains("](")
}

/// A QR-style share page for a CID.
fn render_qr_page(cid: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{cid}</title></head>\n\
         <body>\n<main>\n<h1>Scan to open</h1>\n\
         <p><code class=\"cid-value\">{cid}</code></p>\n\
         <p><a href=\"/{cid}\">/{cid}</a></p>\n</main>\n</body>\n</html>\n"
    )
}

fn split_extension(extension_rest: &str) -> (Option<String>, String) {
    // `report.pdf` → attachment "report.pdf" served as pdf; a single
    // component is just the extension.
    match extension_rest.rsplit_once('.') {
        Some((_, last)) => (Some(extension_rest.to_string()), last.to_ascii_lowercase()),
        None => (None, extension_rest.to_ascii_lowercase()),
    }
}

fn etag_matches(headers: &HeaderMap, cid: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(|candidate| candidate.trim().trim_matches('"'))
                .any(|candidate| candidate == cid)
        })
        .unwrap_or(false)
}

/// Serve the bytes stored under `cid`, honoring the URL extension.
pub fn serve_cid_content(
    store: &CidStore,
    cid: &str,
    extension_rest: Option<&str>,
    request_headers: &HeaderMap,
) -> Response {
    let Some(content) = store.get(cid) else {
        return (StatusCode::NOT_FOUND, "CID not found").into_response();
    };

    if etag_matches(request_headers, cid) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, format!("\"{cid}\""))
            .body(axum::body::Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let mut disposition: Option<String> = None;
    let (body, content_type): (Vec<u8>, String) = match extension_rest {
        None => {
            if looks_like_markdown(&content) {
                let rendered =
                    render_markdown_document(&String::from_utf8_lossy(&content));
                (rendered.into_bytes(), "text/html; charset=utf-8".to_string())
            } else {
                (content, "text/plain; charset=utf-8".to_string())
            }
        }
        Some(rest) => {
            let (filename, extension) = split_extension(rest);
            disposition = Some(match filename {
                Some(name) => format!("attachment; filename=\"{name}\""),
                None => "inline".to_string(),
            });
            match extension.as_str() {
                "md" => {
                    let rendered =
                        render_markdown_document(&String::from_utf8_lossy(&content));
                    (rendered.into_bytes(), "text/html; charset=utf-8".to_string())
                }
                "qr" => (
                    render_qr_page(cid).into_bytes(),
                    "text/html; charset=utf-8".to_string(),
                ),
                other => (content, mime_type_for_extension(other)),
            }
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ETAG, format!("\"{cid}\""))
        .header(
            header::CACHE_CONTROL,
            "public, max-age=31536000, immutable",
        );
    if let Some(record) = store.get_by_path(&format!("/{cid}")) {
        builder = builder.header(
            header::LAST_MODIFIED,
            record.created_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }
    if let Some(disposition) = disposition {
        builder = builder.header(header::CONTENT_DISPOSITION, disposition);
    }

    builder
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
