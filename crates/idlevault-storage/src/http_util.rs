use std::io::Read;

use idlevault_types::error::{IdlevaultError, Result};

/// Map a `ureq` failure onto the storage error taxonomy.
///
/// Transport errors, 429 and 5xx are transient; every other status (401, 403,
/// 404, 400, ...) is permanent.
pub fn classify_http_error(context: &str, err: ureq::Error) -> IdlevaultError {
    match err {
        ureq::Error::Transport(t) => IdlevaultError::Transient(format!("{context}: {t}")),
        ureq::Error::Status(code, resp) => {
            let detail = error_body(resp);
            let msg = if detail.is_empty() {
                format!("{context}: HTTP {code}")
            } else {
                format!("{context}: HTTP {code}: {detail}")
            };
            if is_retryable_status(code) {
                IdlevaultError::Transient(msg)
            } else {
                IdlevaultError::Storage(msg)
            }
        }
    }
}

pub fn is_retryable_status(code: u16) -> bool {
    code == 429 || code >= 500
}

/// Extract the `ETag` header of an upload response.
pub fn extract_etag(resp: &ureq::Response, context: &str) -> Result<String> {
    resp.header("ETag")
        .map(|v| v.to_string())
        .ok_or_else(|| IdlevaultError::Storage(format!("{context}: response missing ETag header")))
}

/// Read a response body, treating a broken connection as transient.
pub fn read_body(resp: ureq::Response, context: &str) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|e| IdlevaultError::Transient(format!("{context}: reading body: {e}")))?;
    Ok(body)
}

/// First line of an S3 error document, for log context. Bounded in size.
fn error_body(resp: ureq::Response) -> String {
    let mut buf = Vec::new();
    let _ = resp.into_reader().take(4096).read_to_end(&mut buf);
    let text = String::from_utf8_lossy(&buf);
    extract_xml_tag(&text, "Code")
        .or_else(|| extract_xml_tag(&text, "Message"))
        .unwrap_or_default()
}

fn extract_xml_tag(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}
