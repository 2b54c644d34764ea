use crate::error::{ServerError, ServerResult};
use std::path::{Path, PathBuf};

/// Turns a raw request path into a canonical filesystem path under `root`.
///
/// Resolution is purely lexical: the query string is stripped, the path is
/// percent-decoded exactly once, `.`/`..` segments are normalized, and any
/// path that would escape `root` is rejected with `Forbidden`. No filesystem
/// access happens here.
pub fn resolve(root: &Path, request_path: &str, host: Option<&str>) -> ServerResult<PathBuf> {
    let path = match request_path.find('?') {
        Some(pos) => &request_path[..pos],
        None => request_path,
    };

    let decoded = urlencoding::decode(path)
        .map_err(|_| ServerError::NotFound(path.to_string()))?;

    if decoded.contains('\0') {
        return Err(ServerError::Forbidden(path.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();

    let host_segment;
    if let Some(host) = host {
        host_segment = vhost_segment(host)?;
        segments.push(&host_segment);
    }

    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // Popping past the served root is a traversal attempt.
                if segments.pop().is_none() {
                    return Err(ServerError::Forbidden(request_path.to_string()));
                }
                if host.is_some() && segments.is_empty() {
                    return Err(ServerError::Forbidden(request_path.to_string()));
                }
            }
            s => segments.push(s),
        }
    }

    let mut canonical = root.to_path_buf();
    for segment in segments {
        canonical.push(segment);
    }

    Ok(canonical)
}

/// Lowercased host header with the port stripped, usable as a path segment.
fn vhost_segment(host: &str) -> ServerResult<String> {
    let host = match host.rfind(':') {
        Some(pos) if host[pos + 1..].chars().all(|c| c.is_ascii_digit()) => &host[..pos],
        _ => host,
    };

    if host.is_empty() {
        return Ok("invalid-host".to_string());
    }
    if host.contains('/') || host.contains('\\') || host.contains("..") {
        return Err(ServerError::Forbidden(host.to_string()));
    }

    Ok(host.to_ascii_lowercase())
}
