use crate::cache::{CacheEntry, FileCache};
use crate::error::{ServerError, ServerResult};
use crate::http::{Request, Response, Status};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Per-request state the file-serving pipeline cares about. Owned solely by
/// the handling of that request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub canonical_path: PathBuf,
    pub range: Option<String>,
    pub if_modified_since: Option<String>,
    pub if_none_match: Option<String>,
    pub accept_encoding: Option<String>,
    pub host: Option<String>,
}

impl RequestContext {
    pub fn new(request: &Request, canonical_path: PathBuf) -> Self {
        Self {
            canonical_path,
            range: request.get_header("range").cloned(),
            if_modified_since: request.get_header("if-modified-since").cloned(),
            if_none_match: request.get_header("if-none-match").cloned(),
            accept_encoding: request.get_header("accept-encoding").cloned(),
            host: request.get_header("host").cloned(),
        }
    }
}

/// Builds the HTTP response for a cache entry: decides 200/206/304/416,
/// picks the plain or gzip body, and sets the validation headers.
pub struct ResponseBuilder {
    compress: bool,
    accept_byte_range: bool,
    cache_ttl: Duration,
}

impl ResponseBuilder {
    pub fn new(compress: bool, accept_byte_range: bool, cache_ttl: Duration) -> Self {
        Self {
            compress,
            accept_byte_range,
            cache_ttl,
        }
    }

    pub fn build(&self, cache: &FileCache, entry: &CacheEntry, ctx: &RequestContext) -> Response {
        if self.not_modified(entry, ctx) {
            let mut response = Response::new(Status::NotModified);
            self.set_validators(&mut response, entry);
            return response;
        }

        // Byte ranges are computed against the plain body and never combined
        // with compression.
        if self.accept_byte_range {
            if let Some(range) = &ctx.range {
                // Validate against the bytes actually loaded; the stat-time
                // size can be larger if the file shrank mid-load.
                let size = entry.body.len() as u64;
                return match parse_range(range, size) {
                    Ok((start, end)) => {
                        let mut response = Response::new(Status::PartialContent);
                        self.set_validators(&mut response, entry);
                        response.set_header("Content-Type", entry.content_type);
                        response.set_header("Accept-Ranges", "bytes");
                        response.set_header(
                            "Content-Range",
                            &format!("bytes {}-{}/{}", start, end, size),
                        );
                        response.set_body(&entry.body[start as usize..=end as usize]);
                        response
                    }
                    Err(_) => {
                        let mut response =
                            Response::with_text(Status::RangeNotSatisfiable, "Range Not Satisfiable");
                        response.set_header("Content-Range", &format!("bytes */{}", size));
                        response
                    }
                };
            }
        }

        let mut response = Response::new(Status::Ok);
        self.set_validators(&mut response, entry);
        response.set_header("Content-Type", entry.content_type);
        if self.accept_byte_range {
            response.set_header("Accept-Ranges", "bytes");
        }

        if self.compress && accepts_gzip(ctx.accept_encoding.as_deref()) {
            if let Some(gzipped) = cache.gzip_body(entry) {
                response.set_header("Content-Encoding", "gzip");
                response.set_header("Vary", "Accept-Encoding");
                response.set_body(&gzipped);
                return response;
            }
        }

        response.set_body(&entry.body);
        response
    }

    fn not_modified(&self, entry: &CacheEntry, ctx: &RequestContext) -> bool {
        if let Some(inm) = &ctx.if_none_match {
            // A client that sends If-None-Match wants etag comparison; the
            // date check only applies when no etag was offered.
            return inm
                .split(',')
                .map(str::trim)
                .any(|tag| tag == entry.etag || tag == "*");
        }
        if let Some(ims) = &ctx.if_modified_since {
            if let Some(since) = parse_http_date(ims) {
                return unix_secs(entry.modified) <= unix_secs(since);
            }
        }
        false
    }

    fn set_validators(&self, response: &mut Response, entry: &CacheEntry) {
        response.set_header("ETag", &entry.etag);
        response.set_header("Last-Modified", &format_http_date(entry.modified));
        response.set_header(
            "Cache-Control",
            &format!("public, max-age={}", self.cache_ttl.as_secs()),
        );
    }
}

/// Parse a single-range `Range` header against the plain body size.
///
/// Exactly one range is honored; multi-range requests are rejected. Returns
/// the inclusive (start, end) byte offsets.
pub fn parse_range(header: &str, size: u64) -> ServerResult<(u64, u64)> {
    let invalid = || ServerError::InvalidRange(header.to_string());

    let spec = header.strip_prefix("bytes=").ok_or_else(invalid)?;
    if spec.contains(',') {
        return Err(invalid());
    }

    let dash = spec.find('-').ok_or_else(invalid)?;
    let (start_s, end_s) = (&spec[..dash], &spec[dash + 1..]);

    if start_s.is_empty() {
        // Suffix range: last N bytes.
        let suffix: u64 = end_s.parse().map_err(|_| invalid())?;
        if suffix == 0 || size == 0 {
            return Err(invalid());
        }
        let start = size.saturating_sub(suffix);
        return Ok((start, size - 1));
    }

    let start: u64 = start_s.parse().map_err(|_| invalid())?;
    if start >= size {
        return Err(invalid());
    }

    let end = if end_s.is_empty() {
        size - 1
    } else {
        let end: u64 = end_s.parse().map_err(|_| invalid())?;
        end.min(size - 1)
    };

    if start > end {
        return Err(invalid());
    }

    Ok((start, end))
}

/// Format a timestamp as an RFC 7231 IMF-fixdate (e.g. `Sun, 06 Nov 1994
/// 08:49:37 GMT`).
pub fn format_http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date header value.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).into())
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    accept_encoding
        .map(|v| v.split(',').any(|e| e.trim().starts_with("gzip")))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_basic() {
        assert_eq!(parse_range("bytes=0-99", 500).unwrap(), (0, 99));
        assert_eq!(parse_range("bytes=100-", 500).unwrap(), (100, 499));
        assert_eq!(parse_range("bytes=-100", 500).unwrap(), (400, 499));
        // End past EOF is clamped.
        assert_eq!(parse_range("bytes=400-9999", 500).unwrap(), (400, 499));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert!(parse_range("bytes=1000-2000", 500).is_err());
        assert!(parse_range("bytes=500-", 500).is_err());
        assert!(parse_range("bytes=-0", 500).is_err());
    }

    #[test]
    fn test_parse_range_malformed() {
        assert!(parse_range("bytes=abc-def", 500).is_err());
        assert!(parse_range("lines=0-10", 500).is_err());
        assert!(parse_range("bytes=0-10,20-30", 500).is_err());
        assert!(parse_range("bytes=10", 500).is_err());
    }

    #[test]
    fn test_range_validated_against_loaded_bytes() {
        use crate::cache::{entry_with_sizes, FileCache};
        use crate::http::{Method, Request};
        use std::path::Path;

        // Stat reported 500 bytes but only 100 were read back.
        let entry = entry_with_sizes(Path::new("/srv/www/shrunk.bin"), &[7u8; 100], 500);
        let cache = FileCache::new(Duration::from_secs(10), None);
        let builder = ResponseBuilder::new(false, true, Duration::from_secs(10));

        let mut request = Request::new(Method::Get, "/shrunk.bin");
        request.set_header("Range", "bytes=0-499");
        let ctx = RequestContext::new(&request, PathBuf::from("/srv/www/shrunk.bin"));
        let response = builder.build(&cache, &entry, &ctx);
        assert_eq!(response.status, Status::PartialContent);
        assert_eq!(response.body.len(), 100);
        assert_eq!(
            response.headers.get("Content-Range").unwrap(),
            "bytes 0-99/100"
        );

        request.set_header("Range", "bytes=200-");
        let ctx = RequestContext::new(&request, PathBuf::from("/srv/www/shrunk.bin"));
        let response = builder.build(&cache, &entry, &ctx);
        assert_eq!(response.status, Status::RangeNotSatisfiable);
        assert_eq!(
            response.headers.get("Content-Range").unwrap(),
            "bytes */100"
        );
    }

    #[test]
    fn test_http_date_round_trip() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(784_111_777);
        let formatted = format_http_date(t);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(t));
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip(Some("gzip, deflate, br")));
        assert!(accepts_gzip(Some("deflate, gzip;q=0.8")));
        assert!(!accepts_gzip(Some("deflate, br")));
        assert!(!accepts_gzip(None));
    }
}
