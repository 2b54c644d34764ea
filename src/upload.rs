use crate::error::{ServerError, ServerResult};
use crate::http::{Method, Request, Response, Status};
use log::{info, warn};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// The multipart field name carrying the uploaded file.
const UPLOAD_FIELD: &str = "uploadFile";

const UPLOAD_FORM: &str = "<!DOCTYPE html><html><head><title>Upload</title></head><body>\
<h1>Upload a file</h1>\
<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\
<input type=\"file\" name=\"uploadFile\">\
<input type=\"submit\" value=\"Upload\">\
</form></body></html>";

/// Validates and persists an uploaded file into the served root.
///
/// Writes are not transactional: a failure mid-write leaves a partial file
/// behind and the client sees a 500. Concurrent uploads to the same name
/// race; the last writer wins.
pub struct UploadHandler {
    root_dir: PathBuf,
    max_upload_size: u64,
}

impl UploadHandler {
    pub fn new(root_dir: PathBuf, max_upload_size: u64) -> Self {
        Self {
            root_dir,
            max_upload_size,
        }
    }

    pub fn handle(&self, request: &Request) -> Response {
        match request.method {
            Method::Get => {
                let mut response = Response::new(Status::Ok);
                response.set_header("Content-Type", "text/html; charset=utf-8");
                response.set_body(UPLOAD_FORM.as_bytes());
                response
            }
            Method::Post => match self.save_upload(request) {
                Ok(path) => {
                    info!("upload stored at {}", path.display());
                    Response::with_text(
                        Status::Ok,
                        "SUCCESS - go back to the home page to view the uploaded files",
                    )
                }
                Err(e) => {
                    warn!("upload failed: {}", e);
                    Response::with_text(e.status(), &e.to_string())
                }
            },
            _ => Response::with_text(Status::MethodNotAllowed, "Method Not Allowed"),
        }
    }

    fn save_upload(&self, request: &Request) -> ServerResult<PathBuf> {
        let content_type = request
            .get_header("content-type")
            .ok_or(ServerError::UploadFieldMissing)?;
        let boundary = boundary_from(content_type).ok_or(ServerError::UploadFieldMissing)?;

        let part = find_file_part(&request.body, &boundary, UPLOAD_FIELD)
            .ok_or(ServerError::UploadFieldMissing)?;

        let size = part.data.len() as u64;
        if size > self.max_upload_size {
            return Err(ServerError::UploadTooLarge {
                size,
                max: self.max_upload_size,
            });
        }

        // The destination name comes straight from the client-supplied
        // filename, as the original server did. This trusts the uploader:
        // a crafted filename can place the file outside the served root.
        let dest = self.root_dir.join(&part.filename);

        let mut file =
            File::create(&dest).map_err(|e| ServerError::UploadWriteFailed(e.to_string()))?;
        file.write_all(part.data)
            .map_err(|e| ServerError::UploadWriteFailed(e.to_string()))?;

        Ok(dest)
    }
}

struct FilePart<'a> {
    filename: String,
    data: &'a [u8],
}

/// Extract the boundary parameter from a multipart/form-data content type.
fn boundary_from(content_type: &str) -> Option<String> {
    if !content_type.starts_with("multipart/form-data") {
        return None;
    }
    content_type.split(';').find_map(|param| {
        let param = param.trim();
        param
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Find the named file field in a multipart body.
fn find_file_part<'a>(body: &'a [u8], boundary: &str, field: &str) -> Option<FilePart<'a>> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut pos = 0;
    while let Some(start) = find_at(body, delimiter, pos) {
        let part_start = start + delimiter.len();
        // "--" right after the delimiter marks the closing boundary.
        if body[part_start..].starts_with(b"--") {
            break;
        }
        let part_start = match find_at(body, b"\r\n", part_start) {
            Some(p) => p + 2,
            None => break,
        };

        let headers_end = match find_at(body, b"\r\n\r\n", part_start) {
            Some(p) => p,
            None => break,
        };
        let data_start = headers_end + 4;
        // Strip the CRLF that precedes the next delimiter; a malformed part
        // whose delimiter sits inside that gap yields an empty body.
        let data_end = match find_at(body, delimiter, data_start) {
            Some(p) => p.saturating_sub(2).max(data_start),
            None => body.len(),
        };

        let headers = String::from_utf8_lossy(&body[part_start..headers_end]);
        if let Some(filename) = disposition_filename(&headers, field) {
            return Some(FilePart {
                filename,
                data: &body[data_start..data_end],
            });
        }

        pos = data_end;
    }

    None
}

/// Pull the filename out of a part's Content-Disposition header, but only
/// for the wanted field name.
fn disposition_filename(part_headers: &str, field: &str) -> Option<String> {
    for line in part_headers.lines() {
        let lower = line.to_ascii_lowercase();
        if !lower.starts_with("content-disposition:") {
            continue;
        }
        let wanted_name = format!("name=\"{}\"", field);
        if !line.contains(&wanted_name) {
            return None;
        }
        return line.split(';').find_map(|param| {
            let param = param.trim();
            param
                .strip_prefix("filename=")
                .map(|f| f.trim_matches('"').to_string())
                .filter(|f| !f.is_empty())
        });
    }
    None
}

fn find_at(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|p| p + from)
}

/// Build a multipart/form-data body (test helper shared by the integration
/// tests).
pub fn multipart_body(boundary: &str, field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fileserver-upload-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn post_upload(body: Vec<u8>, boundary: &str) -> Request {
        let mut request = Request::new(Method::Post, "/upload");
        request.set_header(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );
        request.set_body(&body);
        request
    }

    #[test]
    fn test_boundary_extraction() {
        assert_eq!(
            boundary_from("multipart/form-data; boundary=xYz123"),
            Some("xYz123".to_string())
        );
        assert_eq!(
            boundary_from("multipart/form-data; boundary=\"quoted\""),
            Some("quoted".to_string())
        );
        assert_eq!(boundary_from("application/json"), None);
    }

    #[test]
    fn test_upload_success() {
        let root = temp_root("ok");
        let handler = UploadHandler::new(root.clone(), 1024);

        let body = multipart_body("bnd", UPLOAD_FIELD, "hello.txt", b"hello world");
        let response = handler.handle(&post_upload(body, "bnd"));

        assert_eq!(response.status, Status::Ok);
        assert_eq!(fs::read(root.join("hello.txt")).unwrap(), b"hello world");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_upload_too_large() {
        let root = temp_root("big");
        let handler = UploadHandler::new(root.clone(), 8);

        let body = multipart_body("bnd", UPLOAD_FIELD, "big.bin", &[0u8; 64]);
        let response = handler.handle(&post_upload(body, "bnd"));

        assert_eq!(response.status, Status::BadRequest);
        assert!(!root.join("big.bin").exists());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_upload_empty_part_without_crlf() {
        let root = temp_root("empty");
        let handler = UploadHandler::new(root.clone(), 1024);

        // The closing delimiter directly follows the blank line, with no
        // CRLF of its own; the part body is empty.
        let body = b"--bnd\r\nContent-Disposition: form-data; \
                     name=\"uploadFile\"; filename=\"x\"\r\n\r\n--bnd--"
            .to_vec();
        let response = handler.handle(&post_upload(body, "bnd"));

        assert_eq!(response.status, Status::Ok);
        assert_eq!(fs::read(root.join("x")).unwrap(), b"");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_upload_missing_field() {
        let root = temp_root("missing");
        let handler = UploadHandler::new(root.clone(), 1024);

        let body = multipart_body("bnd", "otherField", "x.txt", b"data");
        let response = handler.handle(&post_upload(body, "bnd"));

        assert_eq!(response.status, Status::BadRequest);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_upload_form_get() {
        let root = temp_root("form");
        let handler = UploadHandler::new(root.clone(), 1024);

        let response = handler.handle(&Request::new(Method::Get, "/upload"));
        assert_eq!(response.status, Status::Ok);
        assert!(String::from_utf8(response.body)
            .unwrap()
            .contains("enctype=\"multipart/form-data\""));

        fs::remove_dir_all(&root).unwrap();
    }
}
