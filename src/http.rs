use crate::error::{ServerError, ServerResult};
use std::collections::HashMap;
use std::io::Write;
use std::str;

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 200,
    PartialContent = 206,

    NotModified = 304,

    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    PayloadTooLarge = 413,
    RangeNotSatisfiable = 416,

    InternalServerError = 500,
}

impl Status {
    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::PartialContent => "Partial Content",

            Status::NotModified => "Not Modified",

            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::RangeNotSatisfiable => "Range Not Satisfiable",

            Status::InternalServerError => "Internal Server Error",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
}

impl Method {
    /// Parse a method from a string
    pub fn from_str(s: &str) -> ServerResult<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(ServerError::HttpParse(format!("Invalid method: {}", s))),
        }
    }

    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

/// HTTP Parser State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpParserState {
    RequestLine,
    Headers,
    Body,
    Complete,
}

/// Incremental HTTP/1.1 request parser.
///
/// Feed chunks with `parse`; a request is ready once `is_complete` reports
/// true. Header names are lowercased on insertion.
pub struct HttpParser {
    pub state: HttpParserState,
    pub method: Option<Method>,
    pub uri: Option<String>,
    pub version: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_length: usize,
    /// Bytes accumulated while waiting for the end of the header block.
    pending: Vec<u8>,
}

impl HttpParser {
    pub fn new() -> Self {
        Self {
            state: HttpParserState::RequestLine,
            method: None,
            uri: None,
            version: None,
            headers: HashMap::new(),
            body: Vec::new(),
            content_length: 0,
            pending: Vec::new(),
        }
    }

    /// Parse a chunk of data. Each chunk must be fed exactly once; the
    /// parser buffers partial input itself.
    pub fn parse(&mut self, data: &[u8]) -> ServerResult<()> {
        if self.state == HttpParserState::Complete {
            self.reset();
        }

        if self.state == HttpParserState::Body {
            // Headers were consumed in an earlier chunk; everything is body.
            self.body.extend_from_slice(data);
            if self.body.len() >= self.content_length {
                self.body.truncate(self.content_length);
                self.state = HttpParserState::Complete;
            }
            return Ok(());
        }

        self.pending.extend_from_slice(data);

        // Find the end of headers marker in the raw bytes so that binary
        // bodies (multipart uploads) never go through a UTF-8 check.
        let headers_end = match find_subsequence(&self.pending, b"\r\n\r\n") {
            Some(pos) => pos,
            None => return Ok(()), // wait for more data
        };

        let data = std::mem::take(&mut self.pending);
        let head = str::from_utf8(&data[..headers_end])
            .map_err(|_| ServerError::HttpParse("Invalid UTF-8 in header block".to_string()))?;

        let lines: Vec<&str> = head.split("\r\n").collect();
        if lines.is_empty() {
            return Err(ServerError::HttpParse("Empty header block".to_string()));
        }

        if self.state == HttpParserState::RequestLine {
            self.parse_request_line(lines[0])?;
            self.state = HttpParserState::Headers;
        }

        for line in &lines[1..] {
            if !line.is_empty() {
                self.parse_header(line)?;
            }
        }

        if let Some(content_length) = self.headers.get("content-length") {
            self.content_length = content_length.parse().unwrap_or(0);
        }

        let body_start = headers_end + 4;
        if self.content_length > 0 {
            if body_start < data.len() {
                self.body.extend_from_slice(&data[body_start..]);
            }
            if self.body.len() >= self.content_length {
                self.body.truncate(self.content_length);
                self.state = HttpParserState::Complete;
            } else {
                self.state = HttpParserState::Body;
            }
        } else {
            self.state = HttpParserState::Complete;
        }

        Ok(())
    }

    fn parse_request_line(&mut self, line: &str) -> ServerResult<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ServerError::HttpParse("Invalid request line".to_string()));
        }

        self.method = Some(Method::from_str(parts[0])?);
        self.uri = Some(parts[1].to_string());
        self.version = Some(parts[2].to_string());

        Ok(())
    }

    fn parse_header(&mut self, line: &str) -> ServerResult<()> {
        if let Some(colon_idx) = line.find(':') {
            let key = line[..colon_idx].trim().to_lowercase();
            let value = line[colon_idx + 1..].trim().to_string();
            self.headers.insert(key, value);
            Ok(())
        } else {
            Err(ServerError::HttpParse("Invalid header".to_string()))
        }
    }

    /// Check if the parser has completed parsing a request
    pub fn is_complete(&self) -> bool {
        self.state == HttpParserState::Complete
    }

    /// Reset the parser for a new request
    pub fn reset(&mut self) {
        self.state = HttpParserState::RequestLine;
        self.method = None;
        self.uri = None;
        self.version = None;
        self.headers.clear();
        self.body.clear();
        self.content_length = 0;
        self.pending.clear();
    }

    /// Get the parsed request
    pub fn get_request(&self) -> ServerResult<Request> {
        if !self.is_complete() {
            return Err(ServerError::HttpParse("Request not complete".to_string()));
        }

        let method = self
            .method
            .ok_or_else(|| ServerError::HttpParse("Method not set".to_string()))?;

        let uri = self
            .uri
            .as_ref()
            .ok_or_else(|| ServerError::HttpParse("URI not set".to_string()))?
            .clone();

        Ok(Request {
            query_params: parse_query(&uri),
            method,
            uri,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_query(uri: &str) -> HashMap<String, String> {
    let mut query_params = HashMap::new();
    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for pair in query.split('&') {
            if let Some(eq_pos) = pair.find('=') {
                let (key, value) = pair.split_at(eq_pos);
                query_params.insert(key.to_string(), value[1..].to_string());
            } else {
                query_params.insert(pair.to_string(), "".to_string());
            }
        }
    }
    query_params
}

/// HTTP Request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Query parameters parsed from the URI
    pub query_params: HashMap<String, String>,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            query_params: parse_query(uri),
            method,
            uri: uri.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Set a header (names are stored lowercased)
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    /// Get a header by case-insensitive name
    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    /// Set the body
    pub fn set_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
        self.set_header("Content-Length", &self.body.len().to_string());
    }

    /// The request path with any query string removed
    pub fn path(&self) -> &str {
        match self.uri.find('?') {
            Some(pos) => &self.uri[..pos],
            None => &self.uri,
        }
    }
}

/// HTTP Response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response
    pub fn new(status: Status) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Server".to_string(), "static-fileserver/0.1".to_string());
        headers.insert("Connection".to_string(), "close".to_string());

        Self {
            status,
            headers,
            body: Vec::new(),
        }
    }

    /// Create a response with a short plain-text body
    pub fn with_text(status: Status, text: &str) -> Self {
        let mut response = Self::new(status);
        response.set_header("Content-Type", "text/plain; charset=utf-8");
        response.set_body(text.as_bytes());
        response
    }

    /// Set a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Set the body and update content-length
    pub fn set_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
        self.set_header("Content-Length", &body.len().to_string());
    }

    /// Serialize the response to a byte vector
    pub fn serialize(&self, writer: &mut Vec<u8>) -> ServerResult<()> {
        write!(
            writer,
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.as_str()
        )
        .map_err(ServerError::Io)?;

        for (name, value) in &self.headers {
            write!(writer, "{}: {}\r\n", name, value).map_err(ServerError::Io)?;
        }

        write!(writer, "\r\n").map_err(ServerError::Io)?;
        writer.extend_from_slice(&self.body);

        Ok(())
    }
}
