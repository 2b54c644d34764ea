use static_fileserver::http::{HttpParser, Method, Request, Response, Status};

#[test]
fn test_http_parser_simple_get() {
    let mut parser = HttpParser::new();
    let request_data = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";

    parser.parse(request_data).unwrap();
    assert!(parser.is_complete());

    let request = parser.get_request().unwrap();
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.uri, "/index.html");
    assert_eq!(request.headers.get("host").unwrap(), "example.com");
    assert_eq!(request.body.len(), 0);
}

#[test]
fn test_http_parser_post_with_body() {
    let mut parser = HttpParser::new();
    let request_data = b"POST /upload HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/octet-stream\r\nContent-Length: 11\r\n\r\nhello world";

    parser.parse(request_data).unwrap();
    assert!(parser.is_complete());

    let request = parser.get_request().unwrap();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.uri, "/upload");
    assert_eq!(request.body, b"hello world");
}

#[test]
fn test_http_parser_split_across_chunks() {
    let mut parser = HttpParser::new();

    // Headers split mid-line, then the body arrives in two pieces.
    parser.parse(b"POST /upload HTTP/1.1\r\nContent-Le").unwrap();
    assert!(!parser.is_complete());
    parser.parse(b"ngth: 10\r\n\r\n12345").unwrap();
    assert!(!parser.is_complete());
    parser.parse(b"67890").unwrap();
    assert!(parser.is_complete());

    let request = parser.get_request().unwrap();
    assert_eq!(request.body, b"1234567890");
}

#[test]
fn test_http_parser_binary_body() {
    let mut parser = HttpParser::new();
    let mut data = b"POST /upload HTTP/1.1\r\nContent-Length: 4\r\n\r\n".to_vec();
    data.extend_from_slice(&[0xff, 0xfe, 0x00, 0x01]);

    parser.parse(&data).unwrap();
    assert!(parser.is_complete());
    assert_eq!(parser.get_request().unwrap().body, vec![0xff, 0xfe, 0x00, 0x01]);
}

#[test]
fn test_http_parser_reset() {
    let mut parser = HttpParser::new();

    parser.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
    assert!(parser.is_complete());

    parser.reset();
    assert!(!parser.is_complete());

    parser.parse(b"GET /two HTTP/1.1\r\n\r\n").unwrap();
    assert!(parser.is_complete());
    assert_eq!(parser.get_request().unwrap().uri, "/two");
}

#[test]
fn test_request_query_params() {
    let request = Request::new(Method::Get, "/stats?r=fs&verbose");
    assert_eq!(request.path(), "/stats");
    assert_eq!(request.query_params.get("r").unwrap(), "fs");
    assert_eq!(request.query_params.get("verbose").unwrap(), "");
}

#[test]
fn test_response_serialization() {
    let mut response = Response::new(Status::Ok);
    response.set_header("Content-Type", "text/plain");
    response.set_body(b"hello");

    let mut encoded = Vec::new();
    response.serialize(&mut encoded).unwrap();
    let text = String::from_utf8(encoded).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.ends_with("\r\n\r\nhello"));
}

#[test]
fn test_status_codes() {
    assert_eq!(Status::PartialContent.code(), 206);
    assert_eq!(Status::NotModified.code(), 304);
    assert_eq!(Status::RangeNotSatisfiable.code(), 416);
    assert_eq!(Status::RangeNotSatisfiable.as_str(), "Range Not Satisfiable");
}
