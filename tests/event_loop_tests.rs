#![cfg(target_os = "linux")]

use static_fileserver::upload::multipart_body;
use static_fileserver::{ConnectionAcceptor, Dispatcher, EventLoop, ServerConfig};
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn temp_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "fileserver-loop-{}-{}",
        tag,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Spawn a single worker serving `root` on an ephemeral port.
fn spawn_server(root: &PathBuf) -> SocketAddr {
    let config = ServerConfig::new().with_root_dir(root.clone());
    let acceptor = Arc::new(
        ConnectionAcceptor::new("127.0.0.1:0", 0, 16 * 1024, Duration::from_secs(10)).unwrap(),
    );
    let addr = acceptor.local_addr().unwrap();
    let dispatcher = Arc::new(Dispatcher::new(&config));
    let max_body = config.max_request_body_size;

    thread::spawn(move || {
        let mut event_loop = EventLoop::new(0, acceptor, dispatcher, max_body).unwrap();
        event_loop.run().unwrap();
    });

    addr
}

fn exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(15)))
        .unwrap();
    stream.write_all(request).unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn test_serves_file_over_socket() {
    let root = temp_root("get");
    fs::write(root.join("hello.txt"), "hello over tcp").unwrap();
    let addr = spawn_server(&root);

    let response = exchange(addr, b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("hello over tcp"));

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_upload_larger_than_connection_buffer() {
    let root = temp_root("upload");
    let addr = spawn_server(&root);

    // 256 KiB body, far past the 16 KiB connection buffer: the whole
    // request spans many socket reads within one readiness event.
    let file_data = vec![b'u'; 256 * 1024];
    let body = multipart_body("bnd", "uploadFile", "bulk.bin", &file_data);

    let mut request = Vec::new();
    request.extend_from_slice(b"POST /upload HTTP/1.1\r\nHost: localhost\r\n");
    request.extend_from_slice(b"Content-Type: multipart/form-data; boundary=bnd\r\n");
    request.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    request.extend_from_slice(&body);

    let response = exchange(addr, &request);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("SUCCESS"));
    assert_eq!(fs::read(root.join("bulk.bin")).unwrap(), file_data);

    fs::remove_dir_all(&root).unwrap();
}
