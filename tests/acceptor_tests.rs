use static_fileserver::ConnectionAcceptor;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

fn accept_one(
    acceptor: &ConnectionAcceptor,
) -> Option<static_fileserver::Connection> {
    // The listener is non-blocking; poll briefly until the pending
    // connection shows up.
    for _ in 0..100 {
        match acceptor.accept() {
            Ok(result) => return result,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("accept failed: {}", e),
        }
    }
    panic!("no connection arrived");
}

#[test]
fn test_accepts_within_cap_and_releases() {
    let acceptor =
        ConnectionAcceptor::new("127.0.0.1:0", 1, 4096, Duration::from_secs(5)).unwrap();
    let addr = acceptor.local_addr().unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    let conn = accept_one(&acceptor).expect("first connection should be accepted");
    let ip = conn.peer_addr().ip();
    assert_eq!(acceptor.connections_for(ip), 1);

    // A second concurrent connection from the same address is rejected.
    let _client2 = TcpStream::connect(addr).unwrap();
    let rejected = accept_one(&acceptor);
    assert!(rejected.is_none());
    assert_eq!(acceptor.connections_for(ip), 1);

    // Releasing the slot lets the address connect again.
    acceptor.release(ip);
    assert_eq!(acceptor.connections_for(ip), 0);

    let _client3 = TcpStream::connect(addr).unwrap();
    let conn3 = accept_one(&acceptor).expect("connection after release");
    assert_eq!(acceptor.connections_for(conn3.peer_addr().ip()), 1);
}

#[test]
fn test_unlimited_when_cap_is_zero() {
    let acceptor =
        ConnectionAcceptor::new("127.0.0.1:0", 0, 4096, Duration::from_secs(5)).unwrap();
    let addr = acceptor.local_addr().unwrap();

    let _a = TcpStream::connect(addr).unwrap();
    let _b = TcpStream::connect(addr).unwrap();

    assert!(accept_one(&acceptor).is_some());
    assert!(accept_one(&acceptor).is_some());
}
