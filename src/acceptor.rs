use crate::connection::Connection;
use log::{info, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Accepts inbound TCP connections and enforces the per-client-address
/// connection cap before a connection ever reaches the request pipeline.
pub struct ConnectionAcceptor {
    listener: TcpListener,
    address: String,
    connection_count: AtomicUsize,
    max_conns_per_ip: usize,
    per_ip: Mutex<HashMap<IpAddr, usize>>,
    buffer_size: usize,
    timeout: Duration,
}

impl ConnectionAcceptor {
    pub fn new<A: ToSocketAddrs>(
        addr: A,
        max_conns_per_ip: usize,
        buffer_size: usize,
        timeout: Duration,
    ) -> io::Result<Self> {
        let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No socket addresses found")
        })?;
        let addr_str = socket_addr.to_string();

        let socket = Self::create_socket(&socket_addr)?;
        let listener = socket.into();
        info!("listening on {}", addr_str);

        Ok(Self {
            listener,
            address: addr_str,
            connection_count: AtomicUsize::new(0),
            max_conns_per_ip,
            per_ip: Mutex::new(HashMap::new()),
            buffer_size,
            timeout,
        })
    }

    /// Accept a new connection. Returns `Ok(None)` when the source address
    /// is already at its connection cap; the stream is closed immediately.
    pub fn accept(&self) -> io::Result<Option<Connection>> {
        let (stream, addr) = self.listener.accept()?;

        if self.max_conns_per_ip > 0 {
            let mut per_ip = self.per_ip.lock();
            let count = per_ip.entry(addr.ip()).or_insert(0);
            if *count >= self.max_conns_per_ip {
                warn!("connection cap reached for {}, rejecting", addr.ip());
                drop(per_ip);
                drop(stream);
                return Ok(None);
            }
            *count += 1;
        }

        let id = self.connection_count.fetch_add(1, Ordering::Relaxed);
        stream.set_nonblocking(true)?;

        match Connection::new(stream, addr, id, self.buffer_size, self.timeout) {
            Ok(conn) => Ok(Some(conn)),
            Err(e) => {
                self.release(addr.ip());
                Err(e)
            }
        }
    }

    /// Release a client address's connection slot. Called by the event loop
    /// when it closes a connection.
    pub fn release(&self, ip: IpAddr) {
        if self.max_conns_per_ip == 0 {
            return;
        }
        let mut per_ip = self.per_ip.lock();
        if let Some(count) = per_ip.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                per_ip.remove(&ip);
            }
        }
    }

    /// Current number of tracked connections for an address (test hook).
    pub fn connections_for(&self, ip: IpAddr) -> usize {
        self.per_ip.lock().get(&ip).copied().unwrap_or(0)
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn create_socket(addr: &SocketAddr) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let sock_addr = socket2::SockAddr::from(*addr);
        socket.bind(&sock_addr)?;
        socket.listen(1024)?;

        Ok(socket)
    }
}
