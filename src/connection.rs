use crate::buffer::Buffer;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Represents the current state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Reading,
    Processing,
    Writing,
    Closing,
    Closed,
}

/// A TCP connection with a client
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: usize,
    state: ConnectionState,
    buffer: Buffer,
    last_activity: Instant,
    timeout: Duration,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        id: usize,
        buffer_size: usize,
        timeout: Duration,
    ) -> io::Result<Self> {
        // Disable Nagle's algorithm for latency
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            peer_addr,
            id,
            state: ConnectionState::New,
            buffer: Buffer::new(buffer_size),
            last_activity: Instant::now(),
            timeout,
        })
    }

    /// Read data from the connection into the buffer
    pub fn read(&mut self) -> io::Result<usize> {
        self.state = ConnectionState::Reading;
        let bytes_read = self.buffer.read_from(&mut self.stream)?;
        self.last_activity = Instant::now();

        if bytes_read == 0 {
            self.state = ConnectionState::Closing;
        }

        Ok(bytes_read)
    }

    /// Write data to the connection
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.state = ConnectionState::Writing;
        let result = self.stream.write(data);
        self.last_activity = Instant::now();
        result
    }

    /// Close the connection
    pub fn close(&mut self) -> io::Result<()> {
        self.state = ConnectionState::Closed;
        self.stream.shutdown(std::net::Shutdown::Both)
    }

    /// Check if the connection has timed out
    pub fn is_timed_out(&self) -> bool {
        self.last_activity.elapsed() > self.timeout
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}
