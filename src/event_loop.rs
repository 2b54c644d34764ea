use crate::acceptor::ConnectionAcceptor;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::http::{HttpParser, Response, Status};
use log::{debug, error, info};
use std::collections::HashMap;
use std::io::{self, ErrorKind, Write};
use std::sync::Arc;

#[cfg(target_os = "linux")]
use libc::{EPOLLERR, EPOLLET, EPOLLIN, EPOLLOUT, EPOLLRDHUP};
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Platform event poller. Linux uses epoll; other platforms are not
/// supported by this server.
#[cfg(target_os = "linux")]
pub struct EventPoller {
    epoll_fd: i32,
    events: Vec<libc::epoll_event>,
    max_events: usize,
}

#[cfg(not(target_os = "linux"))]
pub struct EventPoller {
    _max_events: usize,
}

#[cfg(target_os = "linux")]
impl EventPoller {
    pub fn new(max_events: usize) -> ServerResult<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        Ok(Self {
            epoll_fd,
            events: Vec::with_capacity(max_events),
            max_events,
        })
    }

    pub fn register(&mut self, connection: &Connection) -> ServerResult<()> {
        let fd = connection.stream().as_raw_fd();
        let mut event = libc::epoll_event {
            events: (EPOLLIN | EPOLLOUT | EPOLLET | EPOLLRDHUP) as u32,
            u64: connection.id() as u64,
        };

        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event as *mut _)
        };
        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        Ok(())
    }

    pub fn deregister(&mut self, connection: &Connection) -> ServerResult<()> {
        let fd = connection.stream().as_raw_fd();
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }

        Ok(())
    }

    /// Poll for events; returns (connection id, readable, writable, error)
    /// tuples.
    pub fn poll(&mut self, timeout_ms: i32) -> ServerResult<Vec<(usize, bool, bool, bool)>> {
        self.events.clear();
        self.events
            .resize(self.max_events, libc::epoll_event { events: 0, u64: 0 });

        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.max_events as i32,
                timeout_ms,
            )
        };

        if num_events < 0 {
            let err = io::Error::last_os_error();
            // EINTR is just a signal interruption
            if err.kind() != ErrorKind::Interrupted {
                return Err(ServerError::Io(err));
            }
            return Ok(Vec::new());
        }

        let result = self.events[..num_events as usize]
            .iter()
            .map(|event| {
                let readable = event.events & EPOLLIN as u32 != 0;
                let writable = event.events & EPOLLOUT as u32 != 0;
                let errored = event.events & (EPOLLERR | EPOLLRDHUP) as u32 != 0;
                (event.u64 as usize, readable, writable, errored)
            })
            .collect();

        Ok(result)
    }
}

#[cfg(target_os = "linux")]
impl Drop for EventPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl EventPoller {
    pub fn new(_max_events: usize) -> ServerResult<Self> {
        Err(ServerError::EventLoop("unsupported platform".to_string()))
    }

    pub fn register(&mut self, _connection: &Connection) -> ServerResult<()> {
        Err(ServerError::EventLoop("unsupported platform".to_string()))
    }

    pub fn deregister(&mut self, _connection: &Connection) -> ServerResult<()> {
        Err(ServerError::EventLoop("unsupported platform".to_string()))
    }

    pub fn poll(&mut self, _timeout_ms: i32) -> ServerResult<Vec<(usize, bool, bool, bool)>> {
        Err(ServerError::EventLoop("unsupported platform".to_string()))
    }
}

/// One event loop per worker thread. Each connection's request is handled
/// independently through the shared dispatcher; a response produced for a
/// client that has disconnected is simply discarded when the write fails.
pub struct EventLoop {
    thread_id: u32,
    poller: EventPoller,
    connections: HashMap<usize, Connection>,
    parsers: HashMap<usize, HttpParser>,
    acceptor: Arc<ConnectionAcceptor>,
    dispatcher: Arc<Dispatcher>,
    max_request_body_size: usize,
    running: bool,
}

impl EventLoop {
    pub fn new(
        thread_id: u32,
        acceptor: Arc<ConnectionAcceptor>,
        dispatcher: Arc<Dispatcher>,
        max_request_body_size: usize,
    ) -> ServerResult<Self> {
        let poller = EventPoller::new(1024)?;

        Ok(Self {
            thread_id,
            poller,
            connections: HashMap::new(),
            parsers: HashMap::new(),
            acceptor,
            dispatcher,
            max_request_body_size,
            running: false,
        })
    }

    pub fn run(&mut self) -> ServerResult<()> {
        info!("worker {} started", self.thread_id);
        self.running = true;

        while self.running {
            self.accept_connections()?;

            let events = self.poller.poll(100)?;
            for (conn_id, readable, writable, errored) in events {
                if errored {
                    self.close_connection(conn_id)?;
                    continue;
                }
                if readable {
                    self.handle_read(conn_id)?;
                }
                if writable {
                    self.handle_write(conn_id)?;
                }
            }

            self.check_timeouts()?;
        }

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    fn accept_connections(&mut self) -> ServerResult<()> {
        for _ in 0..10 {
            match self.acceptor.accept() {
                Ok(Some(conn)) => {
                    let conn_id = conn.id();
                    self.poller.register(&conn)?;
                    self.connections.insert(conn_id, conn);
                    self.parsers.insert(conn_id, HttpParser::new());
                }
                // Rejected by the per-address cap; nothing to track.
                Ok(None) => {}
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(ServerError::Io(e)),
            }
        }

        Ok(())
    }

    fn handle_read(&mut self, conn_id: usize) -> ServerResult<()> {
        // Edge-triggered registration: the kernel only signals again on new
        // data, so the socket must be drained until WouldBlock here or a
        // large request body stalls forever.
        loop {
            let connection = match self.connections.get_mut(&conn_id) {
                Some(conn) => conn,
                None => return Ok(()),
            };

            match connection.read() {
                Ok(0) => return self.close_connection(conn_id),
                Ok(_) => self.process_data(conn_id)?,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    debug!("read error on connection {}: {}", conn_id, e);
                    return self.close_connection(conn_id);
                }
            }
        }
    }

    fn process_data(&mut self, conn_id: usize) -> ServerResult<()> {
        if !self.connections.contains_key(&conn_id) {
            return Ok(());
        }

        // Drain the connection buffer; each chunk is fed to the incremental
        // parser exactly once.
        let buffer_data = {
            let connection = self.connections.get_mut(&conn_id).unwrap();
            let data = connection.buffer().slice().to_vec();
            connection.buffer_mut().reset();
            data
        };

        let parser = self.parsers.get_mut(&conn_id).unwrap();
        if let Err(e) = parser.parse(&buffer_data) {
            debug!("parse error on connection {}: {}", conn_id, e);
            let response = Response::with_text(Status::BadRequest, "Bad Request");
            self.send_response(conn_id, &response)?;
            return Ok(());
        }

        // Refuse oversized bodies before buffering the rest of them.
        if parser.content_length > self.max_request_body_size {
            let response = Response::with_text(Status::PayloadTooLarge, "Payload Too Large");
            self.send_response(conn_id, &response)?;
            return Ok(());
        }

        if !parser.is_complete() {
            return Ok(());
        }

        let request = parser.get_request()?;
        parser.reset();

        let response = self.dispatcher.dispatch(&request);
        self.send_response(conn_id, &response)?;

        Ok(())
    }

    fn send_response(&mut self, conn_id: usize, response: &Response) -> ServerResult<()> {
        let mut encoded = Vec::new();
        response.serialize(&mut encoded)?;

        let connection = match self.connections.get_mut(&conn_id) {
            Some(conn) => conn,
            None => return Ok(()),
        };
        connection.set_state(ConnectionState::Processing);
        connection.buffer_mut().reset();
        connection.buffer_mut().write(&encoded)?;
        connection.set_state(ConnectionState::Writing);

        self.handle_write(conn_id)
    }

    fn handle_write(&mut self, conn_id: usize) -> ServerResult<()> {
        let connection = match self.connections.get_mut(&conn_id) {
            Some(conn) => conn,
            None => return Ok(()),
        };

        let should_write = connection.state() == ConnectionState::Writing
            && connection.buffer().available_data() > 0;
        if !should_write {
            return Ok(());
        }

        let data_to_write = connection.buffer().slice().to_vec();
        match connection.stream_mut().write(&data_to_write) {
            Ok(0) => {
                connection.set_state(ConnectionState::Closed);
                self.close_connection(conn_id)
            }
            Ok(bytes_written) => {
                if let Err(e) = connection.buffer_mut().advance_read(bytes_written) {
                    error!("buffer error on connection {}: {}", conn_id, e);
                    return self.close_connection(conn_id);
                }
                if connection.buffer().available_data() == 0 {
                    // Response fully flushed; this server closes after each
                    // response.
                    self.close_connection(conn_id)?;
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                // Client went away; the response is discarded.
                debug!("write error on connection {}: {}", conn_id, e);
                connection.set_state(ConnectionState::Closed);
                self.close_connection(conn_id)
            }
        }
    }

    fn close_connection(&mut self, conn_id: usize) -> ServerResult<()> {
        if let Some(mut conn) = self.connections.remove(&conn_id) {
            self.poller.deregister(&conn)?;
            self.acceptor.release(conn.peer_addr().ip());
            let _ = conn.close();
        }
        self.parsers.remove(&conn_id);

        Ok(())
    }

    fn check_timeouts(&mut self) -> ServerResult<()> {
        let timed_out: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_timed_out())
            .map(|(id, _)| *id)
            .collect();

        for conn_id in timed_out {
            debug!("connection {} timed out", conn_id);
            self.close_connection(conn_id)?;
        }

        Ok(())
    }
}
