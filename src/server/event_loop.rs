//! Single-threaded mio event loop.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. One thread multiplexes the
//! listener and every client connection, so no two requests are ever
//! processed concurrently and the scheduling disciplines stay
//! deterministic.
//!
//! Each wake-up first drains socket events (accepting connections, reading
//! bytes, parsing request lines into the scheduler, finishing partial
//! writes) and then runs one service step: FCFS serves until its queue is
//! empty, round-robin serves exactly one request so newly arrived requests
//! from other connections get interleaved. When the scheduler still holds
//! pending work the next poll uses a zero timeout instead of blocking.

use crate::config::ServerConfig;
use crate::protocol::{encode_response, parse_request, Request};
use crate::scheduler::{self, Scheduler};
use crate::server::connection::Connection;
use crate::words::WordStore;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const READ_CHUNK: usize = 4096;

/// The word-chunk server: listener, connection table, scheduler, word list.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Slab<Connection>,
    scheduler: Box<dyn Scheduler>,
    store: WordStore,
    max_connections: usize,
}

impl Server {
    /// Bind the listener and set up the event loop.
    ///
    /// The word list must already be loaded; a missing word list is fatal
    /// before any socket is created.
    pub fn bind(config: &ServerConfig, store: WordStore) -> io::Result<Self> {
        let addr = config
            .listen
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "listen address resolved to nothing"))?;

        let listener = create_listener(addr)?;
        let local_addr = listener.local_addr()?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        info!(
            addr = %local_addr,
            mode = ?config.mode,
            words = store.len(),
            "Server listening"
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            connections: Slab::with_capacity(config.max_connections),
            scheduler: scheduler::for_mode(config.mode),
            store,
            max_connections: config.max_connections,
        })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the event loop until the process is killed.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            // Zero timeout while requests are pending so round-robin turns
            // proceed without waiting for new socket events.
            let timeout = if self.scheduler.has_pending() {
                Some(Duration::ZERO)
            } else {
                None
            };

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    Token(conn_id) => {
                        if let Err(e) = self.connection_ready(conn_id, event) {
                            debug!(conn_id, error = %e, "Connection error");
                            self.close_connection(conn_id);
                        }
                    }
                }
            }

            self.service_pending();
        }
    }

    /// Accept every pending connection on the listener.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= self.max_connections {
                        warn!(%peer, "Connection limit reached, dropping connection");
                        continue;
                    }

                    let entry = self.connections.vacant_entry();
                    let conn_id = entry.key();
                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, Token(conn_id), Interest::READABLE)
                    {
                        debug!(%peer, error = %e, "Failed to register connection");
                        continue;
                    }
                    entry.insert(Connection::new(stream, peer));
                    self.scheduler.on_connect(conn_id);
                    debug!(conn_id, %peer, "Accepted connection");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn connection_ready(&mut self, conn_id: usize, event: &mio::event::Event) -> io::Result<()> {
        if !self.connections.contains(conn_id) {
            // Stale event for an already-closed connection
            return Ok(());
        }

        if event.is_readable() {
            self.handle_readable(conn_id)?;
        }

        // The readable path may have closed the connection
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if event.is_writable() {
            self.flush_connection(conn_id)?;
        }

        Ok(())
    }

    /// Drain the socket and hand completed request lines to the scheduler.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<()> {
        let mut scratch = [0u8; READ_CHUNK];

        loop {
            let conn = &mut self.connections[conn_id];
            match conn.stream.read(&mut scratch) {
                Ok(0) => {
                    // Orderly peer shutdown
                    return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer closed"));
                }
                Ok(n) => conn.recv.feed(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.process_lines(conn_id);
        Ok(())
    }

    fn process_lines(&mut self, conn_id: usize) {
        let lines = self.connections[conn_id].recv.take_lines();

        for line in lines {
            if self.connections[conn_id].input_done {
                // Already told this peer there is no more data
                break;
            }
            match parse_request(&line) {
                Some(request) => {
                    trace!(conn_id, offset = request.offset, count = request.count, "Queued request");
                    self.scheduler.on_request(conn_id, request);
                }
                None => {
                    // Malformed line: answered with EOF, in order behind
                    // whatever this connection already has queued.
                    debug!(conn_id, line = %line, "Malformed request, scheduling end-of-data");
                    self.connections[conn_id].input_done = true;
                    self.scheduler.on_request(conn_id, Request::END);
                    break;
                }
            }
        }
    }

    /// Serve pending requests according to the active discipline.
    fn service_pending(&mut self) {
        while let Some((conn_id, request)) = self.scheduler.pick_next() {
            if !self.connections.contains(conn_id) {
                // The connection vanished between queueing and serving;
                // its request is dropped without consuming a turn.
                continue;
            }

            let (words, reached_end) = self.store.lookup(request.offset, request.count);
            let bytes = encode_response(words, reached_end);

            debug!(
                conn_id,
                offset = request.offset,
                count = request.count,
                reached_end,
                "Serving request"
            );

            if reached_end {
                // No further requests will be answered on this connection.
                self.scheduler.on_disconnect(conn_id);
            }

            if let Err(e) = self.send_response(conn_id, &bytes, reached_end) {
                debug!(conn_id, error = %e, "Write failed");
                self.close_connection(conn_id);
            }

            if !self.scheduler.drain_on_wake() {
                break;
            }
        }
    }

    /// Queue a response and flush opportunistically.
    fn send_response(&mut self, conn_id: usize, bytes: &[u8], end_of_data: bool) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
        conn.queue(bytes);
        if end_of_data {
            conn.close_after_flush = true;
            conn.input_done = true;
        }
        self.flush_connection(conn_id)
    }

    /// Push queued bytes out; manage write interest and close-after-flush.
    fn flush_connection(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        let drained = conn.flush()?;

        if !drained {
            if !conn.write_interest {
                conn.write_interest = true;
                self.poll.registry().reregister(
                    &mut conn.stream,
                    Token(conn_id),
                    Interest::READABLE | Interest::WRITABLE,
                )?;
            }
            return Ok(());
        }

        if conn.close_after_flush {
            debug!(conn_id, "Closing connection after end-of-data");
            self.close_connection(conn_id);
            return Ok(());
        }

        if conn.write_interest {
            conn.write_interest = false;
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(conn_id), Interest::READABLE)?;
        }

        Ok(())
    }

    /// Remove a connection and everything it owns. Idempotent.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.scheduler.on_disconnect(conn_id);
            debug!(conn_id, peer = %conn.peer, "Connection closed");
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
