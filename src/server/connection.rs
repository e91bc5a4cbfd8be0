//! Per-connection state for the event loop.

use crate::protocol::RecvBuffer;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use std::io::{self, Write};
use std::net::SocketAddr;

/// One accepted client connection.
///
/// Owns the socket, the receive-side line accumulator, and the outgoing
/// byte queue. The slab key under which the connection is stored doubles
/// as its mio token and its scheduler identity.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Reassembles request lines from partial reads.
    pub recv: RecvBuffer,
    /// Response bytes queued but not yet written to the socket.
    outgoing: BytesMut,
    /// Close the connection once `outgoing` drains (end-of-data sent).
    pub close_after_flush: bool,
    /// Stop parsing input: an end-of-data response is already on its way
    /// to this peer, so further request lines are discarded.
    pub input_done: bool,
    /// Whether the socket is currently registered for write readiness.
    pub write_interest: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            recv: RecvBuffer::new(),
            outgoing: BytesMut::new(),
            close_after_flush: false,
            input_done: false,
            write_interest: false,
        }
    }

    /// Queue response bytes for delivery.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.outgoing.extend_from_slice(bytes);
    }

    /// Write as much of the outgoing queue as the socket will take.
    ///
    /// Returns `Ok(true)` when the queue fully drained, `Ok(false)` when the
    /// socket would block with bytes still pending. Any other failure is a
    /// transport error and the caller closes the connection.
    pub fn flush(&mut self) -> io::Result<bool> {
        while !self.outgoing.is_empty() {
            match self.stream.write(&self.outgoing) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.outgoing.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
