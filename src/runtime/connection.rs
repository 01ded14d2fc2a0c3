//! Connection handle and its dialogue state.
//!
//! A [`Connection`] is owned by exactly one servicing unit (the accept loop,
//! a forked child, or a worker thread). The socket is closed when the handle
//! is dropped, so every exit path closes it exactly once.

use std::io::{self, IoSlice, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Where a connection is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Between requests.
    AwaitRequest,
    /// Blocked in `recv`.
    Receiving,
    Parsing,
    /// Running the user action.
    Dispatching,
    /// Writing the response.
    Responding,
    /// Terminal.
    Closed,
}

/// An accepted client connection.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    stream: TcpStream,
    peer: Option<SocketAddr>,
    state: ConnState,
}

impl Connection {
    /// Wrap an accepted stream, assigning it a process-unique id.
    pub fn new(stream: TcpStream, peer: Option<SocketAddr>) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            peer,
            state: ConnState::AwaitRequest,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Move to `state`. Transitions out of `Closed` are ignored.
    pub fn set_state(&mut self, state: ConnState) {
        if !self.is_open() {
            return;
        }
        trace!(conn = self.id, from = ?self.state, to = ?state, "State change");
        self.state = state;
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnState::Closed
    }

    /// Shut the socket down in both directions and release it.
    pub fn close(mut self) {
        debug!(conn = self.id, peer = ?self.peer(), state = ?self.state(), "Closing connection");
        self.set_state(ConnState::Closed);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.stream.write_vectored(bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
