//! Fixed-capacity receive buffer owned by one connection.
//!
//! The buffer is allocated once per connection and reused for every request
//! on it. Before each receive the bytes used by the previous request are
//! zeroed so nothing stale can leak into the next parse.

use std::io::{self, Read};

/// Default receive buffer size in bytes.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 64 * 1024;

pub struct RecvBuffer {
    data: Box<[u8]>,
    /// Bytes filled by the last successful receive.
    filled: usize,
}

impl RecvBuffer {
    /// Allocate a zeroed buffer of `size` bytes (at least 1).
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size.max(1)].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Receive once from `reader`, replacing the previous contents.
    ///
    /// Interrupted reads are retried. Returns the number of bytes received;
    /// `0` means the peer closed the connection.
    pub fn recv_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.data[..self.filled].fill(0);
        self.filled = 0;

        loop {
            match reader.read(&mut self.data) {
                Ok(n) => {
                    self.filled = n;
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Bytes received by the last call to [`RecvBuffer::recv_from`].
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Whether the last receive used every byte of capacity.
    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}
