//! Connection acceptor and concurrency strategies.
//!
//! The [`Acceptor`] owns the listening socket and hands every accepted
//! [`Connection`] to a [`Dialogue`] according to its [`ConcurrencyMode`]:
//! - `Sequential`: inline in the accept loop
//! - `Fork`: in a forked child process
//! - `Thread`: in a new thread per connection
//! - `ThreadPool`: in a fixed set of worker threads fed by a bounded queue

mod acceptor;
mod buffer;
mod connection;
mod pool;
mod process;
mod threads;

pub use acceptor::Acceptor;
pub use buffer::{RecvBuffer, DEFAULT_RECV_BUFFER_SIZE};
pub use connection::{ConnState, Connection};
pub use pool::{PoolConfig, DEFAULT_QUEUE_DEPTH};

use crate::error::DialogueError;
use serde::Deserialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use thiserror::Error;
use tracing::error;

/// Per-connection protocol handler driven by the acceptor.
///
/// One instance is shared by every connection, concurrently in the thread
/// modes, so implementations keep per-connection state on the stack.
pub trait Dialogue: Send + Sync + 'static {
    /// Service `conn` until it closes. The connection is consumed and
    /// closed on return.
    fn converse(&self, conn: Connection) -> Result<(), DialogueError>;
}

/// How accepted connections are serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ConcurrencyMode {
    /// One connection at a time on the accept loop's own thread.
    #[default]
    Sequential,
    /// A forked process per connection.
    Fork,
    /// A new thread per connection.
    Thread,
    /// A bounded pool of worker threads.
    ThreadPool,
}

#[derive(Debug, Error)]
#[error("unknown concurrency mode '{0}' (expected Sequential, Fork, Thread or ThreadPool)")]
pub struct UnknownModeError(String);

impl FromStr for ConcurrencyMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "sequential" => Ok(Self::Sequential),
            "fork" | "process" | "processperconnection" => Ok(Self::Fork),
            "thread" | "threadperconnection" => Ok(Self::Thread),
            "threadpool" | "pool" => Ok(Self::ThreadPool),
            _ => Err(UnknownModeError(s.to_string())),
        }
    }
}

impl TryFrom<String> for ConcurrencyMode {
    type Error = UnknownModeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sequential => "Sequential",
            Self::Fork => "Fork",
            Self::Thread => "Thread",
            Self::ThreadPool => "ThreadPool",
        };
        f.write_str(name)
    }
}

/// Run `dialogue` on `conn`, containing its errors and panics.
///
/// Returns `true` if the dialogue finished without error.
pub(crate) fn serve<D: Dialogue + ?Sized>(dialogue: &D, conn: Connection) -> bool {
    let conn_id = conn.id();
    match panic::catch_unwind(AssertUnwindSafe(|| dialogue.converse(conn))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(conn = conn_id, error = %e, "Dialogue failed");
            false
        }
        Err(_) => {
            error!(conn = conn_id, "Dialogue panicked");
            false
        }
    }
}
