//! Error types for the acceptor, the dialogue and user actions.
//!
//! Startup failures ([`ServerError`]) propagate to `main`. Everything that
//! happens on a single connection ([`DialogueError`], [`RequestError`],
//! [`ActionError`]) is contained and logged at the dispatch boundary.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures that stop the service or prevent it from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind address is not a valid IP literal.
    #[error("invalid bind address '{addr}'")]
    InvalidAddress { addr: String },

    /// Socket creation, bind or listen failed.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `accept` failed with something other than an interruption.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Installing a signal handler failed.
    #[error("cannot install signal handler: {0}")]
    Signal(#[source] io::Error),

    /// A worker thread or process could not be started.
    #[error("cannot spawn worker: {0}")]
    Spawn(#[source] io::Error),
}

/// Failures that terminate a single connection.
#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("recv failed: {0}")]
    Receive(#[source] io::Error),

    /// The request did not end with a blank line.
    #[error("incomplete request ({len} bytes), disconnecting")]
    Truncated { len: usize },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),
}

/// A request that could not be parsed. Each kind has a fixed status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("unsupported method")]
    UnsupportedMethod,

    #[error("missing path")]
    MissingPath,

    #[error("unsupported or invalid HTTP version")]
    InvalidVersion,

    #[error("missing or invalid Connection header")]
    InvalidConnectionHeader,

    #[error("incorrect query parameters")]
    IncorrectParams,

    #[error("request head is not valid UTF-8")]
    Encoding,
}

/// Failure reported by a user action.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
