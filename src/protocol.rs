//! HTTP/1.1 subset parser and response generator.
//!
//! Only a `GET` request line followed by headers is understood, with no body:
//!
//! ```text
//! GET /<operation>[?<k1>=<v1>&<k2>=<v2>...] HTTP/1.1\r\n
//! Connection: Keep-Alive|Close\r\n
//! \r\n
//! ```
//!
//! Parsed requests borrow every string from the receive buffer, so a
//! [`Request`] must be dropped before the buffer can be filled again.

use crate::error::RequestError;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::IoSlice;
use std::str;

/// Blank line that ends every request head.
pub const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default bound on the number of query parameters kept per request.
pub const DEFAULT_MAX_PARAMS: usize = 64;

const METHOD: &str = "GET ";
const VERSION: &str = "HTTP/1.1";
const CONNECTION_HEADER: &str = "Connection";

const UNSUPPORTED_METHOD: &[u8] = b"HTTP/1.1 501 Unsupported request\r\n\r\n";
const MISSING_PATH: &[u8] = b"HTTP/1.1 501 Missing Path\r\n\r\n";
const INVALID_VERSION: &[u8] = b"HTTP/1.1 501 Unsupported/Invalid HTTP Version\r\n\r\n";
const INVALID_CONNECTION: &[u8] = b"HTTP/1.1 501 Missing/Invalid Connection Header\r\n\r\n";
const INCORRECT_PARAMS: &[u8] = b"HTTP/1.1 501 Incorrect Params\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
const NO_RESULT: &[u8] = b"HTTP/1.1 500 No Result\r\n\r\n";

/// Ordered query parameters with a fixed upper bound.
///
/// Duplicate keys are kept. Pairs offered after the bound is reached are
/// refused by [`Params::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params<'a> {
    pairs: Vec<(&'a str, &'a str)>,
    capacity: usize,
}

impl<'a> Params<'a> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(capacity.min(DEFAULT_MAX_PARAMS)),
            capacity,
        }
    }

    /// Append a pair. Returns `false` if the bound was already reached.
    pub fn push(&mut self, key: &'a str, value: &'a str) -> bool {
        if self.is_full() {
            return false;
        }
        self.pairs.push((key, value));
        true
    }

    /// Whether the bound has been reached.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// First value stored under `key`.
    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.as_slice().iter().copied()
    }

    pub fn as_slice(&self) -> &[(&'a str, &'a str)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// A parsed request. Lives no longer than the receive buffer contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// Path without the leading `/` and without the query string.
    pub operation: &'a str,
    pub params: Params<'a>,
    /// `true` only when the request carried `Connection: Keep-Alive`.
    pub keep_alive: bool,
}

/// Parse failure together with the persistence decision known at that point.
///
/// Failures detected before the `Connection` header was read always close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseFailure {
    pub error: RequestError,
    pub keep_alive: bool,
}

impl ParseFailure {
    fn closing(error: RequestError) -> Self {
        Self {
            error,
            keep_alive: false,
        }
    }
}

/// Check that `input` holds a whole request head.
pub fn is_complete(input: &[u8]) -> bool {
    input.len() >= TERMINATOR.len() && input.ends_with(TERMINATOR)
}

/// Parse one request head.
///
/// The caller must have checked framing with [`is_complete`].
pub fn parse(input: &[u8], max_params: usize) -> Result<Request<'_>, ParseFailure> {
    let head =
        str::from_utf8(input).map_err(|_| ParseFailure::closing(RequestError::Encoding))?;
    let head = head.strip_suffix("\r\n\r\n").unwrap_or(head);
    let (request_line, headers) = head.split_once("\r\n").unwrap_or((head, ""));

    let target = request_line
        .strip_prefix(METHOD)
        .ok_or(ParseFailure::closing(RequestError::UnsupportedMethod))?
        .trim_start_matches(' ');

    if !target.starts_with('/') {
        return Err(ParseFailure::closing(RequestError::MissingPath));
    }
    let (path, version) = target
        .split_once(' ')
        .ok_or(ParseFailure::closing(RequestError::MissingPath))?;

    if version != VERSION {
        return Err(ParseFailure::closing(RequestError::InvalidVersion));
    }

    let keep_alive = connection_persistence(headers)
        .ok_or(ParseFailure::closing(RequestError::InvalidConnectionHeader))?;

    let path = &path[1..];
    let (operation, query) = path.split_once('?').unwrap_or((path, ""));

    let mut params = Params::with_capacity(max_params);
    parse_query(query, &mut params).map_err(|error| ParseFailure { error, keep_alive })?;

    Ok(Request {
        operation,
        params,
        keep_alive,
    })
}

/// Find the first `Connection` header and decode its value.
///
/// Returns `None` if the header is absent or its value is neither
/// `keep-alive` nor `close` (compared case-insensitively).
fn connection_persistence(headers: &str) -> Option<bool> {
    let value = headers
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| *name == CONNECTION_HEADER)
        .map(|(_, value)| value.trim_matches(|c| c == ' ' || c == '\t'))?;

    if value.eq_ignore_ascii_case("keep-alive") {
        Some(true)
    } else if value.eq_ignore_ascii_case("close") {
        Some(false)
    } else {
        None
    }
}

/// Split `k1=v1&k2=v2` into `params`, stopping silently at its bound.
fn parse_query<'a>(query: &'a str, params: &mut Params<'a>) -> Result<(), RequestError> {
    if query.is_empty() {
        return Ok(());
    }

    for pair in query.split('&') {
        if params.is_full() {
            break;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or(RequestError::IncorrectParams)?;
        if key.is_empty() || value.is_empty() {
            return Err(RequestError::IncorrectParams);
        }
        params.push(key, value);
    }
    Ok(())
}

/// A response ready to be written: header bytes plus an optional body.
#[derive(Debug, Clone)]
pub struct Response {
    header: Bytes,
    body: Bytes,
}

impl Response {
    /// `200 OK` carrying `body`, with an exact `Content-Length`.
    pub fn ok(body: Bytes, keep_alive: bool) -> Self {
        let mut header = BytesMut::with_capacity(128);
        header.put_slice(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: ");
        header.put_slice(body.len().to_string().as_bytes());
        header.put_slice(b"\r\nConnection: ");
        header.put_slice(if keep_alive {
            b"Keep-Alive".as_slice()
        } else {
            b"Close".as_slice()
        });
        header.put_slice(b"\r\n\r\n");

        Self {
            header: header.freeze(),
            body,
        }
    }

    /// Body-less error response for a malformed request.
    pub fn error(err: RequestError) -> Self {
        let status = match err {
            RequestError::UnsupportedMethod => UNSUPPORTED_METHOD,
            RequestError::MissingPath => MISSING_PATH,
            RequestError::InvalidVersion => INVALID_VERSION,
            RequestError::InvalidConnectionHeader => INVALID_CONNECTION,
            RequestError::IncorrectParams => INCORRECT_PARAMS,
            RequestError::Encoding => BAD_REQUEST,
        };
        Self::status(status)
    }

    /// Body-less response for a user action that produced nothing.
    pub fn no_result() -> Self {
        Self::status(NO_RESULT)
    }

    fn status(line: &'static [u8]) -> Self {
        Self {
            header: Bytes::from_static(line),
            body: Bytes::new(),
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.header().len() + self.body().len()
    }

    /// Header and body as slices for a single vectored write.
    pub fn io_slices(&self) -> [IoSlice<'_>; 2] {
        [IoSlice::new(&self.header), IoSlice::new(&self.body)]
    }
}
