//! HTTP protocol dialogue.
//!
//! Services one connection at a time:
//!
//! ```text
//! AwaitRequest -> Receiving -> Parsing -> Dispatching -> Responding -+-> AwaitRequest
//!                                                                    +-> Closed
//! ```
//!
//! Requests are strictly serial: the next receive is only issued after the
//! current response has been written. A connection stays open only while
//! each request asks for `Connection: Keep-Alive`.

use crate::actions::UserAction;
use crate::error::DialogueError;
use crate::protocol::{self, Request, Response, DEFAULT_MAX_PARAMS};
use crate::runtime::{ConnState, Connection, Dialogue, RecvBuffer, DEFAULT_RECV_BUFFER_SIZE};
use bytes::Bytes;
use std::any::Any;
use std::io::{self, IoSlice, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Dialogue that dispatches parsed requests to a [`UserAction`].
pub struct HttpDialogue<A> {
    action: A,
    recv_buffer_size: usize,
    max_params: usize,
}

impl<A: UserAction> HttpDialogue<A> {
    pub fn new(action: A) -> Self {
        Self {
            action,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_params: DEFAULT_MAX_PARAMS,
        }
    }

    /// Capacity of each connection's receive buffer, which also bounds the
    /// size of a request head.
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(protocol::TERMINATOR.len());
        self
    }

    /// Query parameters kept per request; extra pairs are dropped.
    pub fn with_max_params(mut self, max_params: usize) -> Self {
        self.max_params = max_params;
        self
    }

    /// Parse one complete request head and build its response.
    ///
    /// Returns the response and whether the connection should stay open.
    fn respond(&self, conn: &mut Connection, input: &[u8]) -> (Response, bool) {
        let request = match protocol::parse(input, self.max_params) {
            Ok(request) => request,
            Err(failure) => {
                info!(
                    conn = conn.id(),
                    error = %failure.error,
                    keep_alive = failure.keep_alive,
                    "Malformed request"
                );
                return (Response::error(failure.error), failure.keep_alive);
            }
        };

        conn.set_state(ConnState::Dispatching);
        let keep_alive = request.keep_alive;
        match self.dispatch(conn.id(), &request) {
            Some(body) => (Response::ok(body, keep_alive), keep_alive),
            None => (Response::no_result(), keep_alive),
        }
    }

    /// Run the user action, turning failures and panics into "no result".
    fn dispatch(&self, conn_id: u64, request: &Request<'_>) -> Option<Bytes> {
        debug!(
            conn = conn_id,
            operation = request.operation,
            params = request.params.len(),
            "Dispatching"
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.action.invoke(request.operation, &request.params)
        }));

        match outcome {
            Ok(Ok(body)) if body.is_empty() => {
                warn!(conn = conn_id, operation = request.operation, "Action returned no result");
                None
            }
            Ok(Ok(body)) => Some(body),
            Ok(Err(e)) => {
                error!(conn = conn_id, operation = request.operation, error = %e, "Action failed");
                None
            }
            Err(payload) => {
                error!(
                    conn = conn_id,
                    operation = request.operation,
                    panic = panic_message(payload.as_ref()),
                    "Action panicked"
                );
                None
            }
        }
    }
}

impl<A: UserAction> Dialogue for HttpDialogue<A> {
    fn converse(&self, mut conn: Connection) -> Result<(), DialogueError> {
        let mut buffer = RecvBuffer::new(self.recv_buffer_size);
        while self.exchange(&mut conn, &mut buffer)? {}
        conn.close();
        Ok(())
    }
}

impl<A: UserAction> HttpDialogue<A> {
    /// Serve one request on `conn`.
    ///
    /// Returns `true` when the connection is back in `AwaitRequest` and
    /// should be read again, `false` once it should be closed.
    fn exchange(
        &self,
        conn: &mut Connection,
        buffer: &mut RecvBuffer,
    ) -> Result<bool, DialogueError> {
        conn.set_state(ConnState::Receiving);
        let n = buffer.recv_from(conn).map_err(DialogueError::Receive)?;
        if n == 0 {
            info!(conn = conn.id(), "Client disconnected");
            return Ok(false);
        }

        // A request head must arrive in one read and end with a blank line.
        let input = buffer.filled();
        if !protocol::is_complete(input) {
            if buffer.is_full() {
                warn!(conn = conn.id(), capacity = buffer.capacity(), "Request head too large");
            }
            return Err(DialogueError::Truncated { len: n });
        }

        conn.set_state(ConnState::Parsing);
        let (response, keep_alive) = self.respond(conn, input);

        conn.set_state(ConnState::Responding);
        write_response(conn, &response).map_err(DialogueError::Send)?;
        debug!(conn = conn.id(), bytes = response.len(), keep_alive, "Response sent");

        if !keep_alive {
            info!(conn = conn.id(), "Closing, Keep-Alive not requested");
            return Ok(false);
        }
        conn.set_state(ConnState::AwaitRequest);
        Ok(true)
    }
}

/// Write header and body with vectored writes until both are fully sent.
fn write_response<W: Write>(out: &mut W, response: &Response) -> io::Result<()> {
    let mut slices = response.io_slices();
    let mut bufs: &mut [IoSlice<'_>] = &mut slices;

    while !bufs.is_empty() {
        match out.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole response",
                ))
            }
            Ok(n) => IoSlice::advance_slices(&mut bufs, n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Echo;
    use crate::error::ActionError;
    use crate::protocol::Params;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Run `dialogue` on the server side of a fresh loopback connection.
    fn connect<A: UserAction>(
        dialogue: HttpDialogue<A>,
    ) -> (TcpStream, thread::JoinHandle<Result<(), DialogueError>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        let dialogue = Arc::new(dialogue);
        let handle = thread::spawn(move || dialogue.converse(Connection::new(stream, Some(peer))));
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (client, handle)
    }

    /// Read one response: the head plus `Content-Length` bytes of body.
    fn read_response(client: &mut TcpStream) -> (String, Vec<u8>) {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = client.read(&mut byte).unwrap();
            assert_eq!(n, 1, "connection closed mid-head: {:?}", String::from_utf8_lossy(&head));
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();

        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .map(|v| v.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        client.read_exact(&mut body).unwrap();
        (head, body)
    }

    fn assert_closed(client: &mut TcpStream) {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty(), "unexpected bytes: {:?}", String::from_utf8_lossy(&rest));
    }

    #[test]
    fn test_echo_scenario_closes_after_response() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo));
        client
            .write_all(b"GET /echo?a=1&b=2 HTTP/1.1\r\nConnection: Close\r\n\r\n")
            .unwrap();

        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Connection: Close\r\n"));
        assert!(head.contains(&format!("Content-Length: {}\r\n", body.len())));
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("a --> 1"));
        assert!(body.contains("b --> 2"));

        assert_closed(&mut client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_keep_alive_serves_repeated_requests() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo));
        let request = b"GET /echo?key=value HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";

        client.write_all(request).unwrap();
        let (head1, body1) = read_response(&mut client);
        client.write_all(request).unwrap();
        let (head2, body2) = read_response(&mut client);

        assert!(head1.contains("Connection: Keep-Alive\r\n"));
        assert_eq!(head1, head2);
        assert_eq!(body1, body2);

        // A shorter second request must not see the tail of the first.
        client
            .write_all(b"GET /e HTTP/1.1\r\nConnection: Close\r\n\r\n")
            .unwrap();
        let (_, body3) = read_response(&mut client);
        assert_eq!(body3, b"<html><title>e</title><body></body></html>");

        assert_closed(&mut client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_content_length_matches_action_body() {
        let action = |_op: &str, params: &Params<'_>| -> Result<Bytes, ActionError> {
            let n: usize = params.get("n").unwrap_or("0").parse().unwrap_or(0);
            Ok(Bytes::from(vec![b'z'; n]))
        };
        let (mut client, handle) = connect(HttpDialogue::new(action));

        for n in [1usize, 17, 4096, 200_000] {
            let request = format!("GET /fill?n={n} HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n");
            client.write_all(request.as_bytes()).unwrap();
            let (head, body) = read_response(&mut client);
            assert!(head.contains(&format!("Content-Length: {n}\r\n")));
            assert_eq!(body.len(), n);
        }

        drop(client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_truncated_request_closes_without_response() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo));
        client
            .write_all(b"GET /echo HTTP/1.1\r\nConnection: Keep-Alive\r\n")
            .unwrap();

        assert_closed(&mut client);
        assert!(matches!(
            handle.join().unwrap(),
            Err(DialogueError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unsupported_method_gets_error_and_closes() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo));
        client
            .write_all(b"POST /echo HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n")
            .unwrap();

        let (head, body) = read_response(&mut client);
        assert_eq!(head, "HTTP/1.1 501 Unsupported request\r\n\r\n");
        assert!(body.is_empty());
        assert_closed(&mut client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_missing_connection_header_closes() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo));
        client.write_all(b"GET /echo HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

        let (head, _) = read_response(&mut client);
        assert_eq!(head, "HTTP/1.1 501 Missing/Invalid Connection Header\r\n\r\n");
        assert_closed(&mut client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_bad_params_keep_connection_when_requested() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo));

        client
            .write_all(b"GET /echo?a=&b=2 HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n")
            .unwrap();
        let (head, _) = read_response(&mut client);
        assert_eq!(head, "HTTP/1.1 501 Incorrect Params\r\n\r\n");

        // Still open: a valid request on the same connection succeeds.
        client
            .write_all(b"GET /echo?a=1 HTTP/1.1\r\nConnection: Close\r\n\r\n")
            .unwrap();
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(String::from_utf8(body).unwrap().contains("a --> 1"));

        assert_closed(&mut client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_failing_action_yields_no_result() {
        let action = |op: &str, _params: &Params<'_>| -> Result<Bytes, ActionError> {
            match op {
                "empty" => Ok(Bytes::new()),
                "fail" => Err(ActionError::new("nope")),
                _ => panic!("action blew up"),
            }
        };
        let (mut client, handle) = connect(HttpDialogue::new(action));

        for op in ["empty", "fail", "panic"] {
            let request = format!("GET /{op} HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n");
            client.write_all(request.as_bytes()).unwrap();
            let (head, body) = read_response(&mut client);
            assert_eq!(head, "HTTP/1.1 500 No Result\r\n\r\n", "op {op}");
            assert!(body.is_empty());
        }

        drop(client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_oversized_head_is_truncated() {
        let (mut client, handle) = connect(HttpDialogue::new(Echo).with_recv_buffer_size(32));
        client
            .write_all(b"GET /echo?aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa=1 HTTP/1.1\r\nConnection: Close\r\n\r\n")
            .unwrap();

        assert!(matches!(
            handle.join().unwrap(),
            Err(DialogueError::Truncated { len: 32 })
        ));
    }

    #[test]
    fn test_exchange_returns_to_await_request_on_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        let mut conn = Connection::new(stream, Some(peer));
        let dialogue = HttpDialogue::new(Echo);
        let mut buffer = RecvBuffer::new(1024);

        client
            .write_all(b"GET /echo?a=1 HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n")
            .unwrap();
        assert!(dialogue.exchange(&mut conn, &mut buffer).unwrap());
        assert_eq!(conn.state(), ConnState::AwaitRequest);
        let (head, _) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK"));

        client
            .write_all(b"GET /echo HTTP/1.1\r\nConnection: Close\r\n\r\n")
            .unwrap();
        assert!(!dialogue.exchange(&mut conn, &mut buffer).unwrap());
        assert_eq!(conn.state(), ConnState::Responding);
    }

    #[test]
    fn test_write_response_sends_header_then_body() {
        let response = Response::ok(Bytes::from_static(b"body"), false);
        let mut out = Vec::new();
        write_response(&mut out, &response).unwrap();
        assert!(out.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with(b"\r\n\r\nbody"));

        let mut out = Vec::new();
        write_response(&mut out, &Response::no_result()).unwrap();
        assert_eq!(out, b"HTTP/1.1 500 No Result\r\n\r\n");
    }
}
