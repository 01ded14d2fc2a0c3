//! Echo action.
//!
//! Renders the request back to the client as a small HTML page:
//!
//! ```text
//! GET /echo?a=1&b=2
//! => <html><title>echo</title><body><p>a --> 1</p><p>b --> 2</p></body></html>
//! ```

use super::UserAction;
use crate::error::ActionError;
use crate::protocol::Params;
use bytes::{BufMut, Bytes, BytesMut};

/// Largest page the echo action will produce.
pub const MAX_ECHO_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl UserAction for Echo {
    fn invoke(&self, operation: &str, params: &Params<'_>) -> Result<Bytes, ActionError> {
        let needed = 41
            + operation.len()
            + params
                .iter()
                .map(|(k, v)| k.len() + v.len() + 12)
                .sum::<usize>();
        if needed > MAX_ECHO_SIZE {
            return Err(ActionError::new(format!(
                "echo output of {needed} bytes exceeds {MAX_ECHO_SIZE}"
            )));
        }

        let mut out = BytesMut::with_capacity(needed);
        out.put_slice(b"<html><title>");
        out.put_slice(operation.as_bytes());
        out.put_slice(b"</title><body>");
        for (key, value) in params.iter() {
            out.put_slice(b"<p>");
            out.put_slice(key.as_bytes());
            out.put_slice(b" --> ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"</p>");
        }
        out.put_slice(b"</body></html>");

        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_renders_params_in_order() {
        let mut params = Params::with_capacity(4);
        params.push("a", "1");
        params.push("b", "2");

        let body = Echo.invoke("echo", &params).unwrap();
        assert_eq!(
            &body[..],
            b"<html><title>echo</title><body><p>a --> 1</p><p>b --> 2</p></body></html>"
        );
    }

    #[test]
    fn test_echo_size_estimate_is_exact() {
        let mut params = Params::with_capacity(4);
        params.push("key", "value");
        let body = Echo.invoke("op", &params).unwrap();
        assert_eq!(body.len(), 41 + 2 + 3 + 5 + 12);
    }

    #[test]
    fn test_echo_without_params() {
        let body = Echo.invoke("ping", &Params::with_capacity(0)).unwrap();
        assert_eq!(&body[..], b"<html><title>ping</title><body></body></html>");
    }

    #[test]
    fn test_echo_refuses_oversized_output() {
        let big = "x".repeat(MAX_ECHO_SIZE);
        let mut params = Params::with_capacity(1);
        params.push("k", &big);
        assert!(Echo.invoke("echo", &params).is_err());
    }
}
