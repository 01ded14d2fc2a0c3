//! User actions: the handlers that turn a parsed request into a body.
//!
//! An action receives the operation name and the query parameters of one
//! request and returns the response body. An empty body means "no result".
//! Actions are shared between concurrent dialogues in the thread modes and
//! must synchronize any internal state themselves.
//!
//! ## Bundled Actions
//! - `echo`: renders the operation and its parameters as HTML

pub mod echo;

pub use echo::Echo;

use crate::error::ActionError;
use crate::protocol::Params;
use bytes::Bytes;

pub trait UserAction: Send + Sync + 'static {
    /// Produce the body for `operation` called with `params`.
    ///
    /// The borrowed strings are only valid for the duration of the call.
    fn invoke(&self, operation: &str, params: &Params<'_>) -> Result<Bytes, ActionError>;
}

impl<F> UserAction for F
where
    F: Fn(&str, &Params<'_>) -> Result<Bytes, ActionError> + Send + Sync + 'static,
{
    fn invoke(&self, operation: &str, params: &Params<'_>) -> Result<Bytes, ActionError> {
        self(operation, params)
    }
}
