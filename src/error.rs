use crate::session::ResponseKind;
use crate::transport::TransportError;
use std::time::Duration;

/// Session-level errors. Codec and parser problems never surface here;
/// they produce `false` or an `Unknown` classification instead.
///
/// Every variant names the stage that failed so callers get a usable
/// rejection message without inspecting the source chain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A session call was made while the session is not connected.
    #[error("not connected")]
    NotConnected,
    /// No matching notification arrived within the deadline.
    #[error("timed out after {timeout:?} waiting for {kind} response")]
    Timeout {
        kind: ResponseKind,
        timeout: Duration,
    },
    /// A request awaiting the same response kind is already in flight.
    #[error("a {0} request is already pending")]
    RequestPending(ResponseKind),
    /// The link went down while the request was in flight.
    #[error("link lost while waiting for {0} response")]
    LinkLost(ResponseKind),
    #[error("device discovery failed: {0}")]
    Discovery(#[source] TransportError),
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),
    #[error("write failed: {0}")]
    Write(#[source] TransportError),
    /// The session task is gone; no further calls can succeed.
    #[error("session closed")]
    SessionClosed,
}
