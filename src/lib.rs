#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bmsble_lib
//!
//! Client-side protocol stack for a BLE-attached battery monitor: frame
//! encoding/decoding, notification classification, and a session manager
//! with request/response correlation and auto-reconnect.
//!
//! The wireless transport itself (device discovery, GATT connect/write/
//! subscribe) is an external collaborator behind the [`transport`] traits;
//! any backend that can deliver notification buffers can drive the stack.
//!
//! ## Features
//!
//! - `default`: enables `bin-dependencies`, which is intended for compiling
//!   the `bmsble` command-line tool.
//! - `replay`: a scripted transport that plays captured notification frames
//!   back through the transport seam, for testing and offline diagnostics.

/// Contains error types for the library.
mod error;
/// Wire format: frame codec and notification parser.
pub mod protocol;
/// Device session state machine and request correlation.
pub mod session;
/// Traits the wireless transport collaborator must provide.
pub mod transport;

pub use error::Error;

/// Scripted playback transport for captures.
#[cfg_attr(docsrs, doc(cfg(feature = "replay")))]
#[cfg(feature = "replay")]
pub mod replay;
