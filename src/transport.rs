//! Seam to the wireless transport below the core.
//!
//! Device discovery, GATT-style connect/write/subscribe and link-loss
//! reporting are external collaborators; the session only sees the traits
//! in this module. Notifications and link loss arrive over the channel
//! handed out by [`Link::subscribe`]; the sender side being dropped is
//! treated the same as an explicit [`LinkEvent::Closed`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifies one reachable device; opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub id: String,
    pub name: String,
}

/// What a subscribed link can report.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A complete notification buffer from the device.
    Notification(Vec<u8>),
    /// The link went down, solicited or not.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no device matching '{0}' found")]
    NoDevice(String),
    #[error("link could not be opened: {0}")]
    Open(String),
    #[error("write rejected: {0}")]
    Write(String),
    #[error("notification subscription failed: {0}")]
    Subscribe(String),
    #[error("link already closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discovery and connection establishment.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves a device whose advertised name starts with `name_prefix`.
    async fn discover(&self, name_prefix: &str) -> Result<DeviceHandle, TransportError>;

    /// Opens a link to the given device.
    async fn open(&self, device: &DeviceHandle) -> Result<Box<dyn Link>, TransportError>;
}

/// An open link to one device.
#[async_trait]
pub trait Link: Send {
    /// Writes one complete frame.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Starts notification delivery. May be called once per link.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError>;

    /// Closes the link; further writes fail.
    async fn close(&mut self) -> Result<(), TransportError>;
}
