//! Scripted transport: plays a list of captured notification frames back
//! through the transport seam, one per configured delay tick, and records
//! every frame written to it.
//!
//! Useful for exercising the full stack against captured traffic without
//! radio hardware, both from the command-line tool and from tests.

use crate::transport::{DeviceHandle, Link, LinkEvent, Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct ReplayTransport {
    device: DeviceHandle,
    frames: Arc<Vec<Vec<u8>>>,
    frame_delay: Duration,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ReplayTransport {
    pub fn new(name: &str, frames: Vec<Vec<u8>>, frame_delay: Duration) -> Self {
        Self {
            device: DeviceHandle {
                id: String::from("replay"),
                name: name.to_string(),
            },
            frames: Arc::new(frames),
            frame_delay,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Frames written through the link so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn discover(&self, name_prefix: &str) -> Result<DeviceHandle, TransportError> {
        if self.device.name.starts_with(name_prefix) {
            Ok(self.device.clone())
        } else {
            Err(TransportError::NoDevice(name_prefix.to_string()))
        }
    }

    async fn open(&self, _device: &DeviceHandle) -> Result<Box<dyn Link>, TransportError> {
        Ok(Box::new(ReplayLink {
            frames: self.frames.clone(),
            frame_delay: self.frame_delay,
            written: self.written.clone(),
            subscribed: false,
        }))
    }
}

struct ReplayLink {
    frames: Arc<Vec<Vec<u8>>>,
    frame_delay: Duration,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    subscribed: bool,
}

#[async_trait]
impl Link for ReplayLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        log::trace!("replay link write: {bytes:02X?}");
        self.written.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    /// Playback starts when the session subscribes, mirroring a GATT
    /// notify subscription. The link reports closure after the last
    /// scripted frame.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        if self.subscribed {
            return Err(TransportError::Subscribe("already subscribed".into()));
        }
        self.subscribed = true;
        let (tx, rx) = mpsc::channel(16);
        let frames = self.frames.clone();
        let delay = self.frame_delay;
        tokio::spawn(async move {
            for frame in frames.iter() {
                tokio::time::sleep(delay).await;
                if tx.send(LinkEvent::Notification(frame.clone())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(LinkEvent::Closed).await;
        });
        Ok(rx)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
