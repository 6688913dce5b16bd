//! Device session: connection lifecycle, command multiplexing and
//! request/response correlation.
//!
//! All mutable session state lives in one task; the cloneable
//! [`DeviceSession`] handle talks to it over a channel, so no locking is
//! needed and state transitions are strictly ordered. Responses are
//! correlated with pending callers by response KIND, never by call
//! sequence, because the device may reorder replies.
//!
//! # Example
//!
//! ```no_run
//! use bmsble_lib::session::{DeviceSession, SessionConfig};
//! # async fn demo(transport: impl bmsble_lib::transport::Transport + 'static) -> Result<(), bmsble_lib::Error> {
//! let session = DeviceSession::new(transport, SessionConfig::default());
//! let mut events = session.subscribe();
//! let device = session.connect(None).await?;
//! println!("connected to {}", device.name);
//! let info = session.get_runtime_info().await?;
//! println!("SOC: {:.1}%", info.soc_percent);
//! # Ok(())
//! # }
//! ```

use crate::protocol::{self, CellInfo, Command, DeviceInfo, MqttConfig, ParsedMessage, RuntimeInfo};
use crate::transport::{DeviceHandle, Link, LinkEvent, Transport};
use crate::Error;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Session-wide connection state; transitions are driven only by the
/// session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// The notification kind a pending request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    DeviceInfo,
    RuntimeInfo,
    CellInfo,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseKind::DeviceInfo => write!(f, "deviceInfo"),
            ResponseKind::RuntimeInfo => write!(f, "runtimeInfo"),
            ResponseKind::CellInfo => write!(f, "cellInfo"),
        }
    }
}

/// Everything the session broadcasts to observers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected(DeviceHandle),
    Disconnected,
    Reconnected(DeviceHandle),
    Error(String),
    DeviceInfo(DeviceInfo),
    RuntimeInfo(RuntimeInfo),
    CellInfo(CellInfo),
    /// Every inbound notification, verbatim, before any parsing.
    RawData(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Advertised-name prefix used when no device handle is supplied.
    pub name_prefix: String,
    /// Deadline for each typed request.
    pub response_timeout: Duration,
    /// Delay before the single scheduled reconnect attempt.
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
    /// Write every frame twice, a protocol-level guard against dropped
    /// writes on flaky links.
    pub double_send: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name_prefix: String::from("BMS"),
            response_timeout: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(3000),
            auto_reconnect: true,
            double_send: true,
        }
    }
}

enum Op {
    Connect {
        device: Option<DeviceHandle>,
        reply: oneshot::Sender<Result<DeviceHandle, Error>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Send {
        command: u8,
        payload: Option<Vec<u8>>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Request {
        command: u8,
        payload: Option<Vec<u8>>,
        kind: ResponseKind,
        response: oneshot::Sender<Result<ParsedMessage, Error>>,
    },
    CancelRequest {
        kind: ResponseKind,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    Device {
        reply: oneshot::Sender<Option<DeviceHandle>>,
    },
    Reconnect,
}

/// Handle to a running session task. Cheap to clone; the task shuts down
/// when the last handle is dropped.
#[derive(Clone)]
pub struct DeviceSession {
    ops: mpsc::Sender<Op>,
    events: broadcast::Sender<SessionEvent>,
    response_timeout: Duration,
}

impl DeviceSession {
    /// Spawns the session task. Must be called inside a Tokio runtime.
    pub fn new<T: Transport + 'static>(transport: T, config: SessionConfig) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(32);
        let (events_tx, _) = broadcast::channel(64);
        let response_timeout = config.response_timeout;
        let actor = SessionActor {
            transport,
            config,
            events: events_tx.clone(),
            ops: ops_tx.downgrade(),
            state: ConnectionState::Disconnected,
            device: None,
            link: None,
            notifications: None,
            pending: HashMap::new(),
            intentional_disconnect: false,
            link_down_handled: true,
        };
        tokio::spawn(actor.run(ops_rx));
        Self {
            ops: ops_tx,
            events: events_tx,
            response_timeout,
        }
    }

    /// New receiver on the session event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Connects to `device`, or discovers one by the configured name
    /// prefix when `None`. A no-op returning the current device if the
    /// session is already connecting or connected.
    pub async fn connect(&self, device: Option<DeviceHandle>) -> Result<DeviceHandle, Error> {
        self.call(|reply| Op::Connect { device, reply }).await?
    }

    /// Intentional disconnect; never triggers auto-reconnect.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.call(|reply| Op::Disconnect { reply }).await?
    }

    pub async fn state(&self) -> Result<ConnectionState, Error> {
        self.call(|reply| Op::State { reply }).await
    }

    /// The currently associated device handle, if any.
    pub async fn device(&self) -> Result<Option<DeviceHandle>, Error> {
        self.call(|reply| Op::Device { reply }).await
    }

    /// Encodes and writes a raw command. Requires a connected session;
    /// the frame is written twice unless `double_send` is off.
    pub async fn send_command(&self, command: u8, payload: Option<Vec<u8>>) -> Result<(), Error> {
        self.call(|reply| Op::Send {
            command,
            payload,
            reply,
        })
        .await?
    }

    /// Requests the device identity mapping.
    pub async fn get_device_info(&self) -> Result<DeviceInfo, Error> {
        match self
            .request(Command::DeviceInfo, None, ResponseKind::DeviceInfo)
            .await?
        {
            ParsedMessage::DeviceInfo(info) => Ok(info),
            _ => unreachable!("pending request resolved with mismatched kind"),
        }
    }

    /// Requests the live operating data record.
    pub async fn get_runtime_info(&self) -> Result<RuntimeInfo, Error> {
        match self
            .request(Command::RuntimeInfo, None, ResponseKind::RuntimeInfo)
            .await?
        {
            ParsedMessage::RuntimeInfo(info) => Ok(info),
            _ => unreachable!("pending request resolved with mismatched kind"),
        }
    }

    /// Requests per-cell voltages and pack temperatures.
    pub async fn get_cell_info(&self) -> Result<CellInfo, Error> {
        match self
            .request(Command::CellInfo, None, ResponseKind::CellInfo)
            .await?
        {
            ParsedMessage::CellInfo(info) => Ok(info),
            _ => unreachable!("pending request resolved with mismatched kind"),
        }
    }

    /// Pushes WiFi credentials to the device. The device acknowledges
    /// config writes with a device-info dump, which is returned.
    pub async fn set_wifi_config(&self, ssid: &str, password: &str) -> Result<DeviceInfo, Error> {
        let payload = protocol::wifi_config_payload(ssid, password);
        match self
            .request(Command::SetWifi, Some(payload), ResponseKind::DeviceInfo)
            .await?
        {
            ParsedMessage::DeviceInfo(info) => Ok(info),
            _ => unreachable!("pending request resolved with mismatched kind"),
        }
    }

    /// Pushes MQTT broker settings to the device.
    pub async fn set_mqtt_config(&self, config: &MqttConfig) -> Result<DeviceInfo, Error> {
        let payload = protocol::mqtt_config_payload(config);
        match self
            .request(Command::SetMqtt, Some(payload), ResponseKind::DeviceInfo)
            .await?
        {
            ParsedMessage::DeviceInfo(info) => Ok(info),
            _ => unreachable!("pending request resolved with mismatched kind"),
        }
    }

    /// Clears the device's stored MQTT settings.
    pub async fn reset_mqtt_config(&self) -> Result<DeviceInfo, Error> {
        match self
            .request(Command::ResetMqtt, None, ResponseKind::DeviceInfo)
            .await?
        {
            ParsedMessage::DeviceInfo(info) => Ok(info),
            _ => unreachable!("pending request resolved with mismatched kind"),
        }
    }

    /// Registers a pending entry for `kind`, sends `command`, and settles
    /// exactly once on the first of: matching notification, timeout, link
    /// loss. The pending entry is removed on every exit path; a timed-out
    /// caller explicitly cancels its registration.
    async fn request(
        &self,
        command: Command,
        payload: Option<Vec<u8>>,
        kind: ResponseKind,
    ) -> Result<ParsedMessage, Error> {
        let (response, rx) = oneshot::channel();
        self.ops
            .send(Op::Request {
                command: command as u8,
                payload,
                kind,
                response,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;
        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                let _ = self.ops.send(Op::CancelRequest { kind }).await;
                Err(Error::Timeout {
                    kind,
                    timeout: self.response_timeout,
                })
            }
        }
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Op) -> Result<R, Error> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(make(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

enum Wake {
    Op(Option<Op>),
    Link(Option<LinkEvent>),
}

struct SessionActor<T: Transport> {
    transport: T,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    /// Weak op sender for scheduling the reconnect attempt; weak so the
    /// task still winds down once the last session handle is dropped.
    ops: mpsc::WeakSender<Op>,
    state: ConnectionState,
    device: Option<DeviceHandle>,
    link: Option<Box<dyn Link>>,
    notifications: Option<mpsc::Receiver<LinkEvent>>,
    pending: HashMap<ResponseKind, oneshot::Sender<Result<ParsedMessage, Error>>>,
    intentional_disconnect: bool,
    /// Guards against the transport reporting the same link loss more
    /// than once between two Connected transitions.
    link_down_handled: bool,
}

impl<T: Transport> SessionActor<T> {
    async fn run(mut self, mut ops: mpsc::Receiver<Op>) {
        loop {
            let wake = match self.notifications.as_mut() {
                Some(rx) => tokio::select! {
                    op = ops.recv() => Wake::Op(op),
                    event = rx.recv() => Wake::Link(event),
                },
                None => Wake::Op(ops.recv().await),
            };
            match wake {
                Wake::Op(Some(op)) => self.handle_op(op).await,
                Wake::Op(None) => break,
                Wake::Link(Some(LinkEvent::Notification(bytes))) => {
                    self.handle_notification(bytes)
                }
                Wake::Link(Some(LinkEvent::Closed)) | Wake::Link(None) => self.link_down(),
            }
        }
        log::trace!("session task shutting down");
        if let Some(mut link) = self.link.take() {
            if let Err(err) = link.close().await {
                log::warn!("closing link on shutdown failed: {err}");
            }
        }
    }

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::Connect { device, reply } => {
                let result = self.handle_connect(device).await;
                let _ = reply.send(result);
            }
            Op::Disconnect { reply } => {
                let _ = reply.send(self.handle_disconnect().await);
            }
            Op::Send {
                command,
                payload,
                reply,
            } => {
                let result = if self.state == ConnectionState::Connected {
                    self.write_frame(command, payload.as_deref()).await
                } else {
                    Err(Error::NotConnected)
                };
                let _ = reply.send(result);
            }
            Op::Request {
                command,
                payload,
                kind,
                response,
            } => self.handle_request(command, payload, kind, response).await,
            Op::CancelRequest { kind } => {
                if self.pending.remove(&kind).is_some() {
                    log::trace!("cancelled pending {kind} request");
                }
            }
            Op::State { reply } => {
                let _ = reply.send(self.state);
            }
            Op::Device { reply } => {
                let _ = reply.send(self.device.clone());
            }
            Op::Reconnect => self.handle_reconnect().await,
        }
    }

    async fn handle_connect(
        &mut self,
        device: Option<DeviceHandle>,
    ) -> Result<DeviceHandle, Error> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            if let Some(current) = &self.device {
                log::debug!("connect is a no-op in state {:?}", self.state);
                return Ok(current.clone());
            }
        }
        self.state = ConnectionState::Connecting;
        match self.establish(device).await {
            Ok(handle) => {
                log::info!("connected to {} ({})", handle.name, handle.id);
                self.emit(SessionEvent::Connected(handle.clone()));
                Ok(handle)
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                self.emit(SessionEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Discovery (when needed), open, subscribe. On success the session
    /// is Connected and the link-loss guard is re-armed.
    async fn establish(&mut self, device: Option<DeviceHandle>) -> Result<DeviceHandle, Error> {
        let device = match device {
            Some(device) => device,
            None => {
                log::debug!("discovering device with prefix {:?}", self.config.name_prefix);
                self.transport
                    .discover(&self.config.name_prefix)
                    .await
                    .map_err(Error::Discovery)?
            }
        };
        let mut link = self.transport.open(&device).await.map_err(Error::Connect)?;
        let notifications = link.subscribe().await.map_err(Error::Connect)?;
        self.link = Some(link);
        self.notifications = Some(notifications);
        self.device = Some(device.clone());
        self.state = ConnectionState::Connected;
        self.intentional_disconnect = false;
        self.link_down_handled = false;
        Ok(device)
    }

    async fn handle_disconnect(&mut self) -> Result<(), Error> {
        self.intentional_disconnect = true;
        if let Some(mut link) = self.link.take() {
            if let Err(err) = link.close().await {
                log::warn!("transport close failed: {err}");
            }
        }
        self.link_down();
        Ok(())
    }

    /// Handles a link-loss report, solicited or not. Only the first
    /// report since the last Connected transition does anything.
    fn link_down(&mut self) {
        if self.link_down_handled {
            return;
        }
        self.link_down_handled = true;
        self.state = ConnectionState::Disconnected;
        self.link = None;
        self.notifications = None;
        self.emit(SessionEvent::Disconnected);
        for (kind, tx) in self.pending.drain() {
            let _ = tx.send(Err(Error::LinkLost(kind)));
        }
        if !self.intentional_disconnect && self.config.auto_reconnect {
            let delay = self.config.reconnect_delay;
            let ops = self.ops.clone();
            log::info!("link lost, scheduling one reconnect attempt in {delay:?}");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(ops) = ops.upgrade() {
                    let _ = ops.send(Op::Reconnect).await;
                }
            });
        }
    }

    /// The single scheduled reconnect attempt. No retry loop: a failure
    /// is surfaced as an error event and the session stays disconnected.
    async fn handle_reconnect(&mut self) {
        if self.state != ConnectionState::Disconnected || self.intentional_disconnect {
            log::debug!("skipping scheduled reconnect in state {:?}", self.state);
            return;
        }
        self.state = ConnectionState::Reconnecting;
        let device = self.device.clone();
        match self.establish(device).await {
            Ok(handle) => {
                log::info!("reconnected to {} ({})", handle.name, handle.id);
                self.emit(SessionEvent::Reconnected(handle));
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                log::warn!("reconnect attempt failed: {err}");
                self.emit(SessionEvent::Error(format!("reconnect failed: {err}")));
            }
        }
    }

    async fn handle_request(
        &mut self,
        command: u8,
        payload: Option<Vec<u8>>,
        kind: ResponseKind,
        response: oneshot::Sender<Result<ParsedMessage, Error>>,
    ) {
        if self.state != ConnectionState::Connected {
            let _ = response.send(Err(Error::NotConnected));
            return;
        }
        if self.pending.contains_key(&kind) {
            let _ = response.send(Err(Error::RequestPending(kind)));
            return;
        }
        // Register before writing so a fast reply cannot slip past.
        self.pending.insert(kind, response);
        if let Err(err) = self.write_frame(command, payload.as_deref()).await {
            if let Some(tx) = self.pending.remove(&kind) {
                let _ = tx.send(Err(err));
            }
        }
    }

    async fn write_frame(&mut self, command: u8, payload: Option<&[u8]>) -> Result<(), Error> {
        let frame = protocol::encode_frame(command, payload);
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        log::trace!("write frame: {frame:02X?}");
        link.write(&frame).await.map_err(Error::Write)?;
        if self.config.double_send {
            link.write(&frame).await.map_err(Error::Write)?;
        }
        Ok(())
    }

    /// Every notification is re-broadcast verbatim first, then parsed.
    /// Classified messages resolve the matching pending caller and go out
    /// as typed events; unclassifiable buffers are only logged.
    fn handle_notification(&mut self, bytes: Vec<u8>) {
        log::trace!("notification: {bytes:02X?}");
        self.emit(SessionEvent::RawData(bytes.clone()));
        match protocol::parse_message(&bytes) {
            ParsedMessage::DeviceInfo(info) => {
                self.resolve(
                    ResponseKind::DeviceInfo,
                    ParsedMessage::DeviceInfo(info.clone()),
                );
                self.emit(SessionEvent::DeviceInfo(info));
            }
            ParsedMessage::RuntimeInfo(info) => {
                self.resolve(
                    ResponseKind::RuntimeInfo,
                    ParsedMessage::RuntimeInfo(info.clone()),
                );
                self.emit(SessionEvent::RuntimeInfo(info));
            }
            ParsedMessage::CellInfo(info) => {
                self.resolve(ResponseKind::CellInfo, ParsedMessage::CellInfo(info.clone()));
                self.emit(SessionEvent::CellInfo(info));
            }
            ParsedMessage::Unknown(unknown) => {
                log::debug!(
                    "unclassified notification ({}): {:02X?}",
                    unknown.reason,
                    unknown.raw
                );
            }
        }
    }

    fn resolve(&mut self, kind: ResponseKind, message: ParsedMessage) {
        if let Some(tx) = self.pending.remove(&kind) {
            let _ = tx.send(Ok(message));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
