//! Session manager
//!
//! Owns the single connection to a terminal, correlates requests with their
//! responses, and routes unsolicited frames to the [`EventDispatcher`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use poslink_core::constants::WRITE_RETRY_DELAY_MS;
use poslink_core::{codec, CommandKind, ConnectionState, DeviceEvent, Frame, FrameKind, Session};
use poslink_transport::{read_loop, Link, LinkReader, LinkWriter, TcpTransport, Transport};
use poslink_types::{Basket, DeviceClass, FiscalRecord, Payment, StatusCode};

use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::dispatcher::{EventDispatcher, HandlerError, Subscription};
use crate::error::{CommandError, ConnectError, Result};
use crate::pending::{CommandResult, PendingTable, Request, Response};

type SharedWriter = Arc<AsyncMutex<Box<dyn LinkWriter>>>;

/// The connection established by [`SessionManager::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub device_class: DeviceClass,
    pub device_id: String,
    /// Increases with every established link
    pub generation: u64,
}

impl ConnectionInfo {
    pub fn device_index(&self) -> i32 {
        self.device_class.index()
    }
}

/// Session manager for one POS terminal
///
/// Cloning is cheap; clones share the connection.
///
/// # Examples
///
/// ```no_run
/// use poslink::{SessionConfig, SessionManager};
/// use poslink_types::{Basket, BasketItem};
///
/// #[tokio::main]
/// async fn main() -> poslink::Result<()> {
///     let manager = SessionManager::tcp("192.168.1.50", 4370, SessionConfig::default())?;
///     let info = manager.connect("ACME Retail").await?;
///     println!("Connected to {} ({})", info.device_class, info.device_id);
///
///     let basket = Basket::new("B-1", 0)
///         .with_item(BasketItem::new("Coffee", 1500, 1).with_tax_percent(2000));
///     println!("Basket: {}", manager.send_basket(&basket).await);
///
///     manager.teardown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    shared: Mutex<Shared>,
    lifecycle: AsyncMutex<Lifecycle>,
    dispatcher: EventDispatcher,
}

/// Connection state and pending table, guarded together
struct Shared {
    session: Session,
    pending: PendingTable,
    writer: Option<SharedWriter>,
    read_task: Option<JoinHandle<()>>,
    connection: Option<ConnectionInfo>,
    identity: Option<String>,
}

struct Lifecycle {
    transport: Box<dyn Transport>,
}

impl SessionManager {
    /// Create a manager over `transport`
    pub fn new(transport: impl Transport + 'static, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let dispatcher = EventDispatcher::new(config.event_queue_capacity)?;

        let inner = Inner {
            shared: Mutex::new(Shared {
                session: Session::new(),
                pending: PendingTable::new(),
                writer: None,
                read_task: None,
                connection: None,
                identity: None,
            }),
            lifecycle: AsyncMutex::new(Lifecycle {
                transport: Box::new(transport),
            }),
            dispatcher,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create a manager talking TCP to `host:port`
    pub fn tcp(host: impl Into<String>, port: u16, config: SessionConfig) -> Result<Self> {
        let transport = TcpTransport::new(host, port).with_connect_timeout(config.connect_timeout());
        Self::new(transport, config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Connect and identify as `identity` (the integrating company name)
    ///
    /// Returns the current connection unchanged if one is already up.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::TransportUnavailable`] if the link cannot be opened
    /// - [`ConnectError::DeviceNotResponding`] if the terminal does not
    ///   acknowledge within the handshake timeout
    pub async fn connect(&self, identity: impl Into<String>) -> std::result::Result<ConnectionInfo, ConnectError> {
        let identity = identity.into();
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if let Some(info) = self.connection_info() {
            debug!(device = %info.device_class, "Already connected");
            return Ok(info);
        }

        // A lost link still holds its writer
        self.inner.release_link(CommandError::NotConnected).await;
        self.inner.establish(lifecycle.transport.as_mut(), &identity).await
    }

    /// Drop the current link and connect again with the last identity
    ///
    /// Every in-flight request resolves with [`CommandError::Cancelled`]
    /// first. Attempts are bounded by the configured reconnect policy.
    pub async fn reconnect(&self) -> std::result::Result<ConnectionInfo, ConnectError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let identity = self
            .inner
            .shared
            .lock()
            .identity
            .clone()
            .ok_or(ConnectError::NeverConnected)?;

        let cancelled = self.inner.release_link(CommandError::Cancelled).await;
        info!(cancelled, "Reconnecting to {}...", lifecycle.transport.remote_addr());

        let config = &self.inner.config;
        let (initial, max) = config.reconnect_backoff();
        let mut backoff = Backoff::new(initial, max);

        loop {
            match self.inner.establish(lifecycle.transport.as_mut(), &identity).await {
                Ok(info) => return Ok(info),
                Err(e) if backoff.attempts() + 1 >= config.max_reconnect_attempts => {
                    warn!(attempts = backoff.attempts() + 1, error = %e, "Reconnect gave up");
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Release the connection
    ///
    /// Outstanding requests resolve with [`CommandError::Cancelled`]. Safe to
    /// call any number of times.
    pub async fn teardown(&self) {
        let lifecycle = self.inner.lifecycle.lock().await;
        let cancelled = self.inner.release_link(CommandError::Cancelled).await;
        debug!(cancelled, "Torn down link to {}", lifecycle.transport.remote_addr());
    }

    /// Device index of the active connection, or `-1`
    pub fn active_device_index(&self) -> i32 {
        self.inner
            .shared
            .lock()
            .session
            .device_class()
            .map_or(DeviceClass::NONE_INDEX, DeviceClass::index)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().session.is_connected()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let shared = self.inner.shared.lock();
        if shared.session.is_connected() {
            shared.connection.clone()
        } else {
            None
        }
    }

    /// Id reported by the terminal on the last acknowledged connect
    pub fn device_id(&self) -> Option<String> {
        self.inner.shared.lock().session.device_id().map(str::to_owned)
    }

    /// Number of requests waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.shared.lock().pending.len()
    }

    /// Write a request and return a handle to its pending response
    ///
    /// Fails immediately with [`CommandError::NotConnected`] when there is no
    /// connection. A transient write error is retried once.
    pub async fn submit(&self, request: Request) -> std::result::Result<PendingHandle, CommandError> {
        let Request { kind, payload } = request;
        let deadline = Instant::now() + self.inner.config.timeout_for(kind);
        let (tx, rx) = oneshot::channel();

        let (id, writer, encoded) = {
            let mut shared = self.inner.shared.lock();
            if !shared.session.is_connected() {
                return Err(CommandError::NotConnected);
            }
            let writer = shared.writer.clone().ok_or(CommandError::NotConnected)?;

            let id = loop {
                let id = shared.session.next_correlation_id();
                if !shared.pending.contains(id) {
                    break id;
                }
            };

            let frame = Frame::with_payload(kind.frame_kind(), id, payload);
            let encoded = frame.try_encode().map_err(|e| {
                warn!(kind = %kind, error = %e, "Request not encodable");
                CommandError::InvalidData
            })?;

            shared.pending.insert(id, kind, tx);
            (id, writer, encoded)
        };

        let handle = PendingHandle {
            id,
            kind,
            deadline,
            rx,
            inner: Arc::downgrade(&self.inner),
            settled: false,
        };

        trace!(correlation_id = id, kind = %kind, size = encoded.len(), "Submitting request");

        match timeout_at(deadline, write_frame(&writer, &encoded)).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                warn!(correlation_id = id, kind = %kind, error = %e, "Failed to write request");
                Err(CommandError::NotConnected)
            }
            Err(_) => Err(CommandError::Timeout),
        }
    }

    /// Issue a request and wait for its response
    pub async fn issue(&self, request: Request) -> CommandResult {
        self.submit(request).await?.wait().await
    }

    /// Resolve request `id` with [`CommandError::Cancelled`]
    ///
    /// Returns `false` if it was not pending. A response arriving later is
    /// dropped.
    pub fn cancel(&self, id: u32) -> bool {
        self.inner
            .shared
            .lock()
            .pending
            .resolve(id, Err(CommandError::Cancelled))
    }

    /// Send a basket to the terminal
    pub async fn send_basket(&self, basket: &Basket) -> StatusCode {
        match Request::basket(basket) {
            Ok(request) => self.status_of(request).await,
            Err(e) => {
                warn!(basket_id = %basket.basket_id, error = %e, "Basket rejected before sending");
                StatusCode::InvalidData
            }
        }
    }

    /// Send a basket given as JSON text
    pub async fn send_basket_json(&self, json: &str) -> StatusCode {
        match serde_json::from_str::<Basket>(json) {
            Ok(basket) => self.send_basket(&basket).await,
            Err(e) => {
                warn!(error = %e, "Basket JSON does not parse");
                StatusCode::InvalidData
            }
        }
    }

    /// Send a standalone payment
    pub async fn send_payment(&self, payment: &Payment) -> StatusCode {
        match Request::payment(payment) {
            Ok(request) => self.status_of(request).await,
            Err(e) => {
                warn!(error = %e, "Payment rejected before sending");
                StatusCode::InvalidData
            }
        }
    }

    /// Send a standalone payment given as JSON text
    pub async fn send_payment_json(&self, json: &str) -> StatusCode {
        match serde_json::from_str::<Payment>(json) {
            Ok(payment) => self.send_payment(&payment).await,
            Err(e) => {
                warn!(error = %e, "Payment JSON does not parse");
                StatusCode::InvalidData
            }
        }
    }

    async fn status_of(&self, request: Request) -> StatusCode {
        match self.issue(request).await {
            Ok(response) => response.status(),
            Err(e) => e.status(),
        }
    }

    /// Read the fiscal counters of the terminal
    pub async fn get_fiscal_info(&self) -> Result<FiscalRecord> {
        let response = self.issue(Request::fiscal_info()).await?;
        Ok(codec::decode_fiscal_info(&response.payload)?)
    }

    /// Fiscal counters as JSON text
    pub async fn get_fiscal_info_json(&self) -> Result<String> {
        let record = self.get_fiscal_info().await?;
        let json = serde_json::to_string(&record).map_err(poslink_core::Error::from)?;
        Ok(json)
    }

    /// Round trip time of a `Ping`
    pub async fn ping(&self) -> std::result::Result<Duration, CommandError> {
        let started = Instant::now();
        self.issue(Request::ping()).await?;
        Ok(started.elapsed())
    }

    /// Register the serial input handler, replacing any previous one
    pub fn register_serial_handler<F>(&self, handler: F) -> Subscription
    where
        F: Fn(u32, &str) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_serial_handler(handler)
    }

    /// Register the connection state handler, replacing any previous one
    pub fn register_state_handler<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool, &str) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_state_handler(handler)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }
}

impl Inner {
    /// Open a link, run the handshake and start the read loop
    async fn establish(
        self: &Arc<Self>,
        transport: &mut dyn Transport,
        identity: &str,
    ) -> std::result::Result<ConnectionInfo, ConnectError> {
        let addr = transport.remote_addr();
        let correlation_id = {
            let mut shared = self.shared.lock();
            shared
                .session
                .begin_connect()
                .map_err(|e| ConnectError::TransportUnavailable(e.to_string()))?;
            shared.session.next_correlation_id()
        };

        info!("Connecting to {}...", addr);

        let (link, device_class, device_id) = match self.handshake(transport, identity, correlation_id).await {
            Ok(established) => established,
            Err(e) => {
                self.shared.lock().session.close();
                warn!(addr = %addr, error = %e, "Connect failed");
                return Err(e);
            }
        };

        let Link { writer, reader } = link;
        let info = {
            let mut shared = self.shared.lock();
            let generation = match shared.session.acknowledge(device_class, device_id.clone()) {
                Ok(generation) => generation,
                Err(e) => {
                    shared.session.close();
                    return Err(ConnectError::DeviceNotResponding(e.to_string()));
                }
            };

            let info = ConnectionInfo {
                device_class,
                device_id: device_id.clone(),
                generation,
            };

            shared.writer = Some(Arc::new(AsyncMutex::new(writer)));
            shared.connection = Some(info.clone());
            shared.identity = Some(identity.to_owned());
            shared.read_task = Some(tokio::spawn(run_reader(Arc::downgrade(self), reader, generation)));
            info
        };

        info!(
            device = %info.device_class,
            device_id = %info.device_id,
            generation = info.generation,
            "Connected successfully"
        );

        self.dispatcher.publish(DeviceEvent::StateChange {
            connected: true,
            device_id,
        });

        Ok(info)
    }

    async fn handshake(
        &self,
        transport: &mut dyn Transport,
        identity: &str,
        correlation_id: u32,
    ) -> std::result::Result<(Link, DeviceClass, String), ConnectError> {
        let addr = transport.remote_addr();
        let mut link = match timeout(self.config.connect_timeout(), transport.open()).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(ConnectError::TransportUnavailable(e.to_string())),
            Err(_) => {
                return Err(ConnectError::TransportUnavailable(format!("timed out opening {}", addr)));
            }
        };

        let request = Frame::with_payload(
            FrameKind::Connect,
            correlation_id,
            Bytes::copy_from_slice(identity.as_bytes()),
        );
        let handshake_timeout = self.config.handshake_timeout();

        let outcome = async {
            link.writer
                .write(&request.encode())
                .await
                .map_err(|e| ConnectError::TransportUnavailable(e.to_string()))?;

            match timeout(handshake_timeout, await_ack(link.reader.as_mut(), correlation_id)).await {
                Ok(acknowledged) => acknowledged,
                Err(_) => Err(ConnectError::DeviceNotResponding(format!(
                    "no acknowledgement within {}ms",
                    handshake_timeout.as_millis()
                ))),
            }
        }
        .await;

        match outcome {
            Ok((device_class, device_id)) => Ok((link, device_class, device_id)),
            Err(e) => {
                if let Err(close_error) = link.writer.close().await {
                    debug!("Failed to close link after handshake failure: {}", close_error);
                }
                Err(e)
            }
        }
    }

    /// Drop the current link, resolving pending requests with `error`
    ///
    /// Returns the number of requests resolved.
    async fn release_link(&self, error: CommandError) -> usize {
        let (writer, farewell, failed, lost_device) = {
            let mut shared = self.shared.lock();
            let was_connected = shared.session.is_connected();
            let failed = shared.pending.fail_all(error);

            let farewell = was_connected
                .then(|| Frame::new(FrameKind::Disconnect, shared.session.next_correlation_id()));
            let lost_device = if was_connected {
                shared.session.device_id().map(str::to_owned)
            } else {
                None
            };

            shared.session.close();
            shared.connection = None;
            if let Some(task) = shared.read_task.take() {
                task.abort();
            }
            (shared.writer.take(), farewell, failed, lost_device)
        };

        if let Some(writer) = writer {
            let mut writer = writer.lock().await;
            if let Some(frame) = farewell {
                match timeout(self.config.timeout_for(CommandKind::Disconnect), writer.write(&frame.encode())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to send Disconnect: {}", e),
                    Err(_) => warn!("Timed out sending Disconnect"),
                }
            }
            if let Err(e) = writer.close().await {
                debug!("Failed to close link: {}", e);
            }
        }

        if let Some(device_id) = lost_device {
            info!(device_id = %device_id, cancelled = failed, "Disconnected");
            self.dispatcher.publish(DeviceEvent::StateChange {
                connected: false,
                device_id,
            });
        }

        failed
    }

    fn handle_frame(&self, generation: u64, buf: BytesMut) {
        let frame = match Frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        if frame.is_unsolicited() {
            match codec::decode_event(&frame) {
                Ok(event) => self.dispatcher.publish(event),
                Err(e) => warn!(frame = %frame, error = %e, "Dropping malformed event"),
            }
            return;
        }

        if !frame.is_response() {
            warn!(frame = %frame, "Unexpected request frame from terminal");
            return;
        }

        let correlation_id = frame.correlation_id;
        let result = response_result(frame);

        let mut shared = self.shared.lock();
        if shared.session.generation() != generation || !shared.session.is_connected() {
            debug!(correlation_id, generation, "Dropping response from a stale link");
            return;
        }
        if !shared.pending.resolve(correlation_id, result) {
            debug!(correlation_id, "No pending request for response, dropping");
        }
    }

    /// Read loop of `generation` ended; returns the writer to close
    fn handle_link_lost(&self, generation: u64, error: poslink_transport::Error) -> Option<SharedWriter> {
        let (writer, failed, device_id) = {
            let mut shared = self.shared.lock();
            if !shared.session.mark_lost(generation) {
                trace!(generation, "Stale read loop ended");
                return None;
            }

            let failed = shared.pending.fail_all(CommandError::NotConnected);
            shared.connection = None;
            shared.read_task.take();
            let device_id = shared.session.device_id().unwrap_or_default().to_owned();
            (shared.writer.take(), failed, device_id)
        };

        warn!(
            device_id = %device_id,
            generation,
            failed,
            error = %error,
            "Connection lost"
        );

        self.dispatcher.publish(DeviceEvent::StateChange {
            connected: false,
            device_id,
        });

        writer
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.shared.get_mut().read_task.take() {
            task.abort();
        }
    }
}

async fn run_reader(inner: Weak<Inner>, reader: Box<dyn LinkReader>, generation: u64) {
    let frames = inner.clone();
    let error = read_loop(reader, move |buf| {
        if let Some(inner) = frames.upgrade() {
            inner.handle_frame(generation, buf);
        }
    })
    .await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    if let Some(writer) = inner.handle_link_lost(generation, error) {
        if let Err(e) = writer.lock().await.close().await {
            debug!("Failed to close lost link: {}", e);
        }
    }
}

async fn await_ack(
    reader: &mut dyn LinkReader,
    correlation_id: u32,
) -> std::result::Result<(DeviceClass, String), ConnectError> {
    loop {
        let buf = reader
            .read_frame()
            .await
            .map_err(|e| ConnectError::DeviceNotResponding(e.to_string()))?;

        let frame = match Frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame during handshake");
                continue;
            }
        };

        if frame.correlation_id != correlation_id {
            debug!(frame = %frame, "Ignoring frame during handshake");
            continue;
        }

        return match frame.kind {
            FrameKind::Ack | FrameKind::AckData => {
                let ack = codec::decode_connect_ack(&frame.payload)
                    .map_err(|e| ConnectError::DeviceNotResponding(e.to_string()))?;
                let device_class = ack
                    .device_class()
                    .map_err(|e| ConnectError::DeviceNotResponding(e.to_string()))?;
                Ok((device_class, ack.device_id))
            }
            other => Err(ConnectError::DeviceNotResponding(format!(
                "terminal answered connect with {}",
                other
            ))),
        };
    }
}

async fn write_frame(writer: &SharedWriter, encoded: &[u8]) -> poslink_transport::Result<()> {
    let mut writer = writer.lock().await;
    match writer.write(encoded).await {
        Err(e) if e.is_transient() => {
            debug!(error = %e, "Transient write error, retrying once");
            sleep(Duration::from_millis(WRITE_RETRY_DELAY_MS)).await;
            writer.write(encoded).await
        }
        other => other,
    }
}

fn response_result(frame: Frame) -> CommandResult {
    match frame.kind {
        FrameKind::Ack | FrameKind::AckData => Ok(Response {
            kind: frame.kind,
            correlation_id: frame.correlation_id,
            payload: frame.payload,
        }),
        FrameKind::Busy => Err(CommandError::DeviceBusy),
        FrameKind::InvalidData => Err(CommandError::InvalidData),
        _ => Err(CommandError::DeviceRejected),
    }
}

/// A submitted request waiting for its response
///
/// Dropping the handle withdraws the request; a response arriving afterwards
/// is discarded.
pub struct PendingHandle {
    id: u32,
    kind: CommandKind,
    deadline: Instant,
    rx: oneshot::Receiver<CommandResult>,
    inner: Weak<Inner>,
    settled: bool,
}

impl PendingHandle {
    /// Correlation id of the request, usable with [`SessionManager::cancel`]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the per-kind timeout or connection loss
    pub async fn wait(mut self) -> CommandResult {
        let outcome = timeout_at(self.deadline, &mut self.rx).await;
        self.settled = true;

        match outcome {
            Ok(Ok(result)) => result,
            // The table went away with the manager
            Ok(Err(_)) => Err(CommandError::Cancelled),
            Err(_) => self.expire(),
        }
    }

    fn expire(&mut self) -> CommandResult {
        let removed = self
            .inner
            .upgrade()
            .is_some_and(|inner| inner.shared.lock().pending.remove(self.id));

        if removed {
            warn!(correlation_id = self.id, kind = %self.kind, "Request timed out");
            return Err(CommandError::Timeout);
        }

        // Resolved between the deadline and the removal
        self.rx.try_recv().unwrap_or(Err(CommandError::Timeout))
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            if inner.shared.lock().pending.remove(self.id) {
                trace!(correlation_id = self.id, "Pending request withdrawn");
            }
        }
    }
}

impl std::fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
