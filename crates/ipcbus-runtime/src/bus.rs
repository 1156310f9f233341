//! The bus: request correlation, inbound dispatch and teardown.
//!
//! # Architecture
//!
//! ```text
//!  request()/event()/...            inbound pump (task)
//!        │                                │
//!        ▼                                ▼
//!  ┌───────────┐  send(Value)      Envelope::decode ──▶ invalidMessage
//!  │ Transport │◀───────────             │
//!  └───────────┘                   match kind
//!                                   ├─ Response ─▶ table.take(id) ─▶ settle
//!                                   └─ every kind ─▶ Notification
//! ```
//!
//! Three parties can settle a pending request: the inbound pump (response),
//! the request's timer, and [`Bus::destroy`]/[`Bus::cancel`]. Each of them
//! first removes the entry from the correlation table under its lock and only
//! the one that got the entry settles it, so a request settles exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};

use ipcbus_core::{
    BoxedTransport, BusError, BusResult, CorrelationError, CorrelationTable, Envelope, Inbound,
    Kind, Rejected, RequestError, RequestResult,
};

use crate::config::BusConfig;
use crate::id::{IdSource, UuidIdSource};
use crate::notification::{Notification, Notifications};

/// Default time a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

// =============================================================================
// Pending request
// =============================================================================

/// State of one in-flight request, owned by the correlation table.
struct PendingRequest {
    cmd: String,
    reply: oneshot::Sender<RequestResult<Value>>,
    timer: AbortHandle,
}

impl PendingRequest {
    /// Stops the timer and delivers `result` to the caller.
    fn settle(self, result: RequestResult<Value>) {
        self.timer.abort();
        if self.reply.send(result).is_err() {
            trace!(cmd = %self.cmd, "Caller dropped before settlement");
        }
    }

    /// Stops the timer without delivering anything.
    fn discard(self) {
        self.timer.abort();
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Bus`].
///
/// ```rust,ignore
/// let bus = Bus::builder(transport)
///     .request_timeout(Duration::from_secs(1))
///     .build()?;
/// ```
pub struct BusBuilder {
    transport: BoxedTransport,
    request_timeout: Duration,
    ids: Arc<dyn IdSource>,
}

impl BusBuilder {
    /// Sets the default request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Applies the settings of a [`BusConfig`].
    pub fn config(self, config: &BusConfig) -> Self {
        self.request_timeout(config.request_timeout())
    }

    /// Replaces the correlation id generator.
    pub fn id_source(mut self, ids: impl IdSource + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Attaches to the transport and starts dispatching inbound values.
    ///
    /// Must be called within a Tokio runtime; the bus keeps a handle to it,
    /// so requests may later be issued from any thread. Fails if the
    /// transport's inbound stream was already taken.
    pub fn build(self) -> BusResult<Bus> {
        let runtime = Handle::try_current().map_err(|e| BusError::NoRuntime(e.to_string()))?;
        let inbound = self.transport.take_inbound()?;

        let inner = Arc::new(BusInner {
            transport: RwLock::new(Some(self.transport)),
            table: Mutex::new(CorrelationTable::new()),
            subscribers: Mutex::new(Some(Vec::new())),
            ids: self.ids,
            request_timeout: self.request_timeout,
            runtime,
            pump: Mutex::new(None),
        });

        let pump = inner
            .runtime
            .spawn(run_pump(Arc::downgrade(&inner), inbound));
        *inner.pump.lock() = Some(pump);

        debug!(
            request_timeout = ?self.request_timeout,
            "Bus attached to transport"
        );

        Ok(Bus { inner })
    }
}

// =============================================================================
// Bus
// =============================================================================

/// Request/response and notification bus over a [`Transport`](ipcbus_core::Transport).
///
/// Either side of a transport may run a bus. Requests are correlated with
/// their responses by id, so a peer may answer in any order.
///
/// Dropping the bus destroys it.
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// `None` once destroyed.
    transport: RwLock<Option<BoxedTransport>>,
    table: Mutex<CorrelationTable<PendingRequest>>,
    /// Unbounded so that no inbound request is ever dropped. `None` once
    /// no more notifications can be raised.
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<Notification>>>>,
    ids: Arc<dyn IdSource>,
    request_timeout: Duration,
    /// Runtime the bus was built in; timers run here.
    runtime: Handle,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Creates a bus with default settings.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(transport: BoxedTransport) -> BusResult<Self> {
        Self::builder(transport).build()
    }

    /// Creates a bus configured from `config`.
    pub fn from_config(config: &BusConfig, transport: BoxedTransport) -> BusResult<Self> {
        Self::builder(transport).config(config).build()
    }

    /// Returns a builder for a bus on `transport`.
    pub fn builder(transport: BoxedTransport) -> BusBuilder {
        BusBuilder {
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ids: Arc::new(UuidIdSource),
        }
    }

    /// Returns true if `raw` is a well-formed envelope.
    pub fn validate(raw: &Value) -> bool {
        Envelope::validate(raw)
    }

    /// Returns the default request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Subscribes to notifications raised from now on.
    ///
    /// Every subscriber receives every notification; none is dropped however
    /// far a subscriber falls behind. The stream ends once the bus is
    /// destroyed or the transport's inbound stream ends.
    pub fn subscribe(&self) -> Notifications {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subscribers) = self.inner.subscribers.lock().as_mut() {
            subscribers.push(tx);
        }
        rx
    }

    // =========================================================================
    // Request engine
    // =========================================================================

    /// Sends a request and returns a future for its response payload.
    ///
    /// Uses the bus's default timeout.
    pub fn request(&self, cmd: impl Into<String>, payload: impl Into<Value>) -> ResponseFuture {
        self.request_with_timeout(cmd, payload, self.inner.request_timeout)
    }

    /// Sends a request that fails with [`RequestError::Timeout`] unless
    /// answered within `timeout`.
    ///
    /// The request is sent before this returns. The future resolves with the
    /// response payload (`Null` if the response had none) or fails with a
    /// timeout, send, cancellation or destroyed error; exactly one of these.
    pub fn request_with_timeout(
        &self,
        cmd: impl Into<String>,
        payload: impl Into<Value>,
        timeout: Duration,
    ) -> ResponseFuture {
        let cmd = cmd.into();
        let (reply_tx, reply_rx) = oneshot::channel();

        let Some(transport) = self.inner.transport() else {
            let _ = reply_tx.send(Err(RequestError::Destroyed));
            return ResponseFuture::new(None, cmd, reply_rx, None);
        };

        let id = self.inner.ids.next_id();
        {
            // The timer cannot observe the table before the entry is in it.
            let mut table = self.inner.table.lock();
            let timer = self.inner.runtime.spawn(expire(
                Arc::downgrade(&self.inner),
                id.clone(),
                timeout,
            ))
            .abort_handle();
            let pending = PendingRequest {
                cmd: cmd.clone(),
                reply: reply_tx,
                timer,
            };

            if let Err(Rejected { error, entry }) = table.insert(id.clone(), pending) {
                let err = match error {
                    CorrelationError::Duplicate(id) => {
                        warn!(id = %id, cmd = %cmd, "Correlation id collision");
                        RequestError::DuplicateId(id)
                    }
                    CorrelationError::Closed => RequestError::Destroyed,
                };
                entry.settle(Err(err));
                return ResponseFuture::new(Some(id), cmd, reply_rx, None);
            }
        }

        debug!(id = %id, cmd = %cmd, "Sending request");
        let envelope = Envelope::request(id.clone(), cmd.clone(), Some(payload.into()));
        if let Err(e) = transport.send(envelope.into_value()) {
            warn!(id = %id, cmd = %cmd, error = %e, "Request send failed");
            self.inner.settle(&id, |cmd| RequestError::Send {
                cmd: cmd.to_string(),
                source: e,
            });
        }

        ResponseFuture::new(Some(id), cmd, reply_rx, Some(Arc::downgrade(&self.inner)))
    }

    /// Cancels the pending request `id`.
    ///
    /// Returns false if it already settled or never existed.
    pub fn cancel(&self, id: &str) -> bool {
        let cancelled = self
            .inner
            .settle(id, |cmd| RequestError::Cancelled { cmd: cmd.to_string() });
        if cancelled {
            debug!(id = %id, "Request cancelled");
        }
        cancelled
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Returns true if request `id` awaits a response.
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.table.lock().contains(id)
    }

    // =========================================================================
    // Fire-and-forget senders
    // =========================================================================

    /// Answers the peer's request `id`.
    pub fn response(&self, id: &str, cmd: &str, payload: impl Into<Value>) -> BusResult<()> {
        self.send_envelope(Envelope::response(id, cmd, Some(payload.into())))
    }

    /// Answers a request received through [`Notification::Request`].
    pub fn respond_to(&self, request: &Envelope, payload: impl Into<Value>) -> BusResult<()> {
        let id = request.id().unwrap_or_default();
        self.response(id, request.cmd(), payload)
    }

    /// Sends an event.
    pub fn event(&self, cmd: &str, payload: impl Into<Value>) -> BusResult<()> {
        self.send_envelope(Envelope::event(cmd, Some(payload.into())))
    }

    /// Sends a task.
    pub fn task(&self, cmd: &str, payload: impl Into<Value>) -> BusResult<()> {
        self.send_envelope(Envelope::task(cmd, Some(payload.into())))
    }

    /// Sends a plain message.
    pub fn message(&self, payload: impl Into<Value>) -> BusResult<()> {
        self.send_envelope(Envelope::message(Some(payload.into())))
    }

    /// Sends `value` as is, without wrapping it in an envelope.
    pub fn send_raw(&self, value: Value) -> BusResult<()> {
        let transport = self.inner.transport().ok_or(BusError::Destroyed)?;
        transport.send(value)?;
        Ok(())
    }

    fn send_envelope(&self, envelope: Envelope) -> BusResult<()> {
        let transport = self.inner.transport().ok_or(BusError::Destroyed)?;
        trace!(kind = %envelope.kind(), cmd = %envelope.cmd(), "Sending envelope");
        transport.send(envelope.into_value())?;
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Detaches from the transport and cancels every pending request.
    ///
    /// Waits for an inbound value that is being dispatched to finish; no
    /// inbound value is processed afterwards. Calling it again does nothing.
    pub fn destroy(&self) {
        if self.inner.transport.write().take().is_none() {
            return;
        }

        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }

        let pending = self.inner.table.lock().drain_all();
        let count = pending.len();
        for (id, request) in pending {
            trace!(id = %id, cmd = %request.cmd, "Cancelling pending request");
            let cmd = request.cmd.clone();
            request.settle(Err(RequestError::Cancelled { cmd }));
        }
        self.inner.close_subscribers();

        info!(cancelled = count, "Bus destroyed");
    }

    /// Returns true once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.transport.read().is_none()
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("pending", &self.pending_count())
            .field("destroyed", &self.is_destroyed())
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

// =============================================================================
// Dispatch and settlement
// =============================================================================

impl BusInner {
    fn transport(&self) -> Option<BoxedTransport> {
        self.transport.read().clone()
    }

    /// Removes request `id` and fails it with the error built from its command.
    ///
    /// Returns false if `id` was not pending.
    fn settle(&self, id: &str, error: impl FnOnce(&str) -> RequestError) -> bool {
        let Some(request) = self.table.lock().take(id) else {
            return false;
        };
        let err = error(&request.cmd);
        request.settle(Err(err));
        true
    }

    /// Drops request `id` without notifying anyone; its caller went away.
    fn forget(&self, id: &str) {
        if let Some(request) = self.table.lock().take(id) {
            trace!(id = %id, cmd = %request.cmd, "Request abandoned by caller");
            request.discard();
        }
    }

    /// Delivers `notification` to every live subscriber.
    fn notify(&self, notification: Notification) {
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.retain(|subscriber| subscriber.send(notification.clone()).is_ok());
        }
    }

    /// Ends every subscriber's notification stream.
    fn close_subscribers(&self) {
        self.subscribers.lock().take();
    }

    fn on_incoming(&self, raw: Value) {
        let attached = self.transport.read();
        if attached.is_none() {
            trace!("Bus detached, dropping inbound value");
            return;
        }

        let envelope = match Envelope::decode(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Invalid inbound message");
                self.notify(Notification::InvalidMessage(raw));
                return;
            }
        };

        trace!(kind = %envelope.kind(), cmd = %envelope.cmd(), "Dispatching inbound envelope");

        match envelope.kind() {
            Kind::Response => self.on_response(&envelope),
            Kind::Request | Kind::Event | Kind::Task | Kind::Message => {}
        }

        self.notify(Notification::from(envelope));
    }

    fn on_response(&self, envelope: &Envelope) {
        let id = envelope.id().unwrap_or_default();
        let Some(request) = self.table.lock().take(id) else {
            warn!(id = %id, cmd = %envelope.cmd(), "Response for unknown request (timed out?)");
            return;
        };

        debug!(id = %id, cmd = %request.cmd, "Request resolved");
        request.settle(Ok(envelope.payload.clone().unwrap_or(Value::Null)));
    }
}

async fn run_pump(inner: Weak<BusInner>, mut inbound: Inbound) {
    while let Some(raw) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_incoming(raw);
    }
    debug!("Inbound stream ended");
    if let Some(inner) = inner.upgrade() {
        inner.close_subscribers();
    }
}

async fn expire(inner: Weak<BusInner>, id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    inner.settle(&id, |cmd| {
        warn!(id = %id, cmd = %cmd, "Request timed out");
        RequestError::Timeout {
            cmd: cmd.to_string(),
            timeout,
        }
    });
}

// =============================================================================
// Response future
// =============================================================================

/// Future for the response to a request issued with [`Bus::request`].
///
/// Dropping it before it completes abandons the request: its entry is
/// removed and its timer stopped.
#[must_use = "a request is abandoned when its future is dropped"]
pub struct ResponseFuture {
    id: Option<String>,
    cmd: String,
    reply: oneshot::Receiver<RequestResult<Value>>,
    owner: Option<Weak<BusInner>>,
    done: bool,
}

impl ResponseFuture {
    fn new(
        id: Option<String>,
        cmd: String,
        reply: oneshot::Receiver<RequestResult<Value>>,
        owner: Option<Weak<BusInner>>,
    ) -> Self {
        Self {
            id,
            cmd,
            reply,
            owner,
            done: false,
        }
    }

    /// Returns the correlation id, or `None` if the request was never
    /// registered because the bus was already destroyed.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the request command.
    pub fn cmd(&self) -> &str {
        &self.cmd
    }
}

impl Future for ResponseFuture {
    type Output = RequestResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let result = match Pin::new(&mut this.reply).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };

        this.done = true;
        // A dropped sender means the entry went away without a verdict.
        Poll::Ready(result.unwrap_or_else(|_| {
            Err(RequestError::Cancelled {
                cmd: this.cmd.clone(),
            })
        }))
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let (Some(id), Some(inner)) = (&self.id, self.owner.as_ref().and_then(Weak::upgrade)) {
            inner.forget(id);
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.id)
            .field("cmd", &self.cmd)
            .field("done", &self.done)
            .finish()
    }
}
