//! Transport socket: one logical connection kept alive for one channel.
//!
//! A [`TransportSocket`] owns a [`ChannelMachine`] and at most one driver
//! task. The driver connects, pumps frames in both directions, and on any
//! close or error runs the single close path: notify, ask the machine for a
//! backoff delay, sleep, retry. Teardown bumps the generation and cancels
//! the driver so a pending reconnect never fires.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use std::cell::Cell;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use url::Url;

use super::state::{ChannelMachine, ChannelState, CloseOutcome};
use super::transport::{Connector, Frame, Link};
use crate::config::BackoffConfig;
use crate::domain::ChannelKind;
use crate::error::LinkError;

/// Upper bound on the graceful close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on writing one outbound frame.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A driver still running this long after teardown is aborted.
const REAP_AFTER: Duration = SEND_TIMEOUT.saturating_add(CLOSE_TIMEOUT);

/// Receives lifecycle and message callbacks from a [`TransportSocket`].
///
/// Callbacks run on the channel's driver task, one at a time and in
/// receipt order. No socket lock is held while they run, so a handler may
/// call back into the socket (including `teardown`).
pub trait ChannelHandler: Send + Sync + 'static {
    /// The channel opened (`true`) or closed (`false`).
    fn on_status(&self, connected: bool);

    /// A text frame arrived, or a binary frame holding valid UTF-8.
    fn on_message(&self, raw: &str);

    /// A binary frame was not valid UTF-8 and was dropped.
    fn on_undecodable(&self, _err: &LinkError) {}
}

/// Static parameters of a socket.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Which channel this socket serves; used in logs and errors.
    pub kind: ChannelKind,
    /// Endpoint to connect to.
    pub url: Url,
    /// Backoff bounds.
    pub backoff: BackoffConfig,
    /// Upper bound on one connect attempt.
    pub connect_timeout: Duration,
}

/// Requests from the socket handle to its driver.
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

struct SocketInner<H> {
    options: SocketOptions,
    connector: Arc<dyn Connector>,
    handler: H,
    runtime: Handle,
    machine: Mutex<ChannelMachine>,
    /// Last status delivered to the handler. Held while a status callback
    /// runs, so deliveries for one channel never overlap or reorder.
    announced: ReentrantMutex<Cell<bool>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    /// Driver released by teardown that may still be closing its link.
    closing: Mutex<Option<AbortHandle>>,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
}

/// One logical connection with automatic recovery.
pub struct TransportSocket<H: ChannelHandler> {
    inner: Arc<SocketInner<H>>,
}

impl<H: ChannelHandler> fmt::Debug for TransportSocket<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSocket")
            .field("channel", &self.inner.options.kind)
            .field("url", &self.inner.options.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<H: ChannelHandler> TransportSocket<H> {
    /// Creates a closed socket. Driver tasks are spawned on `runtime`.
    #[must_use]
    pub fn new(
        options: SocketOptions,
        connector: Arc<dyn Connector>,
        handler: H,
        runtime: Handle,
    ) -> Self {
        let machine = ChannelMachine::new(options.backoff);
        Self {
            inner: Arc::new(SocketInner {
                options,
                connector,
                handler,
                runtime,
                machine: Mutex::new(machine),
                announced: ReentrantMutex::new(Cell::new(false)),
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
                closing: Mutex::new(None),
                connect_attempts: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    /// Starts connecting. No-op while `Connecting` or `Open`.
    pub fn open(&self) {
        let Some(generation) = self.inner.machine.lock().begin_open() else {
            tracing::debug!(channel = %self.inner.options.kind, "open ignored, channel already live");
            return;
        };

        if let Some(stale) = self.inner.closing.lock().take() {
            stale.abort();
        }

        let inner = Arc::clone(&self.inner);
        let handle = self.inner.runtime.spawn(drive(inner, generation));
        if let Some(previous) = self.inner.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the channel for good: no reconnect is scheduled, a pending
    /// reconnect is cancelled, and an open connection is closed.
    /// Idempotent.
    pub fn teardown(&self) {
        let kind = self.inner.options.kind;
        let announced = self.inner.announced.lock();
        let previous = self.inner.machine.lock().teardown();

        let close_requested = self
            .inner
            .outbound
            .lock()
            .take()
            .is_some_and(|tx| tx.send(Outbound::Close).is_ok());

        let driver = self.inner.driver.lock().take();
        match driver {
            Some(driver) if close_requested => {
                *self.inner.closing.lock() = Some(driver.abort_handle());
                self.inner.runtime.spawn(reap(driver, kind));
            }
            Some(driver) => driver.abort(),
            None => {}
        }

        if previous != ChannelState::Closed {
            tracing::info!(channel = %kind, from = %previous, "channel torn down");
        }
        if announced.replace(false) {
            self.inner.handler.on_status(false);
        }
    }

    /// Transmits `text` if the channel is open.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotReady`] when the channel is not `Open`. The
    /// message is not buffered.
    pub fn send(&self, text: String) -> Result<(), LinkError> {
        let not_ready = LinkError::NotReady {
            channel: self.inner.options.kind,
        };
        let machine = self.inner.machine.lock();
        if machine.state() != ChannelState::Open {
            return Err(not_ready);
        }
        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(Outbound::Text(text)).map_err(|_| not_ready),
            None => Err(not_ready),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.inner.machine.lock().state()
    }

    /// Delay the next reconnect would wait.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.inner.machine.lock().current_delay()
    }

    /// Channel this socket serves.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.inner.options.kind
    }

    /// The handler receiving this socket's callbacks.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::Relaxed)
    }

    /// Number of reconnect timers that fired and started an attempt.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }
}

impl<H: ChannelHandler> SocketInner<H> {
    /// Reports `true` if `generation` is still the open session and the
    /// handler has not been told already.
    fn announce_open(&self, generation: u64) {
        let announced = self.announced.lock();
        let still_open = {
            let machine = self.machine.lock();
            machine.is_current(generation) && machine.state() == ChannelState::Open
        };
        if still_open && !announced.replace(true) {
            tracing::info!(channel = %self.options.kind, "channel open");
            self.handler.on_status(true);
        }
    }

    /// Runs the close transition for `generation` and reports `false` if
    /// the session had been announced open.
    fn close_session(&self, generation: u64) -> CloseOutcome {
        let announced = self.announced.lock();
        let outcome = self.machine.lock().on_close(generation);
        if let CloseOutcome::Reconnect { was_open, .. } = outcome {
            self.outbound.lock().take();
            if was_open {
                tracing::info!(channel = %self.options.kind, "channel closed");
            }
            if announced.replace(false) {
                self.handler.on_status(false);
            }
        }
        outcome
    }
}

/// Driver loop for one session. Exits on teardown or when superseded.
async fn drive<H: ChannelHandler>(inner: Arc<SocketInner<H>>, generation: u64) {
    let kind = inner.options.kind;

    loop {
        run_connection(&inner, generation).await;

        let CloseOutcome::Reconnect { delay, .. } = inner.close_session(generation) else {
            break;
        };

        tracing::info!(
            channel = %kind,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        tokio::time::sleep(delay).await;

        if !inner.machine.lock().on_retry(generation) {
            break;
        }
        inner.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    tracing::debug!(channel = %kind, generation, "driver exited");
}

/// Connects once and pumps frames until the connection ends for any reason.
async fn run_connection<H: ChannelHandler>(inner: &Arc<SocketInner<H>>, generation: u64) {
    let kind = inner.options.kind;
    let timeout = inner.options.connect_timeout;

    inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(channel = %kind, url = %inner.options.url, "connecting");

    let connected = tokio::time::timeout(timeout, inner.connector.connect(&inner.options.url)).await;
    let link = match connected {
        Ok(Ok(link)) => link,
        Ok(Err(err)) => {
            log_connect_failure(kind, &err);
            return;
        }
        Err(_) => {
            let err = LinkError::ConnectTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            };
            log_connect_failure(kind, &err);
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    {
        let mut machine = inner.machine.lock();
        if !machine.on_open(generation) {
            tracing::debug!(channel = %kind, "connection superseded before open");
            return;
        }
        *inner.outbound.lock() = Some(tx);
    }

    inner.announce_open(generation);

    pump(inner, link, rx).await;
}

/// Moves frames until the peer closes, the transport fails, or teardown
/// requests a close.
async fn pump<H: ChannelHandler>(
    inner: &Arc<SocketInner<H>>,
    link: Link,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let kind = inner.options.kind;
    let Link {
        mut sink,
        mut stream,
    } = link;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => inner.handler.on_message(&text),
                Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => inner.handler.on_message(&text),
                    Err(e) => inner.handler.on_undecodable(&LinkError::Decode(e.to_string())),
                },
                Some(Ok(Frame::Close)) | None => {
                    tracing::debug!(channel = %kind, "closed by peer");
                    break;
                }
                Some(Err(err)) => {
                    tracing::warn!(channel = %kind, error = %err, error_kind = err.kind(), "transport error, closing");
                    break;
                }
            },
            request = rx.recv() => match request {
                Some(Outbound::Text(text)) => {
                    match tokio::time::timeout(SEND_TIMEOUT, sink.send(text)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::warn!(channel = %kind, error = %err, error_kind = err.kind(), "write failed, closing");
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(channel = %kind, "write timed out, closing");
                            break;
                        }
                    }
                }
                Some(Outbound::Close) | None => break,
            },
        }
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::debug!(channel = %kind, "close handshake timed out");
    }
}

/// Waits for a driver released by teardown and aborts it if it is still
/// running after [`REAP_AFTER`].
async fn reap(mut driver: JoinHandle<()>, kind: ChannelKind) {
    if tokio::time::timeout(REAP_AFTER, &mut driver).await.is_err() {
        tracing::warn!(channel = %kind, "driver still running after teardown, aborting");
        driver.abort();
    }
}

fn log_connect_failure(kind: ChannelKind, err: &LinkError) {
    match err {
        LinkError::Rejected { status } => tracing::warn!(
            channel = %kind,
            status,
            error_kind = err.kind(),
            "handshake rejected"
        ),
        _ => tracing::warn!(channel = %kind, error = %err, error_kind = err.kind(), "connect failed"),
    }
}
