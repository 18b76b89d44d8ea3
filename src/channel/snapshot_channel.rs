//! Inbound snapshot channel.
//!
//! Decodes every frame into a [`Snapshot`] and hands it to a
//! [`LinkListener`]. Frames that fail to decode are logged and dropped; the
//! socket stays open and listeners never hear about them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;

use super::socket::{ChannelHandler, SocketOptions, TransportSocket};
use super::state::ChannelState;
use super::transport::Connector;
use crate::domain::{ChannelKind, Snapshot};
use crate::error::LinkError;

/// Longest prefix of an undecodable frame copied into the log.
const PREVIEW_CHARS: usize = 120;

/// Receives decoded snapshots and connectivity changes from the channels.
pub trait LinkListener: Send + Sync + 'static {
    /// A snapshot was decoded from the live channel.
    fn snapshot_received(&self, snapshot: Snapshot);

    /// A channel opened or closed.
    fn status_changed(&self, channel: ChannelKind, connected: bool);
}

/// [`ChannelHandler`] that decodes snapshots.
pub struct SnapshotHandler<L: LinkListener> {
    listener: Arc<L>,
    decode_failures: AtomicU64,
}

impl<L: LinkListener> std::fmt::Debug for SnapshotHandler<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotHandler")
            .field("decode_failures", &self.decode_failures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<L: LinkListener> SnapshotHandler<L> {
    fn record_failure(&self, err: &LinkError, raw: &str) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        let preview: String = raw.chars().take(PREVIEW_CHARS).collect();
        tracing::warn!(
            channel = %ChannelKind::Live,
            error = %err,
            error_kind = err.kind(),
            preview,
            "dropping undecodable snapshot"
        );
    }
}

impl<L: LinkListener> ChannelHandler for SnapshotHandler<L> {
    fn on_status(&self, connected: bool) {
        self.listener.status_changed(ChannelKind::Live, connected);
    }

    fn on_message(&self, raw: &str) {
        match Snapshot::decode(raw) {
            Ok(snapshot) => {
                tracing::trace!(tick = snapshot.tick, "snapshot decoded");
                self.listener.snapshot_received(snapshot);
            }
            Err(err) => self.record_failure(&err, raw),
        }
    }

    fn on_undecodable(&self, err: &LinkError) {
        self.record_failure(err, "<binary>");
    }
}

/// Inbound-only channel against the snapshot endpoint.
pub struct SnapshotChannel<L: LinkListener> {
    socket: TransportSocket<SnapshotHandler<L>>,
}

impl<L: LinkListener> std::fmt::Debug for SnapshotChannel<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotChannel")
            .field("socket", &self.socket)
            .finish()
    }
}

impl<L: LinkListener> SnapshotChannel<L> {
    /// Creates a closed snapshot channel reporting to `listener`.
    #[must_use]
    pub fn new(
        options: SocketOptions,
        connector: Arc<dyn Connector>,
        listener: Arc<L>,
        runtime: Handle,
    ) -> Self {
        let handler = SnapshotHandler {
            listener,
            decode_failures: AtomicU64::new(0),
        };
        Self {
            socket: TransportSocket::new(
                SocketOptions {
                    kind: ChannelKind::Live,
                    ..options
                },
                connector,
                handler,
                runtime,
            ),
        }
    }

    /// Starts connecting. No-op while live.
    pub fn open(&self) {
        self.socket.open();
    }

    /// Stops the channel and cancels any pending reconnect.
    pub fn teardown(&self) {
        self.socket.teardown();
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.socket.state()
    }

    /// Frames dropped because they did not decode.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.socket
            .handler()
            .decode_failures
            .load(Ordering::Relaxed)
    }

    /// Reconnect attempts started by the backoff timer.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.socket.reconnects()
    }
}
