//! Outbound command channel.
//!
//! Serializes [`Command`]s and transmits them while the socket is open.
//! When it is not, the command is dropped with a warning; nothing is queued
//! for later.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;

use super::snapshot_channel::LinkListener;
use super::socket::{ChannelHandler, SocketOptions, TransportSocket};
use super::state::ChannelState;
use super::transport::Connector;
use crate::domain::{ChannelKind, Command};
use crate::error::LinkError;

/// [`ChannelHandler`] for the command socket. Inbound traffic is not part
/// of the protocol and is ignored.
pub struct CommandHandler<L: LinkListener> {
    listener: Arc<L>,
}

impl<L: LinkListener> std::fmt::Debug for CommandHandler<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler").finish_non_exhaustive()
    }
}

impl<L: LinkListener> ChannelHandler for CommandHandler<L> {
    fn on_status(&self, connected: bool) {
        self.listener.status_changed(ChannelKind::Command, connected);
    }

    fn on_message(&self, raw: &str) {
        tracing::debug!(
            channel = %ChannelKind::Command,
            bytes = raw.len(),
            "ignoring inbound frame on command channel"
        );
    }
}

/// Outbound-only channel against the command endpoint.
pub struct CommandChannel<L: LinkListener> {
    socket: TransportSocket<CommandHandler<L>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl<L: LinkListener> std::fmt::Debug for CommandChannel<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("socket", &self.socket)
            .field("sent", &self.sent.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<L: LinkListener> CommandChannel<L> {
    /// Creates a closed command channel. `options.url` must already carry
    /// the credential (see [`crate::config::LinkConfig::command_endpoint`]).
    #[must_use]
    pub fn new(
        options: SocketOptions,
        connector: Arc<dyn Connector>,
        listener: Arc<L>,
        runtime: Handle,
    ) -> Self {
        Self {
            socket: TransportSocket::new(
                SocketOptions {
                    kind: ChannelKind::Command,
                    ..options
                },
                connector,
                CommandHandler { listener },
                runtime,
            ),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
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

    /// Serializes and transmits `command`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotReady`] if the channel is not open, or
    /// [`LinkError::Encode`] if the command cannot be serialized. Either
    /// way the command is dropped and a warning is logged.
    pub fn send(&self, command: &Command) -> Result<(), LinkError> {
        let result = command.encode().and_then(|text| self.socket.send(text));
        match &result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(channel = %ChannelKind::Command, command = %command.kind, "command sent");
            }
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel = %ChannelKind::Command,
                    command = %command.kind,
                    error = %err,
                    error_kind = err.kind(),
                    "command dropped"
                );
            }
        }
        result
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.socket.state()
    }

    /// Commands handed to the socket.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Commands dropped because the channel was down or encoding failed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reconnect attempts started by the backoff timer.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.socket.reconnects()
    }
}
