//! Typed events delivered to registered listeners.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Snapshot;

/// Which of the two logical channels an event or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Inbound snapshot feed.
    Live,
    /// Outbound command feed.
    Command,
}

impl ChannelKind {
    /// Returns the channel name as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once per successfully decoded inbound snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    /// The decoded snapshot, shared with the registry's "latest" slot.
    pub snapshot: Arc<Snapshot>,
    /// Delivery sequence number, starting at 1 and increasing by one per
    /// delivered snapshot over the manager's lifetime.
    pub sequence: u64,
    /// When the frame was decoded.
    pub received_at: DateTime<Utc>,
}

/// Emitted on every connectivity transition of a channel, and once on
/// registration with the status at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    /// Channel whose status changed.
    pub channel: ChannelKind,
    /// `true` while the channel is open.
    pub connected: bool,
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Creates a status event stamped with the current time.
    #[must_use]
    pub fn now(channel: ChannelKind, connected: bool) -> Self {
        Self {
            channel,
            connected,
            timestamp: Utc::now(),
        }
    }
}
