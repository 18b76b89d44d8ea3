//! # watchtower-link
//!
//! Dual-channel live connection to a running economic simulation.
//!
//! One channel receives state snapshots pushed by the backend; the other
//! carries operator commands back. Each channel reconnects on its own with
//! exponential backoff, and a single [`registry::ConnectionManager`] fans
//! decoded snapshots and connectivity changes out to any number of
//! listeners.
//!
//! ## Architecture
//!
//! ```text
//! Consumers (callbacks, console)
//!     │
//!     ├── ConnectionManager (registry/)
//!     ├── SubscriberList / Subscription (registry/)
//!     │
//!     ├── SnapshotChannel ── decode ──► Snapshot (domain/)
//!     ├── CommandChannel ◄── encode ── Command (domain/)
//!     │
//!     ├── TransportSocket + ChannelMachine (channel/)
//!     │
//!     └── Connector (tokio-tungstenite)
//! ```

pub mod channel;
pub mod config;
pub mod console;
pub mod domain;
pub mod error;
pub mod registry;
