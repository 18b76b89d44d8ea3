//! Domain layer: snapshot and command payloads, typed events, and
//! subscription identity.
//!
//! Everything here is plain data. The channel and registry layers move
//! these values around; nothing in this module touches a socket.

pub mod command;
pub mod events;
pub mod snapshot;
pub mod subscription_id;

pub use command::{Command, CommandKind, TaxType};
pub use events::{ChannelKind, SnapshotEvent, StatusEvent};
pub use snapshot::{Snapshot, Timestamp};
pub use subscription_id::SubscriptionId;
