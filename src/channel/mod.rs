//! Channel layer: per-channel state machine, physical transport, and the
//! two specialized channels.
//!
//! Each channel is one [`TransportSocket`] driven by its own task. The
//! snapshot channel only reads; the command channel only writes.

pub mod command_channel;
pub mod snapshot_channel;
pub mod socket;
pub mod state;
pub mod transport;

pub use command_channel::CommandChannel;
pub use snapshot_channel::{LinkListener, SnapshotChannel};
pub use socket::{ChannelHandler, SocketOptions, TransportSocket};
pub use state::{Backoff, ChannelMachine, ChannelState, CloseOutcome};
pub use transport::{Connector, Frame, Link, WsConnector};
