//! Connection registry: the consumer-facing surface of the crate.

pub mod manager;
pub mod subscribers;

pub use manager::{ConnectionManager, LinkStats};
pub use subscribers::{Callback, SubscriberList, Subscription};
