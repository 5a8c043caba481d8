//! In-process durable message substrate backed by fjall

pub mod broker;
pub mod store;

pub use broker::{Broker, BrokerSettings};
pub use store::{DeadLetter, FjallQueue, QueueError, QueuedMessage};
