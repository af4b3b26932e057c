//! Adapters: concrete implementations of the outbound ports.

pub mod memory;
pub mod reconnect;
pub mod scheduler;

pub use memory::{loopback, InMemoryChannel, InMemoryConnector, InMemoryResponseSource, InMemoryServer};
pub use reconnect::ReconnectingChannelProvider;
pub use scheduler::TokioScheduler;
