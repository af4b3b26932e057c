//! Service layer: wires the domain policy to the ports.

pub mod dispatcher;
pub mod future;
pub mod pending;
pub mod transport;

pub use dispatcher::{ResponseDispatcher, ResponseListener};
pub use future::ResponseFuture;
pub use pending::{expiry_sweep_task, PendingRequestStore, PendingStats, TransportMetrics};
pub use transport::Transport;
