//! Ports: trait seams between the transport and its collaborators.

pub mod inbound;
pub mod outbound;

pub use inbound::ResponseSink;
pub use outbound::{
    Channel, ChannelProvider, Connector, InboundMessage, ResponseSource, ScheduledTask, Scheduler,
};
