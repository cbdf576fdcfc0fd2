//! Channel adapter contract and supervisor.
//!
//! A [`Channel`](traits::Channel) is a bidirectional connection to a chat
//! platform. The [`ChannelSupervisor`](supervisor::ChannelSupervisor) owns
//! the registered adapters, runs their receive loops, and dispatches
//! outbound messages to the right adapter by name.

pub mod supervisor;
pub mod traits;

pub use supervisor::ChannelSupervisor;
pub use traits::{
    CapabilityScope, Channel, ChannelCapabilities, ChannelError, ChannelHost, ChannelStatus,
    StreamMessage,
};
