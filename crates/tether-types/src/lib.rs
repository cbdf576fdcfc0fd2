//! Core types for the tether assistant runtime.
//!
//! This is the leaf crate of the workspace: every other crate depends on
//! it and it depends on nothing internal. It defines the message/event
//! model, conversation sessions, cron job records, thread-binding records,
//! the shared configuration tree, and the typed error taxonomy.

pub mod binding;
pub mod config;
pub mod cron;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;

pub use error::{ErrorCode, Result, TetherError};
pub use event::{InboundMessage, OutboundMessage};
pub use message::{Message, Role, ToolCall};
pub use session::Session;
