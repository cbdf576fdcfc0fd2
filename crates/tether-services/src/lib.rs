//! Long-running services for the tether runtime.
//!
//! - [`cron`] -- durable scheduled jobs that synthesize inbound bus
//!   traffic on a timetable.
//! - [`binding`] -- the thread-binding registry mapping chat
//!   conversations to dedicated target sessions.

pub mod binding;
pub mod cron;
pub mod error;

pub use binding::ThreadBindingService;
pub use cron::CronService;
pub use error::{Result, ServiceError};
