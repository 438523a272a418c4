//! # Braze Runtime
//!
//! The orchestration layer of the braze bot library: per-bot long-poll
//! tasks, the shared deadline-ordered job queue, and the single consumer
//! that serializes handler execution across every bot in the process.
//!
//! The runtime also owns the ambient concerns: poll tunables via
//! [`PollConfig`], retry pacing via [`Backoff`], and `tracing` setup via
//! [`logging`].

pub mod backoff;
pub mod config;
pub mod delay_queue;
pub mod logging;
pub mod scheduler;

pub use backoff::Backoff;
pub use config::PollConfig;
pub use delay_queue::DelayQueue;
pub use scheduler::{Job, Scheduler};
