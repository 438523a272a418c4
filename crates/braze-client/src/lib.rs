//! # Braze Client
//!
//! The remote-client layer of the braze bot library: a shared HTTP
//! connection pool, strict token validation, one generic named-operation
//! entry point with JSON and multipart encodings, and typed wrappers for
//! the operations the dispatch and reply paths rely on.
//!
//! Every remote failure is surfaced as a typed
//! [`ApiError`](braze_core::ApiError); nothing is retried or swallowed at
//! this layer — retry policy lives with the poll loop.

mod bot;
mod http;

pub use bot::{Bot, DEFAULT_TIMEOUT, EditMessageText, SendMessage};
pub use http::{ApiClient, InputFile};
