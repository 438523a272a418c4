//! # Braze Framework
//!
//! The event layer of the braze bot library: inbound update normalization,
//! the per-event [`Context`] with its reply surface, and an ordered,
//! filter-gated handler [`Dispatcher`].
//!
//! This layer is where raw update JSON turns into application semantics:
//! addressed commands, deep-link payloads, resumed conversations, and
//! metadata recovered from hidden markup all resolve here before any
//! handler runs.

pub mod context;
pub mod dispatch;
pub mod preprocess;

pub use context::{Context, ContextKind, Conversations, Reply, ReplyTarget};
pub use dispatch::{
    DispatchResult, Dispatcher, Filter, FnHandler, Handler, Outcome, UpdateDispatcher, filters,
    handler,
};
pub use preprocess::{Preprocessor, get_command};
