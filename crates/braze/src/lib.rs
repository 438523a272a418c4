//! # Braze
//!
//! A typed long-poll client and dispatch framework for message bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐    ┌──────────────┐    ┌────────────┐    ┌──────────┐
//! │ Scheduler │───▶│ Preprocessor │───▶│ Dispatcher │───▶│ Handlers │
//! │ (polling) │    │ (normalize)  │    │ (route)    │    │ (yours)  │
//! └───────────┘    └──────────────┘    └────────────┘    └──────────┘
//! ```
//!
//! - **client**: token-validated HTTP access to the remote bot API
//! - **framework**: update normalization, per-event [`Context`], routing
//! - **runtime**: per-bot poll loops and the serialized job queue
//! - **core**: the wire model, error taxonomy, and payload codecs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use braze::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     braze::runtime::logging::init_default()?;
//!
//!     let bot = Arc::new(Bot::new(ApiClient::new()?, std::env::var("BOT_TOKEN")?)?);
//!
//!     let mut dispatcher = Dispatcher::new();
//!     dispatcher.add_command("echo", handler(|ctx: &Context| {
//!         let ctx_text = ctx.text.clone();
//!         Box::pin(async move { Ok(Outcome::Handled(Some(ctx_text.into()))) })
//!     }));
//!
//!     let scheduler = Scheduler::default();
//!     scheduler.add(bot, Arc::new(UpdateDispatcher::new(dispatcher)));
//!     scheduler.run().await;
//!     Ok(())
//! }
//! ```

pub use braze_client as client;
pub use braze_core as core;
pub use braze_framework as framework;
pub use braze_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use braze_client::{ApiClient, Bot, InputFile};
    pub use braze_core::{ApiError, ApiResult, InlineKeyboardButton, Update, User};
    pub use braze_framework::{
        Context, ContextKind, DispatchResult, Dispatcher, Handler, Outcome, Reply, ReplyTarget,
        UpdateDispatcher, handler,
    };
    pub use braze_runtime::{PollConfig, Scheduler};
}
