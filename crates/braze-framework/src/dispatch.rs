//! Handler registration and ordered dispatch.
//!
//! A [`Dispatcher`] holds (handler, filter) pairs in registration order.
//! Dispatching a [`Context`] walks the list: entries whose filter rejects
//! are skipped, and the first handler that reports [`Outcome::Handled`]
//! wins. A dispatcher is itself a [`Handler`], so routing tables nest.

use std::sync::Arc;

use braze_client::Bot;
use braze_core::Update;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::context::{Context, ContextKind};
use crate::preprocess::Preprocessor;

/// What a handler did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event was consumed, optionally with a value for the caller.
    Handled(Option<Value>),
    /// Not this handler's event; dispatch keeps looking.
    Unhandled,
}

impl Outcome {
    /// Consumed, with nothing to report.
    pub fn handled() -> Self {
        Self::Handled(None)
    }
}

pub type DispatchResult = anyhow::Result<Outcome>;

/// An async event consumer.
///
/// Errors abort dispatch for this event and surface to the runtime;
/// returning [`Outcome::Unhandled`] instead lets later entries try.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DispatchResult>;
}

/// Decides whether an entry sees a given context at all.
pub type Filter = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Adapts a closure into a [`Handler`].
///
/// The closure inspects the context synchronously and returns an owned
/// future, so clone whatever the async body needs up front.
pub struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Context) -> BoxFuture<'static, DispatchResult> + Send + Sync,
{
    fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DispatchResult> {
        (self.0)(ctx)
    }
}

/// Wraps a closure as a registrable handler.
pub fn handler<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Context) -> BoxFuture<'static, DispatchResult> + Send + Sync,
{
    FnHandler(f)
}

/// An ordered routing table of filtered handlers.
#[derive(Default)]
pub struct Dispatcher {
    entries: Vec<(Arc<dyn Handler>, Option<Filter>)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an unconditional handler.
    pub fn add(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.entries.push((Arc::new(handler), None));
        self
    }

    /// Registers a handler gated by an arbitrary filter.
    pub fn add_filtered(&mut self, handler: impl Handler + 'static, filter: Filter) -> &mut Self {
        self.entries.push((Arc::new(handler), Some(filter)));
        self
    }

    /// Registers a handler for one command name, message and callback
    /// events alike.
    pub fn add_command(&mut self, name: &str, handler: impl Handler + 'static) -> &mut Self {
        self.add_filtered(handler, filters::command(name))
    }

    /// Registers a handler keyed on the first word of the normalized text.
    pub fn add_prefix(&mut self, prefix: &str, handler: impl Handler + 'static) -> &mut Self {
        self.add_filtered(handler, filters::prefix(prefix))
    }

    /// Registers an inline-query handler; an empty prefix matches every
    /// query.
    pub fn add_inline(&mut self, prefix: &str, handler: impl Handler + 'static) -> &mut Self {
        self.add_filtered(handler, filters::inline_prefix(prefix))
    }

    /// Runs the table against one context.
    pub async fn dispatch(&self, ctx: &Context) -> DispatchResult {
        for (handler, filter) in &self.entries {
            if let Some(filter) = filter
                && !filter(ctx)
            {
                continue;
            }
            match handler.handle(ctx).await? {
                Outcome::Handled(value) => return Ok(Outcome::Handled(value)),
                Outcome::Unhandled => {}
            }
        }
        Ok(Outcome::Unhandled)
    }
}

impl Handler for Dispatcher {
    fn handle<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DispatchResult> {
        Box::pin(self.dispatch(ctx))
    }
}

/// The standard context filters used by [`Dispatcher`] registration
/// shorthands.
pub mod filters {
    use super::{Arc, Context, ContextKind, Filter};

    // Normalized commands are already lowercase; a mixed-case name here
    // would never match, deliberately.
    pub fn command(name: &str) -> Filter {
        let name = name.to_owned();
        Arc::new(move |ctx: &Context| {
            matches!(ctx.kind, ContextKind::Message | ContextKind::Callback)
                && ctx.command.as_deref() == Some(name.as_str())
        })
    }

    pub fn prefix(prefix: &str) -> Filter {
        let prefix = prefix.to_owned();
        Arc::new(move |ctx: &Context| {
            matches!(ctx.kind, ContextKind::Message | ContextKind::Callback)
                && ctx.prefix == prefix
        })
    }

    pub fn inline_prefix(prefix: &str) -> Filter {
        let prefix = prefix.to_owned();
        Arc::new(move |ctx: &Context| {
            ctx.kind == ContextKind::InlineQuery && (prefix.is_empty() || ctx.prefix == prefix)
        })
    }
}

/// Ties normalization and dispatch together for the runtime.
///
/// One instance serves every bot in a process; conversation state lives in
/// the shared [`Preprocessor`].
pub struct UpdateDispatcher {
    preprocessor: Preprocessor,
    dispatcher: Dispatcher,
}

impl UpdateDispatcher {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            preprocessor: Preprocessor::new(),
            dispatcher,
        }
    }

    /// Normalizes and dispatches one update end to end.
    pub async fn handle_update(&self, bot: Arc<Bot>, update: Update) -> DispatchResult {
        let me = bot.me().await?;
        let update_id = update.update_id;
        let Some(ctx) = self.preprocessor.process(bot, &me, update) else {
            debug!(update_id, "update shape not dispatchable");
            return Ok(Outcome::Unhandled);
        };
        let outcome = self.dispatcher.dispatch(&ctx).await?;
        if outcome == Outcome::Unhandled {
            debug!(update_id, command = ?ctx.command, "no handler claimed update");
        }
        Ok(outcome)
    }
}
