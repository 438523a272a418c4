//! Poll-loop orchestration and serialized job execution.
//!
//! One [`Scheduler`] drives any number of bots. Each added bot gets its own
//! long-poll task that fetches update batches and enqueues one job per
//! update onto the shared [`DelayQueue`]; [`Scheduler::run`] is the single
//! consumer, so handlers for every bot execute one at a time in deadline
//! order. Applications can schedule their own jobs onto the same queue,
//! immediately, after a delay, or at the next hourly mark.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use braze_client::Bot;
use braze_core::ApiError;
use braze_framework::UpdateDispatcher;

use crate::backoff::Backoff;
use crate::config::PollConfig;
use crate::delay_queue::DelayQueue;

/// A unit of deferred work: invoked once, on the consumer, when due.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Drives poll tasks and consumes the shared job queue.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<DelayQueue<Job>>,
    active: Arc<Mutex<HashSet<i64>>>,
    cancel: CancellationToken,
    config: PollConfig,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: PollConfig) -> Self {
        Self {
            queue: Arc::new(DelayQueue::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Starts a poll task for `bot`, routing its updates through
    /// `dispatcher`. Adding a bot that is already polling is a no-op.
    pub fn add(&self, bot: Arc<Bot>, dispatcher: Arc<UpdateDispatcher>) {
        let bot_id = bot.id();
        if !self.active.lock().insert(bot_id) {
            warn!(bot_id, "bot is already being polled");
            return;
        }
        tokio::spawn(poll_loop(
            bot,
            dispatcher,
            self.queue.clone(),
            self.active.clone(),
            self.cancel.clone(),
            self.config.clone(),
        ));
    }

    /// Unregisters a bot. Its poll task winds down on its next iteration;
    /// updates fetched after removal are dropped undispatched.
    pub fn remove(&self, bot_id: i64) {
        if self.active.lock().remove(&bot_id) {
            info!(bot_id, "bot removed from polling");
        }
    }

    /// Enqueues a job that runs as soon as the consumer reaches it.
    pub fn schedule<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.queue.put(box_job(f));
    }

    /// Enqueues a job that becomes due after `delay`.
    pub fn schedule_after<F, Fut>(&self, delay: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.queue.put_after(delay, box_job(f));
    }

    /// Enqueues a job for the next wall-clock `offset` past the hour. The
    /// job re-schedules itself if it wants to recur.
    pub fn schedule_hourly<F, Fut>(&self, offset: Duration, jitter: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.queue.put_hourly(offset, jitter, box_job(f));
    }

    /// Consumes the queue until [`Scheduler::stop`] is called.
    ///
    /// Each job runs on its own task and is awaited before the next one
    /// starts, so a panicking handler takes down only its job.
    pub async fn run(&self) {
        info!("scheduler started");
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = self.queue.get() => job,
            };
            match tokio::spawn(job()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "job failed"),
                Err(err) => error!(error = %err, "job aborted"),
            }
        }
        info!("scheduler stopped");
    }

    /// Signals every poll task and the consumer to wind down. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn box_job<F, Fut>(f: F) -> Job
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// One bot's long-poll task.
///
/// Acknowledgment is implicit: each fetched update advances the offset sent
/// with the next `getUpdates` call, so an update is re-delivered after a
/// crash unless a later poll confirmed it.
async fn poll_loop(
    bot: Arc<Bot>,
    dispatcher: Arc<UpdateDispatcher>,
    queue: Arc<DelayQueue<Job>>,
    active: Arc<Mutex<HashSet<i64>>>,
    cancel: CancellationToken,
    config: PollConfig,
) {
    let bot_id = bot.id();
    let mut offset: Option<i64> = None;
    let mut backoff = Backoff::new(config.backoff_base(), config.backoff_ceiling());
    info!(bot_id, "poll loop started");

    loop {
        if cancel.is_cancelled() || !active.lock().contains(&bot_id) {
            break;
        }

        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            result = bot.get_updates(offset, config.poll_timeout()) => result,
        };

        match batch {
            Ok(updates) => {
                backoff.reset();
                let keep = active.lock().contains(&bot_id);
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if !keep {
                        continue;
                    }
                    let bot = bot.clone();
                    let dispatcher = dispatcher.clone();
                    queue.put(Box::new(move || {
                        Box::pin(async move {
                            dispatcher.handle_update(bot, update).await?;
                            Ok(())
                        })
                    }));
                }
            }
            // A quiet long-poll window; re-poll immediately.
            Err(ApiError::Timeout) => {
                debug!(bot_id, "long poll idle");
                backoff.reset();
            }
            Err(err @ (ApiError::Conflict { .. } | ApiError::Unauthorized { .. })) => {
                warn!(bot_id, error = %err, "poll rejected");
                let wait = backoff.next();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(err) => {
                error!(bot_id, error = %err, "poll failed");
                let wait = backoff.next();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    active.lock().remove(&bot_id);
    info!(bot_id, "poll loop stopped");
}
