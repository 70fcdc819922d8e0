//! Batch processor.

use super::item::{BatchFailure, BatchItem, ItemError, ItemStatus};
use super::stream::{BatchStream, StreamEvent};
use crate::config::duration_ms;
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of items in flight at once.
    pub concurrency: usize,
    /// Total attempts per item; `0` and `1` both mean a single attempt.
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts.
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    /// Throughput cap applied before every attempt.
    pub rate_limit: Option<RateLimiterConfig>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            rate_limit: None,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }
    pub fn with_retry_delay(mut self, d: Duration) -> Self {
        self.retry_delay = d;
        self
    }
    pub fn with_rate_limit(mut self, limit: RateLimiterConfig) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Sleep before re-queueing an item that has made `attempts` attempts.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        self.retry_delay.saturating_mul(1u32 << exp)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Number of re-queues; the final failed attempt is not counted.
    pub retries: usize,
}

#[derive(Debug)]
pub struct BatchOutcome<In, Out, E> {
    /// Outputs in completion order.
    pub results: Vec<Out>,
    pub failures: Vec<BatchFailure<In, E>>,
    pub duration: Duration,
    pub stats: BatchStats,
}

impl<In, Out, E> BatchOutcome<In, Out, E> {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.results.len()
    }
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
    pub fn success_rate(&self) -> f64 {
        if self.stats.total == 0 {
            0.0
        } else {
            self.results.len() as f64 / self.stats.total as f64
        }
    }
}

type ProgressFn<In, Out, E> = Arc<dyn Fn(usize, usize, &BatchItem<In, Out, E>) + Send + Sync>;
type ErrorFn<In, Out, E> = Arc<dyn Fn(&ItemError<E>, &BatchItem<In, Out, E>) -> bool + Send + Sync>;

/// Per-call options for [`BatchProcessor::process`] and [`BatchProcessor::stream`].
pub struct ProcessOptions<In, Out, E> {
    signal: Option<CancellationToken>,
    on_progress: Option<ProgressFn<In, Out, E>>,
    on_error: Option<ErrorFn<In, Out, E>>,
}

impl<In, Out, E> ProcessOptions<In, Out, E> {
    pub fn new() -> Self {
        Self {
            signal: None,
            on_progress: None,
            on_error: None,
        }
    }

    /// Items not yet started when `signal` is cancelled fail with [`ItemError::Aborted`].
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Called as `(resolved, total, item)` after every successful item.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize, &BatchItem<In, Out, E>) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Called after every terminal task failure; returning `false` fails all queued items
    /// with [`ItemError::Halted`]. In-flight items still finish.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ItemError<E>, &BatchItem<In, Out, E>) -> bool + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl<In, Out, E> Default for ProcessOptions<In, Out, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out, E> Clone for ProcessOptions<In, Out, E> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            on_progress: self.on_progress.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

type TaskFn<In, Out, E> = Arc<dyn Fn(In) -> BoxFuture<'static, Result<Out, E>> + Send + Sync>;

struct ProcessorInner<In, Out, E> {
    task: TaskFn<In, Out, E>,
    config: BatchConfig,
    limiter: Option<RateLimiter>,
}

/// Runs an async task over a collection with bounded concurrency, per-item retries with
/// exponential backoff and an optional rate limit.
///
/// Cloning is cheap and clones share the rate limiter.
pub struct BatchProcessor<In, Out, E> {
    inner: Arc<ProcessorInner<In, Out, E>>,
}

impl<In, Out, E> Clone for BatchProcessor<In, Out, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<In, Out, E> BatchProcessor<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(task: F, config: BatchConfig) -> Self
    where
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        let limiter = config.rate_limit.clone().map(RateLimiter::new);
        Self::build(task, config, limiter)
    }

    /// Like [`BatchProcessor::new`] but throttled by an existing limiter, which takes
    /// precedence over `config.rate_limit`.
    pub fn with_limiter<F, Fut>(task: F, config: BatchConfig, limiter: RateLimiter) -> Self
    where
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        Self::build(task, config, Some(limiter))
    }

    fn build<F, Fut>(task: F, mut config: BatchConfig, limiter: Option<RateLimiter>) -> Self
    where
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        if config.concurrency == 0 {
            tracing::warn!("batch concurrency must be at least 1, using 1");
            config.concurrency = 1;
        }
        let task: TaskFn<In, Out, E> = Arc::new(move |input| task(input).boxed());
        Self {
            inner: Arc::new(ProcessorInner {
                task,
                config,
                limiter,
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.inner.limiter.as_ref()
    }

    /// Process every input and wait until all of them are resolved.
    ///
    /// Never fails as a whole: terminal item failures are listed in
    /// [`BatchOutcome::failures`].
    pub async fn process<I>(&self, inputs: I, opts: ProcessOptions<In, Out, E>) -> BatchOutcome<In, Out, E>
    where
        I: IntoIterator<Item = In>,
    {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(Arc::clone(&self.inner), inputs, opts);
        tracing::info!(
            total = scheduler.stats.total,
            concurrency = self.inner.config.concurrency,
            "batch started"
        );

        let mut results = Vec::new();
        let mut failures = Vec::new();
        while let Some(mut item) = scheduler.next().await {
            if let Some(output) = item.output.take() {
                results.push(output);
            } else if let Some(failure) = item.into_failure() {
                failures.push(failure);
            }
        }

        let duration = start.elapsed();
        let stats = scheduler.stats;
        tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            retries = stats.retries,
            duration_ms = duration.as_millis() as u64,
            "batch finished"
        );
        BatchOutcome {
            results,
            failures,
            duration,
            stats,
        }
    }

    /// Yield items as they resolve.
    ///
    /// The scheduler runs on a spawned task and hands items over through a channel bounded
    /// by the concurrency limit, so it never runs far ahead of the consumer. While the
    /// consumer lags, attempts already in flight keep running but no new ones start.
    /// Dropping or closing the stream stops new work from being scheduled.
    pub fn stream<I>(&self, inputs: I, opts: ProcessOptions<In, Out, E>) -> BatchStream<In, Out, E>
    where
        I: IntoIterator<Item = In>,
    {
        let mut scheduler = Scheduler::new(Arc::clone(&self.inner), inputs, opts);
        let total = scheduler.stats.total;
        let (tx, rx) = tokio::sync::mpsc::channel(self.inner.config.concurrency);

        let producer = tokio::spawn(async move {
            while let Some(item) = scheduler.next().await {
                let event = StreamEvent {
                    item,
                    completed: scheduler.resolved,
                    total,
                };
                let permit = loop {
                    tokio::select! {
                        permit = tx.reserve() => break permit,
                        _ = scheduler.progress(), if !scheduler.in_flight.is_empty() => {}
                    }
                };
                match permit {
                    Ok(permit) => permit.send(event),
                    Err(_) => {
                        tracing::debug!(
                            resolved = scheduler.resolved,
                            total,
                            "batch stream closed by consumer"
                        );
                        scheduler.shutdown().await;
                        return;
                    }
                }
            }
        });

        BatchStream::new(rx, total, producer)
    }
}

enum Attempt<In, Out, E> {
    Settled(BatchItem<In, Out, E>),
    Retry(BatchItem<In, Out, E>),
}

/// Work queue plus the set of in-flight attempts of one `process`/`stream` call.
struct Scheduler<In, Out, E> {
    inner: Arc<ProcessorInner<In, Out, E>>,
    opts: ProcessOptions<In, Out, E>,
    queue: VecDeque<BatchItem<In, Out, E>>,
    in_flight: FuturesUnordered<BoxFuture<'static, Attempt<In, Out, E>>>,
    /// Terminal items waiting to be handed out.
    ready: VecDeque<BatchItem<In, Out, E>>,
    /// Set once the error handler stops the batch.
    halted: bool,
    resolved: usize,
    stats: BatchStats,
}

impl<In, Out, E> Scheduler<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Send + 'static,
{
    fn new<I>(inner: Arc<ProcessorInner<In, Out, E>>, inputs: I, opts: ProcessOptions<In, Out, E>) -> Self
    where
        I: IntoIterator<Item = In>,
    {
        let queue: VecDeque<_> = inputs
            .into_iter()
            .enumerate()
            .map(|(id, input)| BatchItem::new(id, input))
            .collect();
        let stats = BatchStats {
            total: queue.len(),
            ..BatchStats::default()
        };
        Self {
            inner,
            opts,
            queue,
            in_flight: FuturesUnordered::new(),
            ready: VecDeque::new(),
            halted: false,
            resolved: 0,
            stats,
        }
    }

    fn fill(&mut self) {
        while self.in_flight.len() < self.inner.config.concurrency {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            let attempt = run_attempt(Arc::clone(&self.inner), self.opts.signal.clone(), item);
            self.in_flight.push(attempt.boxed());
        }
    }

    /// Next terminal item, or `None` once every item has been handed out.
    async fn next(&mut self) -> Option<BatchItem<In, Out, E>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(self.record(item));
            }
            self.fill();
            let attempt = self.in_flight.next().await?;
            self.settle(attempt);
        }
    }

    /// Drive in-flight attempts until one finishes, without starting new ones.
    async fn progress(&mut self) {
        if let Some(attempt) = self.in_flight.next().await {
            self.settle(attempt);
        }
    }

    fn settle(&mut self, attempt: Attempt<In, Out, E>) {
        match attempt {
            Attempt::Retry(mut item) if self.halted => {
                item.fail(ItemError::Halted);
                self.ready.push_back(item);
            }
            Attempt::Retry(item) => {
                self.stats.retries += 1;
                self.queue.push_back(item);
            }
            Attempt::Settled(item) => {
                let keep_going = self.consult_error_handler(&item);
                self.ready.push_back(item);
                if !keep_going {
                    self.halt();
                }
            }
        }
    }

    /// Whether the batch may continue after `item` settled.
    fn consult_error_handler(&self, item: &BatchItem<In, Out, E>) -> bool {
        let Some(error) = item.error.as_ref() else {
            return true;
        };
        if matches!(error, ItemError::Aborted | ItemError::Halted) {
            return true;
        }
        tracing::warn!(item = item.id, attempts = item.attempts, "batch item failed");
        self.opts
            .on_error
            .as_ref()
            .map_or(true, |on_error| on_error(error, item))
    }

    fn halt(&mut self) {
        self.halted = true;
        tracing::debug!(remaining = self.queue.len(), "error handler stopped the batch");
        for mut item in self.queue.drain(..) {
            item.fail(ItemError::Halted);
            self.ready.push_back(item);
        }
    }

    fn record(&mut self, item: BatchItem<In, Out, E>) -> BatchItem<In, Out, E> {
        self.resolved += 1;
        if item.status == ItemStatus::Completed {
            self.stats.succeeded += 1;
            if let Some(on_progress) = self.opts.on_progress.as_ref() {
                on_progress(self.resolved, self.stats.total, &item);
            }
        } else {
            self.stats.failed += 1;
        }
        item
    }

    /// Stop scheduling and let in-flight attempts run to completion.
    async fn shutdown(&mut self) {
        self.queue.clear();
        self.ready.clear();
        while self.in_flight.next().await.is_some() {}
    }
}

async fn run_attempt<In, Out, E>(
    inner: Arc<ProcessorInner<In, Out, E>>,
    signal: Option<CancellationToken>,
    mut item: BatchItem<In, Out, E>,
) -> Attempt<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Send + 'static,
{
    if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
        item.fail(ItemError::Aborted);
        return Attempt::Settled(item);
    }

    if let Some(limiter) = inner.limiter.as_ref() {
        let acquired = match signal.as_ref() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    item.fail(ItemError::Aborted);
                    return Attempt::Settled(item);
                }
                res = limiter.acquire() => res,
            },
            None => limiter.acquire().await,
        };
        if let Err(e) = acquired {
            item.fail(ItemError::Limiter(e));
            return Attempt::Settled(item);
        }
    }

    item.begin_attempt();
    let task = Arc::clone(&inner.task);
    let input = item.input.clone();
    let outcome = AssertUnwindSafe(async move { task(input).await })
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(output)) => {
            item.complete(output);
            return Attempt::Settled(item);
        }
        Ok(Err(e)) => ItemError::Task(e),
        Err(payload) => ItemError::Panicked(panic_message(payload.as_ref())),
    };

    if item.attempts < inner.config.max_retries {
        item.status = ItemStatus::Pending;
        let delay = inner.config.backoff(item.attempts);
        tracing::debug!(
            item = item.id,
            attempt = item.attempts,
            delay_ms = delay.as_millis() as u64,
            "batch item failed, retrying"
        );
        match signal.as_ref() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    item.fail(ItemError::Aborted);
                    return Attempt::Settled(item);
                }
                _ = tokio::time::sleep(delay) => {}
            },
            None => tokio::time::sleep(delay).await,
        }
        return Attempt::Retry(item);
    }

    item.fail(error);
    Attempt::Settled(item)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
