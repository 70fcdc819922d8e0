//! Batch item and its terminal error.

use std::fmt;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// Why an item ended up in `failures`.
#[derive(Debug)]
pub enum ItemError<E> {
    /// The task returned an error on its last allowed attempt.
    Task(E),
    /// The task future panicked on its last allowed attempt.
    Panicked(String),
    /// The abort signal fired before the item started.
    Aborted,
    /// An `on_error` callback stopped the batch before the item started.
    Halted,
    /// The rate-limiter wait was interrupted by a reset.
    Limiter(crate::Error),
}

impl<E> ItemError<E> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ItemError::Aborted)
    }

    pub fn task_error(&self) -> Option<&E> {
        match self {
            ItemError::Task(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_task_error(self) -> Option<E> {
        match self {
            ItemError::Task(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ItemError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::Task(e) => fmt::Display::fmt(e, f),
            ItemError::Panicked(msg) => write!(f, "task panicked: {}", msg),
            ItemError::Aborted => f.write_str("Aborted"),
            ItemError::Halted => f.write_str("batch halted by error handler"),
            ItemError::Limiter(e) => write!(f, "rate limiter: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ItemError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ItemError::Task(e) => Some(e),
            ItemError::Limiter(e) => Some(e),
            _ => None,
        }
    }
}

/// One unit of work inside a batch.
///
/// Exactly one of `output` / `error` is set once `status` is terminal.
#[derive(Debug)]
pub struct BatchItem<In, Out, E> {
    /// Position of the input in the submitted collection.
    pub id: usize,
    pub input: In,
    pub status: ItemStatus,
    pub output: Option<Out>,
    pub error: Option<ItemError<E>>,
    pub attempts: u32,
    /// Start of the most recent attempt.
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

impl<In, Out, E> BatchItem<In, Out, E> {
    pub fn new(id: usize, input: In) -> Self {
        Self {
            id,
            input,
            status: ItemStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.status = ItemStatus::Running;
        self.started_at = Some(Instant::now());
    }

    pub(crate) fn complete(&mut self, output: Out) {
        self.status = ItemStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Instant::now());
    }

    pub(crate) fn fail(&mut self, error: ItemError<E>) {
        self.status = ItemStatus::Failed;
        self.output = None;
        self.error = Some(error);
        self.completed_at = Some(Instant::now());
    }

    /// Wall time of the latest attempt, once resolved.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some(c.saturating_duration_since(s)),
            _ => None,
        }
    }

    /// `None` unless the item has an error recorded.
    pub fn into_failure(self) -> Option<BatchFailure<In, E>> {
        let error = self.error?;
        Some(BatchFailure {
            id: self.id,
            input: self.input,
            error,
            attempts: self.attempts,
        })
    }
}

/// A failed item as reported in a batch outcome.
#[derive(Debug)]
pub struct BatchFailure<In, E> {
    pub id: usize,
    pub input: In,
    pub error: ItemError<E>,
    pub attempts: u32,
}
