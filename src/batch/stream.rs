use super::item::{BatchItem, ItemStatus};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One resolved item plus the batch progress at the moment it resolved.
#[derive(Debug)]
pub struct StreamEvent<In, Out, E> {
    pub item: BatchItem<In, Out, E>,
    /// Items resolved so far, this one included.
    pub completed: usize,
    pub total: usize,
}

impl<In, Out, E> StreamEvent<In, Out, E> {
    pub fn is_success(&self) -> bool {
        self.item.status == ItemStatus::Completed
    }
}

/// Items of a batch in completion order, returned by
/// [`BatchProcessor::stream`](super::BatchProcessor::stream).
pub struct BatchStream<In, Out, E> {
    rx: mpsc::Receiver<StreamEvent<In, Out, E>>,
    total: usize,
    producer: JoinHandle<()>,
}

impl<In, Out, E> BatchStream<In, Out, E> {
    pub(crate) fn new(
        rx: mpsc::Receiver<StreamEvent<In, Out, E>>,
        total: usize,
        producer: JoinHandle<()>,
    ) -> Self {
        Self { rx, total, producer }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Stop scheduling new items. Items already buffered can still be read; attempts
    /// already running finish in the background.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// True once every item has been scheduled and the producer exited.
    pub fn is_finished(&self) -> bool {
        self.producer.is_finished()
    }
}

impl<In, Out, E> Unpin for BatchStream<In, Out, E> {}

impl<In, Out, E> Stream for BatchStream<In, Out, E> {
    type Item = StreamEvent<In, Out, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
