use std::{mem, time::Duration};

use courier_common::internal;
use futures_util::{Stream, StreamExt};
use tokio::time::Instant;

use crate::BatchConfig;

/// Groups a stream of items into batches.
///
/// A batch is flushed as soon as it holds `max_batch_size` items, or once no
/// item has arrived for `flush_timeout`. The buffer is swapped out on flush,
/// so the next batch starts filling while the previous one is being handled.
/// Empty buffers are never flushed.
#[derive(Debug)]
pub struct BatchCollector<T> {
    max_batch_size: usize,
    flush_timeout: Duration,
    buffer: Vec<T>,
}

impl<T> BatchCollector<T> {
    #[must_use]
    pub fn new(config: &BatchConfig) -> Self {
        let max_batch_size = config.max_batch_size.max(1);
        Self {
            max_batch_size,
            flush_timeout: config.flush_timeout(),
            buffer: Vec::with_capacity(max_batch_size),
        }
    }

    #[must_use]
    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Items buffered but not yet flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append `item`, returning the full batch if this filled it.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.buffer.push(item);
        (self.buffer.len() >= self.max_batch_size).then(|| self.detach())
    }

    /// Detach whatever is buffered, if anything.
    pub fn take(&mut self) -> Option<Vec<T>> {
        (!self.buffer.is_empty()).then(|| self.detach())
    }

    fn detach(&mut self) -> Vec<T> {
        mem::replace(&mut self.buffer, Vec::with_capacity(self.max_batch_size))
    }

    /// Collect `items` until the stream ends, handing every batch to `flush`.
    ///
    /// `flush` must not wait on the batch being processed; spawn the work
    /// instead. Whatever is buffered when the stream ends is flushed before
    /// returning.
    pub async fn run<S, F>(mut self, mut items: S, mut flush: F)
    where
        S: Stream<Item = T> + Unpin,
        F: FnMut(Vec<T>),
    {
        let idle = tokio::time::sleep(self.flush_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                item = items.next() => {
                    let Some(item) = item else {
                        break;
                    };

                    idle.as_mut().reset(Instant::now() + self.flush_timeout);
                    if let Some(batch) = self.push(item) {
                        internal!("Batch full with {} items, flushing", batch.len());
                        flush(batch);
                    }
                }

                () = &mut idle => {
                    if let Some(batch) = self.take() {
                        internal!("Batch idle with {} items, flushing", batch.len());
                        flush(batch);
                    }
                    idle.as_mut().reset(Instant::now() + self.flush_timeout);
                }
            }
        }

        if let Some(batch) = self.take() {
            internal!("Stream ended with {} items, flushing", batch.len());
            flush(batch);
        }
    }
}
