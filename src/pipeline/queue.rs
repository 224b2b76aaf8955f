//! Unbounded multi-producer multi-consumer work queue.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// What a worker receives from the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    Item(T),
    /// No more work for the worker that receives it.
    Done,
}

/// FIFO queue shared by one producer and any number of workers.
///
/// Each worker stops after taking one [`Envelope::Done`], so the producer
/// finishes with exactly one marker per worker.
#[derive(Debug)]
pub struct WorkQueue<T> {
    sender: Sender<Envelope<T>>,
    receiver: Receiver<Envelope<T>>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Appends an item. Never blocks.
    pub fn put(&self, item: T) {
        self.send(Envelope::Item(item));
    }

    /// Appends `workers` termination markers.
    pub fn finish(&self, workers: usize) {
        for _ in 0..workers {
            self.send(Envelope::Done);
        }
    }

    /// Blocks until an envelope is available.
    pub fn take(&self) -> Envelope<T> {
        // The queue owns a receiver, so the channel never disconnects
        self.receiver.recv().unwrap_or(Envelope::Done)
    }

    /// Number of envelopes waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn send(&self, envelope: Envelope<T>) {
        // Cannot fail while `self.receiver` is alive
        let _ = self.sender.send(envelope);
    }
}
