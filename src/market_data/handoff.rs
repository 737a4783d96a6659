//! Bounded hand-off from the dispatch loop to a slow consumer thread.
//!
//! `push` never blocks. When the queue is full the event is dropped, logged
//! and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{FeedError, FeedResult};

pub struct Handoff<E> {
    name: String,
    tx: Option<Sender<E>>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

/// Spawns a named thread that feeds every queued event to `consumer`.
pub fn bounded<E, F>(name: &str, capacity: usize, mut consumer: F) -> FeedResult<Handoff<E>>
where
    E: Send + 'static,
    F: FnMut(E) + Send + 'static,
{
    if capacity == 0 {
        return Err(FeedError::Configuration(format!("handoff {name}: capacity must be at least 1")));
    }
    let (tx, rx) = channel::bounded::<E>(capacity);
    let worker = std::thread::Builder::new()
        .name(format!("handoff-{name}"))
        .spawn(move || {
            for event in rx {
                consumer(event);
            }
        })
        .map_err(|e| FeedError::Configuration(format!("handoff {name}: cannot spawn worker: {e}")))?;

    debug!(handoff = name, capacity, "handoff started");
    Ok(Handoff {
        name: name.to_string(),
        tx: Some(tx),
        dropped: Arc::new(AtomicU64::new(0)),
        worker: Some(worker),
    })
}

impl<E: Send + 'static> Handoff<E> {
    /// `false` when the event was dropped.
    pub fn push(&self, event: E) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!("lobx_feed_handoff_dropped_total", "handoff" => self.name.clone())
                    .increment(1);
                // one line per 1000 drops is enough to see a stuck consumer
                if dropped == 1 || dropped % 1_000 == 0 {
                    warn!(handoff = %self.name, dropped, "consumer is behind, dropping events");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(handoff = %self.name, "consumer thread has exited");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Callback that clones each event into the queue.
    pub fn into_callback(self) -> impl Fn(&E) + Send + Sync
    where
        E: Clone,
    {
        move |event: &E| {
            self.push(event.clone());
        }
    }
}

impl<E> Drop for Handoff<E> {
    // closing the sender lets the worker drain what is queued and exit
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(handoff = %self.name, "consumer thread panicked");
            }
        }
    }
}
