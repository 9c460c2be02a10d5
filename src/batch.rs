//! Batch coalescer for duplicate metadata requests.
//!
//! Identical GETATTR, SETATTR and READDIR requests arriving within a short
//! window are grouped by key; one backend call satisfies the whole group
//! and the result fans out to every waiter over its own oneshot channel.
//! Submissions flow over an mpsc channel into a single executor task, so
//! grouping needs no shared mutable state.
//!
//! A waiter that goes away merely drops its receiver — the fan-out skips
//! it and its siblings are unaffected. When batching is disabled the server
//! calls the backend directly with identical semantics.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Executor invoked once per flushed group.
pub type BatchExec<K, R> = Box<dyn Fn(K) -> BoxFuture<'static, R> + Send + Sync>;

/// Handle for submitting requests to the coalescer.
pub struct Batcher<K, R> {
    tx: mpsc::UnboundedSender<(K, oneshot::Sender<R>)>,
}

impl<K, R> Clone for Batcher<K, R> {
    fn clone(&self) -> Self {
        Batcher { tx: self.tx.clone() }
    }
}

impl<K, R> Batcher<K, R>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
    R: Clone + Send + 'static,
{
    /// Starts the executor task. A group is flushed when it reaches
    /// `max_batch` waiters or at the next `tick`, whichever happens first.
    pub fn new(max_batch: usize, tick: Duration, exec: BatchExec<K, R>) -> Batcher<K, R> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(K, oneshot::Sender<R>)>();
        let max_batch = max_batch.max(1);
        tokio::spawn(async move {
            let mut pending: HashMap<K, Vec<oneshot::Sender<R>>> = HashMap::new();
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    item = rx.recv() => {
                        let Some((key, waiter)) = item else { break };
                        let group = pending.entry(key.clone()).or_default();
                        group.push(waiter);
                        if group.len() >= max_batch {
                            let waiters = pending.remove(&key).unwrap_or_default();
                            flush(&exec, key, waiters);
                        }
                    }
                    _ = ticker.tick() => {
                        for (key, waiters) in pending.drain() {
                            flush(&exec, key, waiters);
                        }
                    }
                }
            }
            // Channel closed: flush the stragglers so no waiter hangs.
            for (key, waiters) in pending.drain() {
                flush(&exec, key, waiters);
            }
        });
        Batcher { tx }
    }

    /// Queues a request and returns the receiver for its result. A closed
    /// receiver at fan-out time only affects that waiter.
    pub fn submit(&self, key: K) -> oneshot::Receiver<R> {
        let (done, wait) = oneshot::channel();
        if let Err(mpsc::error::SendError((_, done))) = self.tx.send((key, done)) {
            // Executor is gone (server shutting down); the dropped sender
            // surfaces as a RecvError to the caller.
            drop(done);
        }
        wait
    }
}

fn flush<K, R>(exec: &BatchExec<K, R>, key: K, waiters: Vec<oneshot::Sender<R>>)
where
    K: std::fmt::Debug + Send + 'static,
    R: Clone + Send + 'static,
{
    if waiters.is_empty() {
        return;
    }
    trace!(?key, waiters = waiters.len(), "flushing batch group");
    let fut = exec(key);
    tokio::spawn(async move {
        let result = fut.await;
        for waiter in waiters {
            // A cancelled waiter dropped its receiver; everyone else still
            // gets the shared result.
            let _ = waiter.send(result.clone());
        }
    });
}
