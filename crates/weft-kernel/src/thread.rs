//! B-thread records and the body-side sync handle.
//!
//! A behavior is an async function over a [`SyncHandle`]: it repeatedly
//! yields a [`Bid`] via [`SyncHandle::sync`] and suspends until the kernel
//! advances it with a selected event (or throws an error at the suspension
//! point).  The kernel side of the same seam is the [`BThread`] record:
//! name, priority, the channel pair to the suspended body, and the bid the
//! body most recently yielded.
//!
//! Registration is two-step.  [`Admission::spawn`] starts the behavior's
//! task without suspending, so a body can register any number of threads at
//! one sequence point; the kernel later resolves each admission into a
//! [`BThread`] by waiting for its first bid.  Bodies run as spawned tasks,
//! but the kernel awaits every resume round-trip, so no two bodies ever run
//! their inter-sync sections concurrently.

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bid::Bid;

/// Payload delivered to a suspended body: the selected event, or an error
/// thrown at the suspension point.
pub(crate) type Resume<E> = anyhow::Result<E>;

/// Outcome of resuming a body: it either reached its next sync point or
/// finished.
pub(crate) enum Step<E> {
    Yielded(Bid<E>),
    Done,
}

// ---------------------------------------------------------------------------
// Body side
// ---------------------------------------------------------------------------

/// The seam a behavior uses to talk to the kernel.
///
/// Obtained by a behavior as its argument; there is exactly one per
/// b-thread.
pub struct SyncHandle<E> {
    bids: mpsc::Sender<Bid<E>>,
    resumes: mpsc::Receiver<Resume<E>>,
}

impl<E> SyncHandle<E> {
    /// Yield `bid` and suspend until the kernel advances this thread.
    ///
    /// Resolves to the selected event, or to an error thrown at this
    /// suspension point (the bid's async operation failed).  Propagating
    /// the error out of the behavior terminates the thread; matching on it
    /// and syncing again continues it.
    pub async fn sync(&mut self, bid: Bid<E>) -> anyhow::Result<E> {
        if self.bids.send(bid).await.is_err() {
            anyhow::bail!("kernel is gone");
        }
        match self.resumes.recv().await {
            Some(resume) => resume,
            None => anyhow::bail!("kernel is gone"),
        }
    }
}

impl<E> fmt::Debug for SyncHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Kernel side
// ---------------------------------------------------------------------------

/// A spawned behavior that has not yet reached its first sync point.
pub(crate) struct Admission<E> {
    name: String,
    prio: i32,
    resumes: mpsc::Sender<Resume<E>>,
    bids: mpsc::Receiver<Bid<E>>,
    body: JoinHandle<()>,
}

impl<E: Send + 'static> Admission<E> {
    /// Start `behavior` on its own task.  Does not suspend: the behavior
    /// runs up to its first sync point concurrently with the caller.
    pub(crate) fn spawn<F, Fut>(name: String, prio: i32, behavior: F) -> Self
    where
        F: FnOnce(SyncHandle<E>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (bid_tx, bid_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);

        let fut = behavior(SyncHandle {
            bids: bid_tx,
            resumes: resume_rx,
        });
        let task_name = name.clone();
        let body = tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(thread = %task_name, error = %err, "b-thread terminated with error");
            }
        });

        Self {
            name,
            prio,
            resumes: resume_tx,
            bids: bid_rx,
            body,
        }
    }

    /// Wait for the behavior's first bid.
    ///
    /// A body that finishes without ever syncing is discarded: `None` is
    /// returned and the kernel admits nothing.
    pub(crate) async fn into_thread(mut self) -> Option<BThread<E>> {
        match self.bids.recv().await {
            Some(bid) => Some(BThread {
                name: self.name,
                prio: self.prio,
                resumes: self.resumes,
                bids: self.bids,
                body: self.body,
                bid,
            }),
            None => {
                match self.body.await {
                    Err(err) if err.is_panic() => {
                        tracing::warn!(thread = %self.name, "behavior panicked before its first sync point");
                    }
                    _ => {
                        tracing::debug!(thread = %self.name, "behavior finished before its first sync point; not admitted");
                    }
                }
                None
            }
        }
    }

    /// Tear down an admission whose first bid was never collected.
    pub(crate) async fn abort(self) {
        self.body.abort();
        let _ = self.body.await;
    }
}

impl<E> fmt::Debug for Admission<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("name", &self.name)
            .field("prio", &self.prio)
            .finish_non_exhaustive()
    }
}

/// Runtime record of one live b-thread.  All state transitions happen
/// inside the scheduler; nothing outside the kernel can touch a record.
pub(crate) struct BThread<E> {
    pub(crate) name: String,
    pub(crate) prio: i32,
    resumes: mpsc::Sender<Resume<E>>,
    bids: mpsc::Receiver<Bid<E>>,
    body: JoinHandle<()>,
    /// The bid the body most recently yielded.
    pub(crate) bid: Bid<E>,
}

impl<E: Send + 'static> BThread<E> {
    /// Resume the suspended body with `resume` and wait for it to reach its
    /// next sync point.
    pub(crate) async fn resume(&mut self, resume: Resume<E>) -> Step<E> {
        if self.resumes.send(resume).await.is_err() {
            return Step::Done;
        }
        match self.bids.recv().await {
            Some(bid) => Step::Yielded(bid),
            None => Step::Done,
        }
    }

    /// Observe a terminated body's task, logging a panic if there was one.
    pub(crate) async fn reap(self) {
        if let Err(err) = self.body.await {
            if err.is_panic() {
                tracing::error!(thread = %self.name, "b-thread body panicked");
            }
        }
    }

    /// Tear down a still-live thread: abort the body task and wait for it
    /// to finish unwinding.
    pub(crate) async fn abort(self) {
        self.body.abort();
        let _ = self.body.await;
    }
}

impl<E> fmt::Debug for BThread<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BThread")
            .field("name", &self.name)
            .field("prio", &self.prio)
            .field("bid", &self.bid)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
