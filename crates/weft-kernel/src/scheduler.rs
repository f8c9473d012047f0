//! The turn-based scheduler.
//!
//! A weft system is driven by [`run`]: it spawns the program body, hands it
//! an [`Admitter`], and loops the turn algorithm until the system is
//! quiescent and the body has returned.  One turn performs three phases in
//! order:
//!
//! 1. **Harvest** -- every finished async operation is drained: a success
//!    joins the owning thread's requests, a failure is thrown into the body
//!    at its sync point.
//! 2. **Select** -- candidate events are the active threads' requests,
//!    walked in descending priority (ties by admission order) and, within a
//!    thread, in declared order.  The selected event is the first candidate
//!    no live thread blocks.
//! 3. **Advance** -- every thread that requested the selected event or
//!    whose wait predicate accepts it is resumed with it, exactly once.
//!    A running operation of an advanced thread is cancelled first.
//!
//! The affected set of phase 3 is fixed before any body runs, so bids
//! yielded during the phase only influence the next turn.  The same holds
//! for admissions: a thread admitted mid-turn joins the active set at the
//! next iteration boundary.

use std::cmp::Reverse;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};

use crate::bid::{Exec, lock_ignore_poison};
use crate::error::{KernelError, Result};
use crate::op;
use crate::thread::{Admission, BThread, Step, SyncHandle};

/// Bounds every event type must satisfy.  The kernel touches events only
/// through `==` and user predicates; events are never interned.
pub trait Event: Clone + PartialEq + Send + 'static {}

impl<T: Clone + PartialEq + Send + 'static> Event for T {}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Shared between the scheduler and every [`Admitter`] clone.
struct Shared<E> {
    /// Behaviors admitted but not yet merged into the active set.
    pending: Mutex<Vec<Admission<E>>>,
    /// Rouses the scheduler when it is parked: on admission and on op
    /// completion.
    wake: Arc<Notify>,
}

/// The admission function handed to the program body.
///
/// Cheaply cloneable; admissions may happen any time while the system
/// runs.  Admission itself never suspends, so every thread a body
/// registers between two of its own await points lands at one sequence
/// point: the whole batch becomes live at the next turn boundary and never
/// influences a turn in progress.
#[derive(Clone)]
pub struct Admitter<E> {
    shared: Arc<Shared<E>>,
}

impl<E: Event> Admitter<E> {
    /// Admit a b-thread at the default priority.
    pub fn admit<F, Fut>(&self, name: impl Into<String>, behavior: F)
    where
        F: FnOnce(SyncHandle<E>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.admit_with_priority(name, 1, behavior);
    }

    /// Admit a b-thread with an explicit priority.  Higher priorities have
    /// their requests considered first.
    pub fn admit_with_priority<F, Fut>(&self, name: impl Into<String>, prio: i32, behavior: F)
    where
        F: FnOnce(SyncHandle<E>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(thread = %name, prio, "b-thread admitted");
        let admission = Admission::spawn(name, prio, behavior);
        lock_ignore_poison(&self.shared.pending).push(admission);
        self.shared.wake.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run a behavioral program to quiescence.
///
/// `body` receives an [`Admitter`] and may register b-threads with it at
/// any point of its own execution.  `run` resolves once no requested event
/// can be selected, no async operation is running or unconsumed, no
/// admission is outstanding, and the body itself has returned; its return
/// value is passed through.  Threads that are still suspended at that point
/// (e.g. blocked forever) are torn down.
///
/// # Errors
///
/// A panicked or externally-cancelled body task is fatal for the whole
/// system and surfaces as [`KernelError`].  Errors inside individual
/// b-threads are *not* fatal: they terminate the offending thread only.
pub async fn run<E, B, Fut, V>(body: B) -> Result<V>
where
    E: Event,
    B: FnOnce(Admitter<E>) -> Fut,
    Fut: Future<Output = V> + Send + 'static,
    V: Send + 'static,
{
    let shared = Arc::new(Shared {
        pending: Mutex::new(Vec::new()),
        wake: Arc::new(Notify::new()),
    });
    let admitter = Admitter {
        shared: Arc::clone(&shared),
    };

    tracing::debug!("starting behavioral program");
    let mut body_task = tokio::spawn(body(admitter));
    let mut scheduler = Scheduler {
        active: Vec::new(),
        shared,
    };

    let outcome = scheduler.drive(&mut body_task).await;
    scheduler.teardown().await;
    if outcome.is_err() {
        body_task.abort();
    }
    outcome
}

fn body_outcome<V>(joined: std::result::Result<V, JoinError>) -> Result<V> {
    match joined {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            let reason = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(KernelError::BodyPanicked { reason })
        }
        Err(_) => Err(KernelError::BodyCancelled),
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Scheduler<E> {
    /// Live threads, in admission order.
    active: Vec<BThread<E>>,
    shared: Arc<Shared<E>>,
}

impl<E: Event> Scheduler<E> {
    /// The outer loop: turns to fixpoint, then park until something can
    /// change the picture (an admission, an op completion, or the body
    /// returning).
    async fn drive<V>(&mut self, body: &mut JoinHandle<V>) -> Result<V> {
        let mut body_value: Option<V> = None;
        loop {
            // Admissions become visible at iteration boundaries, never
            // mid-turn.
            loop {
                self.merge_pending().await;
                if !self.iteration().await {
                    break;
                }
            }

            if !lock_ignore_poison(&self.shared.pending).is_empty() {
                continue;
            }
            // An op that finished after the harvest sweep deserves another
            // turn before we decide anything.
            if self.any_op(|exec| matches!(exec, Exec::Done(_))) {
                continue;
            }
            if self.any_op(|exec| matches!(exec, Exec::Running(_))) {
                self.shared.wake.notified().await;
                continue;
            }

            if let Some(value) = body_value.take() {
                tracing::debug!("system quiescent; program complete");
                return Ok(value);
            }
            tokio::select! {
                joined = &mut *body => {
                    body_value = Some(body_outcome(joined)?);
                    tracing::debug!("program body returned; draining to quiescence");
                }
                _ = self.shared.wake.notified() => {}
            }
        }
    }

    /// Resolve outstanding admissions: wait for each behavior's first bid,
    /// start its pending op, and add it to the active set.  Behaviors that
    /// ran to completion without syncing dissolve here.
    async fn merge_pending(&mut self) {
        let admissions: Vec<Admission<E>> = {
            let mut pending = lock_ignore_poison(&self.shared.pending);
            pending.drain(..).collect()
        };
        for admission in admissions {
            if let Some(record) = admission.into_thread().await {
                tracing::trace!(thread = %record.name, "b-thread joins the active set");
                op::start_op_if_pending(&record, &self.shared.wake);
                self.active.push(record);
            }
        }
    }

    fn any_op(&self, pred: impl Fn(&Exec<E>) -> bool) -> bool {
        self.active
            .iter()
            .any(|t| pred(&lock_ignore_poison(&t.bid.exec)))
    }

    /// One turn.  Returns whether the turn did any work.
    async fn iteration(&mut self) -> bool {
        let mut did_work = self.harvest_ops().await;
        if let Some(event) = self.select_event() {
            self.advance_with(&event).await;
            did_work = true;
        }
        did_work
    }

    /// Phase 1: drain every finished op into its thread.
    async fn harvest_ops(&mut self) -> bool {
        let wake = Arc::clone(&self.shared.wake);
        let mut did_work = false;
        let mut idx = 0;
        while idx < self.active.len() {
            let Some(outcome) = op::take_done(&self.active[idx].bid.exec) else {
                idx += 1;
                continue;
            };
            did_work = true;
            match outcome {
                Ok(value) => {
                    let record = &mut self.active[idx];
                    tracing::trace!(thread = %record.name, "op completed; its value joins the thread's requests");
                    record.bid.post.push(value);
                    idx += 1;
                }
                Err(err) => {
                    let record = &mut self.active[idx];
                    tracing::debug!(thread = %record.name, error = %err, "op failed; throwing into body");
                    match record.resume(Err(err)).await {
                        Step::Yielded(bid) => {
                            record.bid = bid;
                            op::start_op_if_pending(record, &wake);
                            idx += 1;
                        }
                        Step::Done => {
                            let record = self.active.remove(idx);
                            tracing::debug!(thread = %record.name, "b-thread terminated");
                            record.reap().await;
                        }
                    }
                }
            }
        }
        did_work
    }

    /// Phase 2: the first requested event, in priority order, that no live
    /// thread blocks.
    fn select_event(&self) -> Option<E> {
        let mut order: Vec<&BThread<E>> = self.active.iter().collect();
        // Stable sort: equal priorities keep admission order.
        order.sort_by_key(|t| Reverse(t.prio));

        let mut seen: Vec<&E> = Vec::new();
        for record in order {
            for event in &record.bid.post {
                if seen.contains(&event) {
                    continue;
                }
                seen.push(event);
                if self.is_blocked(event) {
                    continue;
                }
                tracing::debug!(thread = %record.name, "event selected");
                return Some(event.clone());
            }
        }
        None
    }

    fn is_blocked(&self, event: &E) -> bool {
        self.active.iter().any(|t| (t.bid.block)(event))
    }

    /// Phase 3: advance every thread the selected event affects.
    async fn advance_with(&mut self, event: &E) {
        let wake = Arc::clone(&self.shared.wake);
        // The affected set is fixed before any body runs.
        let affected: Vec<bool> = self
            .active
            .iter()
            .map(|t| t.bid.post.contains(event) || (t.bid.wait)(event))
            .collect();

        let mut idx = 0;
        for hit in affected {
            if !hit {
                idx += 1;
                continue;
            }
            op::cancel_op(&self.active[idx]).await;
            let record = &mut self.active[idx];
            tracing::trace!(thread = %record.name, "advancing");
            match record.resume(Ok(event.clone())).await {
                Step::Yielded(bid) => {
                    record.bid = bid;
                    op::start_op_if_pending(record, &wake);
                    idx += 1;
                }
                Step::Done => {
                    let record = self.active.remove(idx);
                    tracing::debug!(thread = %record.name, "b-thread terminated");
                    record.reap().await;
                }
            }
        }
    }

    /// Abort whatever is still alive.  Threads blocked forever are legal;
    /// their tasks must not outlive the system.
    async fn teardown(&mut self) {
        let stragglers: Vec<BThread<E>> = self.active.drain(..).collect();
        for record in stragglers {
            op::cancel_op(&record).await;
            tracing::trace!(thread = %record.name, "tearing down surviving b-thread");
            record.abort().await;
        }
        let admissions: Vec<Admission<E>> = {
            let mut pending = lock_ignore_poison(&self.shared.pending);
            pending.drain(..).collect()
        };
        for admission in admissions {
            admission.abort().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
