//! Async-op runner.
//!
//! Starts, tracks, and cancels the asynchronous operation embedded in a
//! bid.  An op runs as a background task that touches nothing but its own
//! [`ExecSlot`] and the kernel's wake [`Notify`]: it writes its terminal
//! result into the slot (only if the slot still says `Running`) and then
//! signals the wake channel exactly once, success or failure.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::bid::{Exec, ExecSlot, lock_ignore_poison};
use crate::thread::BThread;

/// Start `record`'s operation if one is pending.
///
/// Transitions the slot `Pending -> Running` before the op task can observe
/// it, so the task always finds either `Running` (publish the result) or
/// something else (the op was cancelled; drop the result).
pub(crate) fn start_op_if_pending<E: Send + 'static>(record: &BThread<E>, wake: &Arc<Notify>) {
    let slot = Arc::clone(&record.bid.exec);
    let mut guard = lock_ignore_poison(&slot);
    let op = match std::mem::replace(&mut *guard, Exec::Idle) {
        Exec::Pending(op) => op,
        other => {
            *guard = other;
            return;
        }
    };

    tracing::trace!(thread = %record.name, "starting op");
    let cell = Arc::clone(&slot);
    let wake = Arc::clone(wake);
    let task = tokio::spawn(async move {
        let result = op().await;
        {
            let mut slot = lock_ignore_poison(&cell);
            // A cancelled op never publishes: cancellation already replaced
            // `Running` with `Idle`.
            if matches!(*slot, Exec::Running(_)) {
                *slot = Exec::Done(result);
            }
        }
        wake.notify_one();
    });
    *guard = Exec::Running(task);
}

/// Cancel `record`'s operation if one is running.
///
/// Synchronous from the scheduler's perspective: returns only once the op
/// task has finished, so no `Done` transition can be observed afterwards.
/// Idempotent.
pub(crate) async fn cancel_op<E>(record: &BThread<E>) {
    let task = {
        let mut guard = lock_ignore_poison(&record.bid.exec);
        match std::mem::replace(&mut *guard, Exec::Idle) {
            Exec::Running(task) => task,
            other => {
                *guard = other;
                return;
            }
        }
    };
    tracing::trace!(thread = %record.name, "cancelling op");
    task.abort();
    let _ = task.await;
}

/// Take a finished op's result out of `slot`, leaving it `Idle`.
pub(crate) fn take_done<E>(slot: &ExecSlot<E>) -> Option<anyhow::Result<E>> {
    let mut guard = lock_ignore_poison(slot);
    match std::mem::replace(&mut *guard, Exec::Idle) {
        Exec::Done(result) => Some(result),
        other => {
            *guard = other;
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
