//! Bids -- what a b-thread declares at a sync point.
//!
//! At every sync point a b-thread yields a [`Bid`]: the events it requests
//! be selected ([`Bid::post`], ordered by preference), a predicate over
//! events it is willing to be woken by ([`Bid::wait`]), a predicate over
//! events it vetoes ([`Bid::block`]), and optionally an asynchronous
//! operation ([`Bid::exec`]).  The operation is started when the thread
//! enters the sync point; if it completes before the thread is advanced by
//! an event, its value is injected as one more request of the thread, and if
//! the thread is advanced first, the operation is cancelled.
//!
//! Bids are immutable after construction except for the [`Exec`] slot, which
//! only the kernel transitions, and the post list, which grows when an
//! operation of this bid completes.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Predicates and operations
// ---------------------------------------------------------------------------

/// A boxed predicate over events.
pub type EventPred<E> = Box<dyn Fn(&E) -> bool + Send>;

/// A deferred asynchronous operation: a thunk producing the future to run.
///
/// The thunk is invoked on the operation's background task, not at bid
/// construction, so building a bid never does work.
pub type OpFn<E> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<E>> + Send>;

/// Execution state of a bid's optional asynchronous operation.
pub enum Exec<E> {
    /// No async work attached, or the work was cancelled/consumed.
    Idle,
    /// An operation was supplied but has not been started yet.
    Pending(OpFn<E>),
    /// The operation is live.  The handle carries the cancellation
    /// capability.
    Running(JoinHandle<()>),
    /// The operation finished; the result has not yet been consumed by the
    /// scheduler.
    Done(anyhow::Result<E>),
}

/// The shared slot an operation's background task writes its terminal result
/// into.  Shared between the owning thread record and the op task; every
/// access is a short critical section with no awaits while locked.
pub type ExecSlot<E> = Arc<Mutex<Exec<E>>>;

/// Lock an exec (or other kernel) mutex, ignoring poisoning.  User code
/// never runs while these locks are held, so a poisoned lock still guards
/// consistent state.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E> fmt::Debug for Exec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Exec::Idle => "Idle",
            Exec::Pending(_) => "Pending",
            Exec::Running(_) => "Running",
            Exec::Done(Ok(_)) => "Done(Ok)",
            Exec::Done(Err(_)) => "Done(Err)",
        })
    }
}

// ---------------------------------------------------------------------------
// Bid
// ---------------------------------------------------------------------------

/// What a b-thread declares at one sync point.
///
/// The empty bid ([`Bid::new`]) requests nothing, waits on nothing, and
/// blocks nothing; each builder method replaces one aspect.
pub struct Bid<E> {
    pub(crate) post: Vec<E>,
    pub(crate) wait: EventPred<E>,
    pub(crate) block: EventPred<E>,
    pub(crate) exec: ExecSlot<E>,
}

impl<E> Bid<E> {
    /// The empty bid.
    #[must_use]
    pub fn new() -> Self {
        Self {
            post: Vec::new(),
            wait: Box::new(|_| false),
            block: Box::new(|_| false),
            exec: Arc::new(Mutex::new(Exec::Idle)),
        }
    }

    /// A bid that only requests the given events, in preference order.
    #[must_use]
    pub fn request<I>(events: I) -> Self
    where
        I: IntoIterator<Item = E>,
    {
        Self::new().post(events)
    }

    /// A bid that only waits for events accepted by `pred`.
    #[must_use]
    pub fn wait_for(pred: impl Fn(&E) -> bool + Send + 'static) -> Self {
        Self::new().wait(pred)
    }

    /// Request that one of `events` be the next selected event.  Earlier
    /// entries are preferred over later ones within this thread.
    #[must_use]
    pub fn post<I>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = E>,
    {
        self.post.extend(events);
        self
    }

    /// Advance this thread when the selected event satisfies `pred`, even if
    /// the event is not one of its own requests.
    #[must_use]
    pub fn wait(mut self, pred: impl Fn(&E) -> bool + Send + 'static) -> Self {
        self.wait = Box::new(pred);
        self
    }

    /// Veto selection of any event satisfying `pred` for as long as this bid
    /// is the thread's current sync point.
    #[must_use]
    pub fn block(mut self, pred: impl Fn(&E) -> bool + Send + 'static) -> Self {
        self.block = Box::new(pred);
        self
    }

    /// Attach an asynchronous operation to this sync point.
    ///
    /// The operation starts when the thread enters the sync point.  If it
    /// completes with `Ok(v)` before the thread is advanced, `v` joins the
    /// thread's requests; if it completes with `Err(e)`, `e` is thrown into
    /// the body at the sync point.  If the thread is advanced by an event
    /// first, the operation is cancelled and its result discarded.
    #[must_use]
    pub fn exec<F, Fut>(self, op: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<E>> + Send + 'static,
    {
        *lock_ignore_poison(&self.exec) = Exec::Pending(Box::new(move || Box::pin(op())));
        self
    }
}

impl<E> Default for Bid<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Bid<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bid")
            .field("posts", &self.post.len())
            .field("exec", &*lock_ignore_poison(&self.exec))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bid_defaults() {
        let bid: Bid<&str> = Bid::new();
        assert!(bid.post.is_empty());
        assert!(!(bid.wait)(&"anything"));
        assert!(!(bid.block)(&"anything"));
        assert!(matches!(*lock_ignore_poison(&bid.exec), Exec::Idle));
    }

    #[test]
    fn post_preserves_declaration_order() {
        let bid = Bid::request(["a", "b"]).post(["c"]);
        assert_eq!(bid.post, vec!["a", "b", "c"]);
    }

    #[test]
    fn predicates_are_stored() {
        let bid: Bid<&str> = Bid::new().wait(|e| *e == "go").block(|e| *e == "stop");
        assert!((bid.wait)(&"go"));
        assert!(!(bid.wait)(&"stop"));
        assert!((bid.block)(&"stop"));
    }

    #[test]
    fn exec_is_stored_pending() {
        let bid: Bid<&str> = Bid::new().exec(|| async { Ok("value") });
        assert!(matches!(*lock_ignore_poison(&bid.exec), Exec::Pending(_)));
    }
}
