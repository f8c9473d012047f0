//! weft -- a behavioral-programming kernel.
//!
//! A weft system is a set of cooperating **b-threads** coordinated by a
//! turn-based event-selection loop.  At every sync point a thread declares a
//! [`Bid`]: events it requests, events it waits for, events it blocks, and
//! optionally an asynchronous operation whose completion value feeds back
//! into the event stream.  Each turn the kernel selects the single best
//! unblocked request and advances every thread affected by it; an advanced
//! thread's still-running operation is cancelled before its body resumes.
//!
//! - **[`bid`]** -- the sync-point declaration: request/wait/block plus the
//!   execution state of the optional async operation.
//! - **[`thread`]** -- the body-side [`SyncHandle`] seam and the kernel's
//!   per-thread record.
//! - **[`op`]** -- starts, tracks, and cancels async operations; delivers
//!   their results back into the turn loop.
//! - **[`scheduler`]** -- the turn algorithm, dynamic admission via
//!   [`Admitter`], quiescence detection, and teardown.
//! - **[`error`]** -- system-level error types via [`thiserror`].
//!
//! All public types are `Send` and designed for use within a tokio runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use weft_kernel::{Admitter, Bid, SyncHandle, run};
//!
//! # async fn example() -> weft_kernel::Result<()> {
//! let outcome = run(|admitter: Admitter<&'static str>| async move {
//!     admitter.admit("greeter", |mut handle: SyncHandle<&'static str>| async move {
//!         handle.sync(Bid::request(["hello"])).await?;
//!         Ok(())
//!     });
//!     admitter.admit("listener", |mut handle: SyncHandle<&'static str>| async move {
//!         let heard = handle.sync(Bid::wait_for(|e| *e == "hello")).await?;
//!         println!("heard {heard}");
//!         Ok(())
//!     });
//!     "done"
//! })
//! .await?;
//! assert_eq!(outcome, "done");
//! # Ok(())
//! # }
//! ```

pub mod bid;
pub mod error;
pub mod op;
pub mod scheduler;
pub mod thread;

// Re-export the most commonly used types at the crate root for convenience.
pub use bid::{Bid, EventPred, Exec, ExecSlot, OpFn};
pub use error::{KernelError, Result};
pub use scheduler::{Admitter, Event, run};
pub use thread::SyncHandle;
