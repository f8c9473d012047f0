//! Kernel error types.
//!
//! Only failures of the system as a whole surface through [`KernelError`],
//! which is the error type returned by [`crate::run`].  Errors local to one
//! b-thread never appear here: they are thrown back into the offending body
//! at its sync point and, if the body does not recover, terminate that
//! thread alone.

/// Unified error type for the weft kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The program body panicked.  The panic payload is preserved as text.
    #[error("program body panicked: {reason}")]
    BodyPanicked { reason: String },

    /// The program body's task was cancelled from outside the kernel, e.g.
    /// because the surrounding runtime is shutting down.
    #[error("program body was cancelled before returning")]
    BodyCancelled,
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
