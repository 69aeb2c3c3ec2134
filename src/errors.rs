//! Error handling module for the soft timer scheduler.

use thiserror::Error;

/// Custom error type for scheduler and timer operations.
///
/// Every variant is an expected, recoverable outcome returned to the
/// immediate caller. Nothing in this crate retries or panics on them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Invalid parameter provided, or the timer handle no longer refers to a
    /// live timer.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The command queue has no free slot; the request was dropped.
    #[error("Command queue is full.")]
    QueueFull,

    /// Configuration change attempted while the timer is enabled or firing.
    #[error("Timer is busy (enabled or firing).")]
    Busy,

    /// A dispatch pass is already in progress on this scheduler.
    #[error("Dispatcher re-entered while a dispatch pass is running.")]
    Reentrant,
}
