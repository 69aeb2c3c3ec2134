use std::fmt;

use crate::clock::MAX_TICKS;
use crate::errors::TimerError;

/// Copyable key naming one timer inside a scheduler.
///
/// A key outlives the timer it names; once the timer is deleted the key is
/// stale and every operation treats it as an invalid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TimerId {
    pub(crate) fn slot(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}.{}", self.index, self.generation)
    }
}

/// Owning handle returned by `Scheduler::create`.
///
/// Not `Clone`: only the holder may delete the timer.
#[derive(Debug, PartialEq, Eq)]
pub struct TimerHandle {
    id: TimerId,
}

impl TimerHandle {
    pub(crate) fn new(id: TimerId) -> Self {
        TimerHandle { id }
    }

    /// Key for start/stop/configuration calls.
    pub fn id(&self) -> TimerId {
        self.id
    }
}

impl From<&TimerHandle> for TimerId {
    fn from(handle: &TimerHandle) -> Self {
        handle.id
    }
}

/// Whether a timer re-arms itself after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Fires every `period` ticks until stopped.
    #[default]
    Periodic,
    /// Fires once, then disables itself.
    OneShot,
}

/// Operations a callback may issue while it runs.
///
/// Every call only enqueues a command for the next dispatch pass, so it is
/// safe from inside a firing callback.
pub trait TimerControl {
    /// Requests that `timer` start. See `Scheduler::start`.
    fn start(&self, timer: TimerId) -> Result<(), TimerError>;

    /// Requests that `timer` stop. See `Scheduler::stop`.
    fn stop(&self, timer: TimerId) -> Result<(), TimerError>;

    /// Current clock value.
    fn now(&self) -> u32;
}

/// Context handed to a callback when its timer fires.
pub struct Expired<'a> {
    pub(crate) id: TimerId,
    pub(crate) count: u32,
    pub(crate) expiry: u32,
    pub(crate) control: &'a dyn TimerControl,
}

impl<'a> Expired<'a> {
    /// The timer that fired.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Invocation count including this firing.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The expiry tick that became due.
    pub fn expiry(&self) -> u32 {
        self.expiry
    }

    /// Handle to the scheduler for start/stop requests.
    pub fn control(&self) -> &'a dyn TimerControl {
        self.control
    }

    /// Stops the firing timer after this callback returns.
    pub fn stop_self(&self) -> Result<(), TimerError> {
        self.control.stop(self.id)
    }
}

impl fmt::Debug for Expired<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expired")
            .field("id", &self.id)
            .field("count", &self.count)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// A trait for timer callbacks.
pub trait TimerCallback: Send {
    /// The function to execute when the timer fires.
    fn on_expiry(&mut self, event: &Expired<'_>);
}

impl<F> TimerCallback for F
where
    F: FnMut(&Expired<'_>) + Send,
{
    fn on_expiry(&mut self, event: &Expired<'_>) {
        self(event)
    }
}

pub(crate) type BoxedCallback = Box<dyn TimerCallback>;

/// Validates a period against `[1, MAX_TICKS]`.
pub(crate) fn check_period(period: u32) -> Result<u32, TimerError> {
    if period == 0 {
        return Err(TimerError::InvalidArgument(
            "Period must be greater than zero.",
        ));
    }
    if period > MAX_TICKS {
        return Err(TimerError::InvalidArgument(
            "Period must not exceed MAX_TICKS.",
        ));
    }
    Ok(period)
}

/// Per-timer state shared between callers and the dispatcher.
///
/// Only touched inside the scheduler's critical section.
pub(crate) struct TimerEntry {
    pub(crate) period: u32,
    pub(crate) mode: TimerMode,
    pub(crate) enabled: bool,
    pub(crate) count: u32,
    /// `None` while the dispatcher holds it for a firing.
    pub(crate) callback: Option<BoxedCallback>,
    pub(crate) firing: bool,
    /// Mirror of ActiveList membership, written by the dispatcher.
    pub(crate) linked: bool,
    /// Deleted while linked; reclaimed when the pending Stop is applied.
    pub(crate) retired: bool,
}

impl TimerEntry {
    pub(crate) fn new(period: u32, mode: TimerMode, callback: Option<BoxedCallback>) -> Self {
        TimerEntry {
            period,
            mode,
            enabled: false,
            count: 0,
            callback,
            firing: false,
            linked: false,
            retired: false,
        }
    }

    /// Structural changes are refused while the dispatcher may read them.
    pub(crate) fn ensure_idle(&self) -> Result<(), TimerError> {
        if self.enabled || self.firing {
            Err(TimerError::Busy)
        } else {
            Ok(())
        }
    }
}
