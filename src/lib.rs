//! # soft-timer
//! Many logical timers, periodic or one-shot, multiplexed onto a single
//! 32-bit tick counter.
//!
//! [`Scheduler::tick`] advances time from any context (typically an
//! interrupt). [`Scheduler::start`] and [`Scheduler::stop`] only enqueue
//! commands, so they are cheap and safe anywhere. [`Scheduler::handler`],
//! called from one designated context, applies those commands and fires due
//! timers in expiry order, re-arming periodic timers from their previous
//! expiry so they do not drift.
//!
//! ```
//! use soft_timer::{Expired, Scheduler};
//!
//! let scheduler = Scheduler::single_context();
//! let timer = scheduler
//!     .create(5, |event: &Expired<'_>| println!("fired #{}", event.count()))
//!     .unwrap();
//! scheduler.start(timer.id()).unwrap();
//! scheduler.handler().unwrap();
//! scheduler.advance(5);
//! assert_eq!(scheduler.handler(), Ok(1));
//! ```

pub mod clock;
pub mod critical;
pub mod driver;
pub mod errors;
mod list;
pub mod queue;
pub mod scheduler;
pub mod timer;

pub use clock::{Clock, MAX_TICKS};
#[cfg(feature = "critical-section")]
pub use critical::GlobalCriticalSection;
pub use critical::{CriticalSection, NoCriticalSection, SpinCriticalSection};
pub use driver::Driver;
pub use errors::TimerError;
pub use queue::{Command, CommandKind, CommandQueue};
pub use scheduler::{Scheduler, SchedulerConfig, DEFAULT_QUEUE_SIZE};
pub use timer::{Expired, TimerCallback, TimerControl, TimerHandle, TimerId, TimerMode};
