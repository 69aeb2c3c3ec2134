use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "logging")]
use log::{debug, trace};

use crate::clock::{ticks_until, Clock};
use crate::critical::{CriticalSection, NoCriticalSection, SectionGuard};
use crate::errors::TimerError;
use crate::list::ActiveList;
use crate::queue::{Command, CommandKind, CommandQueue};
use crate::timer::{
    check_period, BoxedCallback, Expired, TimerCallback, TimerControl, TimerEntry, TimerHandle,
    TimerId, TimerMode,
};

/// Command queue size used by [`Scheduler::new`].
pub const DEFAULT_QUEUE_SIZE: usize = 16;

const STALE_HANDLE: TimerError = TimerError::InvalidArgument("Timer handle is not live.");

/// Runtime construction parameters for a [`Scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Timer slots to reserve up front.
    pub timer_capacity: usize,
    /// Initial clock value.
    pub start_tick: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            timer_capacity: 8,
            start_tick: 0,
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<TimerEntry>,
}

/// Generation-checked arena of timer entries.
#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Slots {
    fn with_capacity(capacity: usize) -> Self {
        Slots {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, entry: TimerEntry) -> TimerId {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                self.slots.len() - 1
            }
        };
        TimerId {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    /// Entry for `id`, including one deleted but still awaiting reclaim.
    fn any_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        self.slots
            .get_mut(id.slot())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn live(&self, id: TimerId) -> Option<&TimerEntry> {
        self.slots
            .get(id.slot())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .filter(|entry| !entry.retired)
    }

    fn live_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        self.any_mut(id).filter(|entry| !entry.retired)
    }

    /// Vacates the slot and invalidates every outstanding id for it.
    fn release(&mut self, index: usize) -> Option<TimerEntry> {
        let slot = &mut self.slots[index];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(entry)
    }

    /// Entries not yet deleted; retired ones awaiting reclaim are excluded.
    fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| !entry.retired)
            .count()
    }
}

/// State reachable from every context; only touched inside a critical section.
struct Shared<const N: usize> {
    queue: CommandQueue<N>,
    slots: Slots,
}

/// State owned by the dispatching context.
struct Dispatch {
    list: ActiveList,
    rearm: Vec<(TimerId, u32)>,
}

impl Dispatch {
    fn flush_rearm(&mut self, now: u32) {
        for (timer, expiry) in self.rearm.drain(..) {
            self.list.insert(timer, expiry, now);
        }
    }
}

/// Resets the dispatch flag on every exit, unwinding included.
struct DispatchGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DispatchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, TimerError> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| TimerError::Reentrant)?;
        Ok(DispatchGuard { flag })
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A software timer scheduler driven by one tick counter.
///
/// Any context may call [`tick`](Self::tick), [`start`](Self::start) and
/// [`stop`](Self::stop). Exactly one context calls
/// [`handler`](Self::handler), which applies queued commands and fires due
/// timers. `N` is the command queue size (a power of two; `N - 1` usable).
pub struct Scheduler<C: CriticalSection = NoCriticalSection, const N: usize = DEFAULT_QUEUE_SIZE> {
    clock: Clock,
    section: C,
    shared: UnsafeCell<Shared<N>>,
    dispatch: UnsafeCell<Dispatch>,
    dispatching: AtomicBool,
}

// SAFETY: `shared` is only accessed inside `section`, which `C` guarantees is
// exclusive across contexts. `dispatch` is only accessed while holding the
// `dispatching` flag. Callbacks stored in `shared` are `Send`.
unsafe impl<C: CriticalSection + Sync, const N: usize> Sync for Scheduler<C, N> {}

impl Scheduler<NoCriticalSection, DEFAULT_QUEUE_SIZE> {
    /// Single-context scheduler with the default queue size.
    pub fn single_context() -> Self {
        Scheduler::new(NoCriticalSection::new())
    }
}

impl<C: CriticalSection> Scheduler<C, DEFAULT_QUEUE_SIZE> {
    /// Creates a scheduler guarded by `section` with the default queue size.
    pub fn new(section: C) -> Self {
        Self::with_config(section, SchedulerConfig::default())
    }
}

impl<C: CriticalSection, const N: usize> Scheduler<C, N> {
    /// Creates a scheduler with explicit runtime parameters.
    ///
    /// The queue size comes from the type, e.g.
    /// `Scheduler::<_, 64>::with_config(section, config)`.
    pub fn with_config(section: C, config: SchedulerConfig) -> Self {
        Scheduler {
            clock: Clock::starting_at(config.start_tick),
            section,
            shared: UnsafeCell::new(Shared {
                queue: CommandQueue::new(),
                slots: Slots::with_capacity(config.timer_capacity),
            }),
            dispatch: UnsafeCell::new(Dispatch {
                list: ActiveList::with_capacity(config.timer_capacity),
                rearm: Vec::with_capacity(config.timer_capacity),
            }),
            dispatching: AtomicBool::new(false),
        }
    }

    /// Runs `f` on the shared state inside the critical section.
    ///
    /// `f` must not run user code: no callbacks, no callback drops.
    fn with_shared<R>(&self, f: impl FnOnce(&mut Shared<N>) -> R) -> R {
        let _guard = SectionGuard::enter(&self.section);
        // SAFETY: the section excludes every other accessor of `shared`, and
        // nothing inside `f` re-enters the scheduler.
        let shared = unsafe { &mut *self.shared.get() };
        f(shared)
    }

    /// The tick counter shared by every context.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Advances the clock by one tick. Safe from any context.
    pub fn tick(&self) {
        self.clock.tick();
    }

    /// Advances the clock by `ticks`.
    pub fn advance(&self, ticks: u32) {
        self.clock.advance(ticks);
    }

    /// Current tick.
    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    /// Creates a disabled periodic timer.
    pub fn create<F>(&self, period: u32, callback: F) -> Result<TimerHandle, TimerError>
    where
        F: TimerCallback + 'static,
    {
        self.create_with(period, TimerMode::Periodic, Some(Box::new(callback)))
    }

    /// Creates a disabled timer that stops itself after firing once.
    pub fn create_one_shot<F>(&self, period: u32, callback: F) -> Result<TimerHandle, TimerError>
    where
        F: TimerCallback + 'static,
    {
        self.create_with(period, TimerMode::OneShot, Some(Box::new(callback)))
    }

    /// Creates a disabled timer; `callback` may be absent.
    pub fn create_with(
        &self,
        period: u32,
        mode: TimerMode,
        callback: Option<Box<dyn TimerCallback>>,
    ) -> Result<TimerHandle, TimerError> {
        let period = check_period(period)?;
        let id = self.with_shared(|shared| {
            shared
                .slots
                .insert(TimerEntry::new(period, mode, callback))
        });
        #[cfg(feature = "logging")]
        debug!("Created {} with period {} ({:?}).", id, period, mode);
        Ok(TimerHandle::new(id))
    }

    /// Destroys a disabled timer.
    ///
    /// Hands the handle back while the timer is enabled or its callback is
    /// running.
    pub fn delete(&self, handle: TimerHandle) -> Result<(), TimerHandle> {
        let id = handle.id();
        let outcome = self.with_shared(|shared| {
            let Some(entry) = shared.slots.live_mut(id) else {
                return Ok(None);
            };
            if entry.ensure_idle().is_err() {
                return Err(());
            }
            if entry.linked {
                // A Stop is still queued; the dispatcher reclaims on applying it.
                entry.retired = true;
                return Ok(entry.callback.take());
            }
            Ok(shared
                .slots
                .release(id.slot())
                .and_then(|entry| entry.callback))
        });
        match outcome {
            Ok(callback) => {
                drop(callback);
                #[cfg(feature = "logging")]
                debug!("Deleted {}.", id);
                Ok(())
            }
            Err(()) => Err(handle),
        }
    }

    /// Requests that `timer` start; takes effect at the next dispatch pass.
    ///
    /// A no-op if the timer is already enabled. On `QueueFull` the timer
    /// stays disabled.
    pub fn start(&self, timer: TimerId) -> Result<(), TimerError> {
        self.request(timer, CommandKind::Start)
    }

    /// Requests that `timer` stop; takes effect at the next dispatch pass.
    ///
    /// A no-op if the timer is already disabled. A callback that is running
    /// always completes.
    pub fn stop(&self, timer: TimerId) -> Result<(), TimerError> {
        self.request(timer, CommandKind::Stop)
    }

    fn request(&self, timer: TimerId, kind: CommandKind) -> Result<(), TimerError> {
        let enable = kind == CommandKind::Start;
        self.with_shared(|shared| {
            let entry = shared.slots.live_mut(timer).ok_or(STALE_HANDLE)?;
            if entry.enabled == enable {
                return Ok(());
            }
            shared.queue.push(Command { timer, kind })?;
            entry.enabled = enable;
            Ok(())
        })
    }

    /// Changes the period of a disabled timer.
    pub fn set_period(&self, timer: TimerId, period: u32) -> Result<(), TimerError> {
        let period = check_period(period)?;
        self.configure(timer, |entry| entry.period = period)
    }

    /// Overwrites the invocation count of a disabled timer.
    pub fn set_count(&self, timer: TimerId, count: u32) -> Result<(), TimerError> {
        self.configure(timer, |entry| entry.count = count)
    }

    /// Switches a disabled timer between periodic and one-shot.
    pub fn set_mode(&self, timer: TimerId, mode: TimerMode) -> Result<(), TimerError> {
        self.configure(timer, |entry| entry.mode = mode)
    }

    /// Replaces the callback of a disabled timer.
    pub fn register_callback<F>(&self, timer: TimerId, callback: F) -> Result<(), TimerError>
    where
        F: TimerCallback + 'static,
    {
        self.swap_callback(timer, Some(Box::new(callback)))
    }

    /// Removes the callback of a disabled timer; firings are still counted.
    pub fn clear_callback(&self, timer: TimerId) -> Result<(), TimerError> {
        self.swap_callback(timer, None)
    }

    fn swap_callback(
        &self,
        timer: TimerId,
        callback: Option<BoxedCallback>,
    ) -> Result<(), TimerError> {
        let previous = self.with_shared(|shared| {
            let entry = shared.slots.live_mut(timer).ok_or(STALE_HANDLE)?;
            entry.ensure_idle()?;
            Ok(std::mem::replace(&mut entry.callback, callback))
        })?;
        drop(previous);
        Ok(())
    }

    fn configure(
        &self,
        timer: TimerId,
        apply: impl FnOnce(&mut TimerEntry),
    ) -> Result<(), TimerError> {
        self.with_shared(|shared| {
            let entry = shared.slots.live_mut(timer).ok_or(STALE_HANDLE)?;
            entry.ensure_idle()?;
            apply(entry);
            Ok(())
        })
    }

    /// Completed firings; `0` for a stale handle.
    pub fn get_count(&self, timer: TimerId) -> u32 {
        self.with_shared(|shared| shared.slots.live(timer).map_or(0, |entry| entry.count))
    }

    /// Period in ticks; `None` for a stale handle.
    pub fn period(&self, timer: TimerId) -> Option<u32> {
        self.with_shared(|shared| shared.slots.live(timer).map(|entry| entry.period))
    }

    /// Requested running state, set synchronously by `start`/`stop`.
    pub fn is_enabled(&self, timer: TimerId) -> bool {
        self.with_shared(|shared| shared.slots.live(timer).is_some_and(|entry| entry.enabled))
    }

    /// Active-list membership as of the last applied command or firing.
    pub fn is_active(&self, timer: TimerId) -> bool {
        self.with_shared(|shared| shared.slots.live(timer).is_some_and(|entry| entry.linked))
    }

    /// Commands waiting for the next dispatch pass.
    pub fn pending_commands(&self) -> usize {
        self.with_shared(|shared| shared.queue.len())
    }

    /// Number of created timers not yet deleted.
    pub fn timer_count(&self) -> usize {
        self.with_shared(|shared| shared.slots.live_count())
    }

    /// Runs one dispatch pass and returns how many timers fired.
    ///
    /// Must only be called from the single dispatching context. A nested
    /// call (for example from inside a callback) returns `Reentrant`.
    pub fn handler(&self) -> Result<usize, TimerError> {
        let _dispatching = DispatchGuard::acquire(&self.dispatching)?;
        // SAFETY: the dispatch flag grants exclusive access to `dispatch`.
        let dispatch = unsafe { &mut *self.dispatch.get() };

        // Left over when a callback unwound out of the previous pass.
        dispatch.flush_rearm(self.clock.now());
        self.drain_commands(&mut dispatch.list);
        if dispatch.list.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        let mut fired = 0;
        while let Some((timer, expiry)) = dispatch.list.peek_earliest() {
            if ticks_until(expiry, now) > 0 {
                break;
            }
            dispatch.list.remove(timer);
            if self.fire(timer, expiry, &mut dispatch.rearm) {
                fired += 1;
            }
        }
        // Re-armed timers go back only after the pass, so a lagging
        // dispatcher fires each timer at most once per call.
        dispatch.flush_rearm(now);
        Ok(fired)
    }

    fn drain_commands(&self, list: &mut ActiveList) {
        loop {
            let next = self.with_shared(|shared| {
                let command = shared.queue.pop()?;
                let target = shared
                    .slots
                    .any_mut(command.timer)
                    .map(|entry| (entry.period, entry.retired));
                Some((command, target))
            });
            let Some((command, target)) = next else {
                return;
            };
            let Some((period, retired)) = target else {
                // The slot was released before the node was marked linked.
                if command.kind == CommandKind::Stop {
                    list.remove(command.timer);
                }
                continue;
            };
            #[cfg(feature = "logging")]
            trace!("Applying {:?} for {}.", command.kind, command.timer);

            match command.kind {
                CommandKind::Start if !retired => {
                    let now = self.clock.now();
                    if list.insert(command.timer, now.wrapping_add(period), now) {
                        self.with_shared(|shared| {
                            if let Some(entry) = shared.slots.any_mut(command.timer) {
                                entry.linked = true;
                            }
                        });
                    }
                }
                CommandKind::Start => {}
                CommandKind::Stop => {
                    list.remove(command.timer);
                    let reclaimed = self.with_shared(|shared| {
                        let entry = shared.slots.any_mut(command.timer)?;
                        entry.linked = false;
                        if entry.retired {
                            shared.slots.release(command.timer.slot())
                        } else {
                            None
                        }
                    });
                    drop(reclaimed);
                }
            }
        }
    }

    /// Fires one due timer. Returns `false` if it was deleted meanwhile.
    fn fire(&self, timer: TimerId, expiry: u32, rearm: &mut Vec<(TimerId, u32)>) -> bool {
        let claimed = self.with_shared(|shared| {
            let entry = shared.slots.any_mut(timer)?;
            if entry.retired {
                entry.linked = false;
                return None;
            }
            entry.count = entry.count.wrapping_add(1);
            entry.firing = true;
            if entry.mode == TimerMode::OneShot {
                // A restart from inside the callback queues a fresh Start.
                entry.enabled = false;
            }
            Some((entry.callback.take(), entry.count))
        });
        let Some((callback, count)) = claimed else {
            return false;
        };

        #[cfg(feature = "logging")]
        trace!("Firing {} at expiry {} (count {}).", timer, expiry, count);
        let mut firing = Firing {
            scheduler: self,
            timer,
            expiry,
            callback,
            rearm,
        };
        if let Some(callback) = firing.callback.as_mut() {
            let event = Expired {
                id: timer,
                count,
                expiry,
                control: self,
            };
            callback.on_expiry(&event);
        }
        true
    }

    /// Active timers in firing order with their absolute expiries.
    ///
    /// Dispatcher-context call; `Reentrant` during a dispatch pass.
    pub fn active_timers(&self) -> Result<Vec<(TimerId, u32)>, TimerError> {
        let _dispatching = DispatchGuard::acquire(&self.dispatching)?;
        // SAFETY: the dispatch flag grants exclusive access to `dispatch`.
        let dispatch = unsafe { &*self.dispatch.get() };
        let mut timers = Vec::with_capacity(dispatch.list.len());
        timers.extend(dispatch.list.iter());
        Ok(timers)
    }

    /// Ticks until the earliest active timer is due, `0` if overdue.
    ///
    /// Dispatcher-context call; `Reentrant` during a dispatch pass.
    pub fn next_due(&self) -> Result<Option<u32>, TimerError> {
        let _dispatching = DispatchGuard::acquire(&self.dispatching)?;
        // SAFETY: the dispatch flag grants exclusive access to `dispatch`.
        let dispatch = unsafe { &*self.dispatch.get() };
        let now = self.clock.now();
        Ok(dispatch
            .list
            .peek_earliest()
            .map(|(_, expiry)| ticks_until(expiry, now).max(0) as u32))
    }
}

/// Hands a claimed timer back to the shared state, also when its callback
/// panics.
struct Firing<'a, C: CriticalSection, const N: usize> {
    scheduler: &'a Scheduler<C, N>,
    timer: TimerId,
    expiry: u32,
    callback: Option<BoxedCallback>,
    rearm: &'a mut Vec<(TimerId, u32)>,
}

impl<C: CriticalSection, const N: usize> Drop for Firing<'_, C, N> {
    fn drop(&mut self) {
        let (timer, expiry) = (self.timer, self.expiry);
        let mut callback = self.callback.take();
        let next = self.scheduler.with_shared(|shared| {
            let entry = shared.slots.any_mut(timer)?;
            entry.callback = callback.take();
            entry.firing = false;
            if entry.enabled && entry.mode == TimerMode::Periodic {
                Some(expiry.wrapping_add(entry.period))
            } else {
                entry.linked = false;
                None
            }
        });
        // Only non-empty if the entry vanished; dropped outside the section.
        drop(callback);
        if let Some(next) = next {
            self.rearm.push((timer, next));
        }
    }
}

impl<C: CriticalSection, const N: usize> TimerControl for Scheduler<C, N> {
    fn start(&self, timer: TimerId) -> Result<(), TimerError> {
        Scheduler::start(self, timer)
    }

    fn stop(&self, timer: TimerId) -> Result<(), TimerError> {
        Scheduler::stop(self, timer)
    }

    fn now(&self) -> u32 {
        self.clock.now()
    }
}

impl<C: CriticalSection, const N: usize> fmt::Debug for Scheduler<C, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.clock.now())
            .field("timers", &self.timer_count())
            .field("pending_commands", &self.pending_commands())
            .finish()
    }
}
