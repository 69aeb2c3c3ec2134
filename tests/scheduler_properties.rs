use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use soft_timer::{
    Expired, NoCriticalSection, Scheduler, SchedulerConfig, TimerError, TimerHandle, TimerId,
    MAX_TICKS,
};

fn noop(_: &Expired<'_>) {}

fn scheduler_at(start_tick: u32) -> Scheduler {
    Scheduler::with_config(
        NoCriticalSection::new(),
        SchedulerConfig {
            start_tick,
            ..SchedulerConfig::default()
        },
    )
}

fn started(scheduler: &Scheduler, period: u32) -> TimerHandle {
    let handle = scheduler.create(period, noop).unwrap();
    scheduler.start(handle.id()).unwrap();
    handle
}

fn active_ids(scheduler: &Scheduler) -> Vec<TimerId> {
    scheduler
        .active_timers()
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

#[test]
fn fires_exactly_when_period_has_elapsed() {
    let mut rng = fastrand::Rng::with_seed(7);
    let mut periods = vec![1, 2, 7, 1000, MAX_TICKS];
    periods.extend((0..20).map(|_| rng.u32(1..=MAX_TICKS)));

    for period in periods {
        let scheduler = scheduler_at(rng.u32(..));
        let handle = started(&scheduler, period);
        assert_eq!(scheduler.handler(), Ok(0));

        scheduler.advance(period - 1);
        assert_eq!(scheduler.handler(), Ok(0), "period {period} fired early");
        scheduler.tick();
        assert_eq!(scheduler.handler(), Ok(1), "period {period} did not fire");
        assert_eq!(scheduler.get_count(handle.id()), 1);
    }
}

#[test]
fn rearm_is_phase_preserving() {
    let scheduler = scheduler_at(0);
    let handle = started(&scheduler, 10);
    scheduler.handler().unwrap();

    scheduler.advance(13);
    assert_eq!(scheduler.handler(), Ok(1));
    assert_eq!(scheduler.active_timers().unwrap(), vec![(handle.id(), 20)]);

    scheduler.advance(14);
    assert_eq!(scheduler.handler(), Ok(1));
    assert_eq!(scheduler.active_timers().unwrap(), vec![(handle.id(), 30)]);
}

#[test]
fn late_dispatch_does_not_burst() {
    let scheduler = scheduler_at(0);
    let handle = started(&scheduler, 4);
    scheduler.handler().unwrap();

    scheduler.advance(4 * 5);
    assert_eq!(scheduler.handler(), Ok(1));
    assert_eq!(scheduler.get_count(handle.id()), 1);
    assert_eq!(scheduler.active_timers().unwrap(), vec![(handle.id(), 8)]);

    // Each later pass fires it once more until it is back in phase.
    assert_eq!(scheduler.handler(), Ok(1));
    assert_eq!(scheduler.get_count(handle.id()), 2);
}

#[test]
fn start_and_stop_are_idempotent() {
    let scheduler = scheduler_at(0);
    let handle = scheduler.create(3, noop).unwrap();
    let id = handle.id();

    scheduler.stop(id).unwrap();
    assert_eq!(scheduler.pending_commands(), 0);
    assert!(!scheduler.is_enabled(id));

    scheduler.start(id).unwrap();
    scheduler.start(id).unwrap();
    assert_eq!(scheduler.pending_commands(), 1);
    assert!(scheduler.is_enabled(id));
    assert!(!scheduler.is_active(id));

    scheduler.handler().unwrap();
    assert!(scheduler.is_active(id));
    scheduler.start(id).unwrap();
    assert_eq!(scheduler.pending_commands(), 0);
}

#[test]
fn commands_apply_in_issue_order() {
    let scheduler = scheduler_at(0);
    let a = started(&scheduler, 5);
    let b = scheduler.create(5, noop).unwrap();
    let c = started(&scheduler, 5);
    scheduler.handler().unwrap();
    assert_eq!(active_ids(&scheduler), vec![a.id(), c.id()]);

    scheduler.stop(a.id()).unwrap();
    scheduler.start(b.id()).unwrap();
    scheduler.stop(c.id()).unwrap();
    scheduler.handler().unwrap();
    assert_eq!(active_ids(&scheduler), vec![b.id()]);

    // Stop then Start on a running timer restarts it; the reverse order
    // would leave it stopped.
    scheduler.advance(2);
    scheduler.stop(b.id()).unwrap();
    scheduler.start(b.id()).unwrap();
    scheduler.handler().unwrap();
    assert_eq!(scheduler.active_timers().unwrap(), vec![(b.id(), 7)]);
}

#[test]
fn random_command_streams_match_model() {
    let mut rng = fastrand::Rng::with_seed(0xc0ffee);
    let scheduler = scheduler_at(rng.u32(..));
    let handles: Vec<_> = (0..6)
        .map(|_| scheduler.create(rng.u32(1..50), noop).unwrap())
        .collect();
    let mut model = [false; 6];

    for _ in 0..200 {
        for _ in 0..rng.usize(0..8) {
            let i = rng.usize(..handles.len());
            let id = handles[i].id();
            if rng.bool() {
                scheduler.start(id).unwrap();
                model[i] = true;
            } else {
                scheduler.stop(id).unwrap();
                model[i] = false;
            }
        }
        scheduler.handler().unwrap();
        for (handle, enabled) in handles.iter().zip(model) {
            assert_eq!(scheduler.is_enabled(handle.id()), enabled);
            assert_eq!(scheduler.is_active(handle.id()), enabled);
        }
        let now = scheduler.now();
        let remaining: Vec<i32> = scheduler
            .active_timers()
            .unwrap()
            .into_iter()
            .map(|(_, expiry)| expiry.wrapping_sub(now) as i32)
            .collect();
        assert!(remaining.windows(2).all(|w| w[0] <= w[1]));
        scheduler.advance(rng.u32(0..20));
    }
}

#[test]
fn full_queue_rejects_without_side_effects() {
    let scheduler = Scheduler::<_, 4>::with_config(NoCriticalSection::new(), SchedulerConfig::default());
    let handles: Vec<_> = (0..4)
        .map(|_| scheduler.create(6, noop).unwrap())
        .collect();

    for handle in &handles[..3] {
        scheduler.start(handle.id()).unwrap();
    }
    assert_eq!(scheduler.start(handles[3].id()), Err(TimerError::QueueFull));
    assert!(!scheduler.is_enabled(handles[3].id()));
    assert_eq!(scheduler.pending_commands(), 3);

    scheduler.handler().unwrap();
    let active: Vec<_> = scheduler
        .active_timers()
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    let expected: Vec<_> = handles[..3].iter().map(TimerHandle::id).collect();
    assert_eq!(active, expected);

    // Space is available again after the drain.
    scheduler.start(handles[3].id()).unwrap();
}

#[test]
fn wraparound_fires_once() {
    let scheduler = scheduler_at(u32::MAX - 2);
    let hits = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&hits);
    let handle = scheduler
        .create(5, move |_: &Expired<'_>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    scheduler.start(handle.id()).unwrap();
    scheduler.handler().unwrap();
    assert_eq!(scheduler.active_timers().unwrap(), vec![(handle.id(), 2)]);

    for _ in 0..8 {
        scheduler.tick();
    }
    assert_eq!(scheduler.now(), 5);
    assert_eq!(scheduler.handler(), Ok(1));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get_count(handle.id()), 1);
}

#[test]
fn simultaneous_expiries_fire_in_start_order() {
    let scheduler = scheduler_at(0);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let order = Arc::clone(&order);
            scheduler
                .create(3, move |event: &Expired<'_>| {
                    order.lock().unwrap().push(event.id());
                })
                .unwrap()
        })
        .collect();
    for handle in handles.iter().rev() {
        scheduler.start(handle.id()).unwrap();
    }
    scheduler.handler().unwrap();
    scheduler.advance(3);
    assert_eq!(scheduler.handler(), Ok(4));

    let expected: Vec<_> = handles.iter().rev().map(TimerHandle::id).collect();
    assert_eq!(*order.lock().unwrap(), expected);
}

#[test]
fn earlier_expiry_fires_first() {
    let scheduler = scheduler_at(0);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut ids = Vec::new();
    for period in [9, 3, 6] {
        let order = Arc::clone(&order);
        let handle = scheduler
            .create(period, move |event: &Expired<'_>| {
                order.lock().unwrap().push(event.expiry());
            })
            .unwrap();
        scheduler.start(handle.id()).unwrap();
        ids.push(handle);
    }
    scheduler.handler().unwrap();
    assert_eq!(scheduler.next_due(), Ok(Some(3)));
    scheduler.advance(9);
    assert_eq!(scheduler.handler(), Ok(3));
    assert_eq!(*order.lock().unwrap(), vec![3, 6, 9]);
}

#[test]
fn configuration_requires_disabled_timer() {
    let scheduler = scheduler_at(0);
    let handle = scheduler.create(4, noop).unwrap();
    let id = handle.id();

    assert!(matches!(
        scheduler.set_period(id, 0),
        Err(TimerError::InvalidArgument(_))
    ));
    assert!(matches!(
        scheduler.set_period(id, MAX_TICKS + 1),
        Err(TimerError::InvalidArgument(_))
    ));
    scheduler.set_period(id, 8).unwrap();
    scheduler.set_count(id, 41).unwrap();
    assert_eq!(scheduler.period(id), Some(8));
    assert_eq!(scheduler.get_count(id), 41);

    scheduler.start(id).unwrap();
    assert_eq!(scheduler.set_period(id, 2), Err(TimerError::Busy));
    assert_eq!(scheduler.set_count(id, 0), Err(TimerError::Busy));
    assert_eq!(scheduler.register_callback(id, noop), Err(TimerError::Busy));
    assert_eq!(scheduler.clear_callback(id), Err(TimerError::Busy));

    scheduler.handler().unwrap();
    scheduler.advance(8);
    scheduler.handler().unwrap();
    assert_eq!(scheduler.get_count(id), 42);
}

#[test]
fn invalid_arguments_are_rejected() {
    let scheduler = scheduler_at(0);
    assert!(matches!(
        scheduler.create(0, noop),
        Err(TimerError::InvalidArgument(_))
    ));
    assert!(matches!(
        scheduler.create(MAX_TICKS + 1, noop),
        Err(TimerError::InvalidArgument(_))
    ));

    let handle = scheduler.create(1, noop).unwrap();
    let stale = handle.id();
    scheduler.delete(handle).unwrap();
    assert!(matches!(
        scheduler.start(stale),
        Err(TimerError::InvalidArgument(_))
    ));
    assert!(matches!(
        scheduler.stop(stale),
        Err(TimerError::InvalidArgument(_))
    ));
    assert_eq!(scheduler.get_count(stale), 0);
    assert!(!scheduler.is_enabled(stale));
}

#[test]
fn timer_without_callback_still_counts() {
    let scheduler = scheduler_at(0);
    let handle = scheduler
        .create_with(2, soft_timer::TimerMode::Periodic, None)
        .unwrap();
    scheduler.start(handle.id()).unwrap();
    scheduler.handler().unwrap();
    scheduler.advance(2);
    assert_eq!(scheduler.handler(), Ok(1));
    assert_eq!(scheduler.get_count(handle.id()), 1);
}
