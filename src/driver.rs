//! Host-side tick source and dispatch loop built on tokio.
//!
//! On hardware the tick comes from an interrupt and `handler` runs in the
//! main loop. On a hosted target, [`Driver`] plays both roles with two
//! tokio tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "logging")]
use log::debug;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::critical::CriticalSection;
use crate::errors::TimerError;
use crate::scheduler::Scheduler;

/// Two background tasks: one advancing the clock, one calling `handler`.
pub struct Driver {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    ticker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Driver {
    /// Spawns the ticker and dispatcher on the current tokio runtime.
    ///
    /// The ticker never drops ticks (`Burst`); the dispatcher skips missed
    /// passes (`Skip`), matching the scheduler's no catch-up rule.
    pub fn spawn<C, const N: usize>(
        scheduler: Arc<Scheduler<C, N>>,
        tick_every: Duration,
        dispatch_every: Duration,
    ) -> Result<Self, TimerError>
    where
        C: CriticalSection + Send + Sync + 'static,
    {
        if tick_every.is_zero() || dispatch_every.is_zero() {
            return Err(TimerError::InvalidArgument(
                "Interval must be greater than zero.",
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        #[cfg(feature = "logging")]
        debug!(
            "Starting driver: tick every {:?}, dispatch every {:?}.",
            tick_every, dispatch_every
        );

        let ticker = {
            let scheduler = Arc::clone(&scheduler);
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut interval = time::interval_at(time::Instant::now() + tick_every, tick_every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
                while running.load(Ordering::Acquire) {
                    tokio::select! {
                        _ = shutdown.notified() => {}
                        _ = interval.tick() => scheduler.tick(),
                    }
                }
            })
        };

        let dispatcher = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut interval = time::interval(dispatch_every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                while running.load(Ordering::Acquire) {
                    tokio::select! {
                        _ = shutdown.notified() => {}
                        _ = interval.tick() => {
                            if let Err(_e) = scheduler.handler() {
                                #[cfg(feature = "logging")]
                                debug!("Dispatch pass skipped: {}", _e);
                            }
                        }
                    }
                }
            })
        };

        Ok(Driver {
            running,
            shutdown,
            ticker: Some(ticker),
            dispatcher: Some(dispatcher),
        })
    }

    /// `false` once [`stop`](Self::stop) has been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops both tasks and waits for them to finish.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
        for handle in [self.ticker.take(), self.dispatcher.take()]
            .into_iter()
            .flatten()
        {
            let _ = handle.await;
        }
        #[cfg(feature = "logging")]
        debug!("Driver stopped.");
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in [self.ticker.take(), self.dispatcher.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}
