use std::sync::Arc;
use std::time::Duration;

use soft_timer::{Driver, Expired, Scheduler, SpinCriticalSection, TimerError};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), TimerError> {
    // One tick per millisecond.
    let scheduler = Arc::new(Scheduler::new(SpinCriticalSection::new()));

    // 1. One-shot timer
    let one_shot = scheduler.create_one_shot(200, |event: &Expired<'_>| {
        println!("One-shot timer fired at tick {}!", event.expiry());
    })?;
    scheduler.start(one_shot.id())?;

    // 2. Periodic timer that stops itself after five firings
    let periodic = scheduler.create(300, |event: &Expired<'_>| {
        println!("Periodic timer fired ({} so far).", event.count());
        if event.count() == 5 {
            let _ = event.stop_self();
        }
    })?;
    scheduler.start(periodic.id())?;

    // 3. A timer that kicks off another one
    let follower = scheduler.create_one_shot(50, |_: &Expired<'_>| {
        println!("Follower fired 50 ticks after the leader.");
    })?;
    let follower_id = follower.id();
    let leader = scheduler.create_one_shot(500, move |event: &Expired<'_>| {
        println!("Leader fired, starting follower.");
        let _ = event.control().start(follower_id);
    })?;
    scheduler.start(leader.id())?;

    let mut driver = Driver::spawn(
        Arc::clone(&scheduler),
        Duration::from_millis(1),
        Duration::from_millis(5),
    )?;

    // 4. Reconfiguring requires a stopped timer
    sleep(Duration::from_millis(700)).await;
    if let Err(e) = scheduler.set_period(periodic.id(), 100) {
        println!("Cannot change period while running: {}", e);
    }

    sleep(Duration::from_millis(1500)).await;
    println!(
        "Periodic timer fired {} times; enabled = {}.",
        scheduler.get_count(periodic.id()),
        scheduler.is_enabled(periodic.id())
    );
    scheduler.set_period(periodic.id(), 100)?;

    driver.stop().await;
    for handle in [one_shot, periodic, follower, leader] {
        if scheduler.delete(handle).is_err() {
            println!("Timer still enabled, not deleted.");
        }
    }
    println!("All timers completed!");
    Ok(())
}
