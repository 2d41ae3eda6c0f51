use spindle::time::{ManualTime, TimeSource};
use spindle::{SchedulerBuilder, Status};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_sleep_waits_at_least_the_delay() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        let start = Instant::now();
        cx.sleep(50).await;
        Ok(start.elapsed().as_millis() as i64)
    });

    assert_eq!(scheduler.run(), 0);

    let elapsed = handle.take_result().unwrap().unwrap();
    assert!(elapsed >= 50, "woke after {elapsed}ms");
}

#[test]
fn test_zero_sleep_is_fast() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let start = Instant::now();

    scheduler.spawn(|cx| async move {
        cx.sleep(0).await;
        Ok(0)
    });

    assert_eq!(scheduler.run(), 0);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_sleepers_wake_in_expiry_order() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let woken = Rc::new(RefCell::new(Vec::new()));

    for delay in [30, 10, 20] {
        let woken = woken.clone();
        scheduler.spawn(move |cx| async move {
            cx.sleep(delay).await;
            woken.borrow_mut().push(delay);
            Ok(0)
        });
    }

    assert_eq!(scheduler.run(), 0);
    assert_eq!(*woken.borrow(), vec![10, 20, 30]);
}

#[test]
fn test_timer_fires_after_simulated_advance() {
    let time = Arc::new(ManualTime::new());
    let mut scheduler = SchedulerBuilder::new()
        .workers(1)
        .fairness_quantum(2)
        .time_source(time.clone())
        .build()
        .unwrap();

    let woke_at = Rc::new(Cell::new(None));
    let done = Rc::new(Cell::new(false));

    let sleeper = {
        let woke_at = woke_at.clone();
        let done = done.clone();
        scheduler.spawn(move |cx| async move {
            cx.sleep(50).await;
            woke_at.set(Some(cx.now()));
            done.set(true);
            Ok(0)
        })
    };

    // Keeps the ready queue busy and drives the simulated clock.
    let spinner = {
        let time = time.clone();
        let done = done.clone();
        scheduler.spawn(move |cx| async move {
            let mut yields = 0;
            while !done.get() {
                time.advance(10);
                cx.yield_now().await;
                yields += 1;
            }
            Ok(yields)
        })
    };

    assert_eq!(scheduler.run(), 0);

    assert_eq!(sleeper.status(), Status::Done);
    assert!(woke_at.get().unwrap() >= 50);

    // Expired timers are checked between fairness quanta.
    let yields = spinner.take_result().unwrap().unwrap();
    assert!(yields >= 5, "timer fired early, after {yields} yields");
    assert!(yields <= 5 + 2 * 2 + 1, "timer starved for {yields} yields");
    assert!(time.now_ms() >= 50);
}

#[test]
fn test_spinning_task_does_not_starve_sleeper() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let done = Rc::new(Cell::new(false));

    {
        let done = done.clone();
        scheduler.spawn(move |cx| async move {
            cx.sleep(20).await;
            done.set(true);
            Ok(0)
        });
    }

    let spinner = {
        let done = done.clone();
        scheduler.spawn(move |cx| async move {
            let start = Instant::now();
            while !done.get() {
                assert!(start.elapsed() < Duration::from_secs(5));
                cx.yield_now().await;
            }
            Ok(0)
        })
    };

    assert_eq!(scheduler.run(), 0);
    assert_eq!(spinner.status(), Status::Done);
}
