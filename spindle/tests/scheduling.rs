use spindle::{SchedulerBuilder, Status, TaskHandle};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn test_yielding_task_is_reaped_after_four_ticks() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        for _ in 0..3 {
            cx.yield_now().await;
        }
        Ok(0)
    });

    for tick in 1..=3 {
        assert!(scheduler.tick());
        assert_eq!(handle.status(), Status::Yield, "tick {tick}");
    }

    assert!(scheduler.tick());
    assert_eq!(handle.status(), Status::Done);
    assert_eq!(scheduler.ticks(), 4);
    assert_eq!(scheduler.live_tasks(), 0);

    assert!(!scheduler.tick());
    assert_eq!(handle.take_result().unwrap().unwrap(), 0);
}

#[test]
fn test_round_robin_order() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let trace = Rc::new(RefCell::new(Vec::new()));

    for name in ['a', 'b', 'c'] {
        let trace = trace.clone();
        scheduler.spawn(move |cx| async move {
            for _ in 0..2 {
                trace.borrow_mut().push(name);
                cx.yield_now().await;
            }
            Ok(0)
        });
    }

    assert_eq!(scheduler.run(), 0);
    assert_eq!(*trace.borrow(), vec!['a', 'b', 'c', 'a', 'b', 'c']);
}

#[test]
fn test_spawn_runs_child_independently() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let trace = Rc::new(RefCell::new(Vec::new()));

    let parent = {
        let trace = trace.clone();
        scheduler.spawn(move |cx| async move {
            let child_trace = trace.clone();
            let child = cx
                .spawn(move |cx| async move {
                    cx.yield_now().await;
                    child_trace.borrow_mut().push("child");
                    Ok(7)
                })
                .await;

            trace.borrow_mut().push("parent");
            assert!(!child.is_finished());
            Ok(child.id() as i64)
        })
    };

    assert_eq!(scheduler.run(), 0);
    assert_eq!(*trace.borrow(), vec!["parent", "child"]);
    assert_eq!(parent.status(), Status::Done);
    assert_eq!(scheduler.live_tasks(), 0);
}

#[test]
fn test_spawned_handle_collects_result() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let slot: Rc<RefCell<Option<TaskHandle>>> = Rc::new(RefCell::new(None));

    {
        let slot = slot.clone();
        scheduler.spawn(move |cx| async move {
            let child = cx.spawn(|_cx| async move { Ok(11) }).await;
            *slot.borrow_mut() = Some(child);
            Ok(0)
        });
    }

    assert_eq!(scheduler.run(), 0);

    let child = slot.borrow_mut().take().unwrap();
    assert_eq!(child.status(), Status::Done);
    assert_eq!(child.take_result().unwrap().unwrap(), 11);
    assert!(child.take_result().is_none());
}

#[test]
fn test_pause_and_unpause() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let resumed = Rc::new(Cell::new(false));

    let sleeper = {
        let resumed = resumed.clone();
        scheduler.spawn(move |cx| async move {
            cx.pause().await;
            resumed.set(true);
            Ok(1)
        })
    };

    {
        let sleeper = sleeper.clone();
        let resumed = resumed.clone();
        scheduler.spawn(move |cx| async move {
            assert_eq!(sleeper.status(), Status::Paused);
            assert!(cx.unpause(&sleeper));

            // Unpausing takes effect after the current tick.
            assert!(!resumed.get());

            let mut yields = 0;
            while !resumed.get() {
                cx.yield_now().await;
                yields += 1;
            }
            assert!(yields <= 2, "paused task took {yields} yields to resume");

            assert!(!cx.unpause(&sleeper));
            Ok(0)
        });
    }

    assert_eq!(scheduler.run(), 0);
    assert_eq!(sleeper.take_result().unwrap().unwrap(), 1);
}

#[test]
fn test_task_never_unpaused_becomes_zombie() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        cx.pause().await;
        Ok(0)
    });

    assert_eq!(scheduler.run(), 0);
    assert_eq!(handle.status(), Status::Zombie);
    assert!(handle.take_result().is_none());
    assert_eq!(scheduler.live_tasks(), 0);
}

#[test]
fn test_failed_task_reports_error() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let failed = scheduler.spawn(|_cx| async move { Err(spindle::TaskError::Code(3)) });
    let panicked = scheduler.spawn(|_cx| async move {
        if true {
            panic!("task blew up");
        }
        Ok(0)
    });

    assert_eq!(scheduler.run(), 0);

    assert_eq!(failed.status(), Status::Error);
    assert!(matches!(
        failed.take_result(),
        Some(Err(spindle::TaskError::Code(3)))
    ));

    assert_eq!(panicked.status(), Status::UnhandledException);
    let err = panicked.take_result().unwrap().unwrap_err();
    assert!(err.is_panic());
    assert_eq!(err.to_string(), "task panicked: task blew up");
}

#[test]
fn test_panic_while_starting_body_fails_only_that_task() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let broken = scheduler.spawn(|_cx| {
        if true {
            panic!("closure blew up");
        }
        async move { Ok(0) }
    });
    let sibling = scheduler.spawn(|cx| async move {
        cx.yield_now().await;
        Ok(7)
    });

    assert_eq!(scheduler.run(), 0);

    assert_eq!(broken.status(), Status::UnhandledException);
    let err = broken.take_result().unwrap().unwrap_err();
    assert!(err.is_panic());
    assert_eq!(err.to_string(), "task panicked: closure blew up");

    assert_eq!(sibling.take_result().unwrap().unwrap(), 7);
    assert_eq!(scheduler.live_tasks(), 0);
}

#[spindle::test]
async fn test_macro_runs_body_on_scheduler(cx: spindle::Ctx) {
    let before = cx.now();
    cx.yield_now().await;
    assert!(cx.now() >= before);
}

#[spindle::test(workers = 2, fairness_quantum = 1)]
async fn test_macro_accepts_builder_arguments(cx: spindle::Ctx) {
    let value = cx.join(|_cx| async move { Ok(5) }).await?;
    assert_eq!(value, 5);
}
