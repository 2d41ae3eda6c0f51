use spindle::{SchedulerBuilder, Status, TaskError};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

#[test]
fn test_join_returns_child_result() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        let a = cx.join(|_cx| async move { Ok(20) }).await?;
        let b = cx
            .join(|cx| async move {
                cx.yield_now().await;
                Ok(22)
            })
            .await?;
        Ok(a + b)
    });

    assert_eq!(scheduler.run(), 0);
    assert_eq!(handle.take_result().unwrap().unwrap(), 42);
    assert_eq!(scheduler.live_tasks(), 0);
}

#[test]
fn test_parent_waits_while_child_runs() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
    let trace = Rc::new(RefCell::new(Vec::new()));

    {
        let trace = trace.clone();
        scheduler.spawn(move |cx| async move {
            let inner = trace.clone();
            cx.join(move |cx| async move {
                for step in 0..3 {
                    inner.borrow_mut().push(format!("child {step}"));
                    cx.yield_now().await;
                }
                Ok(0)
            })
            .await?;

            trace.borrow_mut().push("parent".to_owned());
            Ok(0)
        });
    }

    assert_eq!(scheduler.run(), 0);
    assert_eq!(
        *trace.borrow(),
        vec!["child 0", "child 1", "child 2", "parent"]
    );
}

#[test]
fn test_nested_joins_unwind_in_order() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        let depth = cx
            .join(|cx| async move {
                let inner = cx
                    .join(|cx| async move {
                        cx.sleep(1).await;
                        Ok(1)
                    })
                    .await?;
                Ok(inner + 1)
            })
            .await?;
        Ok(depth + 1)
    });

    assert_eq!(scheduler.run(), 0);
    assert_eq!(handle.take_result().unwrap().unwrap(), 3);
}

#[test]
fn test_child_error_is_transferred() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        match cx.join(|_cx| async move { Err(TaskError::Code(9)) }).await {
            Err(TaskError::Code(code)) => Ok(code as i64),
            other => panic!("unexpected join result: {other:?}"),
        }
    });

    assert_eq!(scheduler.run(), 0);
    assert_eq!(handle.status(), Status::Done);
    assert_eq!(handle.take_result().unwrap().unwrap(), 9);
}

#[test]
fn test_child_panic_is_returned_as_value() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        let result = cx
            .join(|_cx| async move {
                if true {
                    panic!("child failed");
                }
                Ok(0)
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(err.to_string(), "task panicked: child failed");
        Ok(1)
    });

    assert_eq!(scheduler.run(), 0);
    assert_eq!(handle.status(), Status::Done);
    assert_eq!(scheduler.live_tasks(), 0);
}

#[test]
fn test_join_propagate_rethrows_child_panic() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    let handle = scheduler.spawn(|cx| async move {
        cx.join_propagate(|_cx| async move {
            if true {
                panic!("propagated");
            }
            Ok(0)
        })
        .await
    });

    assert_eq!(scheduler.run(), 0);
    assert_eq!(handle.status(), Status::UnhandledException);

    let err = handle.take_result().unwrap().unwrap_err();
    assert_eq!(err.to_string(), "task panicked: propagated");

    let payload = panic::catch_unwind(AssertUnwindSafe(|| err.rethrow())).unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"propagated"));
}

#[test]
fn test_pools_return_to_baseline() {
    let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();

    for _ in 0..16 {
        scheduler.spawn(|cx| async move {
            let mut total = 0;
            for i in 0..4 {
                total += cx.join(move |_cx| async move { Ok(i) }).await?;
            }
            Ok(total)
        });
    }

    assert_eq!(scheduler.live_tasks(), 16);
    assert_eq!(scheduler.run(), 0);
    assert_eq!(scheduler.live_tasks(), 0);
    assert_eq!(scheduler.pending_requests(), 0);
}
