use spindle::{BrokerError, SchedulerBuilder, SchedulerError, Status};

#[test]
fn test_oversized_ring_order_fails_run() {
    let mut scheduler = SchedulerBuilder::new()
        .workers(1)
        .queue_order(25)
        .build()
        .unwrap();

    let handle = scheduler.spawn(|_cx| async move { Ok(0) });

    assert_eq!(scheduler.run(), -2);

    // Tasks never started are destroyed on the way out.
    assert_eq!(handle.status(), Status::Zombie);
    assert_eq!(scheduler.live_tasks(), 0);
}

#[test]
fn test_try_run_reports_typed_error() {
    let mut scheduler = SchedulerBuilder::new()
        .workers(2)
        .queue_order(30)
        .build()
        .unwrap();

    let err = scheduler.try_run().unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Broker(BrokerError::Queue(_))
    ));
    assert_eq!(err.code(), -2);
}

#[test]
fn test_empty_scheduler_returns_immediately() {
    let mut scheduler = SchedulerBuilder::new().workers(3).build().unwrap();
    assert_eq!(scheduler.run(), 0);
    assert_eq!(scheduler.ticks(), 0);
}

#[test]
fn test_scheduler_can_run_again() {
    let mut scheduler = SchedulerBuilder::new().workers(2).build().unwrap();

    let first = scheduler.spawn(|cx| async move {
        cx.sleep(1).await;
        Ok(1)
    });
    assert_eq!(scheduler.run(), 0);

    let second = scheduler.spawn(|cx| async move {
        cx.yield_now().await;
        Ok(2)
    });
    assert_eq!(scheduler.run(), 0);

    assert_eq!(first.take_result().unwrap().unwrap(), 1);
    assert_eq!(second.take_result().unwrap().unwrap(), 2);
}

#[test]
#[should_panic(expected = "workers must be > 0")]
fn test_zero_workers_panics() {
    let _ = SchedulerBuilder::new().workers(0);
}

#[test]
#[should_panic(expected = "fairness_quantum must be > 0")]
fn test_zero_quantum_panics() {
    let _ = SchedulerBuilder::new().fairness_quantum(0);
}
