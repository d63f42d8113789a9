use parking_lot::Mutex;
use recordflow::errors::DbError;
use recordflow::flow::{Flow, Ticket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn tasks_start_in_submission_order_regardless_of_latency() {
    let flow = Flow::new().unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let delays = [40u64, 5, 25, 0, 10, 1];
    let tickets: Vec<_> = delays
        .iter()
        .enumerate()
        .map(|(i, ms)| {
            let starts = Arc::clone(&starts);
            let ms = *ms;
            flow.execute(move || async move {
                starts.lock().push(i);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, DbError>(i)
            })
        })
        .collect();
    for (i, t) in tickets.into_iter().enumerate().rev() {
        assert_eq!(t.await.unwrap(), i);
    }
    assert_eq!(*starts.lock(), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn no_two_tasks_are_in_flight_together() {
    let flow = Flow::new().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut tickets = Vec::new();
    for i in 0..20u64 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        tickets.push(flow.execute(move || async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(i % 3)).await;
            tokio::task::yield_now().await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<(), DbError>(())
        }));
    }
    for t in tickets {
        t.await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failure_poisons_later_tasks_without_running_them() {
    let flow = Flow::new().unwrap();
    let a = flow.execute(|| async { Err::<(), _>(DbError::Store("disk full".into())) });
    let ran = Arc::new(AtomicBool::new(false));
    let ran_b = Arc::clone(&ran);
    let b = flow.execute(move || async move {
        ran_b.store(true, Ordering::SeqCst);
        Ok::<_, DbError>(1)
    });
    let c = flow.execute(|| async { Ok::<_, DbError>(2) });

    let expected = DbError::Store("disk full".into());
    assert_eq!(a.await.unwrap_err(), expected);
    assert_eq!(b.await.unwrap_err(), expected);
    assert_eq!(c.await.unwrap_err(), expected);
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn recovery_handler_heals_the_queue() {
    let flow = Flow::new().unwrap();
    let a = flow.execute(|| async { Err::<u32, _>(DbError::Store("boom".into())) });
    let seen = Arc::new(Mutex::new(None));
    let seen_c = Arc::clone(&seen);
    let c = flow.execute_or_recover(
        || async { Ok::<_, DbError>(0) },
        move |err| async move {
            *seen_c.lock() = Some(err);
            Ok(42)
        },
    );
    let d = flow.execute(|| async { Ok::<_, DbError>(7) });

    assert!(a.await.is_err());
    assert_eq!(c.await.unwrap(), 42);
    assert_eq!(d.await.unwrap(), 7);
    assert_eq!(*seen.lock(), Some(DbError::Store("boom".into())));
}

#[tokio::test]
async fn recovery_handler_is_unused_on_a_healthy_queue() {
    let flow = Flow::new().unwrap();
    let used = Arc::new(AtomicBool::new(false));
    let used_h = Arc::clone(&used);
    let v = flow
        .execute_or_recover(
            || async { Ok::<_, DbError>("task") },
            move |_| async move {
                used_h.store(true, Ordering::SeqCst);
                Ok("handler")
            },
        )
        .await
        .unwrap();
    assert_eq!(v, "task");
    assert!(!used.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failing_handler_repoisons_with_its_own_error() {
    let flow = Flow::new().unwrap();
    let _ = flow.execute(|| async { Err::<(), _>(DbError::Store("first".into())) });
    let h = flow.execute_or_recover(
        || async { Ok::<(), DbError>(()) },
        |_| async { Err(DbError::Query("second".into())) },
    );
    let next = flow.execute(|| async { Ok::<(), DbError>(()) });
    assert_eq!(h.await.unwrap_err(), DbError::Query("second".into()));
    assert_eq!(next.await.unwrap_err(), DbError::Query("second".into()));
}

#[tokio::test]
async fn dropped_ticket_still_runs() {
    let flow = Flow::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    drop(flow.execute(move || async move {
        h.fetch_add(1, Ordering::SeqCst);
        Ok::<(), DbError>(())
    }));
    let h = Arc::clone(&hits);
    let n = flow
        .execute(move || async move { Ok::<_, DbError>(h.load(Ordering::SeqCst)) })
        .await
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn queues_are_independent() {
    let stalled = Flow::new().unwrap();
    let free = Flow::new().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let blocked = stalled.execute(move || async move {
        let _ = rx.await;
        Ok::<_, DbError>("released")
    });
    let quick = free.execute(|| async { Ok::<_, DbError>(1) });
    let v = tokio::time::timeout(Duration::from_secs(1), quick)
        .await
        .expect("independent queue must not wait")
        .unwrap();
    assert_eq!(v, 1);
    tx.send(()).unwrap();
    assert_eq!(blocked.await.unwrap(), "released");
}

#[tokio::test]
async fn clones_share_one_queue() {
    let flow = Flow::new().unwrap();
    let other = flow.clone();
    let order = Arc::new(Mutex::new(Vec::new()));
    let o1 = Arc::clone(&order);
    let first = flow.execute(move || async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        o1.lock().push("first");
        Ok::<(), DbError>(())
    });
    let o2 = Arc::clone(&order);
    let second = other.execute(move || async move {
        o2.lock().push("second");
        Ok::<(), DbError>(())
    });
    second.await.unwrap();
    first.await.unwrap();
    assert_eq!(*order.lock(), vec!["first", "second"]);
}

#[tokio::test]
async fn rejected_ticket_fails_without_touching_the_queue() {
    let flow = Flow::new().unwrap();
    let t: Ticket<u8> = Ticket::rejected(DbError::Query("bad".into()));
    assert_eq!(t.await.unwrap_err(), DbError::Query("bad".into()));
    assert_eq!(flow.execute(|| async { Ok::<_, DbError>(3) }).await.unwrap(), 3);
}
