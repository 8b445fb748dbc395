//! # Admission Queue Under Contention
//!
//! Drives many concurrent operations through one lane and checks the
//! concurrency gate, priority ordering, limit updates, and shutdown drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_translation_orchestrator::admission::{AdmissionError, AdmissionQueue, Priority};
use tokio_translation_orchestrator::config::{QueueConfig, ThrottleConfig};

fn queue(limit: usize) -> AdmissionQueue {
    let queue = AdmissionQueue::new(QueueConfig {
        default_concurrency: limit,
        throttle: ThrottleConfig {
            enabled: false,
            ..ThrottleConfig::default()
        },
        ..QueueConfig::default()
    });
    queue.register("deepl");
    queue
}

async fn wait_until_queued(queue: &AdmissionQueue, n: usize) {
    for _ in 0..1000 {
        if queue.queue_size("deepl") >= n {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("queue never reached {n} waiters");
}

#[tokio::test]
async fn test_concurrency_one_never_overlaps() {
    let queue = queue(1);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let queue = queue.clone();
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            queue
                .enqueue("deepl", Priority::Normal, || async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                })
                .await
        }));
    }

    for handle in handles {
        handle.await.expect("join").expect("enqueue");
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(queue.status()["deepl"].in_flight, 0);
}

#[tokio::test]
async fn test_higher_priority_runs_first_fifo_within_priority() {
    let queue = queue(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let blocker = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue("deepl", Priority::Normal, || async {
                    let _ = release_rx.await;
                    Ok::<_, ()>(())
                })
                .await
        })
    };
    for _ in 0..100 {
        if queue.status()["deepl"].in_flight == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    let mut waiters = Vec::new();
    for (i, (label, priority)) in [
        ("low", Priority::Low),
        ("normal-1", Priority::Normal),
        ("critical", Priority::Critical),
        ("normal-2", Priority::Normal),
    ]
    .into_iter()
    .enumerate()
    {
        let lane = queue.clone();
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            lane.enqueue("deepl", priority, || async {
                order.lock().push(label);
                Ok::<_, ()>(())
            })
            .await
        }));
        wait_until_queued(&queue, i + 1).await;
    }

    release_tx.send(()).expect("release blocker");
    blocker.await.expect("join").expect("blocker");
    for waiter in waiters {
        waiter.await.expect("join").expect("waiter");
    }

    assert_eq!(
        *order.lock(),
        vec!["critical", "normal-1", "normal-2", "low"]
    );
}

#[tokio::test]
async fn test_raising_the_limit_admits_waiters_immediately() {
    let queue = queue(1);
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let blocker = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue("deepl", Priority::Normal, || async {
                    let _ = release_rx.await;
                    Ok::<_, ()>(())
                })
                .await
        })
    };
    for _ in 0..100 {
        if queue.status()["deepl"].in_flight == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue("deepl", Priority::Normal, || async { Ok::<_, ()>("ran") })
                .await
        })
    };
    wait_until_queued(&queue, 1).await;

    queue.update_limits(&HashMap::from([("deepl".to_string(), 2)]));
    assert_eq!(waiter.await.expect("join").expect("waiter"), "ran");
    assert_eq!(queue.status()["deepl"].limit, 2);

    release_tx.send(()).expect("release blocker");
    blocker.await.expect("join").expect("blocker");
}

#[tokio::test]
async fn test_operation_errors_propagate_unchanged() {
    let queue = queue(2);
    let attempts = AtomicUsize::new(0);
    let err = queue
        .enqueue("deepl", Priority::High, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("quota exceeded")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AdmissionError::Failed("quota exceeded")));
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "never retried");
}

#[tokio::test]
async fn test_unknown_backend_is_rejected() {
    let queue = queue(1);
    let err = queue
        .enqueue("nope", Priority::Normal, || async { Ok::<_, ()>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::UnknownBackend(name) if name == "nope"));
}

#[tokio::test(start_paused = true)]
async fn test_drain_times_out_and_clears_stragglers() {
    let queue = queue(1);

    let long = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue("deepl", Priority::Normal, || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, ()>(())
                })
                .await
        })
    };
    for _ in 0..100 {
        if queue.status()["deepl"].in_flight == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let queued = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue("deepl", Priority::Normal, || async { Ok::<_, ()>(()) })
                .await
        })
    };
    wait_until_queued(&queue, 1).await;

    let report = queue.drain(Duration::from_secs(1)).await;
    assert!(!report.completed);
    assert_eq!(report.cleared, 1);
    assert!(!queue.is_accepting());

    assert!(matches!(
        queued.await.expect("join"),
        Err(AdmissionError::Cleared)
    ));
    let closed = queue
        .enqueue("deepl", Priority::Normal, || async { Ok::<_, ()>(()) })
        .await;
    assert!(matches!(closed, Err(AdmissionError::Closed)));

    long.abort();
}
