//! Integration tests for the batch processor

use flowguard::batch::{BatchConfig, BatchProcessor, ItemError, ItemStatus, ProcessOptions};
use flowguard::facade::process_with_limit;
use flowguard::resilience::RateLimiterConfig;
use flowguard::Error;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_partial_failure_with_retries() {
    let processor = BatchProcessor::new(
        |n: u32| async move {
            sleep(Duration::from_millis(20)).await;
            if n == 3 {
                Err(format!("item {} is poisoned", n))
            } else {
                Ok(n * 100)
            }
        },
        BatchConfig::new()
            .with_concurrency(2)
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(50)),
    );

    let outcome = processor.process(vec![1, 2, 3, 4, 5], ProcessOptions::new()).await;

    let mut results = outcome.results.clone();
    results.sort();
    assert_eq!(results, vec![100, 200, 400, 500]);
    assert_eq!(outcome.failures.len(), 1);

    let failure = &outcome.failures[0];
    assert_eq!(failure.input, 3);
    assert_eq!(failure.id, 2);
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.error.task_error().map(String::as_str), Some("item 3 is poisoned"));

    assert_eq!(outcome.stats.total, 5);
    assert_eq!(outcome.stats.succeeded, 4);
    assert_eq!(outcome.stats.failed, 1);
    assert_eq!(outcome.stats.retries, 1);
    assert!(!outcome.all_succeeded());
    assert!((outcome.success_rate() - 0.8).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_every_item_resolves_exactly_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let processor = BatchProcessor::new(
        |n: u64| async move {
            sleep(Duration::from_millis(n % 7 * 10)).await;
            if n % 5 == 0 {
                Err("multiple of five")
            } else {
                Ok(n)
            }
        },
        BatchConfig::new()
            .with_concurrency(4)
            .with_max_retries(1),
    );
    let opts = ProcessOptions::new().on_progress(move |resolved, total, item| {
        assert_eq!(item.status, ItemStatus::Completed);
        assert!(resolved <= total);
        s.lock().unwrap().push(item.id);
    });

    let outcome = processor.process(0..50u64, opts).await;
    assert_eq!(outcome.results.len() + outcome.failures.len(), 50);
    assert_eq!(outcome.failures.len(), 10);

    let succeeded: HashSet<usize> = seen.lock().unwrap().iter().copied().collect();
    let failed: HashSet<usize> = outcome.failures.iter().map(|f| f.id).collect();
    assert_eq!(succeeded.len(), 40);
    assert!(succeeded.is_disjoint(&failed));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_is_respected() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

    let processor = BatchProcessor::new(
        move |n: u64| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5 + n % 4 * 5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(n)
            }
        },
        BatchConfig::new().with_concurrency(3),
    );

    let outcome = processor.process(0..30u64, ProcessOptions::new()).await;
    assert!(outcome.all_succeeded());
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retried_item_goes_to_back_of_queue() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let failed_once = Arc::new(AtomicUsize::new(0));
    let (s, f) = (Arc::clone(&starts), Arc::clone(&failed_once));

    let processor = BatchProcessor::new(
        move |n: u32| {
            s.lock().unwrap().push(n);
            let first_failure = n == 0 && f.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first_failure {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        },
        BatchConfig::new()
            .with_concurrency(1)
            .with_max_retries(3)
            .with_retry_delay(Duration::from_millis(10)),
    );

    let outcome = processor.process(vec![0, 1, 2], ProcessOptions::new()).await;
    assert!(outcome.all_succeeded());
    assert_eq!(*starts.lock().unwrap(), vec![0, 1, 2, 0]);
    assert_eq!(outcome.results, vec![1, 2, 0]);
    assert_eq!(outcome.stats.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_signal_stops_unstarted_items() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let processor = BatchProcessor::new(
        move |n: u32| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                sleep(Duration::from_millis(100)).await;
                Ok::<_, String>(n)
            }
        },
        BatchConfig::new().with_concurrency(1),
    );

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });

    let outcome = processor
        .process(0..10u32, ProcessOptions::new().with_signal(token))
        .await;

    // the item running when the signal fired was allowed to finish
    assert_eq!(outcome.results, vec![0, 1, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.failures.len(), 7);
    for failure in &outcome.failures {
        assert!(failure.error.is_aborted());
        assert_eq!(failure.attempts, 0);
        assert_eq!(failure.error.to_string(), "Aborted");
    }
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_rate_limiter_wait() {
    let processor = BatchProcessor::new(
        |n: u32| async move { Ok::<_, String>(n) },
        BatchConfig::new()
            .with_concurrency(4)
            .with_rate_limit(RateLimiterConfig::new(1, Duration::from_secs(60))),
    );
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let outcome = processor
        .process(0..4u32, ProcessOptions::new().with_signal(token))
        .await;
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(outcome.results, vec![0]);
    assert_eq!(outcome.failures.len(), 3);
    assert!(outcome.failures.iter().all(|f| f.error.is_aborted()));
}

#[tokio::test(start_paused = true)]
async fn test_error_handler_can_keep_going_or_halt() {
    let task = |n: u32| async move {
        sleep(Duration::from_millis(10)).await;
        if n % 2 == 1 {
            Err(n)
        } else {
            Ok(n)
        }
    };
    let config = BatchConfig::new().with_concurrency(1).with_max_retries(1);

    let tolerant = BatchProcessor::new(task, config.clone());
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    let outcome = tolerant
        .process(
            0..6u32,
            ProcessOptions::new().on_error(move |err, item| {
                assert_eq!(err.task_error(), Some(&item.input));
                s.fetch_add(1, Ordering::SeqCst);
                true
            }),
        )
        .await;
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.results.len(), 3);

    let strict = BatchProcessor::new(task, config);
    let outcome = strict
        .process(0..6u32, ProcessOptions::new().on_error(|_, _| false))
        .await;
    assert_eq!(outcome.results, vec![0]);
    assert_eq!(outcome.failures.len(), 5);
    assert!(matches!(outcome.failures[0].error, ItemError::Task(1)));
    assert!(outcome.failures[1..]
        .iter()
        .all(|f| matches!(f.error, ItemError::Halted)));
}

#[tokio::test(start_paused = true)]
async fn test_stream_reports_progress() {
    let processor = BatchProcessor::new(
        |n: u32| async move {
            sleep(Duration::from_millis(u64::from(10 - n) * 10)).await;
            if n == 4 {
                Err("four")
            } else {
                Ok(n)
            }
        },
        BatchConfig::new().with_concurrency(10).with_max_retries(1),
    );

    let events: Vec<_> = processor
        .stream(0..10u32, ProcessOptions::new())
        .collect()
        .await;
    assert_eq!(events.len(), 10);
    // shortest sleeps finish first
    assert_eq!(events[0].item.input, 9);
    assert_eq!(
        events.iter().map(|e| e.completed).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<_>>()
    );
    let failed: Vec<_> = events.iter().filter(|e| !e.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].item.input, 4);
    assert_eq!(failed[0].item.status, ItemStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_does_not_stall_running_attempts() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&finished);
    let processor = BatchProcessor::new(
        move |n: u32| {
            let finished = Arc::clone(&f);
            async move {
                let ms = if n == 3 { 50 } else { 10 };
                sleep(Duration::from_millis(ms)).await;
                finished.lock().unwrap().push((n, Instant::now()));
                Ok::<_, String>(n)
            }
        },
        BatchConfig::new().with_concurrency(2),
    );

    let start = Instant::now();
    let stream = processor.stream(0..4u32, ProcessOptions::new());
    // the channel fills up long before the consumer starts reading
    sleep(Duration::from_secs(1)).await;
    let events: Vec<_> = stream.collect().await;
    assert_eq!(events.len(), 4);

    let finished = finished.lock().unwrap();
    let (_, at) = finished
        .iter()
        .find(|(n, _)| *n == 3)
        .copied()
        .unwrap();
    assert!(at - start < Duration::from_millis(100), "{:?}", at - start);
}

#[tokio::test(start_paused = true)]
async fn test_process_with_limit_rejects_partial_failure() {
    let err = process_with_limit(
        vec!["a", "bb", ""],
        |s: &'static str| async move {
            if s.is_empty() {
                Err("empty input")
            } else {
                Ok(s.len())
            }
        },
        BatchConfig::new().with_max_retries(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::BatchFailed { failed: 1, total: 3, .. }));
    assert!(err.to_string().contains("empty input"));
}
