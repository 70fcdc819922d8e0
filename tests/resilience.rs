//! Integration tests for rate limiter, semaphore and circuit breaker

use flowguard::facade::{create_circuit_breaker, create_rate_limiter, create_semaphore};
use flowguard::resilience::{
    CallError, CircuitBreakerConfig, CircuitState, RateLimiter, RateLimiterConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{advance, sleep, Instant};

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_refills_continuously() {
    let limiter = create_rate_limiter(2, Duration::from_millis(1000));
    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());

    advance(Duration::from_millis(500)).await;
    assert_eq!(limiter.available(), 1);

    advance(Duration::from_millis(5000)).await;
    // never above the configured limit
    assert_eq!(limiter.available(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_serves_waiters_in_arrival_order() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(1, Duration::from_millis(100)));
    let order = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..5 {
        let (limiter, order) = (limiter.clone(), Arc::clone(&order));
        handles.push(tokio::spawn(async move {
            limiter.acquire().await.unwrap();
            order.lock().unwrap().push((i, start.elapsed()));
        }));
        // let the task reach the queue before spawning the next one
        tokio::task::yield_now().await;
    }
    for h in handles {
        h.await.unwrap();
    }

    let order = order.lock().unwrap();
    assert_eq!(order.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    let last = order[4].1;
    assert!(last >= Duration::from_millis(400), "{:?}", last);
    assert!(last < Duration::from_millis(420), "{:?}", last);
}

#[tokio::test(start_paused = true)]
async fn test_reset_releases_waiters_with_error() {
    let limiter = create_rate_limiter(1, Duration::from_secs(3600));
    limiter.acquire().await.unwrap();

    let waiting = limiter.clone();
    let handle = tokio::spawn(async move { waiting.acquire().await });
    tokio::task::yield_now().await;
    assert_eq!(limiter.snapshot().waiting, 1);

    limiter.reset();
    let err = handle.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("reset"));
    assert_eq!(limiter.available(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_semaphore_and_limiter_compose() {
    let sem = Arc::new(create_semaphore(2));
    let limiter = create_rate_limiter(10, Duration::from_secs(1));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let (sem, limiter) = (Arc::clone(&sem), limiter.clone());
        let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
        handles.push(tokio::spawn(async move {
            limiter.acquire().await.unwrap();
            sem.run(async {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }));
    }
    let start = Instant::now();
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(sem.available(), 2);
    // 10 tokens up front, the other 10 trickle in over one second
    assert!(start.elapsed() >= Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_lifecycle() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let t = Arc::clone(&transitions);
    let breaker = create_circuit_breaker(
        CircuitBreakerConfig::new()
            .with_failure_threshold(3)
            .with_success_threshold(2)
            .with_reset_timeout(Duration::from_millis(1000)),
    )
    .with_state_observer(move |state| t.lock().unwrap().push(state));
    let calls = &AtomicUsize::new(0);

    for _ in 0..3 {
        let res: Result<(), CallError<&str>> = breaker
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("downstream unavailable")
            })
            .await;
        assert_eq!(res.unwrap_err().into_inner(), Some("downstream unavailable"));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // fails fast without running the operation
    let res: Result<u32, CallError<&str>> = breaker
        .execute(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;
    match res {
        Err(CallError::Open { retry_after }) => assert_eq!(retry_after, Duration::from_millis(1000)),
        other => panic!("expected open circuit, got {:?}", other.map_err(|e| e.to_string())),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    advance(Duration::from_millis(1000)).await;
    let res: Result<u32, CallError<&str>> = breaker.execute(|| async { Ok(1) }).await;
    assert_eq!(res.ok(), Some(1));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let res: Result<u32, CallError<&str>> = breaker.execute(|| async { Ok(2) }).await;
    assert_eq!(res.ok(), Some(2));
    assert_eq!(breaker.state(), CircuitState::Closed);

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = create_circuit_breaker(
        CircuitBreakerConfig::new()
            .with_failure_threshold(1)
            .with_reset_timeout(Duration::from_millis(200)),
    );
    breaker.on_failure();
    advance(Duration::from_millis(200)).await;
    assert!(breaker.allow().is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.on_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    let err = breaker.allow().unwrap_err();
    assert!(err.is_circuit_open());

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.open_remaining_ms, Some(200));
}
