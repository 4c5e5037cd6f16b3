//! Pool tests: exclusivity, backpressure and shutdown.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_test::assert_ok;

use common::{TestExchange, TestHost, test_config};
use http_wasm_common::{RuntimeConfig, RuntimeError};
use http_wasm_core::Outcome;
use http_wasm_host::Runtime;

/// Traps if two exchanges ever run on the same instance at once.
const EXCLUSIVE_GUEST: &str = r#"
    (module
        (import "http-handler" "next" (func $next))
        (memory (export "memory") 1)
        (global $busy (mut i32) (i32.const 0))
        (func (export "handle")
            (if (global.get $busy) (then unreachable))
            (global.set $busy (i32.const 1))
            (call $next)
            (global.set $busy (i32.const 0))))
"#;

async fn build(host: TestHost, config: RuntimeConfig) -> Runtime<TestHost> {
    Runtime::builder(host)
        .config(config)
        .build(EXCLUSIVE_GUEST.as_bytes())
        .await
        .unwrap()
}

fn slow_host() -> TestHost {
    TestHost {
        next_delay: Duration::from_millis(20),
        ..TestHost::new()
    }
}

// ============================================================================
// Test: Exclusivity
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_exchanges_never_share_an_instance() {
    let mut config = test_config(2);
    config.pool.acquire_timeout_ms = None;
    let runtime = Arc::new(build(slow_host(), config).await);

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let runtime = Arc::clone(&runtime);
        tasks.spawn(async move {
            let invocation = runtime
                .handle(TestExchange::new(&format!("/{i}")))
                .await
                .unwrap();
            (invocation.guest_id, invocation.result.map_err(|e| e.to_string()))
        });
    }

    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (guest_id, result) = joined.unwrap();
        assert_eq!(result, Ok(Outcome::Delegated));
        ids.push(guest_id);
    }

    ids.sort_unstable();
    ids.dedup();
    assert!(ids.len() <= 2, "more instances than pool slots: {ids:?}");
    assert!(runtime.host().max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(runtime.host().downstream_calls.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_held_instances_are_distinct() {
    let runtime = build(TestHost::new(), test_config(3)).await;

    let a = runtime.acquire().await.unwrap();
    let b = runtime.acquire().await.unwrap();
    let c = runtime.acquire().await.unwrap();

    assert_ne!(a.id(), b.id());
    assert_ne!(b.id(), c.id());
    assert_ne!(a.id(), c.id());
    assert_eq!(runtime.stats().in_use, 3);

    drop((a, b, c));
    let stats = runtime.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 3);
}

// ============================================================================
// Test: Backpressure
// ============================================================================

#[tokio::test]
async fn test_reject_immediately_when_exhausted() {
    let mut config = test_config(1);
    config.pool.acquire_timeout_ms = Some(0);
    let runtime = build(TestHost::new(), config).await;

    let held = runtime.acquire().await.unwrap();
    let err = runtime.acquire().await.unwrap_err();
    assert!(matches!(err, RuntimeError::PoolExhausted { waited_ms: 0 }));
    assert!(err.is_resource_limit());

    drop(held);
    assert_ok!(runtime.acquire().await);
}

#[tokio::test]
async fn test_acquire_times_out() {
    let mut config = test_config(1);
    config.pool.acquire_timeout_ms = Some(50);
    let runtime = build(TestHost::new(), config).await;

    let _held = runtime.acquire().await.unwrap();
    let err = runtime.acquire().await.unwrap_err();
    assert!(matches!(err, RuntimeError::PoolExhausted { waited_ms } if waited_ms >= 50));
}

#[tokio::test]
async fn test_waiter_gets_released_instance() {
    let mut config = test_config(1);
    config.pool.acquire_timeout_ms = None;
    let runtime = Arc::new(build(TestHost::new(), config).await);

    let held = runtime.acquire().await.unwrap();
    let held_id = held.id();

    let waiter = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.acquire().await.map(|g| g.id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(held);
    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
}

// ============================================================================
// Test: Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_exchange_discards_instance() {
    let host = TestHost {
        hang_next: true,
        ..TestHost::new()
    };
    let runtime = build(host, test_config(1)).await;
    let first_id = runtime.acquire().await.unwrap().id();

    let exchange = TestExchange::new("/stuck");
    let tracker = Arc::clone(&exchange.tracker);
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), runtime.handle(exchange)).await;
    assert!(cancelled.is_err());

    // The exchange went down with the instance instead of staying bound
    assert_eq!(Arc::strong_count(&tracker), 1);
    let stats = runtime.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.in_use, 0);

    let replacement = assert_ok!(runtime.acquire().await);
    assert_ne!(replacement.id(), first_id);
    assert_eq!(replacement.invocations(), 0);
}

// ============================================================================
// Test: Warm-Up and Shutdown
// ============================================================================

#[tokio::test]
async fn test_build_creates_one_instance() {
    let runtime = build(TestHost::new(), test_config(4)).await;
    let stats = runtime.stats();
    assert_eq!(stats.size, 4);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn test_prewarm_fills_pool() {
    let mut config = test_config(4);
    config.pool.prewarm = true;
    let runtime = build(TestHost::new(), config).await;
    assert_eq!(runtime.stats().idle, 4);
}

#[tokio::test]
async fn test_close_wakes_waiters() {
    let mut config = test_config(1);
    config.pool.acquire_timeout_ms = None;
    let runtime = Arc::new(build(TestHost::new(), config).await);

    let held = runtime.acquire().await.unwrap();

    let waiter = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.acquire().await.map(|g| g.id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    runtime.close();
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must wake on close")
        .unwrap();
    assert!(matches!(result, Err(RuntimeError::Closed)));

    // Released after close: dropped, not pooled
    drop(held);
    let stats = runtime.stats();
    assert!(stats.closed);
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_acquire_after_close() {
    let runtime = build(TestHost::new(), test_config(2)).await;
    runtime.close();

    assert!(runtime.is_closed());
    assert!(matches!(
        runtime.handle(TestExchange::new("/")).await,
        Err(RuntimeError::Closed)
    ));
}
