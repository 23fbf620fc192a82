//! Window behaviour against tokio's paused clock, and contention.

use std::sync::Arc;
use std::time::Duration;

use clawcon::ratelimit::{FixedWindowLimiter, RateDecision, RateLimitPolicy, RateLimiter};

#[tokio::test(start_paused = true)]
async fn reveal_window_reopens_after_an_hour() {
    let limiter = FixedWindowLimiter::new(RateLimitPolicy::reveal_default());

    for _ in 0..3 {
        assert!(limiter.check("owner-a").await.is_allowed());
    }
    assert_eq!(
        limiter.check("owner-a").await,
        RateDecision::Denied {
            retry_after: Duration::from_secs(3600)
        }
    );

    tokio::time::advance(Duration::from_secs(1800)).await;
    assert_eq!(
        limiter.check("owner-a").await,
        RateDecision::Denied {
            retry_after: Duration::from_secs(1800)
        }
    );

    tokio::time::advance(Duration::from_secs(1800)).await;
    assert_eq!(
        limiter.check("owner-a").await,
        RateDecision::Allowed { remaining: 2 }
    );
}

#[tokio::test(start_paused = true)]
async fn ingest_default_allows_twenty_per_window() {
    let limiter = FixedWindowLimiter::new(RateLimitPolicy::ingest_default());

    for i in 0..20u32 {
        assert_eq!(
            limiter.check("key-hash").await,
            RateDecision::Allowed {
                remaining: 19 - i
            }
        );
    }
    assert!(!limiter.check("key-hash").await.is_allowed());
    assert!(limiter.check("other-key-hash").await.is_allowed());

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert!(limiter.check("key-hash").await.is_allowed());
}

#[tokio::test(start_paused = true)]
async fn expired_windows_are_purged() {
    let limiter = FixedWindowLimiter::new(RateLimitPolicy::new(1, Duration::from_secs(10)));
    limiter.check("a").await;
    limiter.check("b").await;
    assert_eq!(limiter.tracked_keys(), 2);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(limiter.purge_expired(tokio::time::Instant::now()), 2);
    assert_eq!(limiter.tracked_keys(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_checks_never_exceed_max() {
    let limiter = Arc::new(FixedWindowLimiter::new(RateLimitPolicy::new(
        5,
        Duration::from_secs(60),
    )));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move { limiter.check("shared").await }));
    }

    let mut decisions = Vec::new();
    for handle in handles {
        decisions.push(handle.await.expect("task should join"));
    }
    assert_eq!(decisions.iter().filter(|d| d.is_allowed()).count(), 5);
}

#[tokio::test]
async fn limiter_is_usable_as_trait_object() {
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(FixedWindowLimiter::new(RateLimitPolicy::new(1, Duration::from_secs(60))));
    assert!(limiter.check("k").await.is_allowed());
    assert!(matches!(
        limiter.check("k").await,
        RateDecision::Denied { .. }
    ));
}
