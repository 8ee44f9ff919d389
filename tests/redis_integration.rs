//! Redis duplicate store integration tests.
//!
//! Tests the Redis backend against a live server, focusing on:
//! - `SETEX`/`GET` round trips and TTL refresh
//! - Malformed values read as absent
//! - `SCAN`-driven approximate matching
//! - Detector state transitions over Redis
//!
//! These tests require a running Redis server. Set the environment variable
//! `DUPWATCH_TEST_REDIS_URL` to enable them:
//!
//! ```bash
//! export DUPWATCH_TEST_REDIS_URL="redis://localhost:6379/15"
//! cargo test --features redis redis_integration
//! ```

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![cfg(feature = "redis")]

use dupwatch::config::{DetectionConfig, StoreConfig};
use dupwatch::models::{DuplicateRecord, Fingerprint, Submitter};
use dupwatch::services::{DetectionOutcome, DuplicateDetector};
use dupwatch::storage::{DuplicateStore, RedisDuplicateStore};
use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Environment variable for Redis test connection URL.
const REDIS_URL_ENV: &str = "DUPWATCH_TEST_REDIS_URL";

/// Short TTL so test keys clean themselves up.
const TEST_TTL: Duration = Duration::from_secs(30);

/// Returns the Redis connection URL if available, or None to skip tests.
fn get_redis_url() -> Option<String> {
    env::var(REDIS_URL_ENV).ok()
}

/// Macro to skip tests when Redis is not available.
macro_rules! require_redis {
    () => {
        match get_redis_url() {
            Some(url) => url,
            None => {
                eprintln!(
                    "Skipping test: {} not set. Set this environment variable to run Redis tests.",
                    REDIS_URL_ENV
                );
                return;
            },
        }
    };
}

async fn connect(url: &str) -> RedisDuplicateStore {
    RedisDuplicateStore::connect(&StoreConfig::default().with_url(url))
        .await
        .unwrap()
}

/// A 256-bit fingerprint unlikely to be near anything else on the server.
fn unique_fingerprint(tag: &str) -> Fingerprint {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut bits = String::with_capacity(256);
    for word in 0..4_u64 {
        let mut hasher = DefaultHasher::new();
        (tag, nanos, word).hash(&mut hasher);
        bits.push_str(&format!("{:064b}", hasher.finish()));
    }
    Fingerprint::parse(bits).unwrap()
}

#[tokio::test]
async fn test_put_get_roundtrip() {
    let url = require_redis!();
    let store = connect(&url).await;
    let fp = unique_fingerprint("roundtrip");
    let record = DuplicateRecord::new(fp.clone(), Submitter::new(1, "alice"), 1_000);

    store.put(&fp, &record, TEST_TTL).await.unwrap();
    let loaded = store.get(&fp).await.unwrap().unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn test_missing_key_is_absent() {
    let url = require_redis!();
    let store = connect(&url).await;
    assert!(
        store
            .get(&unique_fingerprint("missing"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_ttl_is_applied() {
    let url = require_redis!();
    let store = connect(&url).await;
    let fp = unique_fingerprint("ttl");
    let record = DuplicateRecord::new(fp.clone(), Submitter::new(1, "alice"), 1_000);

    store.put(&fp, &record, Duration::from_secs(1)).await.unwrap();
    assert!(store.get(&fp).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(store.get(&fp).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_value_is_absent() {
    let url = require_redis!();
    let store = connect(&url).await;
    let fp = unique_fingerprint("malformed");

    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("SETEX")
        .arg(fp.store_key())
        .arg(30)
        .arg("{\"content\":")
        .query_async::<()>(&mut conn)
        .await
        .unwrap();

    assert!(store.get(&fp).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_approximate_over_scan() {
    let url = require_redis!();
    let store = connect(&url).await;
    let fp = unique_fingerprint("scan");
    let record = DuplicateRecord::new(fp.clone(), Submitter::new(1, "alice"), 1_000);
    store.put(&fp, &record, TEST_TTL).await.unwrap();

    // Small pages force several SCAN round trips on a busy server.
    let found = store.find_approximate(&fp, 0.1, 10).await.unwrap().unwrap();
    assert!(found.distance < 0.1);
}

#[tokio::test]
async fn test_detector_over_redis() {
    let url = require_redis!();
    let store = connect(&url).await;
    let detector = DuplicateDetector::new(
        store,
        DetectionConfig::default().with_record_ttl_secs(TEST_TTL.as_secs()),
    );
    let fp = unique_fingerprint("detector");
    let now = 1_718_000_000_000;

    let first = detector
        .check_at(&fp, &Submitter::new(1, "alice"), now)
        .await
        .unwrap();
    assert!(matches!(first, DetectionOutcome::Recorded { .. }));

    let second = detector
        .check_at(&fp, &Submitter::new(2, "bob"), now + 1_000)
        .await
        .unwrap();
    assert!(matches!(second, DetectionOutcome::CallOut { .. }));
    assert!(second.message().contains("alice (1)"));

    let third = detector
        .check_at(&fp, &Submitter::new(2, "bob"), now + 2_000)
        .await
        .unwrap();
    assert!(matches!(third, DetectionOutcome::Cooldown { .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_unavailable() {
    let _url = require_redis!();
    let config = StoreConfig::default()
        .with_url("redis://127.0.0.1:1")
        .with_operation_timeout_ms(500);
    let err = RedisDuplicateStore::connect(&config).await.unwrap_err();
    assert!(matches!(err, dupwatch::Error::StoreUnavailable { .. }));
}
