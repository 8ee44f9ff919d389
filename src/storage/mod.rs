//! Storage layer abstraction.
//!
//! A [`DuplicateStore`] maps fingerprints to duplicate records with a TTL and
//! answers approximate-match queries by paging through its keys.
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | Redis | [`RedisDuplicateStore`] | Shared across processes; requires the `redis` feature |
//! | Memory | [`MemoryDuplicateStore`] | Process-local; used by tests and `--memory` runs |

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::MemoryDuplicateStore;
pub use redis::RedisDuplicateStore;
pub use traits::{ApproximateMatch, DuplicateStore, ScanCursor, ScanPage};

use crate::Error;

/// Counts a failed store operation in `duplicate_store_errors_total` and
/// passes the error through.
pub(crate) fn store_error(operation: &'static str, error: Error) -> Error {
    metrics::counter!("duplicate_store_errors_total", "operation" => operation).increment(1);
    tracing::debug!(operation, error = %error, "Store operation failed");
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::atomics::AtomicU64;
    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    /// Keeps one atomic per `name{label=value}` key.
    #[derive(Default)]
    struct CountingRecorder {
        counters: Mutex<Vec<(String, Arc<AtomicU64>)>>,
    }

    impl CountingRecorder {
        fn value(&self, key: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == key)
                .map(|(_, counter)| counter.load(Ordering::Acquire))
                .sum()
        }
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let labels: Vec<String> = key
                .labels()
                .map(|label| format!("{}={}", label.key(), label.value()))
                .collect();
            let name = format!("{}{{{}}}", key.name(), labels.join(","));
            let counter = Arc::new(AtomicU64::new(0));
            self.counters
                .lock()
                .unwrap()
                .push((name, Arc::clone(&counter)));
            Counter::from_arc(counter)
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_store_error_is_counted_per_operation() {
        let recorder = CountingRecorder::default();

        let err = metrics::with_local_recorder(&recorder, || {
            store_error(
                "redis_get",
                Error::StoreUnavailable {
                    operation: "redis_get".to_string(),
                    cause: "timed out after 5000ms".to_string(),
                },
            );
            store_error(
                "redis_get",
                Error::StoreUnavailable {
                    operation: "redis_get".to_string(),
                    cause: "connection reset".to_string(),
                },
            )
        });

        assert!(
            matches!(err, Error::StoreUnavailable { ref cause, .. } if cause == "connection reset")
        );
        assert_eq!(
            recorder.value("duplicate_store_errors_total{operation=redis_get}"),
            2
        );
        assert_eq!(
            recorder.value("duplicate_store_errors_total{operation=redis_scan}"),
            0
        );
    }
}
