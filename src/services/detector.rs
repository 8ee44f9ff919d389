//! Duplicate detection state machine.
//!
//! # Per-fingerprint lifecycle
//!
//! ```text
//! UNSEEN --no match--> RECORDED (count 0)
//!                          |
//!                       match: count += 1, timestamp refreshed, written back
//!                          v
//!     count >= cap ---> SUPPRESSED (silent until the record expires)
//!     cooldown >= now -> COOLDOWN (silent)
//!     otherwise ------> CALL-OUT, cooldown = now + window - 1, written back
//! ```
//!
//! The increment is persisted before any suppression rule is applied, so the
//! counter keeps climbing while call-outs are held back.

use crate::config::DetectionConfig;
use crate::models::{DuplicateRecord, Fingerprint, Submitter};
use crate::storage::DuplicateStore;
use crate::{Result, current_timestamp_millis};
use chrono::{DateTime, FixedOffset};
use std::time::Instant;
use tracing::instrument;

/// Offset used when rendering timestamps in call-outs (UTC+8).
const CALL_OUT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Result of one duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// First sighting; a new record was stored.
    Recorded {
        /// The stored record.
        record: DuplicateRecord,
    },
    /// Repeat sighting that produced a notification.
    CallOut {
        /// The record after the hit and the new cooldown.
        record: DuplicateRecord,
        /// Distance between the query and the matched fingerprint.
        distance: f64,
        /// Rendered notification.
        message: String,
    },
    /// Repeat sighting inside an active cooldown window.
    Cooldown {
        /// The record after the hit.
        record: DuplicateRecord,
    },
    /// Repeat sighting past the call-out cap.
    Capped {
        /// The record after the hit.
        record: DuplicateRecord,
    },
    /// The matched record expired or was unreadable before it could be updated.
    Vanished {
        /// Key found by the approximate scan.
        matched: Fingerprint,
    },
}

impl DetectionOutcome {
    /// Notification text, or an empty string when nothing should be said.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::CallOut { message, .. } => message,
            _ => "",
        }
    }

    /// Occurrence count after this check, if a record was touched.
    #[must_use]
    pub const fn count(&self) -> Option<u32> {
        match self {
            Self::Recorded { record }
            | Self::CallOut { record, .. }
            | Self::Cooldown { record }
            | Self::Capped { record } => Some(record.occurrence_count),
            Self::Vanished { .. } => None,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded { .. } => "recorded",
            Self::CallOut { .. } => "call_out",
            Self::Cooldown { .. } => "cooldown",
            Self::Capped { .. } => "capped",
            Self::Vanished { .. } => "vanished",
        }
    }
}

/// Decides whether an image is a repeat and whether to call it out.
///
/// Owns a store handle; all per-fingerprint state lives in the store.
///
/// # Example
///
/// ```rust,ignore
/// use dupwatch::config::DetectionConfig;
/// use dupwatch::models::Submitter;
/// use dupwatch::services::DuplicateDetector;
/// use dupwatch::storage::MemoryDuplicateStore;
///
/// let detector = DuplicateDetector::new(MemoryDuplicateStore::new(), DetectionConfig::default());
/// let outcome = detector.check(&fingerprint, &Submitter::new(42, "alice")).await?;
/// if !outcome.message().is_empty() {
///     reply(outcome.message());
/// }
/// ```
#[derive(Debug)]
pub struct DuplicateDetector<S: DuplicateStore> {
    store: S,
    config: DetectionConfig,
    scan_batch_size: usize,
}

impl<S: DuplicateStore> DuplicateDetector<S> {
    /// Default number of keys requested per scan page.
    pub const DEFAULT_SCAN_BATCH_SIZE: usize = 1000;

    /// Creates a detector over `store`.
    #[must_use]
    pub const fn new(store: S, config: DetectionConfig) -> Self {
        Self {
            store,
            config,
            scan_batch_size: Self::DEFAULT_SCAN_BATCH_SIZE,
        }
    }

    /// Sets the scan page size.
    #[must_use]
    pub const fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Returns the underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the detection settings.
    pub const fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Checks a fingerprint submitted by `reporter` against the store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] if the store cannot be
    /// reached. Nothing else fails a check.
    pub async fn check(
        &self,
        fingerprint: &Fingerprint,
        reporter: &Submitter,
    ) -> Result<DetectionOutcome> {
        self.check_at(fingerprint, reporter, current_timestamp_millis())
            .await
    }

    /// Checks a fingerprint as of `now_ms` (ms since epoch).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] if the store cannot be
    /// reached.
    #[instrument(
        skip(self, fingerprint, reporter),
        fields(
            operation = "duplicate_check",
            backend = self.store.name(),
            reporter = reporter.id,
        )
    )]
    pub async fn check_at(
        &self,
        fingerprint: &Fingerprint,
        reporter: &Submitter,
        now_ms: i64,
    ) -> Result<DetectionOutcome> {
        let start = Instant::now();
        let result = self.transition(fingerprint, reporter, now_ms).await;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                metrics::counter!("duplicate_checks_total", "outcome" => outcome.as_str())
                    .increment(1);
                tracing::debug!(
                    outcome = outcome.as_str(),
                    count = ?outcome.count(),
                    duration_ms,
                    "Duplicate check complete"
                );
            },
            Err(e) => {
                metrics::counter!("duplicate_checks_total", "outcome" => "error").increment(1);
                tracing::warn!(error = %e, duration_ms, "Duplicate check failed");
            },
        }
        #[allow(clippy::cast_precision_loss)]
        let duration_f64 = duration_ms as f64;
        metrics::histogram!("duplicate_check_duration_ms").record(duration_f64);

        result
    }

    async fn transition(
        &self,
        fingerprint: &Fingerprint,
        reporter: &Submitter,
        now_ms: i64,
    ) -> Result<DetectionOutcome> {
        let ttl = self.config.record_ttl();
        let found = self
            .store
            .find_approximate(
                fingerprint,
                self.config.similarity_threshold,
                self.scan_batch_size,
            )
            .await?;

        let Some(found) = found else {
            let record = DuplicateRecord::new(fingerprint.clone(), reporter.clone(), now_ms);
            self.store.put(fingerprint, &record, ttl).await?;
            tracing::info!(fingerprint = %fingerprint, "Recorded new image");
            return Ok(DetectionOutcome::Recorded { record });
        };

        // Always re-read through the matched key; the query's own key may not exist.
        let Some(mut record) = self.store.get(&found.fingerprint).await? else {
            tracing::debug!(matched = %found.fingerprint, "Matched record vanished before update");
            return Ok(DetectionOutcome::Vanished {
                matched: found.fingerprint,
            });
        };

        record.register_hit(now_ms);
        self.store.put(&found.fingerprint, &record, ttl).await?;

        if record.occurrence_count >= self.config.max_call_outs {
            tracing::debug!(
                matched = %found.fingerprint,
                count = record.occurrence_count,
                "Call-out cap reached"
            );
            return Ok(DetectionOutcome::Capped { record });
        }

        if record.in_cooldown(now_ms) {
            tracing::debug!(
                matched = %found.fingerprint,
                count = record.occurrence_count,
                cooldown_until = ?record.cooldown_until_ms,
                "Image still in cooldown"
            );
            return Ok(DetectionOutcome::Cooldown { record });
        }

        record.start_cooldown(now_ms, self.config.cooldown_ms());
        self.store.put(&found.fingerprint, &record, ttl).await?;

        tracing::info!(
            matched = %found.fingerprint,
            similarity = found.distance,
            count = record.occurrence_count,
            "Duplicate image detected"
        );

        let message = format_call_out(reporter, &record);
        Ok(DetectionOutcome::CallOut {
            record,
            distance: found.distance,
            message,
        })
    }
}

/// Renders the call-out for a repeat sighting.
#[must_use]
pub fn format_call_out(reporter: &Submitter, record: &DuplicateRecord) -> String {
    format!(
        "Call-out! {} is posting a stale image again! It was posted by {} ({}), \
         last seen {}, and has now been posted {} times!",
        reporter.name,
        record.origin.name,
        record.origin.id,
        format_timestamp(record.last_seen_ms),
        record.occurrence_count,
    )
}

/// Formats epoch milliseconds as `YYYY/MM/DD HH:MM:SS` in UTC+8.
///
/// Out-of-range values fall back to the raw millisecond count.
#[must_use]
pub fn format_timestamp(ms: i64) -> String {
    let Some(offset) = FixedOffset::east_opt(CALL_OUT_UTC_OFFSET_SECS) else {
        return ms.to_string();
    };
    DateTime::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |utc| {
            utc.with_timezone(&offset)
                .format("%Y/%m/%d %H:%M:%S")
                .to_string()
        },
    )
}
