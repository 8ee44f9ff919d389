//! Duplicate store trait.

use crate::Result;
use crate::models::{DuplicateRecord, Fingerprint};
use std::future::Future;
use std::time::Duration;

/// Position in an approximate-match pass over the key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCursor {
    /// Beginning of a new pass.
    Start,
    /// Backend-specific resume token from the previous page.
    Resume(String),
}

/// One page of fingerprint keys.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Fingerprints found on this page.
    pub keys: Vec<Fingerprint>,
    /// Where to continue, or `None` once the pass is complete.
    pub next: Option<ScanCursor>,
}

/// A stored fingerprint close enough to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproximateMatch {
    /// The stored fingerprint (its key identifies the record).
    pub fingerprint: Fingerprint,
    /// Normalized edit distance to the query.
    pub distance: f64,
}

/// Trait for duplicate store backends.
///
/// A duplicate store maps fingerprints to [`DuplicateRecord`]s with a TTL.
/// There is no atomic read-modify-write: concurrent hits on the same record
/// may lose increments.
///
/// Implementations must:
///
/// - Report records that fail to parse as absent (and log them)
/// - Never enumerate the key space in one unbounded call
/// - Tolerate keys expiring between scan pages
pub trait DuplicateStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Upserts a record, (re)setting its expiry to `ttl`.
    fn put(
        &self,
        fingerprint: &Fingerprint,
        record: &DuplicateRecord,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Exact-key lookup.
    fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl Future<Output = Result<Option<DuplicateRecord>>> + Send;

    /// Returns one page of at most roughly `batch_size` keys.
    ///
    /// `batch_size` is a hint; backends may return fewer or slightly more.
    fn scan(
        &self,
        cursor: ScanCursor,
        batch_size: usize,
    ) -> impl Future<Output = Result<ScanPage>> + Send;

    /// Finds the first stored fingerprint whose distance ratio to `query`
    /// is strictly below `threshold`.
    ///
    /// Pages through the key space until a match is found or the pass
    /// completes. Iteration order decides which match wins, not closeness.
    fn find_approximate(
        &self,
        query: &Fingerprint,
        threshold: f64,
        batch_size: usize,
    ) -> impl Future<Output = Result<Option<ApproximateMatch>>> + Send {
        async move {
            let mut cursor = ScanCursor::Start;
            let mut pages = 0_usize;
            let mut examined = 0_usize;

            loop {
                let page = self.scan(cursor, batch_size.max(1)).await?;
                pages += 1;
                examined += page.keys.len();

                for candidate in page.keys {
                    let distance = candidate.distance_ratio(query);
                    if distance < threshold {
                        tracing::debug!(
                            backend = self.name(),
                            pages,
                            examined,
                            distance,
                            "Approximate match found"
                        );
                        return Ok(Some(ApproximateMatch {
                            fingerprint: candidate,
                            distance,
                        }));
                    }
                }

                match page.next {
                    Some(next) => cursor = next,
                    None => break,
                }
            }

            tracing::debug!(
                backend = self.name(),
                pages,
                examined,
                "No approximate match"
            );
            Ok(None)
        }
    }
}
