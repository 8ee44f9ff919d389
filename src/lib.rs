//! # Dupwatch
//!
//! Near-duplicate image detection for chat bots.
//!
//! Dupwatch fingerprints every image posted to a conversation, remembers the
//! fingerprints in a TTL-backed store, and produces a rate-limited call-out
//! when somebody posts an image that has been seen before.
//!
//! ## Features
//!
//! - DCT-based perceptual fingerprints (256 bits by default)
//! - Approximate matching by normalized edit distance over a bounded, resumable scan
//! - Per-image occurrence counters with cooldown windows and a call-out cap
//! - Pluggable stores (Redis, in-process)
//!
//! ## Example
//!
//! ```rust,ignore
//! use dupwatch::services::{DuplicateDetector, FingerprintEngine};
//! use dupwatch::storage::MemoryDuplicateStore;
//! use dupwatch::models::Submitter;
//!
//! let detector = DuplicateDetector::new(MemoryDuplicateStore::new(), DetectionConfig::default());
//! let fingerprint = FingerprintEngine::default().compute(&bytes)?;
//! let outcome = detector.check(&fingerprint, &Submitter::new(42, "alice")).await?;
//! println!("{}", outcome.message());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod features;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::DupwatchConfig;
pub use features::{Dispatcher, Feature};
pub use models::{DuplicateRecord, Fingerprint, MessageSegment, Sender, Submitter};
pub use services::{DetectionOutcome, DuplicateDetector, FingerprintEngine, ImagePreprocessor};
pub use storage::{DuplicateStore, MemoryDuplicateStore, RedisDuplicateStore};

/// Error type for dupwatch operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed fingerprint text, out-of-range fingerprint size, bad config values |
/// | `OperationFailed` | Config file I/O, logging setup, CLI plumbing |
/// | `FetchFailed` | HTTP errors while downloading an image |
/// | `InvalidImage` | Bytes that cannot be decoded as a raster image |
/// | `UnsupportedFormat` | Decoded format outside the allow-list |
/// | `TooSmall` | Both image dimensions below the minimums |
/// | `StoreUnavailable` | Store connection errors and timeouts |
/// | `MalformedRecord` | A stored value that does not parse as a record |
/// | `FeatureNotEnabled` | Using a backend compiled out by a cargo feature |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The image could not be downloaded.
    ///
    /// Raised when:
    /// - The HTTP request fails or times out
    /// - The server answers with a non-success status
    /// - The response body cannot be read
    #[error("failed to fetch '{url}': {cause}")]
    FetchFailed {
        /// The requested URL.
        url: String,
        /// The underlying cause.
        cause: String,
    },

    /// The bytes are not a decodable raster image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The image format is not in the allow-list.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Both dimensions are below the configured minimums.
    #[error("image too small: {width}x{height}")]
    TooSmall {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },

    /// The duplicate store could not be reached.
    ///
    /// Raised when:
    /// - The Redis connection cannot be opened or drops
    /// - A store command exceeds the operation timeout
    ///
    /// Fails the current check only; callers log and keep processing.
    #[error("store unavailable during '{operation}': {cause}")]
    StoreUnavailable {
        /// The store operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A stored value could not be parsed back into a record.
    ///
    /// Stores report these as absent; the variant surfaces only from
    /// [`DuplicateRecord::from_json`].
    #[error("malformed record at '{key}': {cause}")]
    MalformedRecord {
        /// The store key holding the value.
        key: String,
        /// The parse failure.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Returns true for the expected, non-exceptional image rejections.
    ///
    /// These are logged at low severity and never surface as failures.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage(_) | Self::UnsupportedFormat(_) | Self::TooSmall { .. }
        )
    }
}

/// Result type alias for dupwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use dupwatch::current_timestamp_millis;
///
/// let ts = current_timestamp_millis();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
