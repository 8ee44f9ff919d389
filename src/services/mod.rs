//! Business logic services.
//!
//! The duplicate-image pipeline, leaves first:
//!
//! 1. [`ImageFetcher`] downloads the bytes
//! 2. [`ImagePreprocessor`] rejects thumbnails and unsupported formats
//! 3. [`FingerprintEngine`] computes the perceptual fingerprint
//! 4. [`DuplicateDetector`] consults the store and decides on a call-out

pub mod detector;
pub mod fetch;
pub mod fingerprint;
pub mod preprocess;

pub use detector::{DetectionOutcome, DuplicateDetector, format_call_out, format_timestamp};
pub use fetch::ImageFetcher;
pub use fingerprint::FingerprintEngine;
pub use preprocess::{ImageInfo, ImagePreprocessor};
