//! Data models for dupwatch.
//!
//! This module contains the core data structures shared by the fingerprint
//! engine, the duplicate store and the message features.

mod fingerprint;
mod message;
mod record;

pub use fingerprint::{Fingerprint, STORE_KEY_PREFIX, distance_ratio, levenshtein};
pub use message::{IncomingEvent, MessageSegment, Sender};
pub use record::{CURRENT_RECORD_VERSION, DuplicateRecord, Submitter};
