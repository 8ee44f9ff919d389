//! Persisted duplicate records.
//!
//! # Wire format
//!
//! Records are stored as JSON text:
//!
//! ```json
//! {"content":"0110…","count":2,"id":10001,"sender":"alice","timestamp":1718000000000,"cooldown":1718000179999,"version":1}
//! ```
//!
//! # Schema versioning
//!
//! | `version` | Policy |
//! |-----------|--------|
//! | absent | Legacy layout written before versioning; read as version 1 |
//! | `1` | Current |
//! | `> 1` | Rejected as malformed (treated as absent by the stores) |
//!
//! Missing required fields or wrongly typed values are rejected the same way.
//! A rejected record is never rewritten in place; it ages out through its TTL.

use super::Fingerprint;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Schema version written by this build.
pub const CURRENT_RECORD_VERSION: u32 = 1;

const fn legacy_version() -> u32 {
    1
}

/// Identity of whoever submitted an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    /// Stable user identity from the transport.
    #[serde(rename = "id")]
    pub id: u64,
    /// Display name at submission time.
    #[serde(rename = "sender")]
    pub name: String,
}

impl Submitter {
    /// Creates a submitter.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Value stored against a fingerprint key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    /// The fingerprint the record was created for.
    #[serde(rename = "content")]
    pub fingerprint: Fingerprint,
    /// How many times the image has been seen again since it was recorded.
    #[serde(rename = "count")]
    pub occurrence_count: u32,
    /// Whoever first posted the image.
    #[serde(flatten)]
    pub origin: Submitter,
    /// First-seen time, then last-seen time (ms since epoch).
    #[serde(rename = "timestamp")]
    pub last_seen_ms: i64,
    /// Call-outs are suppressed while this is `>=` now (ms since epoch).
    #[serde(
        rename = "cooldown",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown_until_ms: Option<i64>,
    /// Schema version.
    #[serde(default = "legacy_version")]
    pub version: u32,
}

impl DuplicateRecord {
    /// Creates a freshly recorded entry with a zero count.
    #[must_use]
    pub const fn new(fingerprint: Fingerprint, origin: Submitter, now_ms: i64) -> Self {
        Self {
            fingerprint,
            occurrence_count: 0,
            origin,
            last_seen_ms: now_ms,
            cooldown_until_ms: None,
            version: CURRENT_RECORD_VERSION,
        }
    }

    /// Records another sighting: bumps the count and refreshes last-seen.
    pub const fn register_hit(&mut self, now_ms: i64) {
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        self.last_seen_ms = now_ms;
    }

    /// Whether a cooldown is active at `now_ms`.
    #[must_use]
    pub fn in_cooldown(&self, now_ms: i64) -> bool {
        self.cooldown_until_ms.is_some_and(|until| until >= now_ms)
    }

    /// Starts a cooldown window ending just before `now_ms + window_ms`.
    ///
    /// Windows shorter than 1 ms are widened to 1 ms, so the cooldown always
    /// covers `now_ms` itself.
    pub const fn start_cooldown(&mut self, now_ms: i64, window_ms: i64) {
        let window_ms = if window_ms < 1 { 1 } else { window_ms };
        self.cooldown_until_ms = Some(now_ms.saturating_add(window_ms).saturating_sub(1));
    }

    /// Serializes the record to its JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_record".to_string(),
            cause: e.to_string(),
        })
    }

    /// Parses a record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRecord`] if the JSON does not match the
    /// schema or carries an unknown future version.
    pub fn from_json(key: &str, json: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(json).map_err(|e| Error::MalformedRecord {
            key: key.to_string(),
            cause: e.to_string(),
        })?;

        if record.version > CURRENT_RECORD_VERSION {
            return Err(Error::MalformedRecord {
                key: key.to_string(),
                cause: format!(
                    "unsupported record version {} (newest known is {CURRENT_RECORD_VERSION})",
                    record.version
                ),
            });
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DuplicateRecord {
        DuplicateRecord::new(
            Fingerprint::parse("0110").unwrap(),
            Submitter::new(10001, "alice"),
            1_700_000_000_000,
        )
    }

    #[test]
    fn test_new_record_starts_at_zero() {
        let record = sample();
        assert_eq!(record.occurrence_count, 0);
        assert_eq!(record.cooldown_until_ms, None);
        assert_eq!(record.version, CURRENT_RECORD_VERSION);
    }

    #[test]
    fn test_wire_field_names() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["content"], "0110");
        assert_eq!(value["count"], 0);
        assert_eq!(value["id"], 10001);
        assert_eq!(value["sender"], "alice");
        assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
        assert!(value.get("cooldown").is_none());
    }

    #[test]
    fn test_reads_legacy_record_without_version() {
        let json = r#"{"content":"0110","count":3,"id":42,"sender":"bob","timestamp":5,"cooldown":9}"#;
        let record = DuplicateRecord::from_json("image:0110", json).unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.occurrence_count, 3);
        assert_eq!(record.origin, Submitter::new(42, "bob"));
        assert_eq!(record.cooldown_until_ms, Some(9));
    }

    #[test]
    fn test_rejects_future_version() {
        let json = r#"{"content":"0110","count":0,"id":1,"sender":"a","timestamp":5,"version":7}"#;
        let err = DuplicateRecord::from_json("image:0110", json).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn test_rejects_missing_fields_and_garbage() {
        assert!(DuplicateRecord::from_json("k", r#"{"content":"01"}"#).is_err());
        assert!(DuplicateRecord::from_json("k", "not json").is_err());
        assert!(
            DuplicateRecord::from_json(
                "k",
                r#"{"content":"01","count":-1,"id":1,"sender":"a","timestamp":5}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_cooldown_window() {
        let mut record = sample();
        assert!(!record.in_cooldown(0));

        record.start_cooldown(1_000, 180_000);
        assert_eq!(record.cooldown_until_ms, Some(180_999));
        assert!(record.in_cooldown(180_999));
        assert!(!record.in_cooldown(181_000));
    }

    #[test]
    fn test_empty_cooldown_window_still_covers_now() {
        let mut record = sample();
        record.start_cooldown(5_000, 0);
        assert_eq!(record.cooldown_until_ms, Some(5_000));
        assert!(record.in_cooldown(5_000));
        assert!(!record.in_cooldown(5_001));

        record.start_cooldown(6_000, -30);
        assert_eq!(record.cooldown_until_ms, Some(6_000));
    }

    #[test]
    fn test_register_hit() {
        let mut record = sample();
        record.register_hit(2_000);
        record.register_hit(3_000);
        assert_eq!(record.occurrence_count, 2);
        assert_eq!(record.last_seen_ms, 3_000);
    }
}
