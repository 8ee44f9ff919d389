//! Fingerprint type and edit-distance similarity.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every fingerprint key in the duplicate store.
pub const STORE_KEY_PREFIX: &str = "image:";

/// Perceptual fingerprint of an image.
///
/// Canonically encoded as a non-empty string of `0` and `1` characters, one
/// per DCT coefficient. Two fingerprints describe "the same image" when their
/// [`distance_ratio`] is below the configured similarity threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses a fingerprint from its bitstring encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the string is empty or contains
    /// anything other than `0` and `1`.
    pub fn parse(bits: impl Into<String>) -> Result<Self> {
        let bits = bits.into();
        if bits.is_empty() {
            return Err(Error::InvalidInput("fingerprint is empty".to_string()));
        }
        if let Some(bad) = bits.chars().find(|c| *c != '0' && *c != '1') {
            return Err(Error::InvalidInput(format!(
                "fingerprint contains non-binary character '{bad}'"
            )));
        }
        Ok(Self(bits))
    }

    /// Builds a fingerprint from individual bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `bits` is empty.
    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Result<Self> {
        let encoded: String = bits
            .into_iter()
            .map(|bit| if bit { '1' } else { '0' })
            .collect();
        Self::parse(encoded)
    }

    /// Recovers a fingerprint from a store key (`image:<bits>`).
    ///
    /// Returns `None` for keys outside the prefix or with a malformed body.
    #[must_use]
    pub fn from_store_key(key: &str) -> Option<Self> {
        key.strip_prefix(STORE_KEY_PREFIX)
            .and_then(|bits| Self::parse(bits).ok())
    }

    /// Returns the store key for this fingerprint.
    #[must_use]
    pub fn store_key(&self) -> String {
        format!("{STORE_KEY_PREFIX}{}", self.0)
    }

    /// Returns the bitstring encoding.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; fingerprints are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Normalized edit distance to another fingerprint.
    #[must_use]
    pub fn distance_ratio(&self, other: &Self) -> f64 {
        distance_ratio(self.as_str(), other.as_str())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Levenshtein distance between two byte strings.
///
/// Two-row dynamic programming; `O(a.len() * b.len())` time and
/// `O(b.len())` memory.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            let deletion = previous[j + 1] + 1;
            let insertion = current[j] + 1;
            current[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Edit distance divided by the longer length, in `[0.0, 1.0]`.
///
/// Two empty strings are identical (ratio 0.0).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn distance_ratio(a: &str, b: &str) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_rejects_empty_and_non_binary() {
        assert!(Fingerprint::parse("").is_err());
        assert!(Fingerprint::parse("0102").is_err());
        assert!(Fingerprint::parse("0110").is_ok());
    }

    #[test]
    fn test_store_key_roundtrip() {
        let fp = Fingerprint::parse("1010").unwrap();
        assert_eq!(fp.store_key(), "image:1010");
        assert_eq!(Fingerprint::from_store_key("image:1010"), Some(fp));
        assert_eq!(Fingerprint::from_store_key("prompt:1010"), None);
        assert_eq!(Fingerprint::from_store_key("image:abc"), None);
    }

    #[test]
    fn test_from_bits() {
        let fp = Fingerprint::from_bits([true, false, false, true]).unwrap();
        assert_eq!(fp.as_str(), "1001");
        assert!(Fingerprint::from_bits(std::iter::empty()).is_err());
    }

    #[test_case("", "", 0 ; "both empty")]
    #[test_case("", "101", 3 ; "insert all")]
    #[test_case("kitten", "sitting", 3 ; "classic")]
    #[test_case("1010", "1010", 0 ; "identical")]
    #[test_case("1010", "0101", 2 ; "shift beats substitution")]
    #[test_case("1111", "1110", 1 ; "single substitution")]
    fn test_levenshtein(a: &str, b: &str, expected: usize) {
        assert_eq!(levenshtein(a, b), expected);
        assert_eq!(levenshtein(b, a), expected);
    }

    #[test]
    fn test_distance_ratio_uses_longer_length() {
        assert!((distance_ratio("1111111111", "1111111110") - 0.1).abs() < f64::EPSILON);
        assert!((distance_ratio("11", "1111") - 0.5).abs() < f64::EPSILON);
        assert!(distance_ratio("", "").abs() < f64::EPSILON);
    }

    #[test]
    fn test_serde_as_plain_string() {
        let fp = Fingerprint::parse("0011").unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, "\"0011\"");
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(serde_json::from_str::<Fingerprint>("\"0a11\"").is_err());
    }
}
