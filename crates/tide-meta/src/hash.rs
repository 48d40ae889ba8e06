// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical serialisation and content hashing.

use crate::MetadataError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 32-byte SHA-256 content hash identifying a dataset node.
///
/// Rendered as lowercase hex in `Display`, serde, and engine key spaces.
/// Ordering is byte-lexicographic, which gives deterministic tie-breaks
/// wherever nodes are sorted by identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetHash(pub [u8; 32]);

impl DatasetHash {
    /// View the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character lowercase hex string.
    pub fn parse(value: &str) -> Result<Self, MetadataError> {
        let bytes = value.as_bytes();
        if bytes.len() != 64 {
            return Err(MetadataError::InvalidParameter {
                detail: format!("dataset hash must be 64 hex chars, got {}", bytes.len()),
            });
        }
        let mut out = [0u8; 32];
        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            let hi = hex_nibble(chunk[0])?;
            let lo = hex_nibble(chunk[1])?;
            out[i] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

fn hex_nibble(c: u8) -> Result<u8, MetadataError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(MetadataError::InvalidParameter {
            detail: format!("invalid hex digit `{}` in dataset hash", c as char),
        }),
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetHash({self})")
    }
}

impl FromStr for DatasetHash {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DatasetHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DatasetHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Produce a deterministic JSON string for hashing.
///
/// Stable for our types: map keys are sorted (`serde_json`'s map is a
/// `BTreeMap` by default, and every map in the identity envelope is a
/// `BTreeMap` anyway) and numbers serialise consistently.
///
/// # Errors
///
/// Returns [`MetadataError::Serialise`] if the value cannot be serialised
/// (e.g. a non-finite float escaped normalisation).
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, MetadataError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the SHA-256 digest of `bytes`.
pub fn sha256_digest(bytes: &[u8]) -> DatasetHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    DatasetHash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let a = sha256_digest(b"tidemark");
        let b = sha256_digest(b"tidemark");
        assert_eq!(a, b);
        assert_ne!(a, sha256_digest(b"tidemarks"));
    }

    #[test]
    fn display_parse_roundtrip() {
        let hash = sha256_digest(b"roundtrip");
        let hex = hash.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(DatasetHash::parse(&hex).unwrap(), hash);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(DatasetHash::parse("abc").is_err());
        assert!(DatasetHash::parse(&"g".repeat(64)).is_err());
        // Uppercase is not canonical.
        let upper = sha256_digest(b"x").to_string().to_uppercase();
        assert!(DatasetHash::parse(&upper).is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let hash = sha256_digest(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!(r#""{hash}""#));
        let back: DatasetHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let mut unsorted = serde_json::Map::new();
        unsorted.insert("b".into(), serde_json::json!(2));
        unsorted.insert("a".into(), serde_json::json!(1));
        let json = canonical_json(&serde_json::Value::Object(unsorted)).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
    }
}
