// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parameter values and their canonical form.

use crate::{DatasetHash, MetadataError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Object key that tags a serialised dataset reference.
const DATASET_REF_KEY: &str = "$dataset";

/// A parameter value in a dataset's identity.
///
/// Parameters form a small tagged union: primitives, ordered tuples,
/// key-sorted maps, and references to other datasets (by content hash).
/// Values are canonicalised at metadata-construction time via
/// [`normalise`](Self::normalise); the stored form is what gets hashed.
/// Unknown shapes are rejected rather than coerced.
#[derive(Debug, Clone)]
pub enum Parameter {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// Finite 64-bit float.  NaN and infinities are rejected at
    /// normalisation; `-0.0` is folded into `0.0`.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered tuple of parameters.
    Tuple(Vec<Parameter>),
    /// Key-sorted mapping of parameters.
    Map(BTreeMap<String, Parameter>),
    /// Reference to another dataset by content hash.
    DatasetRef(DatasetHash),
}

impl Parameter {
    /// Convert an arbitrary JSON value into a parameter.
    ///
    /// This is the normalisation boundary for loosely-typed inputs:
    /// JSON arrays become tuples, objects become key-sorted maps, and an
    /// object of the form `{"$dataset": "<hex>"}` becomes a
    /// [`DatasetRef`](Self::DatasetRef).
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidParameter`] for non-finite numbers
    /// or integers outside the `i64` range.
    pub fn from_json(value: serde_json::Value) -> Result<Self, MetadataError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f).normalise()
                } else {
                    Err(MetadataError::InvalidParameter {
                        detail: format!("integer {n} is outside the i64 range"),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(Self::Str(s)),
            serde_json::Value::Array(items) => Ok(Self::Tuple(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::String(hex)) = map.get(DATASET_REF_KEY) {
                        return Ok(Self::DatasetRef(DatasetHash::parse(hex)?));
                    }
                }
                let entries = map
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::from_json(v)?)))
                    .collect::<Result<BTreeMap<_, _>, MetadataError>>()?;
                Ok(Self::Map(entries))
            }
        }
    }

    /// Canonicalise this value.
    ///
    /// Idempotent: normalising a normalised value is the identity.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidParameter`] for NaN or infinite
    /// floats anywhere in the structure.
    pub fn normalise(self) -> Result<Self, MetadataError> {
        match self {
            Self::Float(f) => {
                if !f.is_finite() {
                    return Err(MetadataError::InvalidParameter {
                        detail: format!("non-finite float {f} is not a valid parameter"),
                    });
                }
                // Fold the two IEEE zeros into one canonical encoding.
                Ok(Self::Float(if f == 0.0 { 0.0 } else { f }))
            }
            Self::Tuple(items) => Ok(Self::Tuple(
                items
                    .into_iter()
                    .map(Self::normalise)
                    .collect::<Result<_, _>>()?,
            )),
            Self::Map(map) => Ok(Self::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, v.normalise()?)))
                    .collect::<Result<BTreeMap<_, _>, MetadataError>>()?,
            )),
            other => Ok(other),
        }
    }

    /// Returns `true` when this value (recursively) contains no dataset
    /// references.
    pub fn is_scalar(&self) -> bool {
        match self {
            Self::DatasetRef(_) => false,
            Self::Tuple(items) => items.iter().all(Self::is_scalar),
            Self::Map(map) => map.values().all(Self::is_scalar),
            _ => true,
        }
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bit comparison: canonical floats are finite with a single
            // zero encoding, so bit equality is value equality.
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::DatasetRef(a), Self::DatasetRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Parameter {}

impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Tuple(items) => items.serialize(serializer),
            Self::Map(map) => map.serialize(serializer),
            Self::DatasetRef(hash) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DATASET_REF_KEY, &hash.to_string())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

impl From<bool> for Parameter {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Parameter {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Parameter {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Parameter {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Parameter {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256_digest;
    use proptest::prelude::*;

    #[test]
    fn from_json_maps_shapes() {
        let value = serde_json::json!({
            "window": 20,
            "decay": 0.5,
            "weights": [1, 2, 3],
            "label": "close",
            "flag": true,
            "missing": null,
        });
        let param = Parameter::from_json(value).unwrap();
        let Parameter::Map(map) = param else {
            panic!("expected map");
        };
        assert_eq!(map["window"], Parameter::Int(20));
        assert_eq!(map["decay"], Parameter::Float(0.5));
        assert_eq!(
            map["weights"],
            Parameter::Tuple(vec![
                Parameter::Int(1),
                Parameter::Int(2),
                Parameter::Int(3)
            ])
        );
        assert_eq!(map["label"], Parameter::Str("close".into()));
        assert_eq!(map["flag"], Parameter::Bool(true));
        assert_eq!(map["missing"], Parameter::Null);
    }

    #[test]
    fn from_json_recognises_dataset_refs() {
        let hash = sha256_digest(b"upstream");
        let value = serde_json::json!({ "$dataset": hash.to_string() });
        assert_eq!(
            Parameter::from_json(value).unwrap(),
            Parameter::DatasetRef(hash)
        );
    }

    #[test]
    fn normalise_rejects_non_finite() {
        assert!(Parameter::Float(f64::NAN).normalise().is_err());
        assert!(Parameter::Float(f64::INFINITY).normalise().is_err());
        assert!(
            Parameter::Tuple(vec![Parameter::Float(f64::NEG_INFINITY)])
                .normalise()
                .is_err()
        );
    }

    #[test]
    fn normalise_folds_negative_zero() {
        let n = Parameter::Float(-0.0).normalise().unwrap();
        assert_eq!(n, Parameter::Float(0.0));
        let Parameter::Float(f) = n else { unreachable!() };
        assert_eq!(f.to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn int_and_float_are_distinct() {
        assert_ne!(Parameter::Int(1), Parameter::Float(1.0));
        let int_json = serde_json::to_string(&Parameter::Int(1)).unwrap();
        let float_json = serde_json::to_string(&Parameter::Float(1.0)).unwrap();
        assert_ne!(int_json, float_json);
    }

    #[test]
    fn serde_roundtrip() {
        let param = Parameter::Map(BTreeMap::from([
            ("a".to_string(), Parameter::Tuple(vec![Parameter::Int(1)])),
            (
                "b".to_string(),
                Parameter::DatasetRef(sha256_digest(b"dep")),
            ),
        ]));
        let json = serde_json::to_string(&param).unwrap();
        let back: Parameter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, param);
    }

    fn arb_parameter() -> impl Strategy<Value = Parameter> {
        let leaf = prop_oneof![
            Just(Parameter::Null),
            any::<bool>().prop_map(Parameter::Bool),
            any::<i64>().prop_map(Parameter::Int),
            prop::num::f64::NORMAL.prop_map(Parameter::Float),
            "[a-z]{0,8}".prop_map(Parameter::Str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Parameter::Tuple),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Parameter::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn normalise_is_idempotent(param in arb_parameter()) {
            let once = param.normalise().unwrap();
            let twice = once.clone().normalise().unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn canonical_json_roundtrips(param in arb_parameter()) {
            let normalised = param.normalise().unwrap();
            let json = serde_json::to_string(&normalised).unwrap();
            let back: Parameter = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.normalise().unwrap(), normalised);
        }
    }
}
