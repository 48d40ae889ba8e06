// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataset metadata: the immutable, hashable identity of a graph node.

use crate::hash::{canonical_json, sha256_digest};
use crate::{DatasetHash, MetadataError, Parameter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Immutable identity of a dataset node.
///
/// Predecessors are embedded by value (shared subtrees deduplicated through
/// [`Arc`]), so equality is deep: two metadata are equal exactly when their
/// whole ancestor graphs are.  The content hash is computed once at
/// construction over the canonical serialisation of `(name, version,
/// is_static, time_level, sorted params, sorted predecessor hashes,
/// engine_id)` — independent of construction order, of map insertion order,
/// and of whether predecessors are materialised in full or as stubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    name: String,
    version: String,
    is_static: bool,
    time_level: Option<String>,
    params: BTreeMap<String, Parameter>,
    predecessors: BTreeMap<String, Arc<DatasetMetadata>>,
    engine_id: String,
    hash: DatasetHash,
}

/// The serialised identity form shared by full metadata and stubs.
///
/// Predecessors appear by hash, which is what makes `hash(stub) ==
/// hash(full)` hold by construction.
#[derive(Serialize)]
struct IdentityEnvelope<'a> {
    name: &'a str,
    version: &'a str,
    is_static: bool,
    time_level: Option<&'a str>,
    params: &'a BTreeMap<String, Parameter>,
    predecessors: &'a BTreeMap<String, DatasetHash>,
    engine_id: &'a str,
}

#[allow(clippy::too_many_arguments)]
fn compute_hash(
    name: &str,
    version: &str,
    is_static: bool,
    time_level: Option<&str>,
    params: &BTreeMap<String, Parameter>,
    predecessors: &BTreeMap<String, DatasetHash>,
    engine_id: &str,
) -> Result<DatasetHash, MetadataError> {
    let envelope = IdentityEnvelope {
        name,
        version,
        is_static,
        time_level,
        params,
        predecessors,
        engine_id,
    };
    let json = canonical_json(&envelope)?;
    Ok(sha256_digest(json.as_bytes()))
}

impl DatasetMetadata {
    /// Start building a metadata value.
    pub fn builder(
        name: impl Into<String>,
        version: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> MetadataBuilder {
        MetadataBuilder {
            name: name.into(),
            version: version.into(),
            is_static: false,
            time_level: None,
            params: BTreeMap::new(),
            predecessors: BTreeMap::new(),
            engine_id: engine_id.into(),
        }
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Semantic code version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// `true` for static (scalar-output) nodes.
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Index level interpreted as the instant of a row; `None` for static.
    pub fn time_level(&self) -> Option<&str> {
        self.time_level.as_deref()
    }

    /// Canonicalised parameters.
    pub fn params(&self) -> &BTreeMap<String, Parameter> {
        &self.params
    }

    /// Predecessor metadata, keyed by dependency name.
    pub fn predecessors(&self) -> &BTreeMap<String, Arc<DatasetMetadata>> {
        &self.predecessors
    }

    /// Identifier of the persistence engine that owns this dataset.
    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    /// Stable content hash.
    pub fn hash(&self) -> DatasetHash {
        self.hash
    }

    /// Depth-first post-order over this node and its ancestors, visiting
    /// each distinct metadata once (by hash).  Deterministic: children are
    /// visited in key order.
    pub fn walk(self: &Arc<Self>) -> Vec<Arc<DatasetMetadata>> {
        fn visit(
            node: &Arc<DatasetMetadata>,
            seen: &mut BTreeSet<DatasetHash>,
            out: &mut Vec<Arc<DatasetMetadata>>,
        ) {
            if !seen.insert(node.hash) {
                return;
            }
            for child in node.predecessors.values() {
                visit(child, seen, out);
            }
            out.push(Arc::clone(node));
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }

    /// Functional update of one predecessor: returns a new metadata with
    /// `key` rebound to `replacement`, leaving `self` untouched.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::UnknownPredecessor`] when `key` is not a
    /// predecessor of this node.
    pub fn replace_predecessor(
        &self,
        key: &str,
        replacement: Arc<DatasetMetadata>,
    ) -> Result<Arc<DatasetMetadata>, MetadataError> {
        if !self.predecessors.contains_key(key) {
            return Err(MetadataError::UnknownPredecessor {
                key: key.to_string(),
            });
        }
        let mut predecessors = self.predecessors.clone();
        predecessors.insert(key.to_string(), replacement);

        let predecessor_hashes = predecessor_hashes(&predecessors);
        let hash = compute_hash(
            &self.name,
            &self.version,
            self.is_static,
            self.time_level.as_deref(),
            &self.params,
            &predecessor_hashes,
            &self.engine_id,
        )?;
        Ok(Arc::new(DatasetMetadata {
            name: self.name.clone(),
            version: self.version.clone(),
            is_static: self.is_static,
            time_level: self.time_level.clone(),
            params: self.params.clone(),
            predecessors,
            engine_id: self.engine_id.clone(),
            hash,
        }))
    }
}

impl Hash for DatasetMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // The content hash already commits to every field.
        state.write(self.hash.as_bytes());
    }
}

fn predecessor_hashes(
    predecessors: &BTreeMap<String, Arc<DatasetMetadata>>,
) -> BTreeMap<String, DatasetHash> {
    predecessors
        .iter()
        .map(|(k, v)| (k.clone(), v.hash))
        .collect()
}

// ---------------------------------------------------------------------------
// MetadataBuilder
// ---------------------------------------------------------------------------

/// Builder for [`DatasetMetadata`].
///
/// ```
/// use tide_meta::{DatasetMetadata, Parameter};
///
/// let bars = DatasetMetadata::builder("bars", "1.0", "memory:test")
///     .param("symbol", "ES")
///     .build()
///     .unwrap();
/// let macd = DatasetMetadata::builder("macd", "1.0", "memory:test")
///     .param("fast", 12i64)
///     .param("slow", 26i64)
///     .predecessor("bars", bars)
///     .build()
///     .unwrap();
/// assert_eq!(macd.predecessors().len(), 1);
/// ```
#[derive(Debug)]
pub struct MetadataBuilder {
    name: String,
    version: String,
    is_static: bool,
    time_level: Option<String>,
    params: BTreeMap<String, Parameter>,
    predecessors: BTreeMap<String, Arc<DatasetMetadata>>,
    engine_id: String,
}

impl MetadataBuilder {
    /// Mark the dataset as static (scalar output, no time index).
    #[must_use]
    pub fn static_output(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Name the index level interpreted as the instant of a row.
    #[must_use]
    pub fn time_level(mut self, level: impl Into<String>) -> Self {
        self.time_level = Some(level.into());
        self
    }

    /// Add one parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add many parameters.
    #[must_use]
    pub fn params(
        mut self,
        entries: impl IntoIterator<Item = (String, Parameter)>,
    ) -> Self {
        self.params.extend(entries);
        self
    }

    /// Add one predecessor edge.
    #[must_use]
    pub fn predecessor(mut self, key: impl Into<String>, md: Arc<DatasetMetadata>) -> Self {
        self.predecessors.insert(key.into(), md);
        self
    }

    /// Normalise, validate, and hash.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidParameter`] for non-normalisable
    /// parameters and [`MetadataError::StaticTimeLevel`] when a static
    /// dataset declares a time level.
    pub fn build(self) -> Result<Arc<DatasetMetadata>, MetadataError> {
        if self.is_static && self.time_level.is_some() {
            return Err(MetadataError::StaticTimeLevel { name: self.name });
        }

        let mut params = BTreeMap::new();
        for (key, value) in self.params {
            let normalised = value.normalise().map_err(|e| match e {
                MetadataError::InvalidParameter { detail } => MetadataError::InvalidParameter {
                    detail: format!("params.{key}: {detail}"),
                },
                other => other,
            })?;
            params.insert(key, normalised);
        }

        let predecessor_hashes = predecessor_hashes(&self.predecessors);
        let hash = compute_hash(
            &self.name,
            &self.version,
            self.is_static,
            self.time_level.as_deref(),
            &params,
            &predecessor_hashes,
            &self.engine_id,
        )?;

        Ok(Arc::new(DatasetMetadata {
            name: self.name,
            version: self.version,
            is_static: self.is_static,
            time_level: self.time_level,
            params,
            predecessors: self.predecessors,
            engine_id: self.engine_id,
            hash,
        }))
    }
}

// ---------------------------------------------------------------------------
// DatasetStub
// ---------------------------------------------------------------------------

/// The lazy form of a metadata: identity fields with predecessors carried
/// by hash only.
///
/// Pulling a stub from an engine never materialises the ancestor graph;
/// full metadata for a predecessor is fetched on demand.  A stub hashes to
/// the same digest as the full metadata it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStub {
    /// Dataset name.
    pub name: String,
    /// Semantic code version.
    pub version: String,
    /// `true` for static nodes.
    pub is_static: bool,
    /// Index level interpreted as the instant of a row.
    pub time_level: Option<String>,
    /// Canonicalised parameters.
    pub params: BTreeMap<String, Parameter>,
    /// Predecessor hashes, keyed by dependency name.
    pub predecessors: BTreeMap<String, DatasetHash>,
    /// Identifier of the owning persistence engine.
    pub engine_id: String,
    /// Stable content hash (equal to the full metadata's).
    pub hash: DatasetHash,
}

impl DatasetStub {
    /// Derive the stub of a full metadata.
    pub fn of(md: &DatasetMetadata) -> Self {
        Self {
            name: md.name.clone(),
            version: md.version.clone(),
            is_static: md.is_static,
            time_level: md.time_level.clone(),
            params: md.params.clone(),
            predecessors: predecessor_hashes(&md.predecessors),
            engine_id: md.engine_id.clone(),
            hash: md.hash,
        }
    }

    /// Recompute the content hash from the identity fields.
    ///
    /// Always equals [`hash`](Self::hash) for a well-formed stub; engines
    /// use this to detect corrupted documents.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Serialise`] if canonicalisation fails.
    pub fn recompute_hash(&self) -> Result<DatasetHash, MetadataError> {
        compute_hash(
            &self.name,
            &self.version,
            self.is_static,
            self.time_level.as_deref(),
            &self.params,
            &self.predecessors,
            &self.engine_id,
        )
    }
}
