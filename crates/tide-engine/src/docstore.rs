// SPDX-License-Identifier: MIT OR Apache-2.0
//! Directory-backed document store engine.
//!
//! Layout under the store root:
//!
//! ```text
//! metadata/<hash>.json        one document per dataset: stub + index stats
//! chunks/<hash>/<seq>.json    row chunks, ordered by sequence number
//! ```
//!
//! The metadata document carries the stored coverage and row count, so
//! [`range`](crate::PersistenceEngine::range) is a single document read.
//! Every file write goes through a sibling temp file and an atomic rename,
//! and the metadata document is committed last — a reader sees the old
//! dataset or the new one, never a splice.

use crate::{
    EngineError, Payload, PersistenceEngine, QueryFilter, Row, Series, check_kind,
    check_series_write, ensure_owned,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tide_meta::{DatasetHash, DatasetMetadata, DatasetStub};
use tide_time::TimeRange;
use tracing::debug;

/// Rows per chunk document.  Chunking is by row count: deterministic,
/// cadence-agnostic, and keeps partial reads cheap.
const CHUNK_ROWS: usize = 512;

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDoc {
    stub: DatasetStub,
    coverage: Option<TimeRange>,
    rows: usize,
    chunk_count: u64,
    /// Static payload, stored inline; `None` for time series.
    blob: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkDoc {
    dataset_hash: DatasetHash,
    chunk_range: TimeRange,
    rows: Vec<Row>,
}

/// Document-store engine rooted at a directory.
///
/// The identity defaults to `"docstore:root=<path>"`, which survives
/// process restarts as long as the store lives at the same path; pass an
/// explicit id through [`with_id`](Self::with_id) when the path is not
/// stable (e.g. mounted under different prefixes).
#[derive(Debug)]
pub struct DocStoreEngine {
    id: String,
    root: PathBuf,
    locks: Mutex<HashMap<DatasetHash, Arc<Mutex<()>>>>,
}

impl DocStoreEngine {
    /// Open (or initialise) a store at `root` with the path-derived id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the store directories cannot be
    /// created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        let id = format!("docstore:root={}", root.display());
        Self::with_id(root, id)
    }

    /// Open (or initialise) a store at `root` under an explicit id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the store directories cannot be
    /// created.
    pub fn with_id(root: impl Into<PathBuf>, id: impl Into<String>) -> Result<Self, EngineError> {
        let root = root.into();
        for dir in [root.join("metadata"), root.join("chunks")] {
            fs::create_dir_all(&dir)
                .map_err(|e| EngineError::storage("create store directory", e))?;
        }
        Ok(Self {
            id: id.into(),
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, hash: DatasetHash) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        Arc::clone(locks.entry(hash).or_default())
    }

    fn meta_path(&self, hash: DatasetHash) -> PathBuf {
        self.root.join("metadata").join(format!("{hash}.json"))
    }

    fn chunk_dir(&self, hash: DatasetHash) -> PathBuf {
        self.root.join("chunks").join(hash.to_string())
    }

    fn chunk_path(&self, hash: DatasetHash, seq: u64) -> PathBuf {
        self.chunk_dir(hash).join(format!("{seq:08}.json"))
    }

    fn read_meta(&self, hash: DatasetHash) -> Result<Option<MetadataDoc>, EngineError> {
        let path = self.meta_path(hash);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::storage("read metadata document", e));
            }
        };
        let doc: MetadataDoc = serde_json::from_str(&json)?;
        if doc.stub.recompute_hash().map_err(|e| {
            EngineError::storage("rehash metadata document", e)
        })? != doc.stub.hash
        {
            return Err(EngineError::Storage {
                detail: format!("metadata document {hash} failed its integrity check"),
            });
        }
        Ok(Some(doc))
    }

    fn read_rows(
        &self,
        doc: &MetadataDoc,
        range: Option<&TimeRange>,
    ) -> Result<Series, EngineError> {
        let hash = doc.stub.hash;
        let mut rows: Vec<Row> = Vec::with_capacity(doc.rows);
        for seq in 0..doc.chunk_count {
            let path = self.chunk_path(hash, seq);
            let json = fs::read_to_string(&path)
                .map_err(|e| EngineError::storage("read chunk document", e))?;
            let chunk: ChunkDoc = serde_json::from_str(&json)?;
            if let Some(range) = range {
                if !chunk.chunk_range.overlaps(range) {
                    continue;
                }
            }
            rows.extend(chunk.rows);
        }
        let series = Series::new(rows)?;
        Ok(match range {
            Some(range) => series.restrict(range),
            None => series,
        })
    }

    /// Write the whole series as a fresh chunk run, then commit the
    /// metadata document.  Stale higher-numbered chunks from a previous,
    /// longer run are removed before the commit.
    fn rewrite(
        &self,
        stub: DatasetStub,
        series: &Series,
        previous_chunks: u64,
    ) -> Result<(), EngineError> {
        let hash = stub.hash;
        let mut chunk_count = 0u64;
        for chunk_rows in series.rows().chunks(CHUNK_ROWS) {
            self.write_chunk(hash, chunk_count, chunk_rows)?;
            chunk_count += 1;
        }
        for stale in chunk_count..previous_chunks {
            let path = self.chunk_path(hash, stale);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(EngineError::storage("remove stale chunk", e));
                }
            }
        }
        self.write_doc(
            &self.meta_path(hash),
            &MetadataDoc {
                stub,
                coverage: series.extent(),
                rows: series.len(),
                chunk_count,
                blob: None,
            },
        )
    }

    fn write_chunk(&self, hash: DatasetHash, seq: u64, rows: &[Row]) -> Result<(), EngineError> {
        let first = rows.first().map(|(t, _)| *t);
        let last = rows.last().map(|(t, _)| *t);
        let (Some(first), Some(last)) = (first, last) else {
            return Ok(());
        };
        let chunk_range = TimeRange::new(first, last.next_instant())
            .map_err(|e| EngineError::storage("derive chunk range", e))?;
        self.write_doc(
            &self.chunk_path(hash, seq),
            &ChunkDoc {
                dataset_hash: hash,
                chunk_range,
                rows: rows.to_vec(),
            },
        )
    }

    fn write_doc<T: Serialize>(&self, path: &Path, doc: &T) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| EngineError::storage("create document directory", e))?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| EngineError::storage("write document", e))?;
        fs::rename(&tmp, path).map_err(|e| EngineError::storage("commit document", e))
    }
}

impl PersistenceEngine for DocStoreEngine {
    fn engine_id(&self) -> &str {
        &self.id
    }

    fn exists(&self, md: &DatasetMetadata) -> Result<bool, EngineError> {
        Ok(self.meta_path(md.hash()).is_file())
    }

    fn get_stub(&self, md: &DatasetMetadata) -> Result<DatasetStub, EngineError> {
        let _guard = self.key_lock(md.hash());
        let _held = _guard.lock().expect("dataset lock poisoned");
        let doc = self
            .read_meta(md.hash())?
            .ok_or(EngineError::NotFound { hash: md.hash() })?;
        Ok(doc.stub)
    }

    fn read(
        &self,
        md: &DatasetMetadata,
        range: Option<&TimeRange>,
    ) -> Result<Payload, EngineError> {
        let lock = self.key_lock(md.hash());
        let _held = lock.lock().expect("dataset lock poisoned");
        let doc = self
            .read_meta(md.hash())?
            .ok_or(EngineError::NotFound { hash: md.hash() })?;
        if let Some(blob) = doc.blob {
            return Ok(Payload::Blob(blob));
        }
        Ok(Payload::Series(self.read_rows(&doc, range)?))
    }

    fn range(&self, md: &DatasetMetadata) -> Result<Option<TimeRange>, EngineError> {
        Ok(self.read_meta(md.hash())?.and_then(|doc| doc.coverage))
    }

    fn append(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError> {
        let hash = ensure_owned(&self.id, md)?;
        check_series_write(md, "append")?;
        check_kind(md, &payload)?;
        let Payload::Series(newer) = payload else {
            return Err(EngineError::PayloadKind {
                detail: "append requires a series payload".to_string(),
            });
        };

        let lock = self.key_lock(hash);
        let _held = lock.lock().expect("dataset lock poisoned");
        let doc = self.read_meta(hash)?;
        let (mut coverage, mut rows, mut chunk_count) = match &doc {
            Some(doc) => (doc.coverage, doc.rows, doc.chunk_count),
            None => (None, 0, 0),
        };

        if let (Some(coverage), Some(first)) = (coverage, newer.first_index()) {
            if first < coverage.end() {
                return Err(EngineError::AppendOverlap {
                    new_first: first,
                    existing_last: coverage.end() - chrono::TimeDelta::nanoseconds(1),
                });
            }
        }

        // New rows land in fresh chunks past the existing run; the
        // metadata document is committed last.
        for chunk_rows in newer.rows().chunks(CHUNK_ROWS) {
            self.write_chunk(hash, chunk_count, chunk_rows)?;
            chunk_count += 1;
        }
        rows += newer.len();
        coverage = match (coverage, newer.extent()) {
            (Some(old), Some(new)) => Some(
                TimeRange::new(old.start(), new.end())
                    .map_err(|e| EngineError::storage("extend coverage", e))?,
            ),
            (None, new) => new,
            (old, None) => old,
        };
        self.write_doc(
            &self.meta_path(hash),
            &MetadataDoc {
                stub: DatasetStub::of(md),
                coverage,
                rows,
                chunk_count,
                blob: None,
            },
        )?;
        debug!(target: "tide.engine", engine = %self.id, dataset = %hash, rows = newer.len(), "append");
        Ok(())
    }

    fn merge(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError> {
        let hash = ensure_owned(&self.id, md)?;
        check_series_write(md, "merge")?;
        check_kind(md, &payload)?;
        let Payload::Series(newer) = payload else {
            return Err(EngineError::PayloadKind {
                detail: "merge requires a series payload".to_string(),
            });
        };

        let lock = self.key_lock(hash);
        let _held = lock.lock().expect("dataset lock poisoned");
        let (existing, previous_chunks) = match self.read_meta(hash)? {
            Some(doc) => {
                let series = self.read_rows(&doc, None)?;
                (series, doc.chunk_count)
            }
            None => (Series::empty(), 0),
        };
        let merged = existing.combine_first(&newer);
        let rows = merged.len();
        self.rewrite(DatasetStub::of(md), &merged, previous_chunks)?;
        debug!(target: "tide.engine", engine = %self.id, dataset = %hash, rows, "merge");
        Ok(())
    }

    fn replace(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError> {
        let hash = ensure_owned(&self.id, md)?;
        check_kind(md, &payload)?;

        let lock = self.key_lock(hash);
        let _held = lock.lock().expect("dataset lock poisoned");
        let previous_chunks = self.read_meta(hash)?.map_or(0, |doc| doc.chunk_count);
        match payload {
            Payload::Series(series) => {
                self.rewrite(DatasetStub::of(md), &series, previous_chunks)?;
            }
            Payload::Blob(blob) => {
                self.write_doc(
                    &self.meta_path(hash),
                    &MetadataDoc {
                        stub: DatasetStub::of(md),
                        coverage: None,
                        rows: 0,
                        chunk_count: 0,
                        blob: Some(blob),
                    },
                )?;
            }
        }
        debug!(target: "tide.engine", engine = %self.id, dataset = %hash, "replace");
        Ok(())
    }

    fn delete(&self, md: &DatasetMetadata, range: Option<&TimeRange>) -> Result<(), EngineError> {
        let hash = ensure_owned(&self.id, md)?;
        let lock = self.key_lock(hash);
        let _held = lock.lock().expect("dataset lock poisoned");
        match range {
            None => {
                // Metadata first, so readers observe absence before the
                // chunk files disappear underneath them.
                if let Err(e) = fs::remove_file(self.meta_path(hash)) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(EngineError::storage("remove metadata document", e));
                    }
                }
                if let Err(e) = fs::remove_dir_all(self.chunk_dir(hash)) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(EngineError::storage("remove chunk directory", e));
                    }
                }
                debug!(target: "tide.engine", engine = %self.id, dataset = %hash, "delete");
                Ok(())
            }
            Some(range) => {
                let doc = self
                    .read_meta(hash)?
                    .ok_or(EngineError::NotFound { hash })?;
                if doc.blob.is_some() {
                    return Err(EngineError::PayloadKind {
                        detail: format!(
                            "dataset `{}` is static; delete the whole node",
                            md.name()
                        ),
                    });
                }
                let remaining = self.read_rows(&doc, None)?.without(range);
                let rows = remaining.len();
                self.rewrite(DatasetStub::of(md), &remaining, doc.chunk_count)?;
                debug!(target: "tide.engine", engine = %self.id, dataset = %hash, rows, "delete rows");
                Ok(())
            }
        }
    }

    fn query(&self, filter: &QueryFilter) -> Result<Vec<DatasetStub>, EngineError> {
        let dir = match fs::read_dir(self.root.join("metadata")) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::storage("read metadata directory", e)),
        };
        let mut stubs = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| EngineError::storage("read metadata directory", e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(hash) = stem.parse::<DatasetHash>() else {
                continue;
            };
            if let Some(doc) = self.read_meta(hash)? {
                if filter.matches(&doc.stub) {
                    stubs.push(doc.stub);
                }
            }
        }
        stubs.sort_by_key(|s| s.hash);
        Ok(stubs)
    }
}
