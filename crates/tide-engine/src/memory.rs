// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hash-backed in-memory engine.

use crate::{
    EngineError, Payload, PersistenceEngine, QueryFilter, Series, check_kind,
    check_series_write, ensure_owned,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tide_meta::{DatasetHash, DatasetMetadata, DatasetStub};
use tide_time::TimeRange;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct Record {
    stub: DatasetStub,
    payload: Payload,
}

/// In-memory engine: a mapping from metadata hash to `(stub, payload)`.
///
/// The outer table is guarded by one reader-writer lock; each record has
/// its own, so operations on a single dataset are linearisable while
/// writes to different datasets proceed independently.
#[derive(Debug)]
pub struct MemoryEngine {
    id: String,
    datasets: RwLock<HashMap<DatasetHash, Arc<RwLock<Record>>>>,
}

impl MemoryEngine {
    /// A fresh engine with a unique identity (`"memory:<uuid>"`).
    pub fn new() -> Self {
        Self::with_id(format!("memory:{}", Uuid::new_v4()))
    }

    /// An engine with an explicit identity.  Two engines sharing an id are
    /// treated as the same engine by the dataset graph; use distinct ids
    /// unless that is what you mean.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            datasets: RwLock::new(HashMap::new()),
        }
    }

    fn record(&self, hash: DatasetHash) -> Option<Arc<RwLock<Record>>> {
        self.datasets
            .read()
            .expect("dataset table lock poisoned")
            .get(&hash)
            .cloned()
    }

    fn record_or_insert(&self, md: &DatasetMetadata) -> Arc<RwLock<Record>> {
        let mut table = self.datasets.write().expect("dataset table lock poisoned");
        Arc::clone(table.entry(md.hash()).or_insert_with(|| {
            Arc::new(RwLock::new(Record {
                stub: DatasetStub::of(md),
                payload: if md.is_static() {
                    Payload::Blob(serde_json::Value::Null)
                } else {
                    Payload::Series(Series::empty())
                },
            }))
        }))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceEngine for MemoryEngine {
    fn engine_id(&self) -> &str {
        &self.id
    }

    fn exists(&self, md: &DatasetMetadata) -> Result<bool, EngineError> {
        Ok(self.record(md.hash()).is_some())
    }

    fn get_stub(&self, md: &DatasetMetadata) -> Result<DatasetStub, EngineError> {
        let record = self.record(md.hash()).ok_or(EngineError::NotFound {
            hash: md.hash(),
        })?;
        let guard = record.read().expect("dataset lock poisoned");
        Ok(guard.stub.clone())
    }

    fn read(
        &self,
        md: &DatasetMetadata,
        range: Option<&TimeRange>,
    ) -> Result<Payload, EngineError> {
        let record = self.record(md.hash()).ok_or(EngineError::NotFound {
            hash: md.hash(),
        })?;
        let guard = record.read().expect("dataset lock poisoned");
        Ok(match (&guard.payload, range) {
            (Payload::Series(series), Some(range)) => Payload::Series(series.restrict(range)),
            (payload, _) => payload.clone(),
        })
    }

    fn range(&self, md: &DatasetMetadata) -> Result<Option<TimeRange>, EngineError> {
        Ok(self.record(md.hash()).and_then(|record| {
            record
                .read()
                .expect("dataset lock poisoned")
                .payload
                .extent()
        }))
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
        let record = self.record_or_insert(md);
        let mut guard = record.write().expect("dataset lock poisoned");
        let Payload::Series(existing) = &mut guard.payload else {
            return Err(EngineError::PayloadKind {
                detail: format!("dataset `{}` holds a blob", md.name()),
            });
        };
        let rows = newer.len();
        existing.append(newer)?;
        debug!(target: "tide.engine", engine = %self.id, dataset = %hash, rows, "append");
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
        let record = self.record_or_insert(md);
        let mut guard = record.write().expect("dataset lock poisoned");
        let Payload::Series(existing) = &guard.payload else {
            return Err(EngineError::PayloadKind {
                detail: format!("dataset `{}` holds a blob", md.name()),
            });
        };
        let merged = existing.combine_first(&newer);
        let rows = merged.len();
        guard.payload = Payload::Series(merged);
        debug!(target: "tide.engine", engine = %self.id, dataset = %hash, rows, "merge");
        Ok(())
    }

    fn replace(&self, md: &DatasetMetadata, payload: Payload) -> Result<(), EngineError> {
        let hash = ensure_owned(&self.id, md)?;
        check_kind(md, &payload)?;
        let record = self.record_or_insert(md);
        let mut guard = record.write().expect("dataset lock poisoned");
        guard.payload = payload;
        debug!(target: "tide.engine", engine = %self.id, dataset = %hash, "replace");
        Ok(())
    }

    fn delete(&self, md: &DatasetMetadata, range: Option<&TimeRange>) -> Result<(), EngineError> {
        let hash = ensure_owned(&self.id, md)?;
        match range {
            None => {
                self.datasets
                    .write()
                    .expect("dataset table lock poisoned")
                    .remove(&hash);
                debug!(target: "tide.engine", engine = %self.id, dataset = %hash, "delete");
                Ok(())
            }
            Some(range) => {
                let record = self.record(hash).ok_or(EngineError::NotFound { hash })?;
                let mut guard = record.write().expect("dataset lock poisoned");
                let Payload::Series(existing) = &guard.payload else {
                    return Err(EngineError::PayloadKind {
                        detail: format!("dataset `{}` is static; delete the whole node", md.name()),
                    });
                };
                let remaining = existing.without(range);
                let rows = remaining.len();
                guard.payload = Payload::Series(remaining);
                debug!(target: "tide.engine", engine = %self.id, dataset = %hash, rows, "delete rows");
                Ok(())
            }
        }
    }

    fn query(&self, filter: &QueryFilter) -> Result<Vec<DatasetStub>, EngineError> {
        let table = self.datasets.read().expect("dataset table lock poisoned");
        let mut stubs: Vec<DatasetStub> = table
            .values()
            .map(|record| record.read().expect("dataset lock poisoned").stub.clone())
            .filter(|stub| filter.matches(stub))
            .collect();
        stubs.sort_by_key(|s| s.hash);
        Ok(stubs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tide_time::Timestamp;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn series(indexes: &[&str]) -> Series {
        Series::new(
            indexes
                .iter()
                .map(|s| (ts(s), serde_json::json!(1.0)))
                .collect(),
        )
        .unwrap()
    }

    fn dataset(engine: &MemoryEngine, name: &str) -> StdArc<DatasetMetadata> {
        DatasetMetadata::builder(name, "1.0", engine.engine_id())
            .param("symbol", "ES")
            .build()
            .unwrap()
    }

    #[test]
    fn append_then_read_roundtrips() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        let written = series(&["2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"]);
        engine.append(&md, written.clone().into()).unwrap();

        assert!(engine.exists(&md).unwrap());
        let read = engine.read(&md, None).unwrap();
        assert_eq!(read, Payload::Series(written));
    }

    #[test]
    fn read_restricts_to_range() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        engine
            .append(
                &md,
                series(&[
                    "2020-01-01T00:00:00Z",
                    "2020-01-02T00:00:00Z",
                    "2020-01-03T00:00:00Z",
                ])
                .into(),
            )
            .unwrap();
        let window =
            TimeRange::new(ts("2020-01-02T00:00:00Z"), ts("2020-01-03T00:00:00Z")).unwrap();
        let read = engine.read(&md, Some(&window)).unwrap();
        assert_eq!(read.series().unwrap().len(), 1);
    }

    #[test]
    fn read_of_absent_dataset_is_not_found() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        let err = engine.read(&md, None).unwrap_err();
        assert_eq!(err.code(), tide_error::ErrorCode::NotFound);
    }

    #[test]
    fn append_overlap_is_a_hard_error() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        engine
            .append(&md, series(&["2020-01-02T00:00:00Z"]).into())
            .unwrap();
        let err = engine
            .append(&md, series(&["2020-01-02T00:00:00Z"]).into())
            .unwrap_err();
        assert_eq!(err.code(), tide_error::ErrorCode::AppendOverlap);
        // Stored data unchanged.
        assert_eq!(engine.read(&md, None).unwrap().series().unwrap().len(), 1);
    }

    #[test]
    fn successful_append_advances_coverage() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        engine
            .append(&md, series(&["2020-01-01T00:00:00Z"]).into())
            .unwrap();
        let before = engine.range(&md).unwrap().unwrap();
        engine
            .append(&md, series(&["2020-01-02T00:00:00Z"]).into())
            .unwrap();
        let after = engine.range(&md).unwrap().unwrap();
        assert!(after.end() > before.end());
    }

    #[test]
    fn merge_is_existing_wins() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        engine
            .append(
                &md,
                Payload::Series(
                    Series::new(vec![(ts("2020-01-02T00:00:00Z"), serde_json::json!("old"))])
                        .unwrap(),
                ),
            )
            .unwrap();
        engine
            .merge(
                &md,
                Payload::Series(
                    Series::new(vec![
                        (ts("2020-01-01T00:00:00Z"), serde_json::json!("new")),
                        (ts("2020-01-02T00:00:00Z"), serde_json::json!("new")),
                    ])
                    .unwrap(),
                ),
            )
            .unwrap();
        let read = engine.read(&md, None).unwrap();
        let rows = read.series().unwrap().rows().to_vec();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, serde_json::json!("old"));
    }

    #[test]
    fn delete_range_drops_rows_and_delete_all_drops_the_node() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        engine
            .append(
                &md,
                series(&["2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"]).into(),
            )
            .unwrap();
        let head =
            TimeRange::new(ts("2020-01-01T00:00:00Z"), ts("2020-01-02T00:00:00Z")).unwrap();
        engine.delete(&md, Some(&head)).unwrap();
        assert_eq!(engine.read(&md, None).unwrap().series().unwrap().len(), 1);

        engine.delete(&md, None).unwrap();
        assert!(!engine.exists(&md).unwrap());
        assert!(engine.range(&md).unwrap().is_none());
    }

    #[test]
    fn stub_matches_metadata_hash() {
        let engine = MemoryEngine::new();
        let md = dataset(&engine, "bars");
        engine
            .append(&md, series(&["2020-01-01T00:00:00Z"]).into())
            .unwrap();
        let stub = engine.get_stub(&md).unwrap();
        assert_eq!(stub.hash, md.hash());
    }

    #[test]
    fn writes_to_foreign_metadata_are_rejected() {
        let owner = MemoryEngine::new();
        let other = MemoryEngine::new();
        let md = dataset(&owner, "bars");
        let err = other
            .append(&md, series(&["2020-01-01T00:00:00Z"]).into())
            .unwrap_err();
        assert_eq!(err.code(), tide_error::ErrorCode::Conflict);
        // Reads of foreign metadata observe absence, not an error.
        assert!(!other.exists(&md).unwrap());
    }

    #[test]
    fn static_datasets_take_blobs_only() {
        let engine = MemoryEngine::new();
        let md = DatasetMetadata::builder("model", "1.0", engine.engine_id())
            .static_output()
            .build()
            .unwrap();
        assert!(engine.append(&md, series(&["2020-01-01T00:00:00Z"]).into()).is_err());
        engine
            .replace(&md, Payload::Blob(serde_json::json!({"beta": 0.4})))
            .unwrap();
        assert_eq!(
            engine.read(&md, None).unwrap().blob().unwrap()["beta"],
            serde_json::json!(0.4)
        );
        assert!(engine.range(&md).unwrap().is_none());
    }

    #[test]
    fn query_filters_by_name_and_params() {
        let engine = MemoryEngine::new();
        let es = dataset(&engine, "bars");
        let nq = DatasetMetadata::builder("bars", "1.0", engine.engine_id())
            .param("symbol", "NQ")
            .build()
            .unwrap();
        let other = dataset(&engine, "ticks");
        for md in [&es, &nq, &other] {
            engine
                .append(md, series(&["2020-01-01T00:00:00Z"]).into())
                .unwrap();
        }

        let bars = engine
            .query(&QueryFilter::any().with_name("bars"))
            .unwrap();
        assert_eq!(bars.len(), 2);

        let just_es = engine
            .query(&QueryFilter::any().with_name("bars").with_param("symbol", "ES"))
            .unwrap();
        assert_eq!(just_es.len(), 1);
        assert_eq!(just_es[0].hash, es.hash());

        let everything = engine.query(&QueryFilter::any()).unwrap();
        assert_eq!(everything.len(), 3);
        // Deterministic order: sorted by hash.
        let mut hashes: Vec<_> = everything.iter().map(|s| s.hash).collect();
        hashes.sort();
        assert_eq!(hashes, everything.iter().map(|s| s.hash).collect::<Vec<_>>());
    }
}
