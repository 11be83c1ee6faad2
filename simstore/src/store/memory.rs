//! In-memory store implementation.
//!
//! [`MemoryStore`] keeps every record in a `Vec<Record>` plus an id index,
//! behind a `tokio::sync::RwLock`. Data lives as long as the value does
//! unless written out with [`EmbeddingStore::save`].
//!
//! Best suited for evaluation runs, tests, and indexes small enough to fit
//! in memory.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use super::{EmbeddingStore, FromConfig, check_dimension, config_value, trace_op};
use crate::error::{Error, Result};
use crate::frame::{self, DataFrame};
use crate::persist::{self, Compression, SnapshotHeader};
use crate::record::{
    Embedding, Label, Payload, Record, RecordBatch, RecordId, batch_rows, validate_batch,
    validate_embedding,
};

/// Constructor parameters of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryStoreConfig {
    /// Name of the store.
    pub name: String,
    /// Diagnostic verbosity; `> 0` logs every operation at `info`.
    #[serde(default)]
    pub verbose: u8,
    /// Fixed embedding length, if the store enforces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

impl MemoryStoreConfig {
    /// Config with the given name and defaults elsewhere.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbose: 0,
            dimension: None,
        }
    }
}

/// Record table plus the id counter.
#[derive(Debug, Default)]
struct Table {
    records: Vec<Record>,
    positions: HashMap<RecordId, usize>,
    next_id: RecordId,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            next_id: RecordId::default(),
        }
    }

    fn insert(
        &mut self,
        embedding: Embedding,
        label: Option<Label>,
        data: Option<Payload>,
    ) -> RecordId {
        let id = self.next_id;
        self.next_id = id.next();
        self.positions.insert(id, self.records.len());
        self.records.push(Record {
            id,
            embedding,
            label,
            data,
        });
        id
    }

    fn get(&self, id: RecordId) -> Option<&Record> {
        self.positions.get(&id).map(|&pos| &self.records[pos])
    }

    /// Drop all records; the id counter keeps counting.
    fn clear(&mut self) {
        self.records.clear();
        self.positions.clear();
    }

    /// Swap in loaded records, moving the counter past every loaded id.
    fn replace(&mut self, records: Vec<Record>) {
        self.positions = records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id, pos))
            .collect();
        if let Some(max) = records.iter().map(|r| r.id).max() {
            self.next_id = self.next_id.max(max.next());
        }
        self.records = records;
    }
}

/// In-memory embedding store backed by `tokio::sync::RwLock`.
///
/// Concurrent readers may fetch records simultaneously; inserts, `reset`
/// and `load` take exclusive access, which also serializes id allocation.
#[derive(Debug)]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    table: RwLock<Table>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(MemoryStoreConfig::new(name))
    }

    /// Creates an empty store with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            config: MemoryStoreConfig::new(name),
            table: RwLock::new(Table::with_capacity(capacity)),
        }
    }

    fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            table: RwLock::new(Table::default()),
        }
    }

    /// The typed constructor parameters.
    #[must_use]
    pub const fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }
}

impl FromConfig for MemoryStore {
    const BACKEND: &'static str = "memory";

    type Config = MemoryStoreConfig;

    fn from_typed_config(config: Self::Config) -> Result<Self> {
        check_dimension(config.dimension)?;
        Ok(Self::with_config(config))
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn backend(&self) -> &'static str {
        Self::BACKEND
    }

    async fn add(
        &self,
        embedding: Embedding,
        label: Option<Label>,
        data: Option<Payload>,
    ) -> Result<RecordId> {
        validate_embedding(&embedding, self.config.dimension)?;
        let id = self.table.write().await.insert(embedding, label, data);
        trace_op(self.config.verbose, &self.config.name, "add", 1);
        Ok(id)
    }

    async fn batch_add(
        &self,
        embeddings: Vec<Embedding>,
        labels: Option<Vec<Label>>,
        data: Option<Vec<Payload>>,
    ) -> Result<Vec<RecordId>> {
        validate_batch(
            &embeddings,
            labels.as_deref(),
            data.as_deref(),
            self.config.dimension,
        )?;
        let count = embeddings.len();
        let rows = batch_rows(embeddings, labels, data);

        let ids = {
            let mut table = self.table.write().await;
            table.records.reserve(count);
            rows.into_iter()
                .map(|(e, l, d)| table.insert(e, l, d))
                .collect::<Vec<_>>()
        };
        trace_op(self.config.verbose, &self.config.name, "batch_add", count);
        Ok(ids)
    }

    async fn get(&self, id: RecordId) -> Result<Record> {
        self.table
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::not_found(id))
    }

    async fn batch_get(&self, ids: &[RecordId]) -> Result<RecordBatch> {
        let table = self.table.read().await;
        let mut batch = RecordBatch::with_capacity(ids.len());
        for &id in ids {
            let record = table.get(id).ok_or(Error::not_found(id))?;
            batch.push(
                record.embedding.clone(),
                record.label,
                record.data.clone(),
            );
        }
        Ok(batch)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.table.read().await.records.len())
    }

    async fn save(&self, path: &Path, compression: bool) -> Result<()> {
        let records = self.table.read().await.records.clone();
        let count = records.len();
        let header = SnapshotHeader::new(
            Self::BACKEND,
            self.get_config(),
            Compression::from_flag(compression),
            count,
        );

        persist::save_snapshot(path.to_path_buf(), header, records).await?;
        trace_op(self.config.verbose, &self.config.name, "save", count);
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<usize> {
        let snapshot = persist::load_snapshot(path.to_path_buf()).await?;

        for record in &snapshot.records {
            validate_embedding(&record.embedding, self.config.dimension).map_err(|e| {
                Error::corrupt(path, format!("record {} incompatible: {e}", record.id))
            })?;
        }
        if snapshot.header.config.get("name") != Some(&Value::from(self.config.name.as_str())) {
            warn!(
                store = %self.config.name,
                snapshot = %snapshot.header.config,
                "loading snapshot written by a differently named store"
            );
        }

        let count = snapshot.records.len();
        self.table.write().await.replace(snapshot.records);
        trace_op(self.config.verbose, &self.config.name, "load", count);
        Ok(count)
    }

    async fn to_data_frame(&self, num_records: usize) -> Result<DataFrame> {
        let table = self.table.read().await;
        Ok(DataFrame::new(frame::head(table.records.iter(), num_records)))
    }

    async fn reset(&self) -> Result<()> {
        self.table.write().await.clear();
        trace_op(self.config.verbose, &self.config.name, "reset", 0);
        Ok(())
    }

    fn get_config(&self) -> Value {
        config_value(&self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    /// Returns `n` deterministic 3-d embeddings.
    fn sample_embeddings(n: usize) -> Vec<Embedding> {
        (0..n)
            .map(|i| {
                let x = i as f32;
                vec![x, x * 0.5, -x]
            })
            .collect()
    }

    mod construction {
        use super::*;

        #[test]
        fn new_creates_empty_store() {
            let store = MemoryStore::new("s-1");
            assert_eq!(store.config.name, "s-1");
            assert!(store.table.blocking_read().records.is_empty());
        }

        #[test]
        fn with_capacity_preallocates() {
            let store = MemoryStore::with_capacity("s-2", 64);
            let inner = store.table.blocking_read();
            assert!(inner.records.capacity() >= 64);
            assert!(inner.records.is_empty());
        }

        #[test]
        fn from_config_applies_defaults() {
            let store = MemoryStore::from_config(json!({"name": "cfg"})).unwrap();
            assert_eq!(store.config().verbose, 0);
            assert_eq!(store.config().dimension, None);
        }

        #[test]
        fn from_config_requires_name() {
            let err = MemoryStore::from_config(json!({"verbose": 1})).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }

        #[test]
        fn from_config_rejects_wrong_types() {
            let err = MemoryStore::from_config(json!({"name": "x", "verbose": "loud"})).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    mod add {
        use super::*;

        #[tokio::test]
        async fn assigns_increasing_ids() {
            let store = MemoryStore::new("a1");
            let a = store.add(vec![1.0], None, None).await.unwrap();
            let b = store.add(vec![2.0], None, None).await.unwrap();
            assert_eq!(a, RecordId(0));
            assert_eq!(b, RecordId(1));
        }

        #[tokio::test]
        async fn get_returns_inserted_triple() {
            let store = MemoryStore::new("a2");
            let id = store
                .add(vec![0.25, 0.5], Some(7), Some(json!({"src": "x.png"})))
                .await
                .unwrap();

            let (embedding, label, data) = store.get(id).await.unwrap().into_parts();
            assert_eq!(embedding, vec![0.25, 0.5]);
            assert_eq!(label, Some(7));
            assert_eq!(data, Some(json!({"src": "x.png"})));
        }

        #[tokio::test]
        async fn omitted_fields_stay_none() {
            let store = MemoryStore::new("a3");
            let id = store.add(vec![1.0, 2.0], None, None).await.unwrap();
            let record = store.get(id).await.unwrap();
            assert_eq!(record.label, None);
            assert_eq!(record.data, None);
        }

        #[tokio::test]
        async fn malformed_embedding_is_rejected_without_side_effects() {
            let store = MemoryStore::new("a4");
            assert!(store.add(vec![], None, None).await.is_err());
            assert!(store.add(vec![f32::NAN], None, None).await.is_err());
            assert_eq!(store.size().await.unwrap(), 0);

            let id = store.add(vec![1.0], None, None).await.unwrap();
            assert_eq!(id, RecordId(0));
        }

        #[tokio::test]
        async fn fixed_dimension_is_enforced() {
            let mut config = MemoryStoreConfig::new("a5");
            config.dimension = Some(2);
            let store = MemoryStore::from_typed_config(config).unwrap();

            store.add(vec![1.0, 2.0], None, None).await.unwrap();
            let err = store.add(vec![1.0], None, None).await.unwrap_err();
            assert!(matches!(err, Error::DimensionMismatch { .. }));
        }
    }

    mod batch_add {
        use super::*;

        #[tokio::test]
        async fn ids_follow_input_order() {
            let store = MemoryStore::new("b1");
            let embeddings = sample_embeddings(4);
            let ids = store
                .batch_add(embeddings.clone(), Some(vec![0, 1, 0, 1]), None)
                .await
                .unwrap();

            assert_eq!(ids, vec![RecordId(0), RecordId(1), RecordId(2), RecordId(3)]);
            let batch = store.batch_get(&ids).await.unwrap();
            assert_eq!(batch.embeddings, embeddings);
            assert_eq!(batch.labels, vec![Some(0), Some(1), Some(0), Some(1)]);
            assert_eq!(batch.data, vec![None; 4]);
        }

        #[tokio::test]
        async fn matches_sequential_adds() {
            let batched = MemoryStore::new("b2");
            let sequential = MemoryStore::new("b3");
            let embeddings = sample_embeddings(5);

            let batch_ids = batched
                .batch_add(embeddings.clone(), None, None)
                .await
                .unwrap();
            let mut seq_ids = Vec::new();
            for e in embeddings {
                seq_ids.push(sequential.add(e, None, None).await.unwrap());
            }

            assert_eq!(batch_ids, seq_ids);
            assert_eq!(
                batched.to_data_frame(0).await.unwrap(),
                sequential.to_data_frame(0).await.unwrap()
            );
        }

        #[tokio::test]
        async fn length_mismatch_inserts_nothing() {
            let store = MemoryStore::new("b4");
            let err = store
                .batch_add(sample_embeddings(3), Some(vec![1, 2]), None)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert_eq!(store.size().await.unwrap(), 0);

            let err = store
                .batch_add(sample_embeddings(2), None, Some(vec![json!(1)]))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert_eq!(store.size().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn one_bad_embedding_rejects_whole_batch() {
            let store = MemoryStore::new("b5");
            let mut embeddings = sample_embeddings(3);
            embeddings[2] = vec![f32::INFINITY, 0.0, 0.0];

            assert!(store.batch_add(embeddings, None, None).await.is_err());
            assert_eq!(store.size().await.unwrap(), 0);
            assert_eq!(store.add(vec![1.0], None, None).await.unwrap(), RecordId(0));
        }

        #[tokio::test]
        async fn empty_batch_is_noop() {
            let store = MemoryStore::new("b6");
            let ids = store.batch_add(vec![], None, None).await.unwrap();
            assert!(ids.is_empty());
            assert_eq!(store.size().await.unwrap(), 0);
        }
    }

    mod get {
        use super::*;

        #[tokio::test]
        async fn unknown_id_is_not_found() {
            let store = MemoryStore::new("g1");
            let err = store.get(RecordId(0)).await.unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn batch_get_fails_fast_on_unknown_id() {
            let store = MemoryStore::new("g2");
            let ids = store
                .batch_add(sample_embeddings(2), None, None)
                .await
                .unwrap();

            let err = store
                .batch_get(&[ids[0], RecordId(99), ids[1]])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::NotFound { id: RecordId(99) }));

            // The store stays usable after a failed lookup.
            assert_eq!(store.batch_get(&ids).await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn batch_get_respects_requested_order() {
            let store = MemoryStore::new("g3");
            let ids = store
                .batch_add(sample_embeddings(3), Some(vec![10, 11, 12]), None)
                .await
                .unwrap();

            let batch = store.batch_get(&[ids[2], ids[0], ids[2]]).await.unwrap();
            assert_eq!(batch.labels, vec![Some(12), Some(10), Some(12)]);
        }
    }

    mod reset {
        use super::*;

        #[tokio::test]
        async fn clears_records_without_reusing_ids() {
            let store = MemoryStore::new("r1");
            let old = store
                .batch_add(sample_embeddings(3), None, None)
                .await
                .unwrap();
            store.reset().await.unwrap();

            assert_eq!(store.size().await.unwrap(), 0);
            assert!(store.get(old[0]).await.unwrap_err().is_not_found());

            let fresh = store.add(vec![1.0], None, None).await.unwrap();
            assert!(!old.contains(&fresh));
        }

        #[tokio::test]
        async fn reset_on_empty_store_is_idempotent() {
            let store = MemoryStore::new("r2");
            store.reset().await.unwrap();
            store.reset().await.unwrap();
            assert!(store.is_empty().await.unwrap());
        }

        #[tokio::test]
        async fn reset_keeps_config() {
            let store = MemoryStore::from_config(json!({"name": "r3", "verbose": 2})).unwrap();
            let before = store.get_config();
            store.add(vec![1.0], None, None).await.unwrap();
            store.reset().await.unwrap();
            assert_eq!(store.get_config(), before);
        }
    }

    mod persistence {
        use super::*;

        async fn populated(name: &str) -> MemoryStore {
            let store = MemoryStore::new(name);
            store
                .batch_add(
                    sample_embeddings(3),
                    Some(vec![1, 2, 3]),
                    Some(vec![json!("a"), json!(null), json!({"k": [1, 2]})]),
                )
                .await
                .unwrap();
            store
        }

        #[tokio::test]
        async fn save_then_load_round_trips() {
            for compression in [true, false] {
                let dir = tempfile::tempdir().unwrap();
                let source = populated("p1").await;
                source.save(dir.path(), compression).await.unwrap();

                let target = MemoryStore::new("p1");
                assert_eq!(target.load(dir.path()).await.unwrap(), 3);
                assert_eq!(
                    target.to_data_frame(0).await.unwrap(),
                    source.to_data_frame(0).await.unwrap()
                );
            }
        }

        #[tokio::test]
        async fn load_replaces_existing_records() {
            let dir = tempfile::tempdir().unwrap();
            populated("p2").await.save(dir.path(), true).await.unwrap();

            let target = MemoryStore::new("p2");
            target
                .batch_add(sample_embeddings(10), None, None)
                .await
                .unwrap();
            target.load(dir.path()).await.unwrap();
            assert_eq!(target.size().await.unwrap(), 3);
        }

        #[tokio::test]
        async fn ids_after_load_do_not_collide() {
            let dir = tempfile::tempdir().unwrap();
            populated("p3").await.save(dir.path(), false).await.unwrap();

            let target = MemoryStore::new("p3");
            target.load(dir.path()).await.unwrap();
            let id = target.add(vec![9.0, 9.0, 9.0], None, None).await.unwrap();
            assert_eq!(id, RecordId(3));
        }

        #[tokio::test]
        async fn missing_snapshot_leaves_store_untouched() {
            let dir = tempfile::tempdir().unwrap();
            let store = populated("p4").await;
            let err = store.load(&dir.path().join("nope")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Corrupt);
            assert_eq!(store.size().await.unwrap(), 3);
        }

        #[tokio::test]
        async fn incompatible_dimension_is_corrupt() {
            let dir = tempfile::tempdir().unwrap();
            populated("p5").await.save(dir.path(), true).await.unwrap();

            let store = MemoryStore::from_config(json!({"name": "p5", "dimension": 8})).unwrap();
            let err = store.load(dir.path()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Corrupt);
            assert!(store.is_empty().await.unwrap());
        }

        #[tokio::test]
        async fn header_carries_config() {
            let dir = tempfile::tempdir().unwrap();
            let store = populated("p6").await;
            store.save(dir.path(), true).await.unwrap();

            let header = persist::read_header(dir.path()).unwrap();
            assert_eq!(header.backend, "memory");
            assert_eq!(header.config, store.get_config());
            assert_eq!(header.count, 3);
        }
    }

    mod data_frame {
        use super::*;

        #[tokio::test]
        async fn zero_exports_everything() {
            let store = MemoryStore::new("d1");
            store
                .batch_add(sample_embeddings(5), None, None)
                .await
                .unwrap();
            assert_eq!(store.to_data_frame(0).await.unwrap().len(), 5);
        }

        #[tokio::test]
        async fn limit_keeps_insertion_order() {
            let store = MemoryStore::new("d2");
            let ids = store
                .batch_add(sample_embeddings(5), None, None)
                .await
                .unwrap();
            let frame = store.to_data_frame(2).await.unwrap();
            let exported: Vec<_> = frame.rows().iter().map(|r| r.id).collect();
            assert_eq!(exported, ids[..2]);
        }
    }

    mod config {
        use super::*;

        #[test]
        fn get_config_is_flat_mapping() {
            let store = MemoryStore::new("c1");
            assert_eq!(store.get_config(), json!({"name": "c1", "verbose": 0}));
        }

        #[test]
        fn config_round_trips() {
            let store =
                MemoryStore::from_config(json!({"name": "c2", "verbose": 1, "dimension": 16}))
                    .unwrap();
            let rebuilt = MemoryStore::from_config(store.get_config()).unwrap();
            assert_eq!(rebuilt.get_config(), store.get_config());
        }
    }

    mod concurrency {
        use super::*;

        #[tokio::test]
        async fn concurrent_writers_get_distinct_ids() {
            let store = Arc::new(MemoryStore::new("cw-1"));

            let handles: Vec<_> = (0..50)
                .map(|i| {
                    let s = Arc::clone(&store);
                    tokio::spawn(async move {
                        s.add(vec![i as f32 + 1.0], Some(i), None).await.unwrap()
                    })
                })
                .collect();

            let mut ids = Vec::new();
            for handle in handles {
                ids.push(handle.await.unwrap());
            }
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 50);
            assert_eq!(store.size().await.unwrap(), 50);
        }

        #[tokio::test]
        async fn concurrent_readers_see_whole_records() {
            let store = Arc::new(MemoryStore::new("cr-1"));
            let ids = store
                .batch_add(sample_embeddings(10), None, None)
                .await
                .unwrap();

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let s = Arc::clone(&store);
                    let ids = ids.clone();
                    tokio::spawn(async move { s.batch_get(&ids).await.unwrap().len() })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.await.unwrap(), 10);
            }
        }
    }
}
