//! The embedding store contract and its backends.
//!
//! [`EmbeddingStore`] is the capability set callers depend on. Concrete
//! backends implement it independently:
//!
//! - [`MemoryStore`]: records live in process memory behind a `RwLock`.
//! - [`SqliteStore`]: records live in a SQLite database (feature `sqlite`).
//!
//! Backends are rebuilt from a flat config mapping through [`FromConfig`];
//! [`crate::factory::open_store`] picks the backend from the mapping itself.
//!
//! # Batch failures
//!
//! Batch operations fail fast and never partially apply: a rejected
//! `batch_add` inserts nothing and consumes no ids, and a `batch_get` with an
//! unknown id returns [`Error::NotFound`](crate::Error::NotFound) for the
//! whole call.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryStore, MemoryStoreConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStore, SqliteStoreConfig};

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::record::{Embedding, Label, Payload, Record, RecordBatch, RecordId};

/// A repository of embedding records addressed by store-assigned ids.
///
/// Ids returned by [`add`](Self::add) and [`batch_add`](Self::batch_add) are
/// unique for the lifetime of the store and are never handed out again, not
/// even after [`reset`](Self::reset) or [`load`](Self::load).
#[async_trait]
pub trait EmbeddingStore: Send + Sync + std::fmt::Debug {
    /// Human-readable name of the store.
    fn name(&self) -> &str;

    /// Short identifier of the backend, e.g. `"memory"`.
    fn backend(&self) -> &'static str;

    /// Add one record and return its freshly assigned id.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] or [`Error::DimensionMismatch`] for a
    /// malformed embedding.
    async fn add(
        &self,
        embedding: Embedding,
        label: Option<Label>,
        data: Option<Payload>,
    ) -> Result<RecordId>;

    /// Add a batch of records, returning ids in input order.
    ///
    /// Observably the same as calling [`add`](Self::add) once per embedding.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] when `labels` or `data` do not have one entry
    /// per embedding, or when any embedding is malformed. Nothing is inserted
    /// in that case.
    async fn batch_add(
        &self,
        embeddings: Vec<Embedding>,
        labels: Option<Vec<Label>>,
        data: Option<Vec<Payload>>,
    ) -> Result<Vec<RecordId>>;

    /// Fetch the record stored under `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `id` is not held by the store.
    async fn get(&self, id: RecordId) -> Result<Record>;

    /// Fetch several records as parallel columns, in the order of `ids`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for the first unknown id; no rows are returned.
    async fn batch_get(&self, ids: &[RecordId]) -> Result<RecordBatch>;

    /// Number of records currently held.
    async fn size(&self) -> Result<usize>;

    /// Whether the store holds no records.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// Write all records and the store config under the directory `path`.
    ///
    /// The snapshot file is replaced atomically; readers of `path` never
    /// observe a partially written snapshot.
    ///
    /// # Errors
    ///
    /// I/O and serialization failures.
    async fn save(&self, path: &Path, compression: bool) -> Result<()>;

    /// Replace the store contents with the snapshot at `path`.
    ///
    /// Returns the number of records reloaded. Compression is detected from
    /// the snapshot header.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] if the snapshot is missing, unreadable or of an
    /// unknown format version. The store is left untouched on failure.
    async fn load(&self, path: &Path) -> Result<usize>;

    /// Export up to `num_records` records in insertion order (0 = all).
    async fn to_data_frame(&self, num_records: usize) -> Result<DataFrame>;

    /// Discard every record.
    async fn reset(&self) -> Result<()>;

    /// The flat config mapping this store was built from.
    fn get_config(&self) -> Value;
}

/// Construction of a backend from a flat config mapping.
///
/// The mapping is deserialized into the backend's typed
/// [`Config`](Self::Config), which rejects unknown keys. Any failure is
/// reported as [`Error::Config`] carrying the mapping that caused it.
pub trait FromConfig: Sized {
    /// Name used in error messages and snapshot headers.
    const BACKEND: &'static str;

    /// Typed constructor parameters.
    type Config: Serialize + DeserializeOwned;

    /// Build the backend from already validated parameters.
    ///
    /// # Errors
    ///
    /// Backend-specific construction failures.
    fn from_typed_config(config: Self::Config) -> Result<Self>;

    /// Build the backend from a config mapping.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] wrapping the deserialization or construction error.
    fn from_config(config: Value) -> Result<Self> {
        let typed: Self::Config = match serde_json::from_value(config.clone()) {
            Ok(typed) => typed,
            Err(e) => return Err(Error::config(Self::BACKEND, config, e)),
        };
        Self::from_typed_config(typed).map_err(|e| match e {
            Error::Config { .. } => e,
            other => Error::config(Self::BACKEND, config, other),
        })
    }
}

/// Serialize a typed config into the flat mapping returned by `get_config`.
///
/// Store configs hold only strings, integers and UTF-8 paths (checked at
/// construction), none of which can fail to serialize.
pub(crate) fn config_value<C: Serialize>(config: &C) -> Value {
    serde_json::to_value(config).unwrap_or_default()
}

/// Emit a per-operation event, at `info` when the store is verbose.
pub(crate) fn trace_op(verbose: u8, store: &str, op: &'static str, count: usize) {
    if verbose > 0 {
        info!(store, op, count, "store operation");
    } else {
        debug!(store, op, count, "store operation");
    }
}

/// Reject a non-positive fixed dimension at construction time.
pub(crate) fn check_dimension(dimension: Option<usize>) -> Result<()> {
    if dimension == Some(0) {
        return Err(Error::invalid_input("dimension must be greater than zero"));
    }
    Ok(())
}
