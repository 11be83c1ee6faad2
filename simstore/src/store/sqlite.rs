//! SQLite-backed store implementation.
//!
//! [`SqliteStore`] keeps records in a SQLite database, surviving process
//! restarts when opened on a file. Uses [`rusqlite`] for synchronous access,
//! bridged to async via [`tokio::task::spawn_blocking`].
//!
//! # Storage Model
//!
//! One row per record in the `records` table. Embeddings are stored as
//! little-endian `f32` blobs and payloads as JSON text. The `id` column is
//! `AUTOINCREMENT`, so SQLite itself guarantees ids are never reused, even
//! after every row has been deleted by `reset`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{EmbeddingStore, FromConfig, check_dimension, config_value, trace_op};
use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::persist::{self, Compression, SnapshotHeader};
use crate::record::{
    Embedding, Label, Payload, Record, RecordBatch, RecordId, batch_rows, embedding_from_bytes,
    embedding_to_bytes, validate_batch, validate_embedding,
};

const SELECT_COLUMNS: &str = "SELECT id, embedding, label, data FROM records";

/// Constructor parameters of a [`SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Name of the store.
    pub name: String,
    /// Diagnostic verbosity; `> 0` logs every operation at `info`.
    #[serde(default)]
    pub verbose: u8,
    /// Fixed embedding length, if the store enforces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    /// Database file; `None` opens an ephemeral in-process database.
    ///
    /// Must be UTF-8. Through `from_config` the file must not hold records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl SqliteStoreConfig {
    /// Config with the given name and defaults elsewhere.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbose: 0,
            dimension: None,
            path: None,
        }
    }
}

/// Raw column values of one `records` row.
type RawRow = (i64, Vec<u8>, Option<i64>, Option<String>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_row((id, blob, label, data): RawRow) -> Result<Record> {
    let id = u64::try_from(id).map_err(|_| Error::Malformed(format!("negative record id {id}")))?;
    let embedding = embedding_from_bytes(&blob)
        .ok_or_else(|| Error::Malformed(format!("record {id}: embedding blob has odd length")))?;
    let data = data
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| Error::Malformed(format!("record {id}: payload is not JSON: {e}")))?;
    Ok(Record {
        id: RecordId(id),
        embedding,
        label,
        data,
    })
}

fn encode_data(data: Option<&Payload>) -> Result<Option<String>> {
    Ok(data.map(serde_json::to_string).transpose()?)
}

/// Ids beyond `i64::MAX` cannot be stored, so they are never present.
fn sql_id(id: RecordId) -> Result<i64> {
    i64::try_from(id.get()).map_err(|_| Error::not_found(id))
}

/// Id of the row just inserted.
fn last_id(conn: &Connection) -> Result<RecordId> {
    let rowid = conn.last_insert_rowid();
    u64::try_from(rowid)
        .map(RecordId)
        .map_err(|_| Error::Malformed(format!("negative rowid {rowid}")))
}

/// Database paths end up in the config mapping, which is JSON.
fn check_path(path: &Path) -> Result<()> {
    if path.to_str().is_none() {
        return Err(Error::invalid_input(format!(
            "database path {} is not valid UTF-8",
            path.display()
        )));
    }
    Ok(())
}

fn count_records(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
    usize::try_from(count).map_err(|_| Error::Malformed(format!("negative row count {count}")))
}

/// SQLite-backed store for durable embedding records.
///
/// Cloneable via `Arc<Mutex<Connection>>`; clones share the same database
/// and therefore the same records.
///
/// Schema is auto-created on construction. All blocking I/O is offloaded
/// to the tokio blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    config: SqliteStoreConfig,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path` and initializes the schema.
    ///
    /// Records already in the database stay visible. This is the way to
    /// reopen a durable store; [`FromConfig::from_config`] only builds empty
    /// stores.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a non-UTF-8 path, [`Error::Sqlite`] if the
    /// database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        check_path(path)?;
        let mut config = SqliteStoreConfig::new(name);
        config.path = Some(path.to_path_buf());
        Self::from_connection(Connection::open(path)?, config)
    }

    /// Opens an ephemeral in-memory database (data lost on drop).
    ///
    /// # Errors
    ///
    /// [`Error::Sqlite`] if schema setup fails.
    pub fn in_memory(name: impl Into<String>) -> Result<Self> {
        Self::from_typed_config(SqliteStoreConfig::new(name))
    }

    /// Wraps an existing [`Connection`], applying pragmas and schema setup.
    ///
    /// Useful for custom connection configuration (encryption, extra pragmas).
    ///
    /// # Errors
    ///
    /// [`Error::Sqlite`] if schema setup fails.
    pub fn from_connection(conn: Connection, config: SqliteStoreConfig) -> Result<Self> {
        check_dimension(config.dimension)?;
        if let Some(path) = &config.path {
            check_path(path)?;
        }

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                embedding BLOB    NOT NULL,
                label     INTEGER,
                data      TEXT
            );",
        )?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The typed constructor parameters.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Bridges a synchronous closure onto the tokio blocking thread pool.
    ///
    /// The closure receives the locked [`Connection`]; the lock is held for
    /// the duration of the closure only.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| Error::Lock(e.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Every record in id order, read inside one transaction.
    async fn snapshot(&self, limit: Option<usize>) -> Result<Vec<Record>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let rows = {
                let mut stmt = tx.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC LIMIT ?1"))?;
                stmt.query_map(params![limit], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.commit()?;
            rows.into_iter().map(decode_row).collect()
        })
        .await
    }
}

impl FromConfig for SqliteStore {
    const BACKEND: &'static str = "sqlite";

    type Config = SqliteStoreConfig;

    /// Builds an empty store.
    ///
    /// With a `path`, the database file must not hold records yet, so a
    /// store rebuilt from another store's config never shares its data.
    fn from_typed_config(config: Self::Config) -> Result<Self> {
        let Some(path) = config.path.clone() else {
            return Self::from_connection(Connection::open_in_memory()?, config);
        };

        check_path(&path)?;
        let store = Self::from_connection(Connection::open(&path)?, config)?;
        let held = {
            let conn = store.conn.lock().map_err(|e| Error::Lock(e.to_string()))?;
            count_records(&conn)?
        };
        if held > 0 {
            return Err(Error::invalid_input(format!(
                "database {} already holds {held} records; use SqliteStore::open to reopen it",
                path.display()
            )));
        }
        Ok(store)
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
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
        let blob = embedding_to_bytes(&embedding);
        let data = encode_data(data.as_ref())?;

        let id = self
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO records (embedding, label, data) VALUES (?1, ?2, ?3)",
                    params![blob, label, data],
                )?;
                last_id(conn)
            })
            .await?;
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
        let rows = batch_rows(embeddings, labels, data)
            .into_iter()
            .map(|(e, l, d)| Ok((embedding_to_bytes(&e), l, encode_data(d.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;

        let ids = self
            .blocking(move |conn| {
                let tx = conn.transaction()?;
                let mut ids = Vec::with_capacity(rows.len());
                {
                    let mut stmt = tx
                        .prepare("INSERT INTO records (embedding, label, data) VALUES (?1, ?2, ?3)")?;
                    for (blob, label, data) in &rows {
                        stmt.execute(params![blob, label, data])?;
                        ids.push(last_id(&tx)?);
                    }
                }
                tx.commit()?;
                Ok(ids)
            })
            .await?;
        trace_op(self.config.verbose, &self.config.name, "batch_add", count);
        Ok(ids)
    }

    async fn get(&self, id: RecordId) -> Result<Record> {
        let key = sql_id(id)?;
        let raw = self
            .blocking(move |conn| {
                Ok(conn
                    .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![key], read_row)
                    .optional()?)
            })
            .await?;
        raw.map_or(Err(Error::not_found(id)), decode_row)
    }

    async fn batch_get(&self, ids: &[RecordId]) -> Result<RecordBatch> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut batch = RecordBatch::with_capacity(ids.len());
            for id in ids {
                let raw = stmt
                    .query_row(params![sql_id(id)?], read_row)
                    .optional()?
                    .ok_or(Error::not_found(id))?;
                let record = decode_row(raw)?;
                batch.push(record.embedding, record.label, record.data);
            }
            Ok(batch)
        })
        .await
    }

    async fn size(&self) -> Result<usize> {
        self.blocking(|conn| count_records(conn)).await
    }

    async fn save(&self, path: &Path, compression: bool) -> Result<()> {
        let records = self.snapshot(None).await?;
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

        let mut rows = Vec::with_capacity(snapshot.records.len());
        for record in &snapshot.records {
            validate_embedding(&record.embedding, self.config.dimension).map_err(|e| {
                Error::corrupt(path, format!("record {} incompatible: {e}", record.id))
            })?;
            let id = i64::try_from(record.id.get())
                .map_err(|_| Error::corrupt(path, format!("record id {} out of range", record.id)))?;
            rows.push((
                id,
                embedding_to_bytes(&record.embedding),
                record.label,
                encode_data(record.data.as_ref())?,
            ));
        }
        if snapshot.header.config.get("name") != Some(&Value::from(self.config.name.as_str())) {
            warn!(
                store = %self.config.name,
                snapshot = %snapshot.header.config,
                "loading snapshot written by a differently named store"
            );
        }

        let count = rows.len();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM records", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO records (id, embedding, label, data) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (id, blob, label, data) in &rows {
                    stmt.execute(params![id, blob, label, data])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        trace_op(self.config.verbose, &self.config.name, "load", count);
        Ok(count)
    }

    async fn to_data_frame(&self, num_records: usize) -> Result<DataFrame> {
        let limit = (num_records > 0).then_some(num_records);
        Ok(DataFrame::new(self.snapshot(limit).await?))
    }

    async fn reset(&self) -> Result<()> {
        self.blocking(|conn| {
            conn.execute("DELETE FROM records", [])?;
            Ok(())
        })
        .await?;
        trace_op(self.config.verbose, &self.config.name, "reset", 0);
        Ok(())
    }

    fn get_config(&self) -> Value {
        config_value(&self.config)
    }
}
