//! Simstore - a key-value store for embedding vectors
//!
//! This crate maps store-assigned record ids to (embedding, label, data)
//! triples for similarity-search and metric-learning pipelines. Callers
//! program against the [`EmbeddingStore`] trait; [`MemoryStore`] and
//! [`SqliteStore`] are the shipped backends. Stores snapshot to a portable
//! file format ([`persist`]) and rebuild from flat config mappings
//! ([`factory`]).

pub mod error;
pub mod factory;
pub mod frame;
pub mod persist;
pub mod prelude;
pub mod record;
pub mod store;

pub use error::{Error, ErrorKind, Result};
pub use factory::{Backend, open_store, store_config};
pub use frame::DataFrame;
pub use record::{Embedding, Label, Payload, Record, RecordBatch, RecordId};
#[cfg(feature = "sqlite")]
pub use store::{SqliteStore, SqliteStoreConfig};
pub use store::{EmbeddingStore, FromConfig, MemoryStore, MemoryStoreConfig};
