//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust,ignore
//! use simstore::prelude::*;
//! ```

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::factory::{Backend, open_store, store_config};
pub use crate::frame::DataFrame;
pub use crate::record::{Embedding, Label, Payload, Record, RecordBatch, RecordId};
#[cfg(feature = "sqlite")]
pub use crate::store::{SqliteStore, SqliteStoreConfig};
pub use crate::store::{EmbeddingStore, FromConfig, MemoryStore, MemoryStoreConfig};
