//! Config-driven construction across backends.
//!
//! A backend-agnostic config mapping is the backend's own mapping plus an
//! optional `"backend"` key naming the variant:
//!
//! ```json
//! {"backend": "sqlite", "name": "train-embeddings", "verbose": 1, "path": "db.sqlite"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{EmbeddingStore, FromConfig, MemoryStore};

/// Key selecting the backend in a config mapping.
pub const BACKEND_KEY: &str = "backend";

/// The store variants this crate ships.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// [`MemoryStore`].
    #[default]
    Memory,
    /// [`SqliteStore`](crate::store::SqliteStore).
    #[cfg(feature = "sqlite")]
    Sqlite,
}

impl Backend {
    /// Identifier used in config mappings and snapshot headers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            #[cfg(feature = "sqlite")]
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized backend name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown store backend '{0}'")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(UnknownBackend(s.to_owned())),
        }
    }
}

/// Build an empty store from a backend-agnostic config mapping.
///
/// A missing `"backend"` key selects [`Backend::Memory`]. The remaining keys
/// go to the chosen backend's [`FromConfig::from_config`].
///
/// # Errors
///
/// [`Error::Config`] if the mapping is not an object, names an unknown
/// backend, or is rejected by the backend.
pub fn open_store(config: Value) -> Result<Box<dyn EmbeddingStore>> {
    let mut map = match config {
        Value::Object(map) => map,
        other => {
            let e = Error::invalid_input("store config must be a mapping");
            return Err(Error::config("store", other, e));
        }
    };

    let backend = match map.remove(BACKEND_KEY) {
        None => Backend::default(),
        Some(Value::String(name)) => match name.parse::<Backend>() {
            Ok(backend) => backend,
            Err(e) => {
                map.insert(BACKEND_KEY.to_owned(), Value::String(name));
                return Err(Error::config("store", Value::Object(map), e));
            }
        },
        Some(other) => {
            let e = UnknownBackend(other.to_string());
            map.insert(BACKEND_KEY.to_owned(), other);
            return Err(Error::config("store", Value::Object(map), e));
        }
    };

    let config = Value::Object(map);
    let store: Box<dyn EmbeddingStore> = match backend {
        Backend::Memory => Box::new(MemoryStore::from_config(config)?),
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => Box::new(crate::store::SqliteStore::from_config(config)?),
    };
    Ok(store)
}

/// The backend-agnostic mapping for `store`: its config plus `"backend"`.
///
/// Feeding the result to [`open_store`] builds an empty store of the same
/// variant with the same config.
#[must_use]
pub fn store_config(store: &dyn EmbeddingStore) -> Value {
    let mut config = store.get_config();
    if let Value::Object(map) = &mut config {
        map.insert(BACKEND_KEY.to_owned(), Value::from(store.backend()));
    }
    config
}
