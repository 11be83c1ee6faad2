//! Record types held by an embedding store.
//!
//! A [`Record`] is an embedding vector plus an optional class label and an
//! optional opaque payload, addressed by a store-assigned [`RecordId`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// An embedding vector produced by an upstream model.
pub type Embedding = Vec<f32>;

/// Numerical class id attached to a record.
pub type Label = i64;

/// Opaque data carried alongside an embedding.
pub type Payload = Value;

/// Store-assigned identifier of a record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// The raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A stored (embedding, label, data) triple with its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Id assigned at insertion.
    pub id: RecordId,
    /// The embedding vector.
    pub embedding: Embedding,
    /// Class label, `None` when unlabeled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    /// Associated payload, `None` when absent.
    ///
    /// `Some(Value::Null)` is a stored `null` and stays distinct from `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_payload"
    )]
    pub data: Option<Payload>,
}

impl Record {
    /// Create a record without label or data.
    #[must_use]
    pub const fn new(id: RecordId, embedding: Embedding) -> Self {
        Self {
            id,
            embedding,
            label: None,
            data: None,
        }
    }

    /// Set the label.
    #[must_use]
    pub const fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = Some(data);
        self
    }

    /// Split into the `(embedding, label, data)` triple.
    #[must_use]
    pub fn into_parts(self) -> (Embedding, Option<Label>, Option<Payload>) {
        (self.embedding, self.label, self.data)
    }
}

/// Parallel columns returned by a batch lookup.
///
/// `embeddings[i]`, `labels[i]` and `data[i]` describe the same record, in
/// the order the ids were requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    /// Embedding column.
    pub embeddings: Vec<Embedding>,
    /// Label column.
    pub labels: Vec<Option<Label>>,
    /// Payload column.
    pub data: Vec<Option<Payload>>,
}

impl RecordBatch {
    /// Create an empty batch with room for `capacity` rows.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            embeddings: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append one row.
    pub fn push(&mut self, embedding: Embedding, label: Option<Label>, data: Option<Payload>) {
        self.embeddings.push(embedding);
        self.labels.push(label);
        self.data.push(data);
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Whether the batch has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Iterate rows as borrowed triples.
    pub fn iter(&self) -> impl Iterator<Item = (&Embedding, Option<Label>, Option<&Payload>)> {
        self.embeddings
            .iter()
            .zip(&self.labels)
            .zip(&self.data)
            .map(|((e, l), d)| (e, *l, d.as_ref()))
    }

    /// Attach `ids` to the rows, producing full records.
    ///
    /// Returns `InvalidInput` when `ids` has a different length.
    pub fn into_records(self, ids: &[RecordId]) -> Result<Vec<Record>> {
        if ids.len() != self.len() {
            return Err(Error::invalid_input(format!(
                "{} ids for a batch of {} rows",
                ids.len(),
                self.len()
            )));
        }
        Ok(ids
            .iter()
            .zip(self.embeddings)
            .zip(self.labels)
            .zip(self.data)
            .map(|(((&id, embedding), label), data)| Record {
                id,
                embedding,
                label,
                data,
            })
            .collect())
    }
}

impl FromIterator<Record> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut batch = Self::default();
        for record in iter {
            batch.push(record.embedding, record.label, record.data);
        }
        batch
    }
}

/// Reject embeddings a store must not hold.
///
/// Empty vectors and non-finite components are always invalid. When the
/// store has a fixed `dimension`, the length must match it.
pub fn validate_embedding(embedding: &[f32], dimension: Option<usize>) -> Result<()> {
    if embedding.is_empty() {
        return Err(Error::invalid_input("embedding is empty"));
    }
    if let Some(expected) = dimension
        && embedding.len() != expected
    {
        return Err(Error::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(Error::invalid_input(format!(
            "embedding component {pos} is not finite"
        )));
    }
    Ok(())
}

/// Check a batch insert before anything is written.
///
/// `labels` and `data`, when given, must have one entry per embedding.
pub fn validate_batch(
    embeddings: &[Embedding],
    labels: Option<&[Label]>,
    data: Option<&[Payload]>,
    dimension: Option<usize>,
) -> Result<()> {
    if let Some(labels) = labels
        && labels.len() != embeddings.len()
    {
        return Err(Error::invalid_input(format!(
            "got {} labels for {} embeddings",
            labels.len(),
            embeddings.len()
        )));
    }
    if let Some(data) = data
        && data.len() != embeddings.len()
    {
        return Err(Error::invalid_input(format!(
            "got {} data items for {} embeddings",
            data.len(),
            embeddings.len()
        )));
    }
    for (i, embedding) in embeddings.iter().enumerate() {
        validate_embedding(embedding, dimension).map_err(|e| match e {
            Error::InvalidInput(msg) => Error::invalid_input(format!("embedding {i}: {msg}")),
            other => other,
        })?;
    }
    Ok(())
}

/// Deserialize a payload field that is present in the input.
///
/// Paired with `#[serde(default)]`: a missing key yields `None`, while a
/// present key, `null` included, yields `Some`.
pub(crate) fn present_payload<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    Payload::deserialize(deserializer).map(Some)
}

/// Little-endian `f32` bytes of an embedding.
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_bytes`]; `None` if the length is not a multiple of 4.
pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Option<Embedding> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Zip a validated batch into `(embedding, label, data)` rows.
pub(crate) fn batch_rows(
    embeddings: Vec<Embedding>,
    labels: Option<Vec<Label>>,
    data: Option<Vec<Payload>>,
) -> Vec<(Embedding, Option<Label>, Option<Payload>)> {
    let mut labels = labels.map(Vec::into_iter);
    let mut data = data.map(Vec::into_iter);
    embeddings
        .into_iter()
        .map(|e| {
            let label = labels.as_mut().and_then(Iterator::next);
            let payload = data.as_mut().and_then(Iterator::next);
            (e, label, payload)
        })
        .collect()
}
