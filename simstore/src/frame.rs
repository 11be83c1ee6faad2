//! Row-oriented export of store contents.

use std::io::Write;

use serde_json::{Value, json};

use crate::error::Result;
use crate::record::Record;

/// A table of records with columns `id, embedding, label, data`.
///
/// Rows keep the insertion order of the store they were exported from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    rows: Vec<Record>,
}

impl DataFrame {
    /// Column names, in order.
    pub const COLUMNS: [&'static str; 4] = ["id", "embedding", "label", "data"];

    /// Wrap exported rows.
    #[must_use]
    pub const fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    /// Column names, in order.
    #[must_use]
    pub const fn columns(&self) -> &'static [&'static str] {
        &Self::COLUMNS
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows.
    #[must_use]
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Consume the table, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }

    /// One column as JSON values, or `None` for an unknown column name.
    ///
    /// Missing labels and payloads come out as `null`.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let extract: fn(&Record) -> Value = match name {
            "id" => |r| json!(r.id),
            "embedding" => |r| json!(r.embedding),
            "label" => |r| json!(r.label),
            "data" => |r| r.data.clone().unwrap_or(Value::Null),
            _ => return None,
        };
        Some(self.rows.iter().map(extract).collect())
    }

    /// Write one JSON object per row, newline separated.
    ///
    /// # Errors
    ///
    /// I/O and serialization failures from `writer`.
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> Result<()> {
        for row in &self.rows {
            let line = json!({
                "id": row.id,
                "embedding": row.embedding,
                "label": row.label,
                "data": row.data,
            });
            serde_json::to_writer(&mut writer, &line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Take the first `num_records` rows, or all of them when it is 0.
pub(crate) fn head<'a, I>(records: I, num_records: usize) -> Vec<Record>
where
    I: Iterator<Item = &'a Record>,
{
    let limit = if num_records == 0 {
        usize::MAX
    } else {
        num_records
    };
    records.take(limit).cloned().collect()
}
