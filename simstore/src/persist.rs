//! Portable snapshot format shared by all backends.
//!
//! A snapshot is a single file, `store.simstore`, inside the directory given
//! to `save`/`load`:
//!
//! ```text
//! {"format":"simstore","version":1,"compression":"gzip",...}\n   <- header
//! <body>                                                          <- records
//! ```
//!
//! The header is one line of JSON. The body holds one JSON record per line,
//! gzip-compressed when the header says so. Embeddings are stored as base64
//! of their little-endian `f32` bytes so values round-trip bit for bit.
//!
//! Writes go to a temp file in the target directory which is renamed over
//! the final path once fully synced, so a reader only ever sees the old or
//! the new snapshot.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::{
    Label, Payload, Record, RecordId, embedding_from_bytes, embedding_to_bytes, present_payload,
};

/// File name of the snapshot inside a store directory.
pub const SNAPSHOT_FILE: &str = "store.simstore";

/// Magic value of the header `format` field.
pub const FORMAT_NAME: &str = "simstore";

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 1;

/// Body encoding of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain JSON lines.
    None,
    /// Gzip-compressed JSON lines.
    Gzip,
}

impl Compression {
    /// Map the `compression` flag of `save` to an encoding.
    #[must_use]
    pub const fn from_flag(enabled: bool) -> Self {
        if enabled { Self::Gzip } else { Self::None }
    }
}

/// First line of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Always [`FORMAT_NAME`].
    pub format: String,
    /// Format version the file was written with.
    pub version: u32,
    /// Body encoding.
    pub compression: Compression,
    /// Backend that wrote the snapshot.
    pub backend: String,
    /// Config mapping of the store that wrote the snapshot.
    pub config: Value,
    /// Number of records in the body.
    pub count: usize,
}

impl SnapshotHeader {
    /// Build a header for the current format version.
    #[must_use]
    pub fn new(
        backend: impl Into<String>,
        config: Value,
        compression: Compression,
        count: usize,
    ) -> Self {
        Self {
            format: FORMAT_NAME.to_owned(),
            version: FORMAT_VERSION,
            compression,
            backend: backend.into(),
            config,
            count,
        }
    }
}

/// A fully decoded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The header line.
    pub header: SnapshotHeader,
    /// Records in the order they were written.
    pub records: Vec<Record>,
}

/// One body line.
#[derive(Serialize, Deserialize)]
struct WireRecord {
    id: u64,
    embedding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<Label>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_payload"
    )]
    data: Option<Payload>,
}

impl WireRecord {
    fn encode(record: &Record) -> Self {
        Self {
            id: record.id.get(),
            embedding: STANDARD.encode(embedding_to_bytes(&record.embedding)),
            label: record.label,
            data: record.data.clone(),
        }
    }

    fn decode(self) -> std::result::Result<Record, String> {
        let bytes = STANDARD
            .decode(self.embedding.as_bytes())
            .map_err(|e| format!("record {}: bad embedding encoding: {e}", self.id))?;
        let embedding = embedding_from_bytes(&bytes).ok_or_else(|| {
            format!(
                "record {}: embedding byte length {} is not a multiple of 4",
                self.id,
                bytes.len()
            )
        })?;
        Ok(Record {
            id: RecordId(self.id),
            embedding,
            label: self.label,
            data: self.data,
        })
    }
}

/// Location of the snapshot file for `path`.
///
/// `path` is normally the store directory; a path to an existing file is
/// used as is.
#[must_use]
pub fn snapshot_path(path: &Path) -> PathBuf {
    if path.is_file() {
        path.to_path_buf()
    } else {
        path.join(SNAPSHOT_FILE)
    }
}

/// Write `records` as a snapshot under the directory `dir`.
///
/// Blocking; async callers should go through [`save_snapshot`].
///
/// # Errors
///
/// I/O and serialization failures. No file is left at the final path when
/// the write fails.
pub fn write_snapshot(dir: &Path, header: &SnapshotHeader, records: &[Record]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let final_path = dir.join(SNAPSHOT_FILE);

    let mut tmp = tempfile::Builder::new()
        .prefix(".store.")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, header)?;
        writer.write_all(b"\n")?;

        match header.compression {
            Compression::None => write_body(&mut writer, records)?,
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(&mut writer, flate2::Compression::default());
                write_body(&mut encoder, records)?;
                encoder.finish()?;
            }
        }
        writer.flush()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(&final_path).map_err(|e| Error::Io(e.error))?;

    debug!(path = %final_path.display(), count = records.len(), "wrote snapshot");
    Ok(final_path)
}

fn write_body<W: Write>(writer: &mut W, records: &[Record]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *writer, &WireRecord::encode(record))?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

fn open_snapshot(path: &Path) -> Result<(PathBuf, BufReader<File>)> {
    let file_path = snapshot_path(path);
    let file = match File::open(&file_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::corrupt(file_path, "no snapshot found"));
        }
        Err(e) => return Err(Error::corrupt(file_path, format!("unreadable: {e}"))),
    };
    Ok((file_path, BufReader::new(file)))
}

fn parse_header<R: BufRead>(file_path: &Path, reader: &mut R) -> Result<SnapshotHeader> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| Error::corrupt(file_path, format!("unreadable header: {e}")))?;

    let header: SnapshotHeader = serde_json::from_str(line.trim_end())
        .map_err(|e| Error::corrupt(file_path, format!("unrecognized header: {e}")))?;

    if header.format != FORMAT_NAME {
        return Err(Error::corrupt(
            file_path,
            format!("unknown format '{}'", header.format),
        ));
    }
    if header.version != FORMAT_VERSION {
        return Err(Error::corrupt(
            file_path,
            format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                header.version
            ),
        ));
    }
    Ok(header)
}

/// Read only the header of the snapshot at `path`.
///
/// # Errors
///
/// [`Error::Corrupt`] if the file is missing or the header is invalid.
pub fn read_header(path: &Path) -> Result<SnapshotHeader> {
    let (file_path, mut reader) = open_snapshot(path)?;
    parse_header(&file_path, &mut reader)
}

/// Read and fully decode the snapshot at `path`.
///
/// Blocking; async callers should go through [`load_snapshot`].
///
/// # Errors
///
/// [`Error::Corrupt`] on a missing file, bad header, undecodable record,
/// duplicate id or a record count that disagrees with the header.
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let (file_path, mut reader) = open_snapshot(path)?;
    let header = parse_header(&file_path, &mut reader)?;

    let records = match header.compression {
        Compression::None => read_body(&file_path, reader, header.count)?,
        Compression::Gzip => read_body(&file_path, GzDecoder::new(reader), header.count)?,
    };

    if records.len() != header.count {
        return Err(Error::corrupt(
            &file_path,
            format!(
                "header announces {} records, body holds {}",
                header.count,
                records.len()
            ),
        ));
    }

    debug!(path = %file_path.display(), count = records.len(), "read snapshot");
    Ok(Snapshot { header, records })
}

fn read_body<R: Read>(file_path: &Path, reader: R, expected: usize) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(expected);
    let mut seen = std::collections::HashSet::with_capacity(expected);

    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(|e| Error::corrupt(file_path, format!("unreadable body: {e}")))?;
        if line.is_empty() {
            continue;
        }
        let wire: WireRecord = serde_json::from_str(&line)
            .map_err(|e| Error::corrupt(file_path, format!("line {}: {e}", n + 2)))?;
        let record = wire
            .decode()
            .map_err(|reason| Error::corrupt(file_path, reason))?;
        if !seen.insert(record.id) {
            return Err(Error::corrupt(
                file_path,
                format!("duplicate record id {}", record.id),
            ));
        }
        records.push(record);
    }
    Ok(records)
}

/// Write a snapshot on the blocking thread pool.
///
/// # Errors
///
/// See [`write_snapshot`].
pub async fn save_snapshot(
    dir: PathBuf,
    header: SnapshotHeader,
    records: Vec<Record>,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || write_snapshot(&dir, &header, &records))
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

/// Read a snapshot on the blocking thread pool.
///
/// # Errors
///
/// See [`read_snapshot`].
pub async fn load_snapshot(path: PathBuf) -> Result<Snapshot> {
    tokio::task::spawn_blocking(move || read_snapshot(&path))
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}
