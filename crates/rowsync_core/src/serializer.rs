//! Local serializers: stream table rows to and from batch part files.
//!
//! The serializer is the pluggable format seam. A [`SerializerFactory`]
//! is registered under a key (`"json"` by default) that travels in the
//! HTTP serialization descriptor, so both sides pick the same format.

use crate::error::{CoreError, CoreResult};
use crate::table::{RowState, SyncRow, SyncTable};
use crate::value::SyncValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Key of the built-in JSON serializer.
pub const JSON_SERIALIZER_KEY: &str = "json";

/// Streams rows of one table into one file, or reads them back.
///
/// Writers follow `open_file` → `write_row`* → `close_file`. The file is
/// flushed and closed by `close_file`; dropping an open serializer leaves a
/// truncated file behind.
#[async_trait]
pub trait LocalSerializer: Send {
    /// File extension, without the dot.
    fn extension(&self) -> &'static str;

    /// Creates `path` and writes the header for `table`.
    async fn open_file(&mut self, path: &Path, table: &SyncTable) -> CoreResult<()>;

    /// Appends one row.
    async fn write_row(&mut self, row: &SyncRow) -> CoreResult<()>;

    /// Writes the trailer, flushes and closes the file.
    async fn close_file(&mut self) -> CoreResult<()>;

    /// Reads every row of `path`, checking it belongs to `table`.
    async fn read_rows(&mut self, path: &Path, table: &SyncTable) -> CoreResult<Vec<SyncRow>>;
}

/// Creates serializers and encodes protocol messages in one format.
pub trait SerializerFactory: Send + Sync {
    /// Registry key, sent over the wire.
    fn key(&self) -> &'static str;

    /// Creates a fresh local serializer.
    fn create_local_serializer(&self) -> Box<dyn LocalSerializer>;

    /// Encodes a protocol message.
    fn encode(&self, message: &serde_json::Value) -> CoreResult<Vec<u8>>;

    /// Decodes a protocol message.
    fn decode(&self, bytes: &[u8]) -> CoreResult<serde_json::Value>;
}

/// JSON batch part file layout:
/// `{"n": table, "s": schema, "c": [columns], "r": [[state, ts, [v1, ..]], ..]}`.
#[derive(Debug, Deserialize)]
struct JsonPartFile {
    n: String,
    #[serde(default)]
    s: String,
    #[serde(default)]
    c: Vec<String>,
    #[serde(default)]
    r: Vec<JsonRow>,
}

/// A row as stored on disk: state code, optional timestamp, then values.
#[derive(Debug, Serialize, Deserialize)]
struct JsonRow(u8, Option<i64>, Vec<SyncValue>);

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
    rows_written: usize,
}

/// The default JSON local serializer.
#[derive(Default)]
pub struct JsonLocalSerializer {
    open: Option<OpenFile>,
}

impl JsonLocalSerializer {
    /// Creates a serializer with no open file.
    pub fn new() -> Self {
        Self::default()
    }

    fn open_mut(&mut self) -> CoreResult<&mut OpenFile> {
        self.open
            .as_mut()
            .ok_or_else(|| CoreError::SerializerState("no file is open".into()))
    }
}

#[async_trait]
impl LocalSerializer for JsonLocalSerializer {
    fn extension(&self) -> &'static str {
        "json"
    }

    async fn open_file(&mut self, path: &Path, table: &SyncTable) -> CoreResult<()> {
        if self.open.is_some() {
            return Err(CoreError::SerializerState(
                "previous file was not closed".into(),
            ));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        let mut writer = BufWriter::new(file);

        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        let header = format!(
            "{{\"n\":{},\"s\":{},\"c\":{},\"r\":[",
            serde_json::to_string(&table.table_name)?,
            serde_json::to_string(&table.schema_name)?,
            serde_json::to_string(&columns)?,
        );
        writer.write_all(header.as_bytes()).await?;

        self.open = Some(OpenFile {
            path: path.to_path_buf(),
            writer,
            rows_written: 0,
        });
        Ok(())
    }

    async fn write_row(&mut self, row: &SyncRow) -> CoreResult<()> {
        let open = self.open_mut()?;
        let encoded = serde_json::to_vec(&JsonRow(
            row.state.to_code(),
            row.last_change,
            row.values.clone(),
        ))?;
        if open.rows_written > 0 {
            open.writer.write_all(b",").await?;
        }
        open.writer.write_all(&encoded).await?;
        open.rows_written += 1;
        Ok(())
    }

    async fn close_file(&mut self) -> CoreResult<()> {
        let mut open = self
            .open
            .take()
            .ok_or_else(|| CoreError::SerializerState("no file is open".into()))?;
        open.writer.write_all(b"]}").await?;
        open.writer.flush().await?;
        open.writer.into_inner().sync_all().await?;
        tracing::debug!(path = %open.path.display(), rows = open.rows_written, "batch part written");
        Ok(())
    }

    async fn read_rows(&mut self, path: &Path, table: &SyncTable) -> CoreResult<Vec<SyncRow>> {
        let bytes = tokio::fs::read(path).await?;
        let file: JsonPartFile = serde_json::from_slice(&bytes)?;
        let display = path.display().to_string();

        if !file.n.eq_ignore_ascii_case(&table.table_name)
            || !file.s.eq_ignore_ascii_case(&table.schema_name)
        {
            return Err(CoreError::invalid_batch_file(
                display,
                format!("holds table {}, expected {}", file.n, table.table_name),
            ));
        }
        if !file.c.is_empty() {
            let same_layout = file.c.len() == table.columns.len()
                && file
                    .c
                    .iter()
                    .zip(&table.columns)
                    .all(|(a, b)| a.eq_ignore_ascii_case(&b.name));
            if !same_layout {
                return Err(CoreError::invalid_batch_file(
                    display,
                    "column layout differs from schema",
                ));
            }
        }

        file.r
            .into_iter()
            .map(|JsonRow(code, last_change, values)| {
                let state = RowState::from_code(code).ok_or_else(|| {
                    CoreError::invalid_batch_file(display.clone(), format!("bad row state {code}"))
                })?;
                if values.len() != table.columns.len() {
                    return Err(CoreError::RowWidthMismatch {
                        table: table.table_name.clone(),
                        expected: table.columns.len(),
                        actual: values.len(),
                    });
                }
                Ok(SyncRow {
                    state,
                    values,
                    last_change,
                })
            })
            .collect()
    }
}

/// Factory for the JSON format.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializerFactory;

impl SerializerFactory for JsonSerializerFactory {
    fn key(&self) -> &'static str {
        JSON_SERIALIZER_KEY
    }

    fn create_local_serializer(&self) -> Box<dyn LocalSerializer> {
        Box::new(JsonLocalSerializer::new())
    }

    fn encode(&self, message: &serde_json::Value) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, bytes: &[u8]) -> CoreResult<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serializer factories by key.
#[derive(Clone)]
pub struct SerializerRegistry {
    factories: HashMap<String, Arc<dyn SerializerFactory>>,
}

impl SerializerRegistry {
    /// Creates a registry holding only the JSON factory.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(Arc::new(JsonSerializerFactory));
        registry
    }

    /// Registers (or replaces) a factory under its key.
    pub fn register(&mut self, factory: Arc<dyn SerializerFactory>) {
        self.factories.insert(factory.key().to_string(), factory);
    }

    /// Looks up a factory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownSerializer`] for unregistered keys.
    pub fn get(&self, key: &str) -> CoreResult<Arc<dyn SerializerFactory>> {
        self.factories
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::UnknownSerializer(key.to_string()))
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
