//! Batch model: a changeset split into bounded, indexed part files.
//!
//! A [`BatchInfo`] is the manifest of one exchange. Each [`BatchPartInfo`]
//! is one physical file written by a [`LocalSerializer`]; the file holds
//! the rows of one table, described by a [`BatchPartTableInfo`].
//!
//! ## Invariants
//!
//! - `rows_count` equals the sum of the parts' row counts
//! - exactly one part has `is_last_batch`, the one with the highest index
//! - part indexes are unique; registering an index again replaces the part
//! - file names are unique within the batch directory

use crate::error::{CoreError, CoreResult};
use crate::naming::{ParsedName, SyncNamed};
use crate::serializer::LocalSerializer;
use crate::set::SyncSet;
use crate::table::SyncTable;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the persisted manifest inside a batch directory.
pub const MANIFEST_FILE_NAME: &str = "batchinfo.json";

const RANDOM_SUFFIX_LEN: usize = 12;

/// How many rows of one table live in one part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPartTableInfo {
    /// Table name.
    pub table_name: String,
    /// Schema namespace, empty when absent.
    #[serde(default)]
    pub schema_name: String,
    /// Number of rows of this table in the part.
    pub rows_count: usize,
}

impl BatchPartTableInfo {
    /// Creates a table slice description.
    pub fn new(
        table_name: impl Into<String>,
        schema_name: impl Into<String>,
        rows_count: usize,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: schema_name.into(),
            rows_count,
        }
    }
}

impl SyncNamed for BatchPartTableInfo {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }
}

impl PartialEq for BatchPartTableInfo {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_table(other)
    }
}

impl Eq for BatchPartTableInfo {}

/// One physical batch part file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPartInfo {
    /// File name, relative to the batch directory.
    pub file_name: String,
    /// Zero-based sequence index.
    pub index: usize,
    /// True for the final part of the batch.
    pub is_last_batch: bool,
    /// Tables (and row counts) held by the file.
    pub tables: Vec<BatchPartTableInfo>,
    /// Rows in the file.
    pub rows_count: usize,
}

impl BatchPartInfo {
    /// Creates a part holding rows of a single table.
    pub fn new(file_name: impl Into<String>, index: usize, table: BatchPartTableInfo) -> Self {
        Self {
            file_name: file_name.into(),
            index,
            is_last_batch: false,
            rows_count: table.rows_count,
            tables: vec![table],
        }
    }

    /// Row count of a table in this part, 0 if absent.
    pub fn rows_for<N: SyncNamed + ?Sized>(&self, table: &N) -> usize {
        self.tables
            .iter()
            .filter(|t| t.is_same_table(table))
            .map(|t| t.rows_count)
            .sum()
    }
}

/// Manifest of one synchronization exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Root directory holding batch directories.
    pub directory_root: PathBuf,
    /// This batch's directory name under the root.
    pub directory_name: String,
    /// Logical clock value: changes up to and including this point.
    pub timestamp: i64,
    /// Parts, in insertion order.
    pub(crate) parts: Vec<BatchPartInfo>,
    /// Total rows across parts.
    pub(crate) rows_count: usize,
    /// Key of the serializer that wrote the parts.
    pub serializer_key: String,
    /// Structure used to rehydrate rows read from part files.
    pub sanitized_schema: SyncSet,
}

impl BatchInfo {
    /// Creates an empty batch in a fresh, uniquely named directory.
    pub fn new(
        directory_root: impl Into<PathBuf>,
        schema: &SyncSet,
        serializer_key: impl Into<String>,
    ) -> Self {
        Self::with_directory_name(
            directory_root,
            Uuid::new_v4().simple().to_string(),
            schema,
            serializer_key,
        )
    }

    /// Creates an empty batch in a named directory.
    pub fn with_directory_name(
        directory_root: impl Into<PathBuf>,
        directory_name: impl Into<String>,
        schema: &SyncSet,
        serializer_key: impl Into<String>,
    ) -> Self {
        Self {
            directory_root: directory_root.into(),
            directory_name: directory_name.into(),
            timestamp: 0,
            parts: Vec::new(),
            rows_count: 0,
            serializer_key: serializer_key.into(),
            sanitized_schema: schema.sanitized(),
        }
    }

    /// Parts, in insertion order.
    pub fn parts(&self) -> &[BatchPartInfo] {
        &self.parts
    }

    /// Total rows across parts.
    pub fn rows_count(&self) -> usize {
        self.rows_count
    }

    /// The part registered at `index`.
    pub fn part(&self, index: usize) -> Option<&BatchPartInfo> {
        self.parts.iter().find(|p| p.index == index)
    }

    /// Full path of the batch directory.
    pub fn directory_path(&self) -> PathBuf {
        self.directory_root.join(&self.directory_name)
    }

    /// Full path of a part file.
    pub fn part_path(&self, part: &BatchPartInfo) -> PathBuf {
        self.directory_path().join(&part.file_name)
    }

    /// Generates `{table}_{index:04}_{random}.{extension}`.
    ///
    /// `table_name` may be quoted or schema-qualified; it is unquoted and
    /// normalized first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BatchIndexOverflow`] when the index needs more
    /// than four digits, and [`CoreError::InvalidName`] for unparseable
    /// table names.
    pub fn generate_new_file_name(
        index: usize,
        table_name: &str,
        extension: &str,
    ) -> CoreResult<String> {
        let index_str = format!("{index:04}");
        if index_str.len() > 4 {
            return Err(CoreError::BatchIndexOverflow { index });
        }

        let table = ParsedName::parse(table_name)?.normalized();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();

        Ok(format!("{table}_{index_str}_{suffix}.{extension}"))
    }

    /// Generates a new part file name for `table` and resolves it under the
    /// batch directory. Returns `(file_name, full_path)`.
    ///
    /// # Errors
    ///
    /// See [`BatchInfo::generate_new_file_name`].
    pub fn new_batch_part_info_path<N: SyncNamed + ?Sized>(
        &self,
        index: usize,
        table: &N,
        extension: &str,
    ) -> CoreResult<(String, PathBuf)> {
        let name = ParsedName::new(table.schema_name(), table.table_name());
        let file_name = Self::generate_new_file_name(index, &name.quoted("[", "]"), extension)?;
        let path = self.directory_path().join(&file_name);
        Ok((file_name, path))
    }

    /// Returns true if any part holds rows.
    pub fn has_data(&self) -> bool {
        self.parts.iter().map(|p| p.rows_count).sum::<usize>() > 0
    }

    /// Returns true if any part holds rows of `table`.
    pub fn has_data_for<N: SyncNamed + ?Sized>(&self, table: &N) -> bool {
        self.parts.iter().map(|p| p.rows_for(table)).sum::<usize>() > 0
    }

    /// Parts holding rows of `table`, ordered by ascending index.
    ///
    /// Parts must be applied in this order: later parts of a table may
    /// depend on rows established by earlier ones.
    pub fn batch_parts_info<N: SyncNamed + ?Sized>(&self, table: &N) -> Vec<&BatchPartInfo> {
        let mut parts: Vec<&BatchPartInfo> = self
            .parts
            .iter()
            .filter(|p| p.rows_for(table) > 0)
            .collect();
        parts.sort_by_key(|p| p.index);
        parts
    }

    /// Registers a part and keeps `rows_count` consistent. A part already
    /// registered at the same index is replaced and returned.
    pub fn add_part(&mut self, part: BatchPartInfo) -> Option<BatchPartInfo> {
        let replaced = self.remove_part(part.index);
        self.rows_count += part.rows_count;
        self.parts.push(part);
        replaced
    }

    /// Unregisters the part at `index`. Its file is left on disk.
    pub fn remove_part(&mut self, index: usize) -> Option<BatchPartInfo> {
        let position = self.parts.iter().position(|p| p.index == index)?;
        let part = self.parts.remove(position);
        self.rows_count = self.rows_count.saturating_sub(part.rows_count);
        Some(part)
    }

    /// Next free part index.
    pub fn next_index(&self) -> usize {
        self.parts.iter().map(|p| p.index + 1).max().unwrap_or(0)
    }

    /// Marks exactly the part with the highest index as the last one.
    pub fn ensure_last_batch(&mut self) {
        let max_index = self.parts.iter().map(|p| p.index).max();
        let mut marked = false;
        for part in &mut self.parts {
            // Duplicate indexes are not expected; only the first gets the flag.
            part.is_last_batch = !marked && Some(part.index) == max_index;
            marked |= part.is_last_batch;
        }
    }

    /// Writes `table`'s rows into a new part file at `index` and registers
    /// the part, replacing (and deleting) any part already at `index`. The
    /// part is not marked last; call [`BatchInfo::ensure_last_batch`] once
    /// every part is added.
    ///
    /// # Errors
    ///
    /// Returns an error if the file name cannot be generated or the file
    /// cannot be written.
    pub async fn save_batch_part_info(
        &mut self,
        index: usize,
        table: &SyncTable,
        serializer: &mut dyn LocalSerializer,
    ) -> CoreResult<BatchPartInfo> {
        let (file_name, path) =
            self.new_batch_part_info_path(index, table, serializer.extension())?;

        serializer.open_file(&path, table).await?;
        for row in &table.rows {
            serializer.write_row(row).await?;
        }
        serializer.close_file().await?;

        let part = BatchPartInfo::new(
            file_name,
            index,
            BatchPartTableInfo::new(&table.table_name, &table.schema_name, table.rows.len()),
        );
        if let Some(old) = self.add_part(part.clone()) {
            let old_path = self.part_path(&old);
            if let Err(e) = tokio::fs::remove_file(&old_path).await {
                tracing::warn!(path = %old_path.display(), error = %e, "failed to remove replaced part");
            }
        }
        Ok(part)
    }

    /// Loads the rows of `table` from `part`.
    ///
    /// The returned table is a clone of the sanitized schema's definition;
    /// the shared schema is never mutated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotFound`] when the table is neither in the
    /// sanitized schema nor in the part, or a read error.
    pub async fn load_batch_part_info<N: SyncNamed + ?Sized>(
        &self,
        part: &BatchPartInfo,
        table: &N,
        serializer: &mut dyn LocalSerializer,
    ) -> CoreResult<SyncTable> {
        let not_found = || CoreError::TableNotFound {
            name: table.full_name(),
        };
        if !part.tables.iter().any(|t| t.is_same_table(table)) {
            return Err(not_found());
        }
        let mut loaded = self
            .sanitized_schema
            .table(table)
            .map(SyncTable::clone_schema)
            .ok_or_else(not_found)?;

        let rows = serializer.read_rows(&self.part_path(part), &loaded).await?;
        for row in rows {
            loaded.push_row(row)?;
        }
        Ok(loaded)
    }

    /// Removes the batch directory and everything in it.
    ///
    /// Best effort: failures are logged and swallowed.
    pub async fn try_remove_directory(&self) {
        if self.directory_name.is_empty() {
            return;
        }
        let path = self.directory_path();
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "batch directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove batch directory")
            }
        }
    }

    /// Persists the manifest as `batchinfo.json` in the batch directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    pub async fn save_manifest(&self) -> CoreResult<PathBuf> {
        let dir = self.directory_path();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(MANIFEST_FILE_NAME);
        tokio::fs::write(&path, serde_json::to_vec_pretty(self)?).await?;
        Ok(path)
    }

    /// Reads a manifest from a batch directory or a manifest file path.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    pub async fn load_manifest(path: &Path) -> CoreResult<Self> {
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        let bytes = tokio::fs::read(&file).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonLocalSerializer;
    use crate::table::{RowState, SyncColumn, SyncRow};
    use crate::value::SyncDataType;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn orders() -> SyncTable {
        SyncTable::new("Orders", "")
            .with_column(SyncColumn::new("OrderId", SyncDataType::Integer))
            .with_column(SyncColumn::new("Customer", SyncDataType::Text))
            .with_primary_key(["OrderId"])
    }

    fn orders_with_rows(ids: std::ops::Range<i64>) -> SyncTable {
        let mut table = orders();
        for id in ids {
            table
                .push_row(SyncRow::new(
                    RowState::Modified,
                    vec![id.into(), format!("customer {id}").into()],
                ))
                .unwrap();
        }
        table
    }

    fn part(index: usize, table: &str, rows: usize) -> BatchPartInfo {
        BatchPartInfo::new(
            format!("{table}_{index:04}.json"),
            index,
            BatchPartTableInfo::new(table, "", rows),
        )
    }

    #[test]
    fn file_names_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let name = BatchInfo::generate_new_file_name(3, "Orders", "json").unwrap();
            assert!(name.starts_with("Orders_0003_"));
            assert!(name.ends_with(".json"));
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn file_name_index_overflow() {
        assert!(BatchInfo::generate_new_file_name(9_999, "Orders", "json").is_ok());
        assert!(matches!(
            BatchInfo::generate_new_file_name(10_000, "Orders", "json"),
            Err(CoreError::BatchIndexOverflow { index: 10_000 })
        ));
    }

    #[test]
    fn file_name_normalizes_table() {
        let name = BatchInfo::generate_new_file_name(0, "[sales].[Order Lines]", "json").unwrap();
        assert!(name.starts_with("sales_Order_Lines_0000_"));
    }

    #[test]
    fn has_data_requires_rows() {
        let mut batch = BatchInfo::new("/tmp", &SyncSet::new(), "json");
        assert!(!batch.has_data());
        batch.add_part(part(0, "Orders", 0));
        assert!(!batch.has_data());
        batch.add_part(part(1, "Orders", 5));
        assert!(batch.has_data());
        assert!(batch.has_data_for(&ParsedName::new("", "orders")));
        assert!(!batch.has_data_for(&ParsedName::new("", "Customers")));
    }

    #[test]
    fn parts_for_table_are_ordered() {
        let mut batch = BatchInfo::new("/tmp", &SyncSet::new(), "json");
        batch.add_part(part(2, "Orders", 1));
        batch.add_part(part(0, "Orders", 3));
        batch.add_part(part(1, "Customers", 2));
        batch.add_part(part(3, "Orders", 0));

        let indexes: Vec<usize> = batch
            .batch_parts_info(&ParsedName::new("", "Orders"))
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(indexes, vec![0, 2]);
        assert_eq!(batch.rows_count, 6);
        assert_eq!(batch.next_index(), 4);
    }

    #[test]
    fn same_index_replaces_the_part() {
        let mut batch = BatchInfo::new("/tmp", &SyncSet::new(), "json");
        assert!(batch.add_part(part(0, "Orders", 4)).is_none());
        batch.add_part(part(1, "Orders", 2));

        let replaced = batch.add_part(part(0, "Orders", 3)).unwrap();
        assert_eq!(replaced.rows_count, 4);
        assert_eq!(batch.parts().len(), 2);
        assert_eq!(batch.rows_count(), 5);
        assert_eq!(batch.part(0).unwrap().rows_count, 3);

        assert!(batch.remove_part(1).is_some());
        assert!(batch.remove_part(1).is_none());
        assert_eq!(batch.rows_count(), 3);
    }

    #[tokio::test]
    async fn saving_an_index_again_overwrites_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SyncSet::new().with_table(orders());
        let mut batch = BatchInfo::new(dir.path(), &schema, "json");
        let mut serializer = JsonLocalSerializer::new();

        let first = batch
            .save_batch_part_info(0, &orders_with_rows(0..3), &mut serializer)
            .await
            .unwrap();
        let second = batch
            .save_batch_part_info(0, &orders_with_rows(0..3), &mut serializer)
            .await
            .unwrap();

        assert_eq!(batch.parts().len(), 1);
        assert_eq!(batch.rows_count(), 3);
        assert!(!batch.part_path(&first).exists());
        assert!(batch.part_path(&second).exists());
    }

    #[test]
    fn table_info_equality_ignores_case_and_count() {
        let a = BatchPartTableInfo::new("Orders", "dbo", 1);
        let b = BatchPartTableInfo::new("ORDERS", "DBO", 7);
        let c = BatchPartTableInfo::new("Orders", "", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    proptest! {
        #[test]
        fn last_batch_is_max_index(
            indexes in proptest::collection::hash_set(0usize..500, 1..40),
            flags in proptest::collection::vec(any::<bool>(), 40),
        ) {
            let mut batch = BatchInfo::new("/tmp", &SyncSet::new(), "json");
            for (i, index) in indexes.iter().enumerate() {
                let mut p = part(*index, "Orders", i);
                p.is_last_batch = flags[i];
                batch.add_part(p);
            }
            batch.ensure_last_batch();

            let last: Vec<&BatchPartInfo> =
                batch.parts.iter().filter(|p| p.is_last_batch).collect();
            prop_assert_eq!(last.len(), 1);
            prop_assert_eq!(last[0].index, *indexes.iter().max().unwrap());
            let sum: usize = batch.parts.iter().map(|p| p.rows_count).sum();
            prop_assert_eq!(batch.rows_count, sum);
        }
    }

    #[tokio::test]
    async fn save_and_load_part() {
        let dir = tempfile::tempdir().unwrap();
        let table = orders_with_rows(0..25);
        let schema = SyncSet::new().with_table(table.clone());
        let mut batch = BatchInfo::new(dir.path(), &schema, "json");

        let mut serializer = JsonLocalSerializer::new();
        let first = batch
            .save_batch_part_info(0, &orders_with_rows(0..10), &mut serializer)
            .await
            .unwrap();
        batch
            .save_batch_part_info(1, &orders_with_rows(10..25), &mut serializer)
            .await
            .unwrap();
        batch.ensure_last_batch();

        assert_eq!(batch.rows_count, 25);
        assert!(batch.parts[1].is_last_batch);
        assert!(batch.part_path(&first).exists());

        let loaded = batch
            .load_batch_part_info(&first, &table, &mut serializer)
            .await
            .unwrap();
        assert_eq!(loaded.rows.len(), 10);
        assert_eq!(loaded.rows, table.rows[..10].to_vec());
        // the shared schema stays empty
        assert!(batch.sanitized_schema.is_empty());
    }

    #[tokio::test]
    async fn load_unknown_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SyncSet::new().with_table(orders());
        let mut batch = BatchInfo::new(dir.path(), &schema, "json");
        let mut serializer = JsonLocalSerializer::new();
        let part = batch
            .save_batch_part_info(0, &orders_with_rows(0..2), &mut serializer)
            .await
            .unwrap();

        let err = batch
            .load_batch_part_info(&part, &ParsedName::new("", "Customers"), &mut serializer)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn manifest_roundtrip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SyncSet::new().with_table(orders());
        let mut batch = BatchInfo::new(dir.path(), &schema, "json");
        batch.timestamp = 1234;
        let mut serializer = JsonLocalSerializer::new();
        batch
            .save_batch_part_info(0, &orders_with_rows(0..3), &mut serializer)
            .await
            .unwrap();
        batch.ensure_last_batch();
        batch.save_manifest().await.unwrap();

        let loaded = BatchInfo::load_manifest(&batch.directory_path()).await.unwrap();
        assert_eq!(loaded, batch);

        batch.try_remove_directory().await;
        assert!(!batch.directory_path().exists());
        // removing twice is harmless
        batch.try_remove_directory().await;
    }
}
