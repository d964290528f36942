//! `inspect`: prints the manifest and part files of a batch directory.

use super::runtime;
use rowsync_core::BatchInfo;
use serde::Serialize;
use std::path::Path;

/// Batch inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Batch directory.
    pub path: String,
    /// Clock value the selection stopped at.
    pub timestamp: i64,
    /// Serializer key of the part files.
    pub serializer: String,
    /// Total rows.
    pub rows_count: usize,
    /// Parts in index order.
    pub parts: Vec<PartStats>,
}

/// Statistics for a single part.
#[derive(Debug, Serialize)]
pub struct PartStats {
    /// Part index.
    pub index: usize,
    /// Part file name.
    pub file_name: String,
    /// Table the part holds.
    pub table: String,
    /// Rows in the part.
    pub rows_count: usize,
    /// Whether this is the last part.
    pub is_last: bool,
}

impl InspectResult {
    fn from_batch(batch: &BatchInfo) -> Self {
        let mut parts: Vec<PartStats> = batch
            .parts()
            .iter()
            .map(|p| PartStats {
                index: p.index,
                file_name: p.file_name.clone(),
                table: p
                    .tables
                    .iter()
                    .map(|t| t.table_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                rows_count: p.rows_count,
                is_last: p.is_last_batch,
            })
            .collect();
        parts.sort_by_key(|p| p.index);
        Self {
            path: batch.directory_path().display().to_string(),
            timestamp: batch.timestamp,
            serializer: batch.serializer_key.clone(),
            rows_count: batch.rows_count(),
            parts,
        }
    }
}

/// Runs the inspect command.
pub fn run(batch: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !batch.exists() {
        return Err(format!("No batch found at {:?}", batch).into());
    }
    let info = runtime()?.block_on(BatchInfo::load_manifest(batch))?;
    let result = InspectResult::from_batch(&info);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print!("{}", text_output(&result));
        }
    }
    Ok(())
}

fn text_output(result: &InspectResult) -> String {
    let mut out = String::new();
    out.push_str("RowSync Batch Inspection\n");
    out.push_str("========================\n\n");
    out.push_str(&format!("Path:       {}\n", result.path));
    out.push_str(&format!("Timestamp:  {}\n", result.timestamp));
    out.push_str(&format!("Serializer: {}\n", result.serializer));
    out.push_str(&format!("Rows:       {}\n", result.rows_count));
    out.push_str(&format!("\nParts ({}):\n", result.parts.len()));
    for part in &result.parts {
        out.push_str(&format!(
            "  [{:04}] {} {} rows{}  {}\n",
            part.index,
            part.table,
            part.rows_count,
            if part.is_last { " (last)" } else { "" },
            part.file_name
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::{
        JsonLocalSerializer, RowState, SyncColumn, SyncDataType, SyncRow, SyncSet, SyncTable,
    };

    #[tokio::test]
    async fn manifest_is_summarized_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = SyncTable::new("Tags", "")
            .with_column(SyncColumn::new("Name", SyncDataType::Text))
            .with_primary_key(["Name"]);
        let schema = SyncSet::new().with_table(table.clone_schema());
        table
            .push_row(SyncRow::new(RowState::Modified, vec!["red".into()]))
            .unwrap();

        let mut batch = BatchInfo::new(dir.path(), &schema, "json");
        let mut serializer = JsonLocalSerializer::new();
        batch.save_batch_part_info(1, &table, &mut serializer).await.unwrap();
        batch.save_batch_part_info(0, &table, &mut serializer).await.unwrap();
        batch.ensure_last_batch();
        batch.save_manifest().await.unwrap();

        let loaded = BatchInfo::load_manifest(&batch.directory_path()).await.unwrap();
        let result = InspectResult::from_batch(&loaded);
        assert_eq!(result.rows_count, 2);
        assert_eq!(result.parts[0].index, 0);
        assert!(result.parts[1].is_last);

        let text = text_output(&result);
        assert!(text.contains("[0001] Tags 1 rows (last)"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["parts"][0]["table"], "Tags");
    }
}
