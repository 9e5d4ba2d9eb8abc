//! Inspect command implementation.

use medsync_store::PatientStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory path.
    pub path: String,
    /// Number of live records.
    pub record_count: usize,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Highest record id, if any.
    pub max_id: Option<i64>,
    /// Most recent record timestamp, if any.
    pub latest_update: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = PatientStore::open(path)?;
    let records = store.list();

    let result = InspectResult {
        path: path.display().to_string(),
        record_count: records.len(),
        journal_bytes: store.journal_bytes()?,
        max_id: records.iter().map(|r| r.id.0).max(),
        latest_update: records
            .iter()
            .map(|r| r.last_update)
            .max()
            .map(|ts| ts.to_rfc3339()),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Store:          {}", result.path);
            println!("Records:        {}", result.record_count);
            println!("Journal bytes:  {}", result.journal_bytes);
            if let Some(max_id) = result.max_id {
                println!("Max id:         {max_id}");
            }
            if let Some(latest) = &result.latest_update {
                println!("Latest update:  {latest}");
            }
        }
    }
    Ok(())
}
