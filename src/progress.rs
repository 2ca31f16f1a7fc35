use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Fixed output filename in resume mode; appending to the same file is what
/// makes the row count a resume cursor.
pub const OUTPUT_FILE: &str = "processed_reports_final.csv";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Advisory metadata written after every commit. Resume never trusts it:
/// progress is recomputed from the output file, so losing this record costs
/// nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// 0-based index of the last committed row.
    pub last_processed_row: usize,
    pub total_rows: usize,
    pub output_file: String,
}

/// Durable record of how many rows are committed. The output CSV is the
/// source of truth; the checkpoint JSON is a diagnostic fallback used only
/// when the output exists but cannot be read.
pub struct ProgressStore {
    output_path: PathBuf,
    checkpoint_path: PathBuf,
}

impl ProgressStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_path: output_dir.join(OUTPUT_FILE),
            checkpoint_path: output_dir.join(CHECKPOINT_FILE),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn output_exists(&self) -> bool {
        self.output_path.exists()
    }

    /// Count of rows durably committed to output; 0 when no output exists.
    pub fn load(&self) -> usize {
        if !self.output_path.exists() {
            return 0;
        }
        match count_data_rows(&self.output_path) {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    "could not count rows in {} ({:#}), falling back to checkpoint",
                    self.output_path.display(),
                    e
                );
                self.load_checkpoint()
                    .map(|record| record.last_processed_row + 1)
                    .unwrap_or(0)
            }
        }
    }

    pub fn load_checkpoint(&self) -> Option<CheckpointRecord> {
        let contents = fs::read_to_string(&self.checkpoint_path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Record cumulative progress. Call only after the corresponding output
    /// append succeeded: output write precedes checkpoint write, so a crash
    /// between the two self-heals on the next `load`.
    pub fn commit(&self, processed_count: usize, total_rows: usize) -> Result<()> {
        debug_assert!(processed_count > 0);
        let record = CheckpointRecord {
            last_processed_row: processed_count - 1,
            total_rows,
            output_file: self.output_path.display().to_string(),
        };
        if let Some(parent) = self.checkpoint_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(&record)?;
        fs::write(&self.checkpoint_path, contents)
            .with_context(|| format!("failed to write {}", self.checkpoint_path.display()))?;
        info!("checkpoint saved: {}/{} rows", processed_count, total_rows);
        Ok(())
    }

    /// Discard the checkpoint record for a forced fresh run. The output file
    /// is deliberately left in place.
    pub fn reset(&self) -> Result<()> {
        if self.checkpoint_path.exists() {
            fs::remove_file(&self.checkpoint_path)
                .with_context(|| format!("failed to remove {}", self.checkpoint_path.display()))?;
            info!("checkpoint cleared: {}", self.checkpoint_path.display());
        }
        Ok(())
    }
}

fn count_data_rows(path: &Path) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut count = 0;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}
