use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::classifier::Verdict;

/// Derived columns appended to each row, inserted directly after the report
/// text column.
pub const DERIVED_COLUMNS: [&str; 3] = [
    "Imaging Related Addendum",
    "Imaging Addendum Content",
    "Model Reasoning",
];

/// Fresh timestamped output path for sample mode, which never resumes.
pub fn sample_output_path(output_dir: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    output_dir.join(format!("processed_reports_sample_{}.csv", timestamp))
}

/// Append one batch of rows plus verdicts to `path`. In create mode the
/// augmented header is written first; in append mode a compatible header is
/// assumed to exist from a prior run (the caller's responsibility).
///
/// The whole batch is serialized to memory and written with a single call,
/// so a reader never observes a partially written batch.
pub fn write_batch(
    path: &Path,
    header: &[String],
    results: &[(Vec<String>, Verdict)],
    insert_at: usize,
    append: bool,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut buffer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    if !append {
        let mut augmented = header.to_vec();
        let at = insert_at.min(augmented.len());
        for (offset, name) in DERIVED_COLUMNS.iter().enumerate() {
            augmented.insert(at + offset, name.to_string());
        }
        buffer.write_record(&augmented)?;
    }

    for (row, verdict) in results {
        let mut record = row.clone();
        let at = insert_at.min(record.len());
        record.insert(at, verdict.flag().to_string());
        record.insert(at + 1, verdict.content().to_string());
        record.insert(at + 2, verdict.rationale.clone());
        buffer.write_record(&record)?;
    }

    let bytes = buffer
        .into_inner()
        .map_err(|e| anyhow!("failed to finalize batch buffer: {}", e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(append)
        .write(true)
        .truncate(!append)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(&bytes)
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush()?;

    info!(
        "wrote {} rows to {} (mode: {})",
        results.len(),
        path.display(),
        if append { "append" } else { "create" }
    );
    Ok(())
}
