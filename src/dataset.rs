use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

/// Input table: header plus all data rows. Row identity is the 0-based
/// position in `rows`, stable across runs.
#[derive(Debug)]
pub struct Dataset {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read the entire input CSV. Rows may have uneven field counts; short rows
/// are handled downstream, not rejected here. A missing file is fatal.
pub fn read_all_rows(path: &Path) -> Result<Dataset> {
    if !path.exists() {
        bail!("input CSV not found: {}", path.display());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let header: Vec<String> = reader
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("failed to read {}", path.display()))?;
        rows.push(record.iter().map(String::from).collect());
    }

    info!("read {} data rows from {}", rows.len(), path.display());
    Ok(Dataset { header, rows })
}

/// Select rows for sample mode: a seeded random sample, or the first `count`
/// rows when `seed` is `None`. Asking for more rows than exist returns all
/// of them.
pub fn sample_rows(rows: &[Vec<String>], count: usize, seed: Option<u64>) -> Vec<Vec<String>> {
    if count >= rows.len() {
        return rows.to_vec();
    }
    match seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            let selected: Vec<Vec<String>> = rows
                .choose_multiple(&mut rng, count)
                .cloned()
                .collect();
            info!(
                "randomly sampled {} of {} rows (seed={})",
                count,
                rows.len(),
                seed
            );
            selected
        }
        None => {
            info!("selected first {} of {} rows", count, rows.len());
            rows[..count].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_header_and_uneven_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "id,name,report").unwrap();
        writeln!(file, "1,alpha,chest ct").unwrap();
        writeln!(file, "2,beta").unwrap();
        drop(file);

        let dataset = read_all_rows(&path).unwrap();
        assert_eq!(dataset.header, row(&["id", "name", "report"]));
        assert_eq!(dataset.rows.len(), 2);
        assert_eq!(dataset.rows[1], row(&["2", "beta"]));
    }

    #[test]
    fn missing_input_is_fatal() {
        let err = read_all_rows(Path::new("/nonexistent/reports.csv")).unwrap_err();
        assert!(err.to_string().contains("input CSV not found"));
    }

    #[test]
    fn prefix_sample_takes_first_rows() {
        let rows = vec![row(&["a"]), row(&["b"]), row(&["c"])];
        let selected = sample_rows(&rows, 2, None);
        assert_eq!(selected, vec![row(&["a"]), row(&["b"])]);
    }

    #[test]
    fn seeded_sample_is_deterministic() {
        let rows: Vec<Vec<String>> = (0..50).map(|i| row(&[&i.to_string()])).collect();
        let first = sample_rows(&rows, 10, Some(789));
        let second = sample_rows(&rows, 10, Some(789));
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }

    #[test]
    fn oversized_sample_returns_everything() {
        let rows = vec![row(&["a"]), row(&["b"])];
        assert_eq!(sample_rows(&rows, 10, Some(1)).len(), 2);
    }
}
