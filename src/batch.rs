use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, warn};

use crate::classifier::{Classifier, Verdict};

/// Compute the next contiguous slice of unprocessed rows. Pure: `None` when
/// everything is committed, otherwise `[progress, progress + batch_size)`
/// clamped to the dataset (`None` batch size takes all remaining rows).
pub fn plan(total_rows: usize, progress: usize, batch_size: Option<usize>) -> Option<Range<usize>> {
    if progress >= total_rows {
        return None;
    }
    let end = match batch_size {
        Some(size) => (progress + size).min(total_rows),
        None => total_rows,
    };
    Some(progress..end)
}

/// Classify one batch of rows, strictly in index order, one verdict per row.
///
/// Per-row problems (short rows, failed calls) become `Failed` verdicts and
/// never abort the batch. A cancellation flag raised during the batch is
/// observed between rows: processing stops and the pairs completed so far
/// are returned in order as a legitimate partial result — the caller commits
/// them, since every verdict already obtained was paid for.
pub async fn run_batch(
    rows: &[Vec<String>],
    start_index: usize,
    total_rows: usize,
    report_column: usize,
    classifier: &dyn Classifier,
    cancel: &AtomicBool,
) -> Vec<(Vec<String>, Verdict)> {
    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );

    let mut results = Vec::with_capacity(rows.len());
    for (offset, row) in rows.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            pb.finish_and_clear();
            warn!(
                "interrupted after {} of {} rows in this batch, committing partial result",
                results.len(),
                rows.len()
            );
            return results;
        }

        let row_number = start_index + offset + 1;
        let verdict = if row.len() <= report_column {
            warn!("row {}: missing report text column", row_number);
            Verdict::failed("missing report text column")
        } else {
            classifier.classify(&row[report_column]).await
        };

        if verdict.is_failed() {
            error!("row {}: {}", row_number, verdict.content());
        }
        pb.set_message(format!(
            "row {}/{}: {}",
            row_number,
            total_rows,
            verdict.flag()
        ));
        pb.inc(1);
        results.push((row.clone(), verdict));
    }

    pb.finish_and_clear();
    results
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::Outcome;
    use crate::output;
    use crate::progress::ProgressStore;

    /// Scripted classifier: "ADDENDUM" documents are positive, everything
    /// else negative. Counts invocations and can raise the cancel flag after
    /// a fixed number of calls.
    struct MockClassifier {
        calls: AtomicUsize,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl MockClassifier {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cancel_after: None,
            }
        }

        fn cancelling_after(count: usize, flag: Arc<AtomicBool>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cancel_after: Some((count, flag)),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for MockClassifier {
        async fn classify(&self, report_text: &str) -> Verdict {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, flag)) = &self.cancel_after {
                if calls >= *after {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if report_text.contains("ADDENDUM") {
                Verdict::positive("x", "")
            } else {
                Verdict::negative("no addendum marker found")
            }
        }
    }

    fn report_row(id: usize, text: &str) -> Vec<String> {
        vec![id.to_string(), text.to_string()]
    }

    fn make_rows(count: usize) -> Vec<Vec<String>> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    report_row(i, "ADDENDUM: new nodule")
                } else {
                    report_row(i, "clear lungs")
                }
            })
            .collect()
    }

    #[test]
    fn plan_respects_batch_size_and_bounds() {
        assert_eq!(plan(25, 0, Some(10)), Some(0..10));
        assert_eq!(plan(25, 10, Some(10)), Some(10..20));
        assert_eq!(plan(25, 20, Some(10)), Some(20..25));
        assert_eq!(plan(25, 25, Some(10)), None);
        assert_eq!(plan(25, 30, Some(10)), None);
        assert_eq!(plan(10, 3, None), Some(3..10));
        assert_eq!(plan(0, 0, Some(10)), None);
    }

    #[tokio::test]
    async fn verdicts_come_back_in_row_order() {
        let rows = make_rows(4);
        let mock = MockClassifier::new();
        let cancel = AtomicBool::new(false);
        let results = run_batch(&rows, 0, 4, 1, &mock, &cancel).await;

        assert_eq!(results.len(), 4);
        assert_eq!(mock.call_count(), 4);
        for (i, (row, verdict)) in results.iter().enumerate() {
            assert_eq!(row[0], i.to_string());
            if i % 2 == 0 {
                assert_eq!(verdict.outcome, Outcome::Positive("x".to_string()));
            } else {
                assert_eq!(verdict.outcome, Outcome::Negative);
            }
        }
    }

    #[tokio::test]
    async fn short_rows_fail_without_touching_the_classifier() {
        let rows = vec![report_row(0, "ADDENDUM here"), vec!["1".to_string()]];
        let mock = MockClassifier::new();
        let cancel = AtomicBool::new(false);
        let results = run_batch(&rows, 0, 2, 1, &mock, &cancel).await;

        assert_eq!(results.len(), 2);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(
            results[1].1.outcome,
            Outcome::Failed("missing report text column".to_string())
        );
    }

    #[tokio::test]
    async fn cancellation_returns_completed_rows_only() {
        let rows = make_rows(10);
        let cancel = Arc::new(AtomicBool::new(false));
        let mock = MockClassifier::cancelling_after(3, cancel.clone());
        let results = run_batch(&rows, 0, 10, 1, &mock, &cancel).await;

        // The flag goes up during the third call; it is observed before the
        // fourth row starts.
        assert_eq!(results.len(), 3);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(results[2].0[0], "2");
    }

    /// Full pipeline walk: 25 rows, batch size 10. Three invocations advance
    /// progress to 10, 20 and 25; a fourth finds no work. Progress is read
    /// back from the output file after every commit.
    #[tokio::test]
    async fn repeated_invocations_drain_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path());
        let header = vec!["id".to_string(), "report".to_string()];
        let rows = make_rows(25);
        let cancel = AtomicBool::new(false);

        let mut expected = vec![10, 20, 25];
        loop {
            let progress = store.load();
            let Some(range) = plan(rows.len(), progress, Some(10)) else {
                break;
            };
            assert_eq!(range.start, progress);

            let mock = MockClassifier::new();
            let results =
                run_batch(&rows[range.clone()], range.start, rows.len(), 1, &mock, &cancel).await;
            assert_eq!(results.len(), range.len());

            let append = store.output_exists();
            output::write_batch(store.output_path(), &header, &results, 2, append).unwrap();
            store.commit(progress + results.len(), rows.len()).unwrap();

            assert_eq!(store.load(), expected.remove(0));
        }

        assert!(expected.is_empty());
        assert_eq!(store.load(), 25);
        assert_eq!(plan(rows.len(), store.load(), Some(10)), None);

        // Committed data rows equal reported progress: no duplication.
        let contents = std::fs::read_to_string(store.output_path()).unwrap();
        assert_eq!(contents.lines().count(), 26);
    }

    /// Crash between output append and checkpoint update: the next load
    /// reports progress consistent with the output that was written.
    #[tokio::test]
    async fn crash_before_checkpoint_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path());
        let header = vec!["id".to_string(), "report".to_string()];
        let rows = make_rows(5);
        let cancel = AtomicBool::new(false);

        let mock = MockClassifier::new();
        let results = run_batch(&rows, 0, 5, 1, &mock, &cancel).await;
        output::write_batch(store.output_path(), &header, &results, 2, false).unwrap();
        // Process dies here: no store.commit call.

        assert_eq!(store.load(), 5);
        assert_eq!(plan(5, store.load(), Some(10)), None);
    }
}
