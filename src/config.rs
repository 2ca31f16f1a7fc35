use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, built once in `main` from CLI flags and passed by
/// reference into each component. There is no global mutable state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Input CSV with a header row.
    pub input: PathBuf,
    /// Directory holding the output CSV and checkpoint record.
    pub output_dir: PathBuf,
    /// 0-based index of the column holding the report text.
    pub report_column: usize,
    /// Rows per invocation in resume mode; `None` processes all remaining.
    pub batch_size: Option<usize>,
    /// Ollama API base URL.
    pub base_url: String,
    /// Model name as listed by `/api/tags`.
    pub model: String,
    /// Reasoning effort passed through to the model ("low"/"medium"/"high").
    pub reasoning_effort: String,
    pub temperature: f64,
    /// Per-request timeout for one classification call.
    pub timeout: Duration,
    /// Total attempts per classification call, including the first.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Case-insensitive substrings that must appear in a report before the
    /// model is consulted at all.
    pub markers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/reports.csv"),
            output_dir: PathBuf::from("data/output"),
            report_column: 8,
            batch_size: Some(10),
            base_url: "http://localhost:11434".to_string(),
            model: "gpt-oss:20b".to_string(),
            reasoning_effort: "medium".to_string(),
            temperature: 0.1,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            markers: vec!["addendum".to_string(), "addenda".to_string()],
        }
    }
}
