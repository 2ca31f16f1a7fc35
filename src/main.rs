mod batch;
mod classifier;
mod config;
mod dataset;
mod output;
mod progress;
mod prompt;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use classifier::{OllamaClient, Verdict};
use config::Config;
use progress::ProgressStore;

#[derive(Parser)]
#[command(
    name = "report_triage",
    about = "Classify radiology report addenda via a local Ollama model"
)]
struct Cli {
    /// Input CSV with a header row
    #[arg(long, global = true, default_value = "data/reports.csv")]
    input: PathBuf,
    /// Directory for output and checkpoint files
    #[arg(long, global = true, default_value = "data/output")]
    output_dir: PathBuf,
    /// 0-based index of the report text column
    #[arg(long, global = true, default_value_t = 8)]
    report_column: usize,
    /// Ollama API base URL
    #[arg(long, global = true, default_value = "http://localhost:11434")]
    base_url: String,
    /// Model name
    #[arg(long, global = true, default_value = "gpt-oss:20b")]
    model: String,
    /// Per-call timeout in seconds
    #[arg(long, global = true, default_value_t = 120)]
    timeout: u64,
    /// Attempts per classification call, including the first
    #[arg(long, global = true, default_value_t = 3)]
    max_retries: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the next batch of unprocessed rows, resuming from committed output
    Run {
        /// Rows per invocation (0 = all remaining)
        #[arg(short = 'n', long, default_value_t = 10)]
        batch_size: usize,
    },
    /// Classify a fixed-size sample into a fresh timestamped output
    Sample {
        /// Number of rows to sample
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
        /// Seed for random sampling
        #[arg(long, default_value_t = 789)]
        seed: u64,
        /// Take the first N rows instead of a random sample
        #[arg(long)]
        prefix: bool,
    },
    /// Show committed progress without processing anything
    Status,
    /// Discard the checkpoint record (output is left in place)
    Reset,
}

impl Cli {
    fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.input = self.input.clone();
        cfg.output_dir = self.output_dir.clone();
        cfg.report_column = self.report_column;
        cfg.base_url = self.base_url.clone();
        cfg.model = self.model.clone();
        cfg.timeout = Duration::from_secs(self.timeout);
        cfg.max_retries = self.max_retries;
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut cfg = cli.config();

    let result = match cli.command {
        Commands::Run { batch_size } => {
            cfg.batch_size = if batch_size == 0 { None } else { Some(batch_size) };
            run_resume(&cfg).await
        }
        Commands::Sample { count, seed, prefix } => {
            let seed = if prefix { None } else { Some(seed) };
            run_sample(&cfg, count, seed).await
        }
        Commands::Status => show_status(&cfg),
        Commands::Reset => {
            let store = ProgressStore::new(&cfg.output_dir);
            store.reset()?;
            println!("Checkpoint cleared. Output (if any) was left in place.");
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Spawn a ctrl-c listener that raises the cancellation flag. The executor
/// observes it between rows; completed verdicts are still committed.
fn spawn_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current row before committing");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

/// Preflight the classifier service; unavailability is fatal before any
/// batch planning happens.
async fn connect_classifier(cfg: &Config) -> Result<OllamaClient> {
    let client = OllamaClient::new(cfg)?;
    if !client.check_availability().await {
        bail!(
            "Ollama is not running or model '{}' is not available at {}. \
             Ensure Ollama is running and the model is installed.",
            cfg.model,
            cfg.base_url
        );
    }
    info!("Ollama is running with model '{}'", cfg.model);
    println!("Ollama is running with model '{}'", cfg.model);
    Ok(client)
}

/// Resume mode: one batch per invocation, committed to a fixed output file.
async fn run_resume(cfg: &Config) -> Result<()> {
    let client = connect_classifier(cfg).await?;
    let data = dataset::read_all_rows(&cfg.input)?;
    let total = data.rows.len();

    let store = ProgressStore::new(&cfg.output_dir);
    let committed = store.load();
    if committed > 0 {
        info!("found existing progress: {}/{} rows committed", committed, total);
        println!("Resuming from row {}", committed + 1);
    } else {
        println!("Starting fresh processing of {} rows", total);
    }

    let Some(range) = batch::plan(total, committed, cfg.batch_size) else {
        println!("All {} rows have been processed.", total);
        return Ok(());
    };
    println!(
        "Processing rows {} to {} (of {} total)...",
        range.start + 1,
        range.end,
        total
    );

    let cancel = spawn_cancel_handler();
    let t_batch = Instant::now();
    let results = batch::run_batch(
        &data.rows[range.clone()],
        range.start,
        total,
        cfg.report_column,
        &client,
        &cancel,
    )
    .await;

    if results.is_empty() {
        println!("Interrupted before any row completed; nothing to commit.");
        return Ok(());
    }

    // Output append strictly precedes the checkpoint update, so a crash in
    // between self-heals on the next load.
    let append = store.output_exists();
    output::write_batch(
        store.output_path(),
        &data.header,
        &results,
        cfg.report_column + 1,
        append,
    )?;
    let committed = committed + results.len();
    store.commit(committed, total)?;

    print_batch_summary(&results, committed, total, t_batch.elapsed());
    println!("\nOutput: {}", store.output_path().display());
    if committed < total {
        println!(
            "Run again to continue (batch size: {}).",
            cfg.batch_size
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all remaining".into())
        );
    } else {
        println!("All {} rows have been processed.", total);
    }
    Ok(())
}

/// Sample mode: classify a fixed-size subset into a fresh timestamped file.
/// Bypasses the progress store entirely and never resumes.
async fn run_sample(cfg: &Config, count: usize, seed: Option<u64>) -> Result<()> {
    let client = connect_classifier(cfg).await?;
    let data = dataset::read_all_rows(&cfg.input)?;
    let selected = dataset::sample_rows(&data.rows, count, seed);

    println!("Processing {} sampled rows...", selected.len());
    let cancel = spawn_cancel_handler();
    let t_batch = Instant::now();
    let results = batch::run_batch(
        &selected,
        0,
        selected.len(),
        cfg.report_column,
        &client,
        &cancel,
    )
    .await;

    if results.is_empty() {
        println!("Interrupted before any row completed; no output written.");
        return Ok(());
    }

    let path = output::sample_output_path(&cfg.output_dir);
    output::write_batch(&path, &data.header, &results, cfg.report_column + 1, false)?;

    print_sample_summary(&results, t_batch.elapsed());
    println!("\nOutput: {}", path.display());
    Ok(())
}

fn show_status(cfg: &Config) -> Result<()> {
    let data = dataset::read_all_rows(&cfg.input)?;
    let store = ProgressStore::new(&cfg.output_dir);
    let committed = store.load();
    let total = data.rows.len();

    println!("Input:     {} ({} rows)", cfg.input.display(), total);
    println!("Output:    {}", store.output_path().display());
    println!(
        "Progress:  {}/{} ({:.1}%)",
        committed,
        total,
        percent(committed, total)
    );
    println!("Remaining: {}", total.saturating_sub(committed));
    match store.load_checkpoint() {
        Some(record) => println!(
            "Checkpoint: last row {} of {} (advisory)",
            record.last_processed_row + 1,
            record.total_rows
        ),
        None => println!("Checkpoint: none"),
    }
    Ok(())
}

struct VerdictCounts {
    positive: usize,
    negative: usize,
    failed: usize,
}

fn count_verdicts(results: &[(Vec<String>, Verdict)]) -> VerdictCounts {
    let mut counts = VerdictCounts {
        positive: 0,
        negative: 0,
        failed: 0,
    };
    for (_, verdict) in results {
        match verdict.flag() {
            "Yes" => counts.positive += 1,
            "No" => counts.negative += 1,
            "Error" => counts.failed += 1,
            _ => {}
        }
    }
    counts
}

fn print_batch_summary(
    results: &[(Vec<String>, Verdict)],
    committed: usize,
    total: usize,
    duration: Duration,
) {
    let counts = count_verdicts(results);
    println!(
        "\nBatch complete: {} reports in {}",
        results.len(),
        format_duration(duration)
    );
    println!("  Imaging-related:     {}", counts.positive);
    println!("  Not imaging-related: {}", counts.negative);
    println!("  Errors:              {}", counts.failed);
    println!(
        "Overall progress: {}/{} ({:.1}%), {} remaining",
        committed,
        total,
        percent(committed, total),
        total - committed
    );
}

fn print_sample_summary(results: &[(Vec<String>, Verdict)], duration: Duration) {
    let counts = count_verdicts(results);
    let total = results.len();
    println!(
        "\nSample complete: {} reports in {}",
        total,
        format_duration(duration)
    );
    println!(
        "  Imaging-related:     {} ({:.1}%)",
        counts.positive,
        percent(counts.positive, total)
    );
    println!(
        "  Not imaging-related: {} ({:.1}%)",
        counts.negative,
        percent(counts.negative, total)
    );
    println!(
        "  Errors:              {} ({:.1}%)",
        counts.failed,
        percent(counts.failed, total)
    );
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting_scales() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42.0s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn verdict_counting_ignores_unnormalized_flags() {
        let results = vec![
            (vec![], Verdict::positive("x", "")),
            (vec![], Verdict::negative("")),
            (vec![], Verdict::failed("query failed")),
            (vec![], Verdict::positive("y", "")),
        ];
        let counts = count_verdicts(&results);
        assert_eq!(counts.positive, 2);
        assert_eq!(counts.negative, 1);
        assert_eq!(counts.failed, 1);
    }
}
