//! `b3` command-line interface.
//!
//! Commands:
//! - `fetch` - download daily OHLCV for one or more tickers into the raw store
//! - `process` - clean raw partitions into one processed dataset per ticker

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use b3::{
    BrapiProvider, Compression, CompositeProvider, DailyPriceProvider, FetchJob, FetchPipeline,
    FileFormat, FileRepository, ProcessOutcome, RunSummary, StoreOptions, Symbol, SymbolStatus,
    Throttler, YahooProvider, process_symbol,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "b3", version, about = "Daily OHLCV collection for B3 listings")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Emit log lines as JSON objects.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch daily OHLCV for a window and merge it into the raw store.
    Fetch(FetchArgs),
    /// Clean raw partitions into processed datasets.
    Process(ProcessArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Tickers, e.g. PETR4 VALE3.
    #[arg(short, long, num_args = 1..)]
    symbol: Vec<String>,

    /// First day (YYYY-MM-DD).
    #[arg(long)]
    start: NaiveDate,

    /// Last day (YYYY-MM-DD), inclusive.
    #[arg(long)]
    end: NaiveDate,

    /// Base directory of the raw store.
    #[arg(long, default_value = "data/raw")]
    out: PathBuf,

    /// Request the full history and filter locally.
    #[arg(long, default_value_t = false)]
    force_max: bool,

    /// Minimum seconds between requests (0 disables).
    #[arg(long, default_value_t = 0.0)]
    throttle: f64,

    /// Raw file format: csv or parquet.
    #[arg(long, default_value = "csv")]
    format: FileFormat,

    /// Parquet compression: none, snappy, zstd, gzip or brotli.
    #[arg(long, default_value = "none")]
    compression: Compression,

    /// File with one ticker per line; blank lines and `#` comments are ignored.
    #[arg(long)]
    symbols_file: Option<PathBuf>,

    /// Write a JSON run summary to PATH, or to stdout with `-`.
    #[arg(long, value_name = "PATH|-")]
    json_summary: Option<String>,

    /// Use brapi.dev only, without the Yahoo fallback.
    #[arg(long, default_value_t = false)]
    no_fallback: bool,
}

#[derive(Debug, Args)]
struct ProcessArgs {
    /// Tickers to process.
    #[arg(short, long, num_args = 1.., required = true)]
    symbol: Vec<String>,

    /// Base directory of the raw store.
    #[arg(long, default_value = "data/raw")]
    raw: PathBuf,

    /// Directory of processed datasets.
    #[arg(long, default_value = "data/processed")]
    out: PathBuf,

    /// Only use raw rows on or after this day.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Only use raw rows on or before this day.
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Processed file format: csv or parquet.
    #[arg(long, default_value = "parquet")]
    format: FileFormat,

    /// Parquet compression.
    #[arg(long, default_value = "snappy")]
    compression: Compression,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let code = match cli.command {
        Commands::Fetch(args) => run_fetch(args).await?,
        Commands::Process(args) => run_process(args).await?,
    };
    Ok(ExitCode::from(code))
}

/// Reads tickers from a text file, one per line.
fn read_symbols_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read symbols file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Tickers from `--symbol` plus `--symbols-file`. An unreadable file is
/// reported and skipped.
fn collect_symbols(args: &FetchArgs) -> Vec<Symbol> {
    let mut raw: Vec<String> = args.symbol.clone();
    if let Some(path) = &args.symbols_file {
        match read_symbols_file(path) {
            Ok(lines) => raw.extend(lines),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping symbols file");
                eprintln!("Warning: could not read --symbols-file ({e:#})");
            }
        }
    }
    raw.into_iter()
        .map(Symbol::new)
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_provider(no_fallback: bool) -> Result<Arc<dyn DailyPriceProvider>> {
    let primary = Arc::new(BrapiProvider::new()?);
    if no_fallback {
        return Ok(primary);
    }
    let secondary = Arc::new(YahooProvider::new()?);
    Ok(Arc::new(CompositeProvider::new(primary, secondary)))
}

async fn run_fetch(args: FetchArgs) -> Result<u8> {
    if args.end < args.start {
        eprintln!("Error: --end must be >= --start");
        return Ok(2);
    }
    let symbols = collect_symbols(&args);
    if symbols.is_empty() {
        eprintln!("Error: no symbols given (use --symbol or --symbols-file)");
        return Ok(2);
    }
    let throttle = if args.throttle > 0.0 {
        Some(Arc::new(Throttler::new(args.throttle)?))
    } else if args.throttle < 0.0 {
        eprintln!("Error: --throttle must be >= 0");
        return Ok(2);
    } else {
        None
    };

    let store = StoreOptions::new(args.format, args.compression);
    let repository = Arc::new(FileRepository::new(&args.out, "data/processed").with_raw_options(store));
    let pipeline = FetchPipeline::new(build_provider(args.no_fallback)?, repository);

    let mut job = FetchJob::new(symbols, args.start, args.end).prefer_max(args.force_max);
    if let Some(throttle) = throttle {
        job = job.with_throttle(throttle);
    }
    debug!(?job, "Starting fetch run");

    let mut summary = pipeline.run(&job).await;
    summary.run.args.record_store(&store);

    print_summary(&summary);
    if let Some(target) = &args.json_summary {
        if let Err(e) = emit_json(target, &summary) {
            warn!(error = %e, "Failed to write JSON summary");
            eprintln!("Warning: failed to write JSON summary ({e:#})");
        }
    }

    Ok(u8::try_from(summary.exit_code()).unwrap_or(1))
}

fn print_summary(summary: &RunSummary) {
    let args = &summary.run.args;
    for outcome in &summary.symbols {
        match outcome.status {
            SymbolStatus::Ok => {
                let first = outcome.date_first.map(|d| d.to_string()).unwrap_or_default();
                let last = outcome.date_last.map(|d| d.to_string()).unwrap_or_default();
                println!(
                    "[{}] OK: {} rows ({first}..{last}); saved to {} file(s).",
                    outcome.symbol,
                    outcome.rows,
                    outcome.files.len()
                );
                for path in &outcome.files {
                    println!(" - {}", path.display());
                }
            }
            SymbolStatus::NoData => println!(
                "[{}] No rows in [{}..{}]. Nothing to save.",
                outcome.symbol, args.start, args.end
            ),
            SymbolStatus::Failed => println!(
                "[{}] Fetch error: {}",
                outcome.symbol,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    println!(
        "Summary: {}/{} symbols succeeded.",
        summary.counts.ok, summary.counts.total
    );
    let mut failures = summary.failures().peekable();
    if failures.peek().is_some() {
        println!("Failures:");
        for outcome in failures {
            let reason = match outcome.status {
                SymbolStatus::NoData => "no data in window",
                _ => outcome.error.as_deref().unwrap_or("unknown error"),
            };
            println!(" - {}: {reason}", outcome.symbol);
        }
    }
}

/// Writes `value` as JSON to stdout (`-`) or to a file, creating parent
/// directories.
fn emit_json<T: Serialize>(target: &str, value: &T) -> Result<()> {
    if target == "-" {
        println!("{}", serde_json::to_string(value)?);
        return Ok(());
    }
    let path = Path::new(target);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

async fn run_process(args: ProcessArgs) -> Result<u8> {
    if let (Some(start), Some(end)) = (args.start, args.end) {
        if end < start {
            eprintln!("Error: --end must be >= --start");
            return Ok(2);
        }
    }

    let repository = FileRepository::new(&args.raw, &args.out)
        .with_processed_options(StoreOptions::new(args.format, args.compression));

    let symbols: Vec<Symbol> = args
        .symbol
        .iter()
        .map(Symbol::new)
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        eprintln!("Error: no symbols given");
        return Ok(2);
    }

    let mut succeeded = 0usize;
    let mut failures: Vec<(Symbol, String)> = Vec::new();
    for symbol in &symbols {
        match process_symbol(&repository, symbol, args.start, args.end).await {
            Ok(ProcessOutcome::Written { path, rows }) => {
                succeeded += 1;
                println!("[{symbol}] {rows} raw rows -> {}", path.display());
            }
            Ok(ProcessOutcome::NoRawData) => {
                println!("[{symbol}] No raw data found in window.");
                failures.push((symbol.clone(), "no raw data in window".to_string()));
            }
            Err(e) => {
                eprintln!("[{symbol}] Processing error: {e}");
                failures.push((symbol.clone(), e.to_string()));
            }
        }
    }

    println!(
        "Processing summary: {succeeded}/{} symbols succeeded.",
        symbols.len()
    );
    if !failures.is_empty() {
        println!("Failures:");
        for (symbol, reason) in &failures {
            println!(" - {symbol}: {reason}");
        }
    }

    Ok(if succeeded > 0 { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fetch_args_defaults() {
        let cli = Cli::try_parse_from([
            "b3", "fetch", "--symbol", "PETR4", "VALE3", "--start", "2024-01-01", "--end",
            "2024-01-31",
        ])
        .unwrap();

        let Commands::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.symbol, vec!["PETR4", "VALE3"]);
        assert_eq!(args.out, PathBuf::from("data/raw"));
        assert_eq!(args.format, FileFormat::Csv);
        assert_eq!(args.compression, Compression::None);
        assert!(!args.force_max);
        assert!(!args.no_fallback);
        assert_eq!(args.throttle, 0.0);
    }

    #[test]
    fn test_fetch_rejects_bad_date() {
        let parsed = Cli::try_parse_from([
            "b3", "fetch", "--symbol", "PETR4", "--start", "01/01/2024", "--end", "2024-01-31",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_process_args() {
        let cli = Cli::try_parse_from([
            "b3", "-v", "process", "-s", "PETR4", "--format", "csv", "--start", "2024-01-01",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(!cli.log_json);
        let Commands::Process(args) = cli.command else {
            panic!("expected process");
        };
        assert_eq!(args.format, FileFormat::Csv);
        assert_eq!(args.compression, Compression::Snappy);
        assert_eq!(args.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(args.out, PathBuf::from("data/processed"));
    }

    #[test]
    fn test_log_json_is_global() {
        let cli = Cli::try_parse_from([
            "b3", "fetch", "--log-json", "--symbol", "PETR4", "--start", "2024-01-01", "--end",
            "2024-01-31",
        ])
        .unwrap();
        assert!(cli.log_json);

        let cli = Cli::try_parse_from(["b3", "--log-json", "process", "-s", "PETR4"]).unwrap();
        assert!(cli.log_json);
    }

    #[test]
    fn test_symbols_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickers.txt");
        fs::write(&path, "PETR4\n\n# banks\n itub4 \n#VALE3\nBBDC4\n").unwrap();

        assert_eq!(read_symbols_file(&path).unwrap(), vec!["PETR4", "itub4", "BBDC4"]);
    }

    fn fetch_args(extra: &[&str]) -> FetchArgs {
        let mut argv = vec!["b3", "fetch", "--start", "2024-01-10", "--end", "2024-01-31"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Fetch(args) => args,
            Commands::Process(_) => panic!("expected fetch"),
        }
    }

    #[tokio::test]
    async fn test_fetch_exit_codes_before_network() {
        assert_eq!(run_fetch(fetch_args(&[])).await.unwrap(), 2);
        assert_eq!(run_fetch(fetch_args(&["--symbol", "  "])).await.unwrap(), 2);
        assert_eq!(
            run_fetch(fetch_args(&["--symbols-file", "/nonexistent/tickers.txt"]))
                .await
                .unwrap(),
            2
        );

        let mut inverted = fetch_args(&["--symbols-file", "/nonexistent/tickers.txt"]);
        inverted.end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(run_fetch(inverted).await.unwrap(), 2);
    }

    #[test]
    fn test_unreadable_symbols_file_keeps_cli_symbols() {
        let args = fetch_args(&[
            "--symbol",
            "petr4",
            "--symbols-file",
            "/nonexistent/tickers.txt",
        ]);
        assert_eq!(collect_symbols(&args), vec![Symbol::new("PETR4")]);
    }

    #[test]
    fn test_emit_json_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/nested/run.json");
        let value = serde_json::json!({"summary": {"ok": 1}});

        emit_json(path.to_str().unwrap(), &value).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, value);
    }

    fn process_args(raw: &Path, out: &Path, symbols: &[&str]) -> ProcessArgs {
        let mut argv = vec![
            "b3",
            "process",
            "--raw",
            raw.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--symbol",
        ];
        argv.extend_from_slice(symbols);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Process(args) => args,
            Commands::Fetch(_) => panic!("expected process"),
        }
    }

    #[tokio::test]
    async fn test_process_from_empty_raw_store() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("processed");

        assert_eq!(run_process(process_args(&raw, &out, &["PETR4"])).await.unwrap(), 1);
        assert!(!out.join("PETR4.parquet").exists());
    }

    #[tokio::test]
    async fn test_process_exit_codes() {
        use b3::{OhlcvBar, bars_to_frame, save_raw};
        use chrono::{TimeZone, Utc};

        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("processed");
        let symbol = Symbol::new("PETR4");
        let bars = vec![OhlcvBar::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 13, 0, 0).unwrap(),
            symbol.clone(),
            30.0,
            31.0,
            29.0,
            30.5,
            1_000,
        )];
        save_raw(&symbol, &bars_to_frame(&bars).unwrap(), &raw, &StoreOptions::csv()).unwrap();

        assert_eq!(run_process(process_args(&raw, &out, &["  "])).await.unwrap(), 2);
        assert_eq!(
            run_process(process_args(&raw, &out, &["PETR4", "VALE3"])).await.unwrap(),
            0
        );
        assert!(out.join("PETR4.parquet").exists());
        assert!(!out.join("VALE3.parquet").exists());
    }
}
