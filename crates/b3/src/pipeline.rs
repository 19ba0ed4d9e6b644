//! Multi-symbol fetch runs and raw-to-processed promotion.
//!
//! A [`FetchPipeline`] walks a [`FetchJob`] one symbol at a time: fetch,
//! save the non-empty result to the raw store, and record a
//! [`SymbolOutcome`]. Failures are recorded and never abort the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use b3_core::{
    DailyPriceProvider, FetchMeta, FetchRequest, HttpMeta, OhlcvRepository, RangeToken, Result,
    Symbol, Throttle, Throttler, bars_from_frame,
};
use b3_store::{Compression, FileFormat, StoreOptions};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Symbols and window of one fetch run.
#[derive(Clone, Debug)]
pub struct FetchJob {
    /// Tickers to fetch, in order. Blank entries are skipped.
    pub symbols: Vec<Symbol>,
    /// First day of the window (inclusive).
    pub start: NaiveDate,
    /// Last day of the window (inclusive).
    pub end: NaiveDate,
    /// Ask providers for the full history instead of a sized window.
    pub prefer_max: bool,
    /// Pacing shared by every request of the run.
    pub throttle: Option<Arc<Throttler>>,
}

impl FetchJob {
    /// Job without throttling or `prefer_max`.
    pub fn new<I, S>(symbols: I, start: NaiveDate, end: NaiveDate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            start,
            end,
            prefer_max: false,
            throttle: None,
        }
    }

    /// Request the full history from providers.
    #[must_use]
    pub fn prefer_max(mut self, prefer_max: bool) -> Self {
        self.prefer_max = prefer_max;
        self
    }

    /// Pace all requests of the run through `throttle`.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<Throttler>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    fn request(&self, symbol: &Symbol) -> FetchRequest {
        let request =
            FetchRequest::new(symbol.clone(), self.start, self.end).prefer_max(self.prefer_max);
        match &self.throttle {
            Some(throttle) => request.with_throttle(Arc::clone(throttle) as Arc<dyn Throttle>),
            None => request,
        }
    }
}

/// Result class of one symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    /// Rows were fetched and saved.
    Ok,
    /// The provider answered with no rows in the window.
    NoData,
    /// Fetching or saving failed.
    Failed,
}

/// What happened to one symbol during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    /// Ticker.
    pub symbol: Symbol,
    /// Result class.
    pub status: SymbolStatus,
    /// Error message when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rows saved.
    pub rows: usize,
    /// Day of the first saved row.
    pub date_first: Option<NaiveDate>,
    /// Day of the last saved row.
    pub date_last: Option<NaiveDate>,
    /// Raw partitions written.
    pub files: Vec<PathBuf>,
    /// Range token the primary provider used.
    pub range_used: Option<RangeToken>,
    /// Provider that served the rows.
    pub provider: Option<String>,
    /// Wall time spent on the symbol, in seconds.
    pub duration_s: f64,
    /// HTTP counters.
    pub http: HttpMeta,
}

impl SymbolOutcome {
    fn new(symbol: Symbol, status: SymbolStatus, meta: FetchMeta, started: Instant) -> Self {
        Self {
            symbol,
            status,
            error: None,
            rows: 0,
            date_first: None,
            date_last: None,
            files: Vec::new(),
            range_used: meta.range_used,
            provider: meta.provider,
            duration_s: round_ms(started.elapsed().as_secs_f64()),
            http: meta.http,
        }
    }
}

/// Arguments echoed in a run summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunArgs {
    /// First day of the window.
    pub start: NaiveDate,
    /// Last day of the window.
    pub end: NaiveDate,
    /// Whether the full history was requested.
    pub force_max: bool,
    /// Minimum seconds between requests, when throttled.
    pub throttle: Option<f64>,
    /// Requested tickers.
    pub symbols: Vec<Symbol>,
    /// Raw file format, filled in by callers that know it.
    pub format: Option<FileFormat>,
    /// Parquet compression; `None` when uncompressed or unknown.
    pub compression: Option<Compression>,
}

impl RunArgs {
    /// Records the raw store settings the run wrote with.
    pub fn record_store(&mut self, options: &StoreOptions) {
        self.format = Some(options.format);
        self.compression = match (options.format, options.compression) {
            (FileFormat::Parquet, Compression::None) | (FileFormat::Csv, _) => None,
            (FileFormat::Parquet, codec) => Some(codec),
        };
    }
}

/// Run-level metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub ended_at: DateTime<Utc>,
    /// Run wall time in seconds.
    pub duration_s: f64,
    /// Name of the configured provider.
    pub provider: String,
    /// Run arguments.
    pub args: RunArgs,
}

/// Per-status symbol counts.
///
/// `failed` counts every symbol that did not end `ok`, so it includes
/// `no_data`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Symbols saved.
    pub ok: usize,
    /// Symbols without rows.
    pub no_data: usize,
    /// Symbols not saved.
    pub failed: usize,
    /// Symbols requested.
    pub total: usize,
}

/// Outcome of a [`FetchPipeline::run`], serializable to JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run-level metadata.
    pub run: RunInfo,
    /// One entry per processed symbol, in job order.
    pub symbols: Vec<SymbolOutcome>,
    /// Status counts.
    #[serde(rename = "summary")]
    pub counts: RunCounts,
}

impl RunSummary {
    /// Process exit code: 0 when at least one symbol was saved, else 1.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.counts.ok > 0 { 0 } else { 1 }
    }

    /// Outcomes that did not end `ok`.
    pub fn failures(&self) -> impl Iterator<Item = &SymbolOutcome> {
        self.symbols.iter().filter(|s| s.status != SymbolStatus::Ok)
    }
}

fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Sequential fetch-and-save over many symbols.
#[derive(Debug, Clone)]
pub struct FetchPipeline {
    provider: Arc<dyn DailyPriceProvider>,
    repository: Arc<dyn OhlcvRepository>,
}

impl FetchPipeline {
    /// Pipeline reading from `provider` and saving to `repository`.
    pub fn new(
        provider: Arc<dyn DailyPriceProvider>,
        repository: Arc<dyn OhlcvRepository>,
    ) -> Self {
        Self {
            provider,
            repository,
        }
    }

    /// Fetches and saves every symbol of `job`.
    #[instrument(skip(self, job), fields(provider = self.provider.name(), symbols = job.symbols.len()))]
    pub async fn run(&self, job: &FetchJob) -> RunSummary {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut outcomes = Vec::with_capacity(job.symbols.len());
        for symbol in &job.symbols {
            if symbol.is_empty() {
                continue;
            }
            outcomes.push(self.fetch_symbol(job, symbol).await);
        }

        let mut counts = RunCounts {
            total: job.symbols.len(),
            ..RunCounts::default()
        };
        for outcome in &outcomes {
            match outcome.status {
                SymbolStatus::Ok => counts.ok += 1,
                SymbolStatus::NoData => {
                    counts.no_data += 1;
                    counts.failed += 1;
                }
                SymbolStatus::Failed => counts.failed += 1,
            }
        }
        info!(
            ok = counts.ok,
            no_data = counts.no_data,
            failed = counts.failed,
            total = counts.total,
            "Fetch run finished"
        );

        RunSummary {
            run: RunInfo {
                started_at,
                ended_at: Utc::now(),
                duration_s: round_ms(clock.elapsed().as_secs_f64()),
                provider: self.provider.name().to_string(),
                args: RunArgs {
                    start: job.start,
                    end: job.end,
                    force_max: job.prefer_max,
                    throttle: job
                        .throttle
                        .as_ref()
                        .map(|t| t.min_interval().as_secs_f64()),
                    symbols: job.symbols.clone(),
                    format: None,
                    compression: None,
                },
            },
            symbols: outcomes,
            counts,
        }
    }

    async fn fetch_symbol(&self, job: &FetchJob, symbol: &Symbol) -> SymbolOutcome {
        let started = Instant::now();
        let mut meta = FetchMeta::default();

        let frame = match self.provider.fetch_daily(&job.request(symbol), &mut meta).await {
            Ok(frame) => frame,
            Err(e) => {
                error!(%symbol, error = %e, "Fetch failed");
                let mut outcome = SymbolOutcome::new(symbol.clone(), SymbolStatus::Failed, meta, started);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        if frame.height() == 0 {
            warn!(%symbol, start = %job.start, end = %job.end, "No rows in window; nothing to save");
            return SymbolOutcome::new(symbol.clone(), SymbolStatus::NoData, meta, started);
        }

        let saved = self.repository.save_raw(symbol, &frame).await;
        let mut outcome = SymbolOutcome::new(symbol.clone(), SymbolStatus::Ok, meta, started);
        match saved {
            Ok(files) => {
                if let Ok((bars, _)) = bars_from_frame(&frame) {
                    outcome.date_first = bars.iter().map(|b| b.date.date_naive()).min();
                    outcome.date_last = bars.iter().map(|b| b.date.date_naive()).max();
                }
                outcome.rows = frame.height();
                info!(%symbol, rows = outcome.rows, files = files.len(), "Saved raw data");
                outcome.files = files;
            }
            Err(e) => {
                error!(%symbol, error = %e, "Save failed");
                outcome.status = SymbolStatus::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome.duration_s = round_ms(started.elapsed().as_secs_f64());
        outcome
    }
}

/// Result of [`process_symbol`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The processed dataset was written.
    Written {
        /// Processed dataset path.
        path: PathBuf,
        /// Raw rows loaded.
        rows: usize,
    },
    /// No raw rows exist for the window; nothing was written.
    NoRawData,
}

/// Promotes the raw partitions of `symbol` to its processed dataset.
///
/// When no raw rows fall inside the window nothing is written.
///
/// # Errors
/// Propagates repository errors.
#[instrument(skip(repository), fields(symbol = %symbol))]
pub async fn process_symbol(
    repository: &dyn OhlcvRepository,
    symbol: &Symbol,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<ProcessOutcome> {
    let raw = repository.load_raw(symbol, start, end).await?;
    let rows = raw.height();
    if rows == 0 {
        warn!("No raw data in window");
        return Ok(ProcessOutcome::NoRawData);
    }
    let path = repository.save_processed(symbol, &raw).await?;
    info!(rows, path = %path.display(), "Processed dataset written");
    Ok(ProcessOutcome::Written { path, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use b3_core::{DataError, DataProvider, ManualClock, OhlcvBar, bars_to_frame};
    use b3_store::FileRepository;
    use chrono::TimeZone;
    use polars::prelude::DataFrame;
    use std::time::Duration;

    #[derive(Debug)]
    struct ScriptedProvider;

    impl DataProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn description(&self) -> &str {
            "rows for PETR4, nothing for EMPTY3, errors otherwise"
        }
    }

    #[async_trait]
    impl DailyPriceProvider for ScriptedProvider {
        async fn fetch_daily(
            &self,
            request: &FetchRequest,
            meta: &mut FetchMeta,
        ) -> Result<DataFrame> {
            if let Some(throttle) = request.throttle_hook() {
                throttle.wait().await;
                meta.http.throttle_calls += 1;
            }
            meta.http.attempts += 1;
            meta.range_used = Some(RangeToken::OneMonth);
            match request.symbol.as_str() {
                "PETR4" => {
                    let bars: Vec<OhlcvBar> = [(2023, 12, 29), (2024, 1, 2), (2024, 1, 3)]
                        .into_iter()
                        .map(|(y, m, d)| {
                            OhlcvBar::new(
                                Utc.with_ymd_and_hms(y, m, d, 13, 0, 0).unwrap(),
                                request.symbol.clone(),
                                30.0,
                                31.0,
                                29.0,
                                30.5,
                                1_000,
                            )
                        })
                        .collect();
                    meta.provider = Some("scripted".to_string());
                    bars_to_frame(&bars)
                }
                "EMPTY3" => Ok(b3_core::empty_frame()),
                other => Err(DataError::Http {
                    status: 404,
                    url: format!("http://stub/{other}"),
                }),
            }
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn pipeline(dir: &std::path::Path) -> (FetchPipeline, Arc<FileRepository>) {
        let repository = Arc::new(FileRepository::new(dir.join("raw"), dir.join("processed")));
        let pipeline = FetchPipeline::new(Arc::new(ScriptedProvider), repository.clone());
        (pipeline, repository)
    }

    #[tokio::test]
    async fn test_run_records_every_status() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let job = FetchJob::new(["petr4", "EMPTY3", "BAD11"], day(2023, 12, 1), day(2024, 1, 5));

        let summary = pipeline.run(&job).await;

        assert_eq!(
            summary.counts,
            RunCounts {
                ok: 1,
                no_data: 1,
                failed: 2,
                total: 3
            }
        );
        assert_eq!(summary.exit_code(), 0);

        let ok = &summary.symbols[0];
        assert_eq!(ok.status, SymbolStatus::Ok);
        assert_eq!(ok.rows, 3);
        assert_eq!(ok.files.len(), 2);
        assert_eq!(ok.date_first, Some(day(2023, 12, 29)));
        assert_eq!(ok.date_last, Some(day(2024, 1, 3)));
        assert_eq!(ok.provider.as_deref(), Some("scripted"));
        assert_eq!(ok.range_used, Some(RangeToken::OneMonth));

        assert_eq!(summary.symbols[1].status, SymbolStatus::NoData);
        assert!(summary.symbols[1].files.is_empty());

        let failed = &summary.symbols[2];
        assert_eq!(failed.status, SymbolStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("404"));
        assert_eq!(summary.failures().count(), 2);
    }

    #[tokio::test]
    async fn test_run_without_success_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let job = FetchJob::new(["EMPTY3", "  "], day(2024, 1, 1), day(2024, 1, 5));

        let summary = pipeline.run(&job).await;

        assert_eq!(summary.symbols.len(), 1);
        assert_eq!(summary.counts.total, 2);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_throttle_is_shared_across_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let clock = Arc::new(ManualClock::new());
        let throttle = Arc::new(Throttler::from_duration(Duration::from_millis(500), clock.clone()));
        let job = FetchJob::new(["PETR4", "EMPTY3"], day(2024, 1, 1), day(2024, 1, 5))
            .with_throttle(throttle);

        let summary = pipeline.run(&job).await;

        assert_eq!(summary.run.args.throttle, Some(0.5));
        assert_eq!(summary.symbols[0].http.throttle_calls, 1);
        assert_eq!(summary.symbols[1].http.throttle_calls, 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[tokio::test]
    async fn test_summary_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path());
        let job =
            FetchJob::new(["PETR4", "BAD11"], day(2024, 1, 1), day(2024, 1, 5)).prefer_max(true);

        let mut summary = pipeline.run(&job).await;
        summary.run.args.record_store(&StoreOptions::parquet());
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["summary"]["ok"], 1);
        assert_eq!(value["run"]["provider"], "scripted");
        assert_eq!(value["run"]["args"]["force_max"], true);
        assert_eq!(value["run"]["args"]["format"], "parquet");
        assert_eq!(value["run"]["args"]["compression"], "snappy");
        assert!(value["run"]["args"].get("store").is_none());
        assert_eq!(value["symbols"][0]["status"], "ok");
        assert_eq!(value["symbols"][0]["range_used"], "1mo");
        assert_eq!(value["symbols"][0]["date_first"], "2023-12-29");
        assert!(value["symbols"][0].get("error").is_none());

        let failed = &value["symbols"][1];
        assert_eq!(failed["status"], "failed");
        assert!(failed["date_first"].is_null());
        assert!(failed["date_last"].is_null());
        assert!(failed["error"].as_str().unwrap().contains("404"));
    }

    #[test]
    fn test_record_store_flattens_format_and_compression() {
        let mut args = RunArgs {
            start: day(2024, 1, 1),
            end: day(2024, 1, 5),
            force_max: false,
            throttle: None,
            symbols: vec![Symbol::new("PETR4")],
            format: None,
            compression: None,
        };

        args.record_store(&StoreOptions::new(FileFormat::Parquet, Compression::Zstd));
        assert_eq!(
            (args.format, args.compression),
            (Some(FileFormat::Parquet), Some(Compression::Zstd))
        );

        args.record_store(&StoreOptions::new(FileFormat::Parquet, Compression::None));
        assert_eq!(args.compression, None);

        args.record_store(&StoreOptions::new(FileFormat::Csv, Compression::Snappy));
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["format"], "csv");
        assert!(value["compression"].is_null());
    }

    #[tokio::test]
    async fn test_process_symbol_promotes_raw_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, repository) = pipeline(dir.path());
        pipeline
            .run(&FetchJob::new(["PETR4"], day(2023, 12, 1), day(2024, 1, 5)))
            .await;

        let symbol = Symbol::new("PETR4");
        let outcome = process_symbol(repository.as_ref(), &symbol, Some(day(2024, 1, 1)), None)
            .await
            .unwrap();

        let path = dir.path().join("processed").join("PETR4.parquet");
        assert_eq!(
            outcome,
            ProcessOutcome::Written {
                path: path.clone(),
                rows: 2
            }
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_process_symbol_without_raw_rows_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, repository) = pipeline(dir.path());
        pipeline
            .run(&FetchJob::new(["PETR4"], day(2023, 12, 1), day(2024, 1, 5)))
            .await;

        let missing = Symbol::new("VALE3");
        let outcome = process_symbol(repository.as_ref(), &missing, None, None).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::NoRawData);
        assert!(!dir.path().join("processed").join("VALE3.parquet").exists());

        let petr4 = Symbol::new("PETR4");
        let outside = process_symbol(repository.as_ref(), &petr4, Some(day(2025, 1, 1)), None)
            .await
            .unwrap();
        assert_eq!(outside, ProcessOutcome::NoRawData);
        assert!(!dir.path().join("processed").join("PETR4.parquet").exists());
    }
}
