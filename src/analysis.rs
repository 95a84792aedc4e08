//! Analysis pipeline: cached or fetched prices, pattern detection, scoring and
//! per-symbol summaries, run concurrently over a watchlist.

use chrono::{Duration, NaiveDate, Utc};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, RetryConfig};
use crate::error::{AppError, AppResult, Detail, SymbolTag};
use crate::history::PatternAnalyzer;
use crate::models::{AnalysisSummary, PriceBar, SymbolRecord};
use crate::storage_utils::PriceStore;
use crate::watchlist;
use crate::yahoo::PriceProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub period_days: u32,
    pub parallel_workers: usize,
    pub retry: RetryConfig,
    pub freshness_days: i64,
    pub history_lookback: usize,
    pub patterns: Option<Vec<String>>,
}

impl AnalyzerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            period_days: config.fetch.period_days,
            parallel_workers: config.fetch.parallel_max.max(1),
            retry: config.fetch.retry.clone(),
            freshness_days: config.fetch.freshness_days,
            history_lookback: config.analysis.history_lookback,
            patterns: config.analysis.patterns.clone(),
        }
    }
}

/// Progress notifications for a running batch.
#[derive(Debug)]
pub enum AnalysisEvent {
    Started {
        total: usize,
    },
    Symbol {
        symbol: String,
        completed: usize,
        total: usize,
        summary: Option<Box<AnalysisSummary>>,
        errors: Vec<String>,
    },
    Finished {
        summaries: usize,
        errors: usize,
        cancelled: bool,
    },
}

/// Result for one symbol. `warnings` are non-fatal, e.g. a cache fallback.
#[derive(Debug)]
pub struct SymbolOutcome {
    pub summary: Option<AnalysisSummary>,
    pub warnings: Vec<AppError>,
}

/// Result for a batch.
#[derive(Debug, Default)]
pub struct AnalysisRun {
    pub summaries: Vec<AnalysisSummary>,
    pub errors: Vec<AppError>,
    pub cancelled: bool,
}

impl AnalysisRun {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Summary for a symbol as typed by a user, e.g. `7203` for `7203.T`.
    pub fn summary_for(&self, symbol: &str) -> Option<&AnalysisSummary> {
        let wanted = watchlist::normalize_symbol(symbol);
        self.summaries.iter().find(|s| s.symbol == wanted)
    }
}

pub struct AnalyzerService {
    provider: Arc<dyn PriceProvider>,
    store: Arc<dyn PriceStore>,
    analyzer: Arc<PatternAnalyzer>,
    settings: AnalyzerSettings,
}

impl AnalyzerService {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        store: Arc<dyn PriceStore>,
        analyzer: Arc<PatternAnalyzer>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            provider,
            store,
            analyzer,
            settings,
        }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn PriceStore> {
        &self.store
    }

    pub fn analyzer(&self) -> &PatternAnalyzer {
        &self.analyzer
    }

    /// Loads a watchlist and fills names, sectors and markets in.
    ///
    /// Cached metadata wins over the CSV. Symbols missing from the cache, or
    /// cached without a name, are looked up with the provider (at most
    /// `parallel_workers` at once) and cached once a name is known.
    pub async fn load_watchlist(&self, path: &Path) -> AppResult<Vec<SymbolRecord>> {
        let records = watchlist::load_symbols(path).await?;
        let merged = futures::stream::iter(records.into_iter().map(|r| self.merge_metadata(r)))
            .buffered(self.settings.parallel_workers.max(1))
            .collect::<Vec<_>>()
            .await;
        Ok(merged)
    }

    async fn merge_metadata(&self, record: SymbolRecord) -> SymbolRecord {
        let record = match self.store.get_metadata(&record.symbol).await {
            Ok(Some(cached)) => {
                let named = !cached.name.trim().is_empty();
                let merged = SymbolRecord {
                    name: pick(cached.name, record.name),
                    sector: pick(cached.sector, record.sector),
                    market: cached.market.or(record.market),
                    symbol: record.symbol,
                };
                if named {
                    return with_market(merged);
                }
                merged
            }
            Ok(None) => record,
            Err(err) => {
                warn!(symbol = %record.symbol, error = %err, "metadata lookup failed");
                return with_market(record);
            }
        };

        let record = match self.provider.fetch_metadata(&record.symbol).await {
            Ok(Some(found)) => SymbolRecord {
                name: pick(found.name.unwrap_or_default(), record.name),
                sector: pick(found.sector.unwrap_or_default(), record.sector),
                market: found.market.or(record.market),
                symbol: record.symbol,
            },
            Ok(None) => record,
            Err(err) => {
                warn!(symbol = %record.symbol, error = %err, "provider metadata lookup failed");
                record
            }
        };
        let record = with_market(record);

        // Nameless records stay uncached so the next load asks again.
        if !record.name.trim().is_empty() {
            if let Err(err) = self.store.upsert_metadata(&record).await {
                warn!(symbol = %record.symbol, error = %err, "could not persist metadata");
            }
        }
        record
    }

    /// Cached bars when fresh; otherwise fetch, sanitise, merge into the cache
    /// and return the merged series.
    ///
    /// A failed fetch falls back to a non-empty cache unless `force_refresh`
    /// is set; the failure is returned alongside as a warning.
    pub async fn ensure_prices(
        &self,
        symbol: &str,
        force_refresh: bool,
    ) -> AppResult<(Vec<PriceBar>, Option<AppError>)> {
        let cached = self.store.get_range(symbol).await?;
        let today = Utc::now().date_naive();
        if !force_refresh && is_fresh(&cached, today, self.settings.freshness_days) {
            debug!(symbol, bars = cached.len(), "using fresh cache");
            return Ok((cached, None));
        }

        match self.fetch_with_retry(symbol).await {
            Ok(fetched) => {
                let fetched = sanitize_ohlc(fetched);
                self.store.upsert_prices(symbol, &fetched).await?;
                let merged = self.store.get_range(symbol).await?;
                Ok((if merged.is_empty() { cached } else { merged }, None))
            }
            Err(err) if !cached.is_empty() && !force_refresh => {
                let err = err.with_symbol(symbol);
                warn!(symbol, error = %err, "using cached prices after fetch failure");
                Ok((cached, Some(err)))
            }
            Err(err) => Err(err.with_symbol(symbol)),
        }
    }

    async fn fetch_with_retry(&self, symbol: &str) -> AppResult<Vec<PriceBar>> {
        let retry = &self.settings.retry;
        let mut delay_ms = retry.initial_delay_ms as f64;
        let mut attempt = 0u32;
        loop {
            match self.provider.fetch_daily(symbol, self.settings.period_days).await {
                Ok(bars) if !bars.is_empty() => return Ok(bars),
                Ok(_) => return Err(AppError::price_fetch(None)),
                Err(err) => {
                    attempt += 1;
                    if attempt > retry.max_attempts {
                        return Err(err);
                    }
                    warn!(symbol, attempt, error = %err, "price fetch failed, retrying");
                    tokio::time::sleep(StdDuration::from_millis(delay_ms as u64)).await;
                    delay_ms *= retry.backoff;
                }
            }
        }
    }

    /// Prices, detection and scoring for one symbol. `summary` is `None` when
    /// no price data exists at all.
    pub async fn analyze_symbol(
        &self,
        record: &SymbolRecord,
        force_refresh: bool,
    ) -> AppResult<SymbolOutcome> {
        let (bars, warning) = self.ensure_prices(&record.symbol, force_refresh).await?;
        let warnings: Vec<AppError> = warning.into_iter().collect();
        if bars.is_empty() {
            return Ok(SymbolOutcome {
                summary: None,
                warnings,
            });
        }

        let analyzer = self.analyzer.clone();
        let lookback = self.settings.history_lookback;
        let patterns = self.settings.patterns.clone();
        let (bars, detection) = tokio::task::spawn_blocking(move || {
            let detection = analyzer.detect_with_history(&bars, lookback, patterns.as_deref());
            (bars, detection)
        })
        .await
        .map_err(|e| AppError::Detection {
            symbol: SymbolTag(Some(record.symbol.clone())),
            detail: Detail(Some(e.to_string())),
        })?;

        let last = bars.last();
        let engine = self.analyzer.engine();
        let hits = engine.enrich_hits(&detection.today, last.map(|b| b.date));
        let total_score = engine.total_score_from_hits(&detection.today);

        let summary = AnalysisSummary {
            symbol: record.symbol.clone(),
            name: record.name.clone(),
            sector: record.sector.clone(),
            market: record.market.clone(),
            hits,
            total_score,
            last_date: last.map(|b| b.date),
            close_price: last.map(|b| b.close),
            volume: last.and_then(|b| b.volume),
            history: detection.history,
        };
        debug!(
            symbol = %record.symbol,
            score = total_score,
            hits = summary.hits.len(),
            "analysed symbol"
        );
        Ok(SymbolOutcome {
            summary: Some(summary),
            warnings,
        })
    }

    /// Analyses every record with at most `parallel_workers` in flight.
    ///
    /// Per-symbol failures are collected with the symbol attached. Cancelling
    /// `cancel` stops scheduling new symbols and returns what has completed.
    pub async fn analyze_symbols(
        &self,
        records: Vec<SymbolRecord>,
        force_refresh: bool,
        progress: Option<mpsc::Sender<AnalysisEvent>>,
        cancel: CancellationToken,
    ) -> AnalysisRun {
        let total = records.len();
        let mut run = AnalysisRun::default();
        if total == 0 {
            return run;
        }
        info!(total, force_refresh, "starting analysis");
        notify(&progress, AnalysisEvent::Started { total }).await;

        let token = &cancel;
        let mut stream = futures::stream::iter(records.into_iter().map(|record| async move {
            if token.is_cancelled() {
                return (record, None);
            }
            let outcome = self.analyze_symbol(&record, force_refresh).await;
            (record, Some(outcome))
        }))
        .buffer_unordered(self.settings.parallel_workers.max(1));

        let mut completed = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = stream.next() => item,
            };
            let Some((record, outcome)) = next else {
                break;
            };
            let Some(outcome) = outcome else {
                continue;
            };

            completed += 1;
            let mut summary = None;
            match outcome {
                Ok(SymbolOutcome {
                    summary: found,
                    warnings,
                }) => {
                    for warning in warnings {
                        error!(code = warning.code(), "{warning}");
                        run.errors.push(warning);
                    }
                    summary = found;
                }
                Err(err) => {
                    let err = if err.symbol().is_some() {
                        err
                    } else {
                        err.with_symbol(&record.symbol)
                    };
                    error!(code = err.code(), "{err}");
                    run.errors.push(err);
                }
            }
            if let Some(found) = &summary {
                run.summaries.push(found.clone());
            }
            notify(
                &progress,
                AnalysisEvent::Symbol {
                    symbol: record.symbol,
                    completed,
                    total,
                    summary: summary.map(Box::new),
                    errors: run.error_messages(),
                },
            )
            .await;
        }

        run.cancelled = cancel.is_cancelled();
        info!(
            summaries = run.summaries.len(),
            errors = run.errors.len(),
            cancelled = run.cancelled,
            "analysis finished"
        );
        notify(
            &progress,
            AnalysisEvent::Finished {
                summaries: run.summaries.len(),
                errors: run.errors.len(),
                cancelled: run.cancelled,
            },
        )
        .await;
        run
    }
}

async fn notify(progress: &Option<mpsc::Sender<AnalysisEvent>>, event: AnalysisEvent) {
    if let Some(tx) = progress {
        // A closed receiver only means nobody is watching any more.
        let _ = tx.send(event).await;
    }
}

fn with_market(mut record: SymbolRecord) -> SymbolRecord {
    if record.market.is_none() {
        record.market = Some(watchlist::infer_market(&record.symbol).to_string());
    }
    record
}

fn pick(cached: String, fallback: String) -> String {
    if cached.trim().is_empty() { fallback } else { cached }
}

/// True when the last bar is within `days` of `today`.
pub fn is_fresh(bars: &[PriceBar], today: NaiveDate, days: i64) -> bool {
    bars.last()
        .is_some_and(|bar| bar.date >= today - Duration::days(days))
}

/// Replaces non-positive or non-finite OHLC values with the smallest positive
/// OHLC value in the series. A series with no positive value is unchanged.
pub fn sanitize_ohlc(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    let min_positive = bars
        .iter()
        .flat_map(|b| [b.open, b.high, b.low, b.close])
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !min_positive.is_finite() {
        return bars;
    }
    let fix = |v: &mut f64| {
        if !v.is_finite() || *v <= 0.0 {
            *v = min_positive;
        }
    };
    for bar in bars.iter_mut() {
        fix(&mut bar.open);
        fix(&mut bar.high);
        fix(&mut bar.low);
        fix(&mut bar.close);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias_table::BiasTable;
    use crate::detectors::{DetectorError, DetectorRegistry};
    use crate::models::SymbolMetadata;
    use crate::scoring::{ScoreRange, ScoringEngine};
    use crate::storage_utils::PricesRepo;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BIAS: &str = "\
function,variant,score,english,native,typical_setup,next_move
LASTUP,bullish,3,Last up,,,
";

    fn last_up(o: &[f64], _: &[f64], _: &[f64], _: &[f64]) -> Result<Vec<i32>, DetectorError> {
        let mut out = vec![0; o.len()];
        if let Some(last) = out.last_mut() {
            *last = 100;
        }
        Ok(out)
    }

    /// Serves canned bars per symbol; fails the first `fail_first` calls.
    struct FakeProvider {
        data: HashMap<String, Vec<PriceBar>>,
        fail_first: AtomicUsize,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        metadata: HashMap<String, SymbolMetadata>,
        metadata_calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new(data: HashMap<String, Vec<PriceBar>>, fail_first: usize) -> Self {
            Self {
                data,
                fail_first: AtomicUsize::new(fail_first),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                metadata: HashMap::new(),
                metadata_calls: Mutex::new(Vec::new()),
            }
        }

        fn with_metadata(mut self, symbol: &str, name: &str, market: &str) -> Self {
            self.metadata.insert(
                symbol.to_string(),
                SymbolMetadata {
                    name: Some(name.to_string()),
                    sector: None,
                    market: Some(market.to_string()),
                },
            );
            self
        }

        fn metadata_calls(&self) -> Vec<String> {
            let mut calls = self.metadata_calls.lock().unwrap().clone();
            calls.sort();
            calls
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceProvider for FakeProvider {
        async fn fetch_daily(&self, symbol: &str, _period_days: u32) -> AppResult<Vec<PriceBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(symbol.to_string());
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::price_fetch(Some("transient".into())));
            }
            self.data
                .get(symbol)
                .cloned()
                .ok_or_else(|| AppError::price_fetch(Some("unknown symbol".into())))
        }

        async fn fetch_metadata(&self, symbol: &str) -> AppResult<Option<SymbolMetadata>> {
            self.metadata_calls.lock().unwrap().push(symbol.to_string());
            Ok(self.metadata.get(symbol).cloned())
        }
    }

    fn bars_ending(end: NaiveDate, n: i64) -> Vec<PriceBar> {
        (0..n)
            .map(|i| PriceBar {
                date: end - Duration::days(n - 1 - i),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0 + i as f64,
                volume: Some(1_000.0),
            })
            .collect()
    }

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings {
            period_days: 30,
            parallel_workers: 2,
            retry: RetryConfig {
                max_attempts: 2,
                backoff: 1.0,
                initial_delay_ms: 1,
            },
            freshness_days: 2,
            history_lookback: 5,
            patterns: None,
        }
    }

    async fn service(
        provider: Arc<FakeProvider>,
        dir: &Path,
    ) -> (AnalyzerService, Arc<PricesRepo>) {
        let repo = Arc::new(PricesRepo::open(dir).await.unwrap());
        let table = BiasTable::from_reader(BIAS.as_bytes()).unwrap();
        let engine = ScoringEngine::new(Arc::new(table), ScoreRange::default());
        let mut registry = DetectorRegistry::empty();
        registry.register("LASTUP", last_up);
        let analyzer = Arc::new(PatternAnalyzer::new(registry, engine));
        let svc = AnalyzerService::new(provider, repo.clone(), analyzer, settings());
        (svc, repo)
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn record(symbol: &str) -> SymbolRecord {
        SymbolRecord {
            symbol: symbol.into(),
            name: format!("{symbol} Inc"),
            sector: "Tech".into(),
            market: Some("US".into()),
        }
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new(HashMap::new(), 0));
        let (svc, repo) = service(provider.clone(), dir.path()).await;
        repo.upsert_prices("AAA", &bars_ending(today(), 5)).await.unwrap();

        let (bars, warning) = svc.ensure_prices("AAA", false).await.unwrap();
        assert_eq!(bars.len(), 5);
        assert!(warning.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn stale_cache_is_refreshed_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let data = HashMap::from([("AAA".to_string(), bars_ending(today(), 3))]);
        let provider = Arc::new(FakeProvider::new(data, 0));
        let (svc, repo) = service(provider.clone(), dir.path()).await;
        repo.upsert_prices("AAA", &bars_ending(today() - Duration::days(10), 4))
            .await
            .unwrap();

        let (bars, warning) = svc.ensure_prices("AAA", false).await.unwrap();
        assert!(warning.is_none());
        assert_eq!(bars.len(), 7);
        assert_eq!(bars.last().map(|b| b.date), Some(today()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_cache_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new(HashMap::new(), 0));
        let (svc, repo) = service(provider.clone(), dir.path()).await;
        repo.upsert_prices("AAA", &bars_ending(today() - Duration::days(10), 4))
            .await
            .unwrap();

        let (bars, warning) = svc.ensure_prices("AAA", false).await.unwrap();
        assert_eq!(bars.len(), 4);
        let warning = warning.unwrap();
        assert_eq!(warning.code(), "E-YF-404");
        assert_eq!(warning.symbol(), Some("AAA"));
        // one try plus two retries
        assert_eq!(provider.calls(), 3);

        let err = svc.ensure_prices("AAA", true).await.unwrap_err();
        assert_eq!(err.code(), "E-YF-404");
        assert!(err.to_string().starts_with("AAA: "));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let data = HashMap::from([("AAA".to_string(), bars_ending(today(), 3))]);
        let provider = Arc::new(FakeProvider::new(data, 2));
        let (svc, _repo) = service(provider.clone(), dir.path()).await;

        let (bars, _) = svc.ensure_prices("AAA", false).await.unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn sanitize_replaces_non_positive_values() {
        let mut bars = bars_ending(today(), 2);
        bars[0].low = 0.0;
        bars[1].open = -1.0;
        let fixed = sanitize_ohlc(bars);
        assert_eq!(fixed[0].low, 9.0);
        assert_eq!(fixed[1].open, 9.0);

        let mut zeros = bars_ending(today(), 1);
        zeros[0].open = 0.0;
        zeros[0].high = 0.0;
        zeros[0].low = 0.0;
        zeros[0].close = 0.0;
        assert_eq!(sanitize_ohlc(zeros.clone()), zeros);
    }

    #[test]
    fn freshness_window() {
        let t = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        assert!(is_fresh(&bars_ending(t - Duration::days(2), 1), t, 2));
        assert!(!is_fresh(&bars_ending(t - Duration::days(3), 1), t, 2));
        assert!(!is_fresh(&[], t, 2));
    }

    #[tokio::test]
    async fn analyze_symbol_builds_a_summary() {
        let dir = tempfile::tempdir().unwrap();
        let data = HashMap::from([("AAA".to_string(), bars_ending(today(), 12))]);
        let provider = Arc::new(FakeProvider::new(data, 0));
        let (svc, _repo) = service(provider, dir.path()).await;

        let outcome = svc.analyze_symbol(&record("AAA"), false).await.unwrap();
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.total_score, 3);
        assert_eq!(summary.hits.len(), 1);
        assert_eq!(summary.hits[0].detector_id, "LASTUP");
        assert_eq!(summary.last_date, Some(today()));
        assert_eq!(summary.close_price, Some(21.0));
        assert_eq!(summary.history.len(), 1);
        assert_eq!(summary.name, "AAA Inc");
    }

    #[tokio::test]
    async fn batch_collects_errors_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let data = HashMap::from([
            ("AAA".to_string(), bars_ending(today(), 12)),
            ("BBB".to_string(), bars_ending(today(), 12)),
        ]);
        let provider = Arc::new(FakeProvider::new(data, 0));
        let (svc, _repo) = service(provider, dir.path()).await;

        let (tx, mut rx) = mpsc::channel(32);
        let run = svc
            .analyze_symbols(
                vec![record("AAA"), record("BBB"), record("ZZZ")],
                false,
                Some(tx),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(run.summaries.len(), 2);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].symbol(), Some("ZZZ"));
        assert!(!run.cancelled);

        let mut symbol_events = 0;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AnalysisEvent::Symbol { total, .. } => {
                    assert_eq!(total, 3);
                    symbol_events += 1;
                }
                AnalysisEvent::Finished { summaries, .. } => {
                    assert_eq!(summaries, 2);
                    finished = true;
                }
                AnalysisEvent::Started { total } => assert_eq!(total, 3),
            }
        }
        assert_eq!(symbol_events, 3);
        assert!(finished);
    }

    #[tokio::test]
    async fn cancelled_batch_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new(HashMap::new(), 0));
        let (svc, _repo) = service(provider.clone(), dir.path()).await;
        let token = CancellationToken::new();
        token.cancel();

        let run = svc
            .analyze_symbols(vec![record("AAA"), record("BBB")], false, None, token)
            .await;
        assert!(run.cancelled);
        assert!(run.summaries.is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn watchlist_is_merged_with_cached_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new(HashMap::new(), 0));
        let (svc, repo) = service(provider, dir.path()).await;
        repo.upsert_metadata(&SymbolRecord {
            symbol: "7203.T".into(),
            name: "Toyota Motor".into(),
            sector: String::new(),
            market: Some("JP".into()),
        })
        .await
        .unwrap();

        let csv = dir.path().join("watch.csv");
        tokio::fs::write(&csv, "ticker,name,sector\n7203,,Autos\nAAPL,Apple,Tech\n")
            .await
            .unwrap();
        let records = svc.load_watchlist(&csv).await.unwrap();
        assert_eq!(records[0].name, "Toyota Motor");
        assert_eq!(records[0].sector, "Autos");
        assert_eq!(records[1].name, "Apple");
        assert_eq!(
            repo.get_metadata("AAPL").await.unwrap().map(|r| r.name),
            Some("Apple".to_string())
        );
    }

    #[tokio::test]
    async fn uncached_symbols_get_provider_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            FakeProvider::new(HashMap::new(), 0).with_metadata("7203.T", "Toyota Motor Corporation", "JP"),
        );
        let (svc, repo) = service(provider.clone(), dir.path()).await;

        let csv = dir.path().join("watch.csv");
        tokio::fs::write(&csv, "ticker,name,sector\n7203,,Autos\n6758,,\nAAPL,Apple,Tech\n")
            .await
            .unwrap();
        let records = svc.load_watchlist(&csv).await.unwrap();
        let symbols: Vec<_> = records.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["7203.T", "6758.T", "AAPL"]);
        assert_eq!(records[0].name, "Toyota Motor Corporation");
        assert_eq!(records[0].sector, "Autos");
        assert_eq!(records[0].market.as_deref(), Some("JP"));
        assert_eq!(records[1].name, "");
        assert_eq!(records[1].market.as_deref(), Some("JP"));
        assert_eq!(provider.metadata_calls(), vec!["6758.T", "7203.T", "AAPL"]);

        assert_eq!(
            repo.get_metadata("7203.T").await.unwrap().map(|r| r.name),
            Some("Toyota Motor Corporation".to_string())
        );
        assert_eq!(repo.get_metadata("6758.T").await.unwrap(), None);

        // Only the still-nameless symbol is looked up again.
        svc.load_watchlist(&csv).await.unwrap();
        let calls = provider.metadata_calls();
        assert_eq!(calls.iter().filter(|s| *s == "6758.T").count(), 2);
        assert_eq!(calls.len(), 4);
    }

    #[tokio::test]
    async fn summaries_are_found_by_typed_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let data = HashMap::from([
            ("7203.T".to_string(), bars_ending(today(), 5)),
            ("AAPL".to_string(), bars_ending(today(), 5)),
        ]);
        let provider = Arc::new(FakeProvider::new(data, 0));
        let (svc, _repo) = service(provider, dir.path()).await;
        let run = svc
            .analyze_symbols(
                vec![record("7203.T"), record("AAPL")],
                false,
                None,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(run.summary_for(" 7203 ").map(|s| s.symbol.as_str()), Some("7203.T"));
        assert_eq!(run.summary_for("aapl").map(|s| s.symbol.as_str()), Some("AAPL"));
        assert!(run.summary_for("MSFT").is_none());
    }
}
