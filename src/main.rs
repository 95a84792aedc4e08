use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use candle_screener::analysis::{AnalyzerService, AnalyzerSettings, sanitize_ohlc};
use candle_screener::comfy_table;
use candle_screener::config::AppConfig;
use candle_screener::filter_utils::{
    HighlightThresholds, RowFilter, SortDirection, SortKey, TableRow, sort_rows,
};
use candle_screener::logging::{LOG_BUFFER_CAPACITY, LogBuffer, LogSink, init_logging};
use candle_screener::storage_utils::{AsyncStorageManager, PriceStore, PricesRepo};
use candle_screener::tui::{TuiContext, run_tui};
use candle_screener::user_settings::UserSettings;
use candle_screener::yahoo::YahooClient;
use candle_screener::{
    AppError, BiasTable, CategoryBounds, DetectorRegistry, PatternAnalyzer, ScoringEngine,
    price_csv,
};

#[derive(Parser, Debug)]
#[command(name = "candle-screener", version, about = "Candlestick pattern screener")]
struct Cli {
    /// JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive screener
    Tui {
        #[arg(long, short)]
        watchlist: PathBuf,
        /// Target of the export key
        #[arg(long, default_value = "screener_export.csv")]
        export: PathBuf,
    },
    /// Analyse a watchlist and print the result table
    Scan {
        #[arg(long, short)]
        watchlist: PathBuf,
        /// Write the rows to a .csv or .json file
        #[arg(long)]
        export: Option<PathBuf>,
        /// Print today's hits and the history for one symbol
        #[arg(long)]
        detail: Option<String>,
        /// Only keep rows scoring at least this much
        #[arg(long, allow_hyphen_values = true)]
        min_score: Option<i32>,
        /// Ignore fresh cached prices
        #[arg(long)]
        force: bool,
    },
    /// Load a local price CSV into the cache
    ImportPrices {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// List the detectors and their bias entries
    Patterns,
}

struct Runtime {
    config: AppConfig,
    settings: UserSettings,
    settings_store: AsyncStorageManager,
    repo: Arc<PricesRepo>,
    analyzer: Arc<PatternAnalyzer>,
    bias: Arc<BiasTable>,
}

async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    match AppConfig::load(path).await? {
        Some(config) => Ok((config, true)),
        None => Ok((AppConfig::default(), false)),
    }
}

async fn bootstrap(mut config: AppConfig, found: bool, config_path: &Path) -> Result<Runtime> {
    if !found {
        warn!(path = %config_path.display(), "config file not found, using defaults");
    }

    let repo = Arc::new(PricesRepo::open(&config.cache.dir).await?);
    let settings_store = AsyncStorageManager::new(&config.cache.dir).await?;
    let settings = match UserSettings::load(&settings_store).await {
        Some(saved) => {
            let saved = saved.normalized();
            saved.apply_to(&mut config);
            config.validate()?;
            saved
        }
        None => UserSettings::from_config(&config),
    };

    let bias = BiasTable::shared(&config.bias.candidates).map_err(|err| {
        tracing::error!(code = err.code(), "{err}");
        anyhow::anyhow!("{err}\n{}", err.ui_body())
    })?;
    info!(entries = bias.len(), source = ?bias.source(), "bias table loaded");

    let engine = ScoringEngine::new(bias.clone(), config.scoring.score_range()?);
    let analyzer = Arc::new(PatternAnalyzer::new(DetectorRegistry::builtin(), engine));

    Ok(Runtime {
        config,
        settings,
        settings_store,
        repo,
        analyzer,
        bias,
    })
}

fn service(rt: &Runtime) -> Result<Arc<AnalyzerService>> {
    let provider = Arc::new(YahooClient::new()?);
    Ok(Arc::new(AnalyzerService::new(
        provider,
        rt.repo.clone(),
        rt.analyzer.clone(),
        AnalyzerSettings::from_config(&rt.config),
    )))
}

fn highlight(config: &AppConfig) -> HighlightThresholds {
    HighlightThresholds {
        positive: config.scoring.highlight_threshold_pos,
        negative: config.scoring.highlight_threshold_neg,
    }
}

async fn scan(
    rt: &Runtime,
    watchlist: &Path,
    export: Option<&Path>,
    detail: Option<&str>,
    min_score: Option<i32>,
    force: bool,
) -> Result<()> {
    let service = service(rt)?;
    let bounds: CategoryBounds = rt.config.scoring.category_bounds()?;
    let records = service.load_watchlist(watchlist).await?;
    let run = service
        .analyze_symbols(records.clone(), force, None, CancellationToken::new())
        .await;

    let mut rows: Vec<TableRow> = records
        .iter()
        .map(|record| {
            match run.summaries.iter().find(|s| s.symbol == record.symbol) {
                Some(summary) => TableRow::from_summary(summary, &bounds),
                None => TableRow::unscored(record, &bounds),
            }
        })
        .collect();
    let filter = RowFilter {
        min_score,
        ..Default::default()
    };
    if !filter.is_empty() {
        rows.retain(|row| filter.matches(row));
    }
    sort_rows(&mut rows, SortKey::Score, SortDirection::Descending);

    println!("{}", comfy_table::rows_table(&rows, &highlight(&rt.config)));

    if let Some(symbol) = detail {
        match run.summary_for(symbol) {
            Some(summary) => {
                println!("\n{} today", summary.symbol);
                println!("{}", comfy_table::hits_table(summary));
                println!("\n{} history", summary.symbol);
                println!("{}", comfy_table::history_table(summary, &bounds));
            }
            None => eprintln!("no analysis result for {symbol}"),
        }
    }

    if !run.errors.is_empty() {
        eprintln!("\n{} errors:", run.errors.len());
        for err in &run.errors {
            eprintln!("  {err}");
        }
    }

    if let Some(path) = export {
        candle_screener::export::export_rows(&rows, path).await?;
        println!("exported {} rows to {}", rows.len(), path.display());
    }
    Ok(())
}

async fn import_prices(rt: &Runtime, symbol: &str, file: &Path) -> Result<()> {
    let symbol = candle_screener::watchlist::normalize_symbol(symbol);
    let bars = sanitize_ohlc(price_csv::load_prices(file).await?);
    if bars.is_empty() {
        return Err(AppError::Storage(format!("no usable rows in {}", file.display())).into());
    }
    let count = bars.len();
    let cached = rt.repo.upsert_prices(&symbol, &bars).await?;
    info!(%symbol, imported = count, cached, "imported prices");
    println!("{symbol}: imported {count} bars, {cached} cached");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config comes first so the logging section applies; a bad file is fatal.
    let (config, found) = load_config(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Tui { watchlist, export } => {
            let buffer = Arc::new(LogBuffer::new(LOG_BUFFER_CAPACITY));
            init_logging(&config.logging, LogSink::Buffer(buffer.clone()))?;
            let rt = bootstrap(config, found, &cli.config).await?;
            let service = service(&rt)?;
            let records = service.load_watchlist(&watchlist).await?;
            let ctx = TuiContext {
                service,
                records,
                bounds: rt.config.scoring.category_bounds()?,
                settings: rt.settings.clone(),
                settings_store: rt.settings_store.clone(),
                log_buffer: buffer,
                export_path: export,
            };
            run_tui(ctx).await
        }
        Command::Scan {
            watchlist,
            export,
            detail,
            min_score,
            force,
        } => {
            init_logging(&config.logging, LogSink::Stderr)?;
            let rt = bootstrap(config, found, &cli.config).await?;
            scan(
                &rt,
                &watchlist,
                export.as_deref(),
                detail.as_deref(),
                min_score,
                force,
            )
            .await
        }
        Command::ImportPrices { symbol, file } => {
            init_logging(&config.logging, LogSink::Stderr)?;
            let rt = bootstrap(config, found, &cli.config).await?;
            import_prices(&rt, &symbol, &file).await
        }
        Command::Patterns => {
            init_logging(&config.logging, LogSink::Stderr)?;
            let rt = bootstrap(config, found, &cli.config).await?;
            println!(
                "{}",
                comfy_table::patterns_table(rt.analyzer.registry(), &rt.bias)
            );
            Ok(())
        }
    }
}
