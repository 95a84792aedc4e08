//! Watchlist CSV ingestion.
//!
//! Accepts either a headed file (a `ticker`/`symbol` column plus optional
//! `name`/`sector`) or a bare `symbol,name,sector` list.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{AppError, AppResult, Detail};
use crate::models::SymbolRecord;

const SYMBOL_HEADERS: &[&str] = &["ticker", "symbol", "銘柄コード", "ティッカーコード"];
const NAME_HEADERS: &[&str] = &["name", "銘柄名"];
const SECTOR_HEADERS: &[&str] = &["sector", "セクター"];

const MARKET_SUFFIXES: &[(&str, &str)] = &[(".T", "JP"), (".TO", "CA"), (".L", "UK")];
const DEFAULT_MARKET: &str = "US";

static TICKER_RE: OnceCell<Regex> = OnceCell::new();

fn ticker_re() -> AppResult<&'static Regex> {
    TICKER_RE
        .get_or_try_init(|| Regex::new(r"^[A-Za-z0-9.\-_]+$"))
        .map_err(|e| AppError::CsvUnknown {
            detail: Detail(Some(e.to_string())),
        })
}

/// Trims; all-digit codes get the Tokyo `.T` suffix; everything else is upper-cased.
pub fn normalize_symbol(symbol: &str) -> String {
    let cleaned = symbol.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    if cleaned.chars().all(|c| c.is_ascii_digit()) {
        return format!("{cleaned}.T");
    }
    cleaned.to_uppercase()
}

/// Market code from the ticker suffix, `US` when none matches.
pub fn infer_market(symbol: &str) -> &'static str {
    let cleaned = symbol.trim().to_uppercase();
    MARKET_SUFFIXES
        .iter()
        .find(|(suffix, _)| cleaned.ends_with(suffix))
        .map(|(_, market)| *market)
        .unwrap_or(DEFAULT_MARKET)
}

fn record(symbol: &str, name: &str, sector: &str) -> SymbolRecord {
    let symbol = normalize_symbol(symbol);
    let market = infer_market(&symbol).to_string();
    SymbolRecord {
        symbol,
        name: name.trim().to_string(),
        sector: sector.trim().to_string(),
        market: Some(market),
    }
}

/// A row naming a symbol column is a header even when it looks like a ticker.
fn is_header(first: &csv::StringRecord, re: &Regex) -> bool {
    let named = first
        .iter()
        .any(|h| SYMBOL_HEADERS.contains(&h.trim().to_lowercase().as_str()));
    if named {
        return true;
    }
    if first.len() == 1 && re.is_match(first.get(0).unwrap_or_default()) {
        return false;
    }
    !first.iter().all(|cell| re.is_match(cell))
}

fn column(headers: &[String], names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| names.contains(&h.as_str()))
}

/// Parses watchlist CSV text (BOM already stripped or not).
pub fn parse_watchlist(text: &str) -> AppResult<Vec<SymbolRecord>> {
    let re = ticker_re()?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = rdr.records();
    let first = match rows.next() {
        Some(row) => row.map_err(csv_unknown)?,
        None => return Err(AppError::CsvEmpty),
    };

    let headed = is_header(&first, re);
    let (idx_sym, idx_name, idx_sec) = if headed {
        let headers: Vec<String> = first.iter().map(|s| s.trim().to_lowercase()).collect();
        debug!(?headers, "watchlist has a header row");
        (
            column(&headers, SYMBOL_HEADERS).unwrap_or(0),
            column(&headers, NAME_HEADERS),
            column(&headers, SECTOR_HEADERS),
        )
    } else {
        (0, Some(1), Some(2))
    };

    let mut records = Vec::new();
    let mut push = |row: &csv::StringRecord| {
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or_default();
        let symbol = cell(Some(idx_sym));
        if !symbol.is_empty() {
            records.push(record(symbol, cell(idx_name), cell(idx_sec)));
        }
    };

    if !headed {
        push(&first);
    }
    for row in rows {
        push(&row.map_err(csv_unknown)?);
    }

    if records.is_empty() {
        return Err(AppError::CsvEmpty);
    }
    Ok(records)
}

/// Loads a watchlist file.
pub async fn load_symbols(path: &Path) -> AppResult<Vec<SymbolRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::CsvNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) => return Err(csv_unknown(err)),
    };
    let text = String::from_utf8(bytes).map_err(|e| AppError::CsvEncoding {
        detail: Detail(Some(e.to_string())),
    })?;
    let records = parse_watchlist(&text)?;
    info!(path = %path.display(), symbols = records.len(), "loaded watchlist");
    Ok(records)
}

fn csv_unknown(err: impl std::fmt::Display) -> AppError {
    AppError::CsvUnknown {
        detail: Detail(Some(err.to_string())),
    }
}
