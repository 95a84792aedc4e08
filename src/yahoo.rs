//! Daily bars from the Yahoo Finance chart endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::{PriceBar, SymbolMetadata};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) candle-screener";

/// Source of daily OHLC bars.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Bars for roughly the last `period_days` calendar days, ascending.
    async fn fetch_daily(&self, symbol: &str, period_days: u32) -> AppResult<Vec<PriceBar>>;

    /// Display metadata for a symbol. `Ok(None)` when the provider has none.
    async fn fetch_metadata(&self, _symbol: &str) -> AppResult<Option<SymbolMetadata>> {
        Ok(None)
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    meta: Option<ChartMeta>,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    gmtoffset: Option<i64>,
    long_name: Option<String>,
    short_name: Option<String>,
    exchange_name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug, Default)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new() -> AppResult<Self> {
        Self::with_base_url(CHART_URL)
    }

    pub fn with_base_url(base_url: &str) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(StdDuration::from_secs(20))
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| AppError::price_fetch(Some(format!("http client: {e}"))))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl YahooClient {
    async fn get_chart(&self, symbol: &str, query: &[(&str, String)]) -> AppResult<ChartResponse> {
        let url = format!("{}/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::price_fetch(Some(e.to_string())).with_symbol(symbol))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            warn!(symbol, %status, "rate limited by price provider");
            return Err(AppError::price_fetch(Some(format!("rate limited ({status})"))).with_symbol(symbol));
        }
        if !status.is_success() {
            return Err(AppError::price_fetch(Some(format!("HTTP {status}"))).with_symbol(symbol));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::price_fetch(Some(e.to_string())).with_symbol(symbol))
    }
}

#[async_trait]
impl PriceProvider for YahooClient {
    async fn fetch_daily(&self, symbol: &str, period_days: u32) -> AppResult<Vec<PriceBar>> {
        let period2 = Utc::now();
        let period1 = period2 - Duration::days(i64::from(period_days));
        let query = [
            ("period1", period1.timestamp().to_string()),
            ("period2", period2.timestamp().to_string()),
            ("interval", "1d".to_string()),
            ("events", "history".to_string()),
        ];
        let body = self.get_chart(symbol, &query).await?;
        let bars = bars_from_chart(body).map_err(|e| e.with_symbol(symbol))?;
        debug!(symbol, bars = bars.len(), "fetched daily bars");
        Ok(bars)
    }

    async fn fetch_metadata(&self, symbol: &str) -> AppResult<Option<SymbolMetadata>> {
        let query = [("range", "1d".to_string()), ("interval", "1d".to_string())];
        let body = self.get_chart(symbol, &query).await?;
        let metadata = metadata_from_chart(body);
        debug!(symbol, found = metadata.is_some(), "fetched symbol metadata");
        Ok(metadata)
    }
}

fn metadata_from_chart(body: ChartResponse) -> Option<SymbolMetadata> {
    let meta = body.chart.result?.into_iter().next()?.meta?;
    let name = [meta.long_name, meta.short_name]
        .into_iter()
        .flatten()
        .map(|n| n.trim().to_string())
        .find(|n| !n.is_empty());
    let market = meta.exchange_name.as_deref().and_then(exchange_market);
    if name.is_none() && market.is_none() {
        return None;
    }
    Some(SymbolMetadata {
        name,
        sector: None,
        market: market.map(str::to_string),
    })
}

/// Market code for a chart `exchangeName`, matching the suffix-based codes.
fn exchange_market(exchange: &str) -> Option<&'static str> {
    match exchange.trim().to_ascii_uppercase().as_str() {
        "JPX" | "TYO" | "OSA" | "FKA" | "SAP" => Some("JP"),
        "TOR" | "VAN" | "CNQ" | "NEO" => Some("CA"),
        "LSE" | "IOB" => Some("UK"),
        "NMS" | "NYQ" | "NGM" | "NCM" | "ASE" | "PCX" | "BTS" => Some("US"),
        _ => None,
    }
}

fn bars_from_chart(body: ChartResponse) -> AppResult<Vec<PriceBar>> {
    if let Some(err) = body.chart.error {
        let detail = [err.code, err.description]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(": ");
        return Err(AppError::price_fetch(Some(detail)));
    }
    let Some(result) = body.chart.result.and_then(|r| r.into_iter().next()) else {
        return Err(AppError::price_fetch(Some("empty chart result".to_string())));
    };

    let offset = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten();

    let mut bars: Vec<PriceBar> = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(date) = local_date(*ts, offset) else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            at(&quote.open, i),
            at(&quote.high, i),
            at(&quote.low, i),
            at(&quote.close, i),
        ) else {
            continue;
        };
        let bar = PriceBar {
            date,
            open,
            high,
            low,
            close,
            volume: at(&quote.volume, i),
        };
        // Intraday updates repeat the last date; keep the newest row.
        match bars.last_mut() {
            Some(last) if last.date == date => *last = bar,
            _ => bars.push(bar),
        }
    }
    if bars.is_empty() {
        return Err(AppError::price_fetch(Some("no usable rows".to_string())));
    }
    Ok(bars)
}

fn local_date(ts: i64, gmtoffset: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts + gmtoffset, 0).map(|dt| dt.date_naive())
}
