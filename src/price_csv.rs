//! Daily price CSV import.

use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, Detail};
use crate::models::PriceBar;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

struct Columns {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        Some(Self {
            date: find(&["date", "datetime"])?,
            open: find(&["open"])?,
            high: find(&["high"])?,
            low: find(&["low"])?,
            close: find(&["close"])?,
            volume: find(&["volume"]),
        })
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

fn parse_price(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parses CSV text into bars sorted by date.
///
/// Headers match case-insensitively. When any of date/open/high/low/close is
/// missing the result is empty; rows that fail to parse are skipped.
pub fn parse_prices(text: &str) -> AppResult<Vec<PriceBar>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr.headers().map_err(|e| AppError::Storage(e.to_string()))?.clone();
    let Some(cols) = Columns::locate(&headers) else {
        warn!(?headers, "price CSV lacks OHLC columns, nothing imported");
        return Ok(Vec::new());
    };

    let mut bars = Vec::new();
    let mut skipped = 0usize;
    for row in rdr.records() {
        let row = row.map_err(|e| AppError::Storage(e.to_string()))?;
        let bar = (|| {
            Some(PriceBar {
                date: parse_date(row.get(cols.date)?)?,
                open: parse_price(row.get(cols.open))?,
                high: parse_price(row.get(cols.high))?,
                low: parse_price(row.get(cols.low))?,
                close: parse_price(row.get(cols.close))?,
                volume: cols.volume.and_then(|i| parse_price(row.get(i))),
            })
        })();
        match bar {
            Some(bar) => bars.push(bar),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "skipped unparsable price rows");
    }
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

pub async fn load_prices(path: &Path) -> AppResult<Vec<PriceBar>> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        AppError::Storage(format!("{}: {e}", path.display()))
    })?;
    let text = String::from_utf8(bytes).map_err(|e| AppError::CsvEncoding {
        detail: Detail(Some(e.to_string())),
    })?;
    let bars = parse_prices(&text)?;
    info!(path = %path.display(), bars = bars.len(), "parsed price CSV");
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive_headers() {
        let text = "Date,Open,High,Low,Close,Volume\n\
                    2024-01-03,11,12,10,11.5,300\n\
                    2024-01-02,10,11,9,10.5,\n\
                    bad-date,1,1,1,1,1\n\
                    2024-01-04,x,1,1,1,1\n";
        let bars = parse_prices(text).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].volume, None);
        assert_eq!(bars[1].close, 11.5);
        assert_eq!(bars[1].volume, Some(300.0));
    }

    #[test]
    fn missing_ohlc_columns_yield_empty_series() {
        let bars = parse_prices("date,open,high,close\n2024-01-02,1,2,1.5\n").unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn accepts_timestamps_and_slashes() {
        assert_eq!(parse_date("2024/02/29"), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(
            parse_date("2024-02-29 00:00:00+09:00"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(parse_date("yesterday"), None);
    }
}
