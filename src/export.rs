//! Export of table rows to CSV or JSON, chosen by file extension.

use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::filter_utils::TableRow;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Serialize, Debug)]
struct ExportRecord<'a> {
    symbol: &'a str,
    name: &'a str,
    sector: &'a str,
    market: &'a str,
    score: Option<i32>,
    category: Option<&'static str>,
    label: &'a str,
    hits: usize,
    patterns: &'a str,
    last_date: Option<String>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl<'a> From<&'a TableRow> for ExportRecord<'a> {
    fn from(row: &'a TableRow) -> Self {
        Self {
            symbol: &row.symbol,
            name: &row.name,
            sector: &row.sector,
            market: &row.market,
            score: row.score,
            category: row.category.map(|c| c.as_str()),
            label: &row.label,
            hits: row.hit_count,
            patterns: &row.patterns,
            last_date: row.last_date.map(|d| d.format("%Y-%m-%d").to_string()),
            close: row.close,
            volume: row.volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") => Ok(ExportFormat::Csv),
            Some("json") => Ok(ExportFormat::Json),
            _ => Err(AppError::ExportFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Encodes rows: CSV gets a UTF-8 BOM, JSON is a pretty array of records.
pub fn encode_rows(rows: &[TableRow], format: ExportFormat) -> AppResult<Vec<u8>> {
    let records: Vec<ExportRecord> = rows.iter().map(ExportRecord::from).collect();
    match format {
        ExportFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(UTF8_BOM.to_vec());
            for record in &records {
                wtr.serialize(record)
                    .map_err(|e| AppError::Storage(format!("csv export: {e}")))?;
            }
            wtr.into_inner()
                .map_err(|e| AppError::Storage(format!("csv export: {e}")))
        }
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(&records)?),
    }
}

pub async fn export_rows(rows: &[TableRow], path: &Path) -> AppResult<()> {
    let format = ExportFormat::from_path(path)?;
    let bytes = encode_rows(rows, format)?;
    tokio::fs::write(path, bytes).await?;
    info!(path = %path.display(), rows = rows.len(), ?format, "exported results");
    Ok(())
}
