//! Application error taxonomy.
//!
//! Every variant carries a stable code (shown to the operator and written to the
//! log) plus a short guidance text for the UI. Errors tied to a single symbol
//! render as `SYMBOL: [CODE] message (detail)`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Optional symbol prefix for `Display`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTag(pub Option<String>);

impl fmt::Display for SymbolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(symbol) => write!(f, "{symbol}: "),
            None => Ok(()),
        }
    }
}

/// Optional ` (detail)` suffix for `Display`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detail(pub Option<String>);

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(detail) if !detail.is_empty() => write!(f, " ({detail})"),
            _ => Ok(()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("[E-CSV-NOTFOUND] Watchlist CSV not found ({})", .path.display())]
    CsvNotFound { path: PathBuf },

    #[error("[E-CSV-ENCODING] Watchlist CSV could not be decoded{detail}")]
    CsvEncoding { detail: Detail },

    #[error("[E-CSV-EMPTY] Watchlist CSV contains no valid tickers")]
    CsvEmpty,

    #[error("[E-CSV-UNKNOWN] Failed to read watchlist CSV{detail}")]
    CsvUnknown { detail: Detail },

    #[error("[E-BIAS-NOTFOUND] Candlestick bias dataset not found (tried: {})", display_paths(.candidates))]
    BiasDatasetMissing { candidates: Vec<PathBuf> },

    #[error("[E-BIAS-INVALID] Candlestick bias dataset {} is unreadable: {source}", .path.display())]
    BiasDatasetInvalid {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("[E-CONFIG] Invalid configuration: {0}")]
    Config(String),

    #[error("{symbol}[E-YF-404] Price data could not be retrieved{detail}")]
    PriceFetch { symbol: SymbolTag, detail: Detail },

    #[error("{symbol}[E-TA-LIB] Candlestick pattern detection failed{detail}")]
    Detection { symbol: SymbolTag, detail: Detail },

    #[error("{symbol}[E-ANL-UNEXPECTED] Analysis failed{detail}")]
    Analysis { symbol: SymbolTag, detail: Detail },

    #[error("[E-STORAGE] Local storage error: {0}")]
    Storage(String),

    #[error("[E-EXPORT-FORMAT] Unsupported export format: {}", .path.display())]
    ExportFormat { path: PathBuf },

    #[error("{symbol}[E-UNEXPECTED] Unexpected error{detail}")]
    Unexpected { symbol: SymbolTag, detail: Detail },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::CsvNotFound { .. } => "E-CSV-NOTFOUND",
            AppError::CsvEncoding { .. } => "E-CSV-ENCODING",
            AppError::CsvEmpty => "E-CSV-EMPTY",
            AppError::CsvUnknown { .. } => "E-CSV-UNKNOWN",
            AppError::BiasDatasetMissing { .. } => "E-BIAS-NOTFOUND",
            AppError::BiasDatasetInvalid { .. } => "E-BIAS-INVALID",
            AppError::Config(_) => "E-CONFIG",
            AppError::PriceFetch { .. } => "E-YF-404",
            AppError::Detection { .. } => "E-TA-LIB",
            AppError::Analysis { .. } => "E-ANL-UNEXPECTED",
            AppError::Storage(_) => "E-STORAGE",
            AppError::ExportFormat { .. } => "E-EXPORT-FORMAT",
            AppError::Unexpected { .. } => "E-UNEXPECTED",
        }
    }

    /// Operator-facing hint on how to resolve the error.
    pub fn guidance(&self) -> &'static str {
        match self {
            AppError::CsvNotFound { .. } => {
                "Check the file path and permissions; pass a full path if needed."
            }
            AppError::CsvEncoding { .. } => "Save the CSV as UTF-8 (a BOM is accepted).",
            AppError::CsvEmpty => "Make sure the file has a ticker column with at least one symbol.",
            AppError::CsvUnknown { .. } => "Check the CSV format and file integrity.",
            AppError::BiasDatasetMissing { .. } | AppError::BiasDatasetInvalid { .. } => {
                "Place cdl_bias.csv under resources/ or list its location in bias.candidates."
            }
            AppError::Config(_) => "Fix the configuration file and restart.",
            AppError::PriceFetch { .. } => {
                "Check the ticker, including its market suffix (for example 7203.T)."
            }
            AppError::Detection { .. } => "Check the price history for gaps or invalid values.",
            AppError::Analysis { .. } | AppError::Unexpected { .. } => {
                "See the log for details; re-fetch or exclude the failing symbol."
            }
            AppError::Storage(_) => "Check that the cache directory is writable.",
            AppError::ExportFormat { .. } => "Use a .csv or .json file name.",
        }
    }

    /// The symbol this error is attached to, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            AppError::PriceFetch { symbol, .. }
            | AppError::Detection { symbol, .. }
            | AppError::Analysis { symbol, .. }
            | AppError::Unexpected { symbol, .. } => symbol.0.as_deref(),
            _ => None,
        }
    }

    pub fn with_symbol(self, value: &str) -> Self {
        let tag = SymbolTag(Some(value.to_string()));
        match self {
            AppError::PriceFetch { detail, .. } => AppError::PriceFetch { symbol: tag, detail },
            AppError::Detection { detail, .. } => AppError::Detection { symbol: tag, detail },
            AppError::Analysis { detail, .. } => AppError::Analysis { symbol: tag, detail },
            AppError::Unexpected { detail, .. } => AppError::Unexpected { symbol: tag, detail },
            other => AppError::Analysis {
                symbol: tag,
                detail: Detail(Some(other.to_string())),
            },
        }
    }

    pub fn price_fetch(detail: Option<String>) -> Self {
        AppError::PriceFetch {
            symbol: SymbolTag::default(),
            detail: Detail(detail),
        }
    }

    pub fn analysis(detail: Option<String>) -> Self {
        AppError::Analysis {
            symbol: SymbolTag::default(),
            detail: Detail(detail),
        }
    }

    pub fn unexpected(err: impl fmt::Display) -> Self {
        let text = err.to_string();
        AppError::Unexpected {
            symbol: SymbolTag::default(),
            detail: Detail((!text.is_empty()).then_some(text)),
        }
    }

    /// Body text for an error dialog: guidance first, then the raw detail.
    pub fn ui_body(&self) -> String {
        let mut parts = vec![self.guidance().to_string()];
        if let Some(source) = std::error::Error::source(self) {
            parts.push(format!("Details: {source}"));
        }
        parts.join("\n")
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}
