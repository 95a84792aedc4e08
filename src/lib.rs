//! Candlestick-pattern stock screener.
//!
//! Detects candlestick patterns on daily bars, weights each hit by a
//! reference bias dataset and folds the hits into a clamped composite score.

pub mod analysis;
pub mod bias_table;
pub mod comfy_table;
pub mod config;
pub mod detectors;
pub mod error;
pub mod export;
pub mod filter_utils;
pub mod history;
pub mod logging;
pub mod models;
pub mod price_csv;
pub mod scoring;
pub mod storage_utils;
pub mod tui;
pub mod user_settings;
pub mod watchlist;
pub mod yahoo;

pub use bias_table::BiasTable;
pub use detectors::DetectorRegistry;
pub use error::{AppError, AppResult};
pub use history::{Detection, PatternAnalyzer};
pub use models::{AnalysisSummary, HistoryEntry, PatternHit, PriceBar, RawHit, parse_hit_records};
pub use scoring::{CategoryBounds, ScoreCategory, ScoreRange, ScoringEngine, categorize_score};
