use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::scoring::{CategoryBounds, ScoreRange};

// CONFIGURATION STRUCTS
// Every section falls back to its defaults, so a partial config.json is fine.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub highlight_threshold_pos: i32, // rows at or above this are highlighted
    pub highlight_threshold_neg: i32,
    pub clip_min: i32,
    pub clip_max: i32,
    pub strong_threshold: i32,
    pub mild_threshold: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            highlight_threshold_pos: 4,
            highlight_threshold_neg: -4,
            clip_min: -5,
            clip_max: 5,
            strong_threshold: 3,
            mild_threshold: 1,
        }
    }
}

impl ScoringConfig {
    pub fn score_range(&self) -> AppResult<ScoreRange> {
        ScoreRange::new(self.clip_min, self.clip_max)
    }

    pub fn category_bounds(&self) -> AppResult<CategoryBounds> {
        CategoryBounds::new(self.strong_threshold, self.mild_threshold)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32, // retries after the first try
    pub backoff: f64,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: 1.6,
            initial_delay_ms: 1000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub period_days: u32,
    pub parallel_max: usize,
    pub retry: RetryConfig,
    pub freshness_days: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            period_days: 400,
            parallel_max: 5,
            retry: RetryConfig::default(),
            freshness_days: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub history_lookback: usize,
    pub patterns: Option<Vec<String>>, // None runs every detector
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            history_lookback: 20,
            patterns: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("storage"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: PathBuf::from("logs/app.log"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BiasConfig {
    pub candidates: Vec<PathBuf>,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                PathBuf::from("resources/cdl_bias.csv"),
                PathBuf::from("data/cdl_bias.csv"),
            ],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scoring: ScoringConfig,
    pub fetch: FetchConfig,
    pub analysis: AnalysisConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub bias: BiasConfig,
}

impl AppConfig {
    /// Reads a JSON config file. `Ok(None)` means the file does not exist;
    /// malformed JSON or invalid values are `E-CONFIG`.
    pub async fn load(path: &Path) -> AppResult<Option<Self>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::Config(format!("{}: {err}", path.display())));
            }
        };
        let config: AppConfig = serde_json::from_slice(&bytes)
            .map_err(|err| AppError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> AppResult<()> {
        self.scoring.score_range()?;
        self.scoring.category_bounds()?;
        if self.scoring.highlight_threshold_neg > self.scoring.highlight_threshold_pos {
            return Err(AppError::Config(format!(
                "highlight_threshold_neg ({}) exceeds highlight_threshold_pos ({})",
                self.scoring.highlight_threshold_neg, self.scoring.highlight_threshold_pos
            )));
        }
        if self.fetch.parallel_max == 0 {
            return Err(AppError::Config("fetch.parallel_max must be at least 1".into()));
        }
        if self.fetch.period_days == 0 {
            return Err(AppError::Config("fetch.period_days must be at least 1".into()));
        }
        if !self.fetch.retry.backoff.is_finite() || self.fetch.retry.backoff < 1.0 {
            return Err(AppError::Config(format!(
                "fetch.retry.backoff must be >= 1.0, got {}",
                self.fetch.retry.backoff
            )));
        }
        Ok(())
    }
}
