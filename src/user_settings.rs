//! UI preferences persisted between sessions.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AppConfig;
use crate::storage_utils::AsyncStorageManager;

const SETTINGS_KEY: &str = "ui_settings";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    pub period_days: u32,
    pub parallel_workers: usize,
    pub highlight_pos: i32,
    pub highlight_neg: i32,
    pub history_lookback: usize,
    pub patterns: Option<Vec<String>>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl UserSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            period_days: config.fetch.period_days,
            parallel_workers: config.fetch.parallel_max,
            highlight_pos: config.scoring.highlight_threshold_pos,
            highlight_neg: config.scoring.highlight_threshold_neg,
            history_lookback: config.analysis.history_lookback,
            patterns: config.analysis.patterns.clone(),
        }
    }

    /// Upper-cases pattern names and drops blanks; an empty list means all.
    pub fn normalized(mut self) -> Self {
        self.patterns = normalize_patterns(self.patterns.take());
        self.parallel_workers = self.parallel_workers.max(1);
        self.period_days = self.period_days.max(1);
        self
    }

    /// Writes these preferences over the matching config fields.
    pub fn apply_to(&self, config: &mut AppConfig) {
        config.fetch.period_days = self.period_days;
        config.fetch.parallel_max = self.parallel_workers;
        config.scoring.highlight_threshold_pos = self.highlight_pos;
        config.scoring.highlight_threshold_neg = self.highlight_neg;
        config.analysis.history_lookback = self.history_lookback;
        config.analysis.patterns = self.patterns.clone();
    }

    /// `None` when nothing was saved yet or the file is unreadable.
    pub async fn load(storage: &AsyncStorageManager) -> Option<Self> {
        match storage.load_optional::<UserSettings>(SETTINGS_KEY).await {
            Ok(settings) => settings.map(UserSettings::normalized),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable UI settings");
                None
            }
        }
    }

    pub async fn save(&self, storage: &AsyncStorageManager) -> crate::error::AppResult<()> {
        storage.save(SETTINGS_KEY, self).await
    }
}

fn normalize_patterns(patterns: Option<Vec<String>>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = patterns?
        .into_iter()
        .map(|p| p.trim().to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}
