//! Domain types shared by the scoring core, the orchestrator and the UI.

use chrono::NaiveDate;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

/// One daily OHLC bar.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Direction of a detected pattern.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Bullish,
    Bearish,
    Neutral,
}

impl Variant {
    pub fn from_value(value: i32) -> Self {
        match value.signum() {
            1 => Variant::Bullish,
            -1 => Variant::Bearish,
            _ => Variant::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Bullish => "bullish",
            Variant::Bearish => "bearish",
            Variant::Neutral => "neutral",
        }
    }

    /// Parses a dataset label; blank or unknown labels are treated as neutral.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bullish" => Variant::Bullish,
            "bearish" => Variant::Bearish,
            _ => Variant::Neutral,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector's raw output for one day, before enrichment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawHit {
    #[serde(rename = "fn", alias = "detector_id")]
    pub detector_id: String,
    // A record without a value is a zero hit.
    #[serde(default, deserialize_with = "deserialize_i32_lenient")]
    pub value: i32,
}

impl RawHit {
    pub fn new(detector_id: impl Into<String>, value: i32) -> Self {
        Self {
            detector_id: detector_id.into(),
            value,
        }
    }

    /// Parses one loosely typed record (`{"fn": "...", "value": ...}`).
    pub fn from_record(record: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(record.clone()).ok()
    }
}

/// Parses hit records, dropping malformed ones individually.
pub fn parse_hit_records(records: &[serde_json::Value]) -> Vec<RawHit> {
    records
        .iter()
        .filter_map(|record| {
            let parsed = RawHit::from_record(record);
            if parsed.is_none() {
                warn!(%record, "skipping malformed hit record");
            }
            parsed
        })
        .collect()
}

/// Anything the scoring engine can score: a detector id plus a signed value.
pub trait HitLike {
    fn detector_id(&self) -> &str;
    fn value(&self) -> i32;
}

impl HitLike for RawHit {
    fn detector_id(&self) -> &str {
        &self.detector_id
    }

    fn value(&self) -> i32 {
        self.value
    }
}

/// A detector hit enriched with bias metadata and its weighted score.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PatternHit {
    pub detector_id: String,
    pub value: i32,
    pub strength: Option<f64>,
    pub base_score: i32,
    pub weighted_score: Option<f64>,
    pub variant: Option<Variant>,
    pub english: Option<String>,
    pub native: Option<String>,
    pub typical_setup: Option<String>,
    pub next_move: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
}

impl PatternHit {
    pub fn display_name(&self) -> &str {
        self.english
            .as_deref()
            .or(self.native.as_deref())
            .unwrap_or(&self.detector_id)
    }
}

impl HitLike for PatternHit {
    fn detector_id(&self) -> &str {
        &self.detector_id
    }

    fn value(&self) -> i32 {
        self.value
    }
}

/// One day of the history timeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub hits: Vec<PatternHit>,
    pub total_score: i32,
}

/// A watchlist entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolRecord {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub market: Option<String>,
}

/// Names and classification reported by a market-data provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolMetadata {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub market: Option<String>,
}

/// Per-symbol analysis result. Built once per run and never mutated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub market: Option<String>,
    pub hits: Vec<PatternHit>,
    pub total_score: i32,
    pub last_date: Option<NaiveDate>,
    pub close_price: Option<f64>,
    pub volume: Option<f64>,
    pub history: Vec<HistoryEntry>,
}

// --- Lenient integer deserialization ---

struct LenientI32Visitor;

impl<'de> Visitor<'de> for LenientI32Visitor {
    type Value = i32;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an integer, a whole float, or a string representing one")
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i32::try_from(v).map_err(E::custom)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i32::try_from(v).map_err(E::custom)
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if !v.is_finite() || v < i32::MIN as f64 || v > i32::MAX as f64 {
            return Err(E::custom(format!("{v} is not a valid signal value")));
        }
        Ok(v.trunc() as i32)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let trimmed = v.trim();
        if let Ok(int) = trimmed.parse::<i32>() {
            return Ok(int);
        }
        trimmed
            .parse::<f64>()
            .map_err(E::custom)
            .and_then(|f| self.visit_f64(f))
    }
}

fn deserialize_i32_lenient<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientI32Visitor)
}
