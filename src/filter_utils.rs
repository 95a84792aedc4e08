use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::models::{AnalysisSummary, SymbolRecord};
use crate::scoring::{CategoryBounds, ScoreCategory, categorize_score};

/// One display row. `score` is `None` until the symbol has been analysed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableRow {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub market: String,
    pub score: Option<i32>,
    pub category: Option<ScoreCategory>,
    pub label: String,
    pub hit_count: usize,
    pub patterns: String,
    pub last_date: Option<NaiveDate>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl TableRow {
    pub fn from_summary(summary: &AnalysisSummary, bounds: &CategoryBounds) -> Self {
        let (category, label) = categorize_score(Some(summary.total_score), bounds);
        let patterns = summary
            .hits
            .iter()
            .map(|h| h.display_name().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            symbol: summary.symbol.clone(),
            name: summary.name.clone(),
            sector: summary.sector.clone(),
            market: summary.market.clone().unwrap_or_default(),
            score: Some(summary.total_score),
            category,
            label,
            hit_count: summary.hits.len(),
            patterns,
            last_date: summary.last_date,
            close: summary.close_price,
            volume: summary.volume,
        }
    }

    pub fn unscored(record: &SymbolRecord, bounds: &CategoryBounds) -> Self {
        let (category, label) = categorize_score(None, bounds);
        Self {
            symbol: record.symbol.clone(),
            name: record.name.clone(),
            sector: record.sector.clone(),
            market: record.market.clone().unwrap_or_default(),
            score: None,
            category,
            label,
            hit_count: 0,
            patterns: String::new(),
            last_date: None,
            close: None,
            volume: None,
        }
    }
}

// --- Highlighting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Positive,
    Negative,
    Plain,
}

/// Row highlight thresholds, independent of the category bounds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightThresholds {
    pub positive: i32,
    pub negative: i32,
}

impl Default for HighlightThresholds {
    fn default() -> Self {
        Self {
            positive: 4,
            negative: -4,
        }
    }
}

impl HighlightThresholds {
    pub fn classify(&self, score: Option<i32>) -> Highlight {
        match score {
            Some(s) if s >= self.positive => Highlight::Positive,
            Some(s) if s <= self.negative => Highlight::Negative,
            _ => Highlight::Plain,
        }
    }
}

// --- Filtering ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub market: Option<String>,
    pub min_score: Option<i32>,
    pub text: Option<String>,
}

impl RowFilter {
    pub fn is_empty(&self) -> bool {
        self.market.is_none() && self.min_score.is_none() && self.text.is_none()
    }

    pub fn matches(&self, row: &TableRow) -> bool {
        if let Some(market) = &self.market {
            if !row.market.eq_ignore_ascii_case(market) {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            // Unscored rows never satisfy a score filter
            if row.score.is_none_or(|s| s < min) {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            let found = [&row.symbol, &row.name, &row.sector, &row.patterns]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, rows: &'a [TableRow]) -> Vec<&'a TableRow> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

// --- Sorting ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Symbol,
    #[default]
    Score,
    Hits,
    LastDate,
}

impl SortKey {
    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Symbol => "Symbol",
            SortKey::Score => "Score",
            SortKey::Hits => "Hits",
            SortKey::LastDate => "Last date",
        }
    }

    pub fn next(self) -> Self {
        match self {
            SortKey::Symbol => SortKey::Score,
            SortKey::Score => SortKey::Hits,
            SortKey::Hits => SortKey::LastDate,
            SortKey::LastDate => SortKey::Symbol,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn toggle(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

// None sorts last in either direction.
fn cmp_present<T: Ord>(a: Option<T>, b: Option<T>, dir: SortDirection) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => dir.apply(x.cmp(&y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts in place; ties fall back to symbol order and unscored rows go last.
pub fn sort_rows(rows: &mut [TableRow], key: SortKey, dir: SortDirection) {
    rows.sort_by(|a, b| {
        let primary = match key {
            SortKey::Symbol => dir.apply(a.symbol.cmp(&b.symbol)),
            SortKey::Score => cmp_present(a.score, b.score, dir),
            SortKey::Hits => cmp_present(
                a.score.map(|_| a.hit_count),
                b.score.map(|_| b.hit_count),
                dir,
            ),
            SortKey::LastDate => cmp_present(a.last_date, b.last_date, dir),
        };
        primary.then_with(|| a.symbol.cmp(&b.symbol))
    });
}
