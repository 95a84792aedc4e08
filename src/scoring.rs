//! Turns detector hits into weighted, bias-annotated hits and a bounded
//! composite score, and maps scores onto display categories.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::bias_table::BiasTable;
use crate::error::{AppError, AppResult};
use crate::models::{HitLike, PatternHit, RawHit};

/// Inclusive clamp range for composite scores.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: i32,
    pub max: i32,
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self { min: -5, max: 5 }
    }
}

impl ScoreRange {
    pub fn new(min: i32, max: i32) -> AppResult<Self> {
        if min > max {
            return Err(AppError::Config(format!(
                "clip_min ({min}) must not exceed clip_max ({max})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn clamp(&self, score: i32) -> i32 {
        score.clamp(self.min, self.max)
    }
}

/// Stateless scorer over an immutable bias table.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    bias: Arc<BiasTable>,
    range: ScoreRange,
}

impl ScoringEngine {
    pub fn new(bias: Arc<BiasTable>, range: ScoreRange) -> Self {
        Self { bias, range }
    }

    pub fn range(&self) -> ScoreRange {
        self.range
    }

    pub fn bias(&self) -> &BiasTable {
        &self.bias
    }

    /// Attaches bias metadata, strength and weighted score to each hit.
    ///
    /// Order is preserved and repeated detector ids are kept. The weighted
    /// score takes its sign from the hit's own value, not from the stored
    /// bias score.
    pub fn enrich_hits<H: HitLike>(&self, hits: &[H], at: Option<NaiveDate>) -> Vec<PatternHit> {
        hits.iter()
            .map(|hit| {
                let value = hit.value();
                let info = self.bias.lookup(hit.detector_id(), value);
                let strength = (value != 0).then(|| value.unsigned_abs() as f64 / 100.0);
                let weighted_score =
                    strength.map(|s| round2(directed_base(info.score, value) as f64 * s));
                PatternHit {
                    detector_id: hit.detector_id().to_string(),
                    value,
                    strength,
                    base_score: info.score,
                    weighted_score,
                    variant: info.variant,
                    english: info.english.clone(),
                    native: info.native.clone(),
                    typical_setup: info.typical_setup.clone(),
                    next_move: info.next_move.clone(),
                    description: info.description.clone(),
                    date: at,
                }
            })
            .collect()
    }

    /// Composite score: sum of |bias| x direction x strength, rounded half to
    /// even and clamped. Empty input scores 0.
    pub fn total_score_from_hits<H: HitLike>(&self, hits: &[H]) -> i32 {
        let raw: f64 = hits
            .iter()
            .map(|hit| {
                let value = hit.value();
                let base = directed_base(self.bias.lookup(hit.detector_id(), value).score, value);
                base as f64 * (value.unsigned_abs() as f64 / 100.0)
            })
            .sum();
        let rounded = raw.round_ties_even();
        // Saturate before the integer clamp so huge raw sums cannot wrap.
        let bounded = rounded.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        self.range.clamp(bounded)
    }

    /// Convenience wrapper for raw `(detector_id, value)` pairs.
    pub fn score_pairs(&self, pairs: &[(&str, i32)]) -> i32 {
        let hits: Vec<RawHit> = pairs.iter().map(|(id, v)| RawHit::new(*id, *v)).collect();
        self.total_score_from_hits(&hits)
    }
}

fn directed_base(bias_score: i32, value: i32) -> i32 {
    let direction = if value > 0 { 1 } else { -1 };
    bias_score.abs() * direction
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// --- Categorisation ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreCategory {
    StrongPositive,
    MildPositive,
    Neutral,
    MildNegative,
    StrongNegative,
}

impl ScoreCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreCategory::StrongPositive => "Strong-positive",
            ScoreCategory::MildPositive => "Mild-positive",
            ScoreCategory::Neutral => "Neutral",
            ScoreCategory::MildNegative => "Mild-negative",
            ScoreCategory::StrongNegative => "Strong-negative",
        }
    }
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category boundaries. Positive scores at or above `strong` are strong,
/// at or above `mild` are mild; negative boundaries mirror them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryBounds {
    pub strong: i32,
    pub mild: i32,
}

impl Default for CategoryBounds {
    fn default() -> Self {
        Self { strong: 3, mild: 1 }
    }
}

impl CategoryBounds {
    pub fn new(strong: i32, mild: i32) -> AppResult<Self> {
        if mild < 1 || strong < mild {
            return Err(AppError::Config(format!(
                "category bounds need 1 <= mild ({mild}) <= strong ({strong})"
            )));
        }
        Ok(Self { strong, mild })
    }
}

/// Maps a score onto `(category, label)`; `None` maps to `(None, "—")`.
pub fn categorize_score(score: Option<i32>, bounds: &CategoryBounds) -> (Option<ScoreCategory>, String) {
    let Some(score) = score else {
        return (None, "—".to_string());
    };
    if score >= bounds.strong {
        (Some(ScoreCategory::StrongPositive), format!("↑↑ Strong+ ({score:+})"))
    } else if score >= bounds.mild {
        (Some(ScoreCategory::MildPositive), format!("↑ Mild+ ({score:+})"))
    } else if score <= -bounds.strong {
        (Some(ScoreCategory::StrongNegative), format!("↓↓ Strong- ({score})"))
    } else if score <= -bounds.mild {
        (Some(ScoreCategory::MildNegative), format!("↓ Mild- ({score})"))
    } else {
        (Some(ScoreCategory::Neutral), format!("Neutral ({score})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIAS: &str = "\
function,variant,score,english,native,typical_setup,next_move
CDLENGULFING,bullish,4,Bullish Engulfing,,,
CDLENGULFING,bearish,-4,Bearish Engulfing,,,
CDLHAMMER,bullish,3,Hammer,,,
CDLWRONG,bullish,-2,Wrong sign,,,
CDLDOJI,neutral,1,Doji,,,
";

    fn engine() -> ScoringEngine {
        let table = BiasTable::from_reader(BIAS.as_bytes()).unwrap();
        ScoringEngine::new(Arc::new(table), ScoreRange::default())
    }

    #[test]
    fn enrich_computes_strength_and_weight() {
        let hits = engine().enrich_hits(&[RawHit::new("CDLHAMMER", 80)], None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].strength, Some(0.8));
        assert_eq!(hits[0].base_score, 3);
        assert_eq!(hits[0].weighted_score, Some(2.4));
        assert_eq!(hits[0].english.as_deref(), Some("Hammer"));
    }

    #[test]
    fn enrich_zero_value_has_no_strength() {
        let hits = engine().enrich_hits(&[RawHit::new("CDLDOJI", 0)], None);
        assert_eq!(hits[0].strength, None);
        assert_eq!(hits[0].weighted_score, None);
    }

    #[test]
    fn enrich_keeps_order_and_duplicates() {
        let input = [
            RawHit::new("CDLENGULFING", 100),
            RawHit::new("CDLHAMMER", 100),
            RawHit::new("CDLENGULFING", -100),
        ];
        let ids: Vec<_> = engine()
            .enrich_hits(&input, None)
            .into_iter()
            .map(|h| (h.detector_id, h.value))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("CDLENGULFING".to_string(), 100),
                ("CDLHAMMER".to_string(), 100),
                ("CDLENGULFING".to_string(), -100),
            ]
        );
    }

    #[test]
    fn weighted_sign_follows_hit_direction() {
        let e = engine();
        let up = e.enrich_hits(&[RawHit::new("CDLWRONG", 100)], None);
        assert_eq!(up[0].weighted_score, Some(2.0));
        let down = e.enrich_hits(&[RawHit::new("CDLHAMMER", -100)], None);
        assert_eq!(down[0].weighted_score, Some(-3.0));
    }

    #[test]
    fn total_score_corrects_sign_and_clamps() {
        let e = engine();
        assert_eq!(e.score_pairs(&[]), 0);
        assert_eq!(e.score_pairs(&[("CDLWRONG", 100)]), 2);
        assert_eq!(e.score_pairs(&[("CDLENGULFING", 100), ("CDLHAMMER", 100)]), 5);
        assert_eq!(e.score_pairs(&[("CDLENGULFING", -100), ("CDLHAMMER", -100)]), -5);
        assert_eq!(e.score_pairs(&[("CDLUNKNOWN", 100)]), 0);
    }

    #[test]
    fn total_score_rounds_half_to_even() {
        let e = engine();
        // 1 x 0.5 = 0.5 -> 0
        assert_eq!(e.score_pairs(&[("CDLDOJI", 50)]), 0);
        // 1 x 1.5 = 1.5 -> 2
        assert_eq!(e.score_pairs(&[("CDLDOJI", 150)]), 2);
        // 1 x 2.5 = 2.5 -> 2
        assert_eq!(e.score_pairs(&[("CDLDOJI", 250)]), 2);
    }

    #[test]
    fn custom_range_is_respected() {
        let table = BiasTable::from_reader(BIAS.as_bytes()).unwrap();
        let e = ScoringEngine::new(Arc::new(table), ScoreRange::new(-2, 3).unwrap());
        assert_eq!(e.score_pairs(&[("CDLENGULFING", 100)]), 3);
        assert_eq!(e.score_pairs(&[("CDLENGULFING", -100)]), -2);
        assert!(ScoreRange::new(3, -3).is_err());
    }

    #[test]
    fn categories_partition_the_range() {
        let b = CategoryBounds::default();
        let cat = |s| categorize_score(Some(s), &b).0.unwrap();
        for s in [3, 4, 5] {
            assert_eq!(cat(s), ScoreCategory::StrongPositive);
        }
        for s in [1, 2] {
            assert_eq!(cat(s), ScoreCategory::MildPositive);
        }
        assert_eq!(cat(0), ScoreCategory::Neutral);
        for s in [-1, -2] {
            assert_eq!(cat(s), ScoreCategory::MildNegative);
        }
        for s in [-3, -4, -5] {
            assert_eq!(cat(s), ScoreCategory::StrongNegative);
        }
    }

    #[test]
    fn category_labels() {
        let b = CategoryBounds::default();
        assert_eq!(
            categorize_score(Some(4), &b),
            (Some(ScoreCategory::StrongPositive), "↑↑ Strong+ (+4)".to_string())
        );
        assert_eq!(categorize_score(Some(2), &b).1, "↑ Mild+ (+2)");
        assert_eq!(categorize_score(Some(0), &b).1, "Neutral (0)");
        assert_eq!(categorize_score(Some(-1), &b).1, "↓ Mild- (-1)");
        assert_eq!(categorize_score(Some(-5), &b).1, "↓↓ Strong- (-5)");
        assert_eq!(categorize_score(None, &b), (None, "—".to_string()));
    }

    #[test]
    fn bounds_are_validated() {
        assert!(CategoryBounds::new(3, 1).is_ok());
        assert!(CategoryBounds::new(1, 3).is_err());
        assert!(CategoryBounds::new(2, 0).is_err());
    }
}
