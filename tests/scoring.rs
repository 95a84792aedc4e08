use std::path::PathBuf;
use std::sync::Arc;

use candle_screener::{
    BiasTable, CategoryBounds, DetectorRegistry, PatternAnalyzer, PriceBar, RawHit, ScoreRange,
    ScoringEngine, categorize_score, parse_hit_records,
};
use chrono::NaiveDate;
use serde_json::json;

fn dataset() -> Arc<BiasTable> {
    let path = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/resources/cdl_bias.csv"));
    Arc::new(BiasTable::load(&path).unwrap())
}

fn engine() -> ScoringEngine {
    ScoringEngine::new(dataset(), ScoreRange::default())
}

#[test]
fn out_of_range_values_still_clamp() {
    let hits = parse_hit_records(&[
        json!({"fn": "CDLENGULFING", "value": 100}),
        json!({"fn": "CDLENGULFING", "value": -100}),
        json!({"fn": "CDLKICKINGBYLENGTH", "value": 200}),
    ]);
    assert_eq!(hits.len(), 3);
    let total = engine().total_score_from_hits(&hits);
    assert!((-5..=5).contains(&total));
    // +4 - 4 + 8 before clamping
    assert_eq!(total, 5);
}

#[test]
fn malformed_records_are_skipped() {
    let hits = parse_hit_records(&[
        json!({"fn": "CDLHAMMER", "value": "abc"}),
        json!({"value": 100}),
        json!({"fn": "CDLHAMMER", "value": 100}),
    ]);
    assert_eq!(hits, vec![RawHit::new("CDLHAMMER", 100)]);
    assert_eq!(engine().total_score_from_hits(&hits), 3);
}

#[test]
fn labels_for_each_category() {
    let bounds = CategoryBounds::default();
    let cases = [
        (4, "Strong-positive", "↑↑ Strong+ (+4)"),
        (2, "Mild-positive", "↑ Mild+ (+2)"),
        (0, "Neutral", "Neutral (0)"),
        (-1, "Mild-negative", "↓ Mild- (-1)"),
        (-5, "Strong-negative", "↓↓ Strong- (-5)"),
    ];
    for (score, category, label) in cases {
        let (got_category, got_label) = categorize_score(Some(score), &bounds);
        assert_eq!(got_category.map(|c| c.as_str()), Some(category));
        assert_eq!(got_label, label);
    }
    assert_eq!(categorize_score(None, &bounds), (None, "—".to_string()));
}

#[test]
fn empty_input_and_repeat_calls() {
    let engine = engine();
    let none: Vec<RawHit> = Vec::new();
    assert_eq!(engine.total_score_from_hits(&none), 0);
    assert!(engine.enrich_hits(&none, None).is_empty());

    let hits = vec![
        RawHit::new("CDLSHOOTINGSTAR", -100),
        RawHit::new("CDLHAMMER", 100),
    ];
    let first = engine.enrich_hits(&hits, None);
    let second = engine.enrich_hits(&hits, None);
    assert_eq!(first, second);
    assert_eq!(first[0].english.as_deref(), Some("Shooting Star"));
    assert_eq!(first[0].weighted_score, Some(-3.0));
}

#[test]
fn every_builtin_detector_has_a_bias_entry() {
    let bias = dataset();
    let registry = DetectorRegistry::builtin();
    for id in registry.ids() {
        assert!(!bias.entries_for(id).is_empty(), "{id} has no bias entry");
    }
}

#[test]
fn short_series_yields_bounded_history() {
    let analyzer = PatternAnalyzer::new(DetectorRegistry::builtin(), engine());
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let bars: Vec<PriceBar> = (0..5)
        .map(|i| {
            let base = 100.0 - i as f64;
            PriceBar {
                date: start + chrono::Days::new(i),
                open: base,
                high: base + 1.5,
                low: base - 1.5,
                close: base - 0.5,
                volume: Some(1_000.0),
            }
        })
        .collect();
    let detection = analyzer.detect_with_history(&bars, 20, None);
    assert!(detection.history.len() <= bars.len());
    for entry in &detection.history {
        assert!((-5..=5).contains(&entry.total_score));
    }
}
