//! Runs detectors over a price series and builds today's hits plus a scored
//! per-day timeline over a trailing window.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

use crate::detectors::DetectorRegistry;
use crate::models::{HistoryEntry, PriceBar, RawHit};
use crate::scoring::ScoringEngine;

/// Raw hits for the most recent bar and the scored timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub today: Vec<RawHit>,
    pub history: Vec<HistoryEntry>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.today.is_empty() && self.history.is_empty()
    }
}

#[derive(Clone)]
pub struct PatternAnalyzer {
    registry: DetectorRegistry,
    engine: ScoringEngine,
}

impl PatternAnalyzer {
    pub fn new(registry: DetectorRegistry, engine: ScoringEngine) -> Self {
        Self { registry, engine }
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Runs every enabled detector across the whole series.
    ///
    /// `today` holds the nonzero outputs of the last bar. `history` holds one
    /// entry per day with at least one hit among the last `lookback` bars,
    /// oldest first. An empty series or registry yields an empty result, and a
    /// detector that errors or panics is skipped.
    pub fn detect_with_history(
        &self,
        bars: &[PriceBar],
        lookback: usize,
        enabled: Option<&[String]>,
    ) -> Detection {
        if bars.is_empty() || self.registry.is_empty() {
            return Detection::default();
        }

        let open: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let mut signals: Vec<(&str, Vec<i32>)> = Vec::new();
        for (id, detector) in self.registry.select(enabled) {
            let outcome = catch_unwind(AssertUnwindSafe(|| detector(&open, &high, &low, &close)));
            let Ok(result) = outcome else {
                warn!(detector = id, "detector panicked, skipping");
                continue;
            };
            match result {
                Ok(series) if series.len() == bars.len() => signals.push((id, series)),
                Ok(series) => warn!(
                    detector = id,
                    got = series.len(),
                    expected = bars.len(),
                    "detector returned a series of the wrong length, skipping"
                ),
                Err(err) => warn!(detector = id, error = %err, "detector failed, skipping"),
            }
        }
        if signals.is_empty() {
            return Detection::default();
        }

        let hits_at = |idx: usize| -> Vec<RawHit> {
            signals
                .iter()
                .filter(|(_, series)| series[idx] != 0)
                .map(|(id, series)| RawHit::new(*id, series[idx]))
                .collect()
        };

        let last = bars.len() - 1;
        let today = hits_at(last);

        let start = bars.len() - lookback.min(bars.len());
        let history: Vec<HistoryEntry> = (start..bars.len())
            .filter_map(|idx| {
                let raw = hits_at(idx);
                if raw.is_empty() {
                    return None;
                }
                let date = bars[idx].date;
                Some(HistoryEntry {
                    date,
                    total_score: self.engine.total_score_from_hits(&raw),
                    hits: self.engine.enrich_hits(&raw, Some(date)),
                })
            })
            .collect();

        debug!(
            bars = bars.len(),
            detectors = signals.len(),
            today = today.len(),
            history_days = history.len(),
            "pattern detection finished"
        );
        Detection { today, history }
    }
}
