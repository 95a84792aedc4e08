//! Candlestick pattern detectors and their registry.
//!
//! Every detector takes four equal-length price columns and returns one signal
//! per bar using TA-Lib conventions: 0 for no pattern, +100 bullish, -100
//! bearish. Body and range comparisons are made against the trailing
//! `AVG_PERIOD`-bar averages, so the first bars of a series always read 0.

use std::collections::BTreeMap;

use ta::Next;
use ta::indicators::SimpleMovingAverage;
use thiserror::Error;

const AVG_PERIOD: usize = 10;
const TREND_PERIOD: usize = 5;
const DOJI_FACTOR: f64 = 0.1;
const SHADOW_VERY_SHORT_FACTOR: f64 = 0.1;
const STAR_PENETRATION: f64 = 0.3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("price columns differ in length (open {open}, high {high}, low {low}, close {close})")]
    LengthMismatch {
        open: usize,
        high: usize,
        low: usize,
        close: usize,
    },

    #[error("non-finite price at index {index}")]
    NonFinite { index: usize },

    #[error("indicator setup failed: {0}")]
    Indicator(String),
}

pub type DetectorFn = fn(&[f64], &[f64], &[f64], &[f64]) -> Result<Vec<i32>, DetectorError>;

/// Explicit id -> detector mapping. An empty registry means no backend.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<String, DetectorFn>,
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All natively implemented detectors.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("CDLDOJI", cdl_doji);
        registry.register("CDLDRAGONFLYDOJI", cdl_dragonfly_doji);
        registry.register("CDLGRAVESTONEDOJI", cdl_gravestone_doji);
        registry.register("CDLHAMMER", cdl_hammer);
        registry.register("CDLHANGINGMAN", cdl_hanging_man);
        registry.register("CDLINVERTEDHAMMER", cdl_inverted_hammer);
        registry.register("CDLSHOOTINGSTAR", cdl_shooting_star);
        registry.register("CDLMARUBOZU", cdl_marubozu);
        registry.register("CDLSPINNINGTOP", cdl_spinning_top);
        registry.register("CDLENGULFING", cdl_engulfing);
        registry.register("CDLHARAMI", cdl_harami);
        registry.register("CDLPIERCING", cdl_piercing);
        registry.register("CDLDARKCLOUDCOVER", cdl_dark_cloud_cover);
        registry.register("CDLKICKINGBYLENGTH", cdl_kicking_by_length);
        registry.register("CDLMORNINGSTAR", cdl_morning_star);
        registry.register("CDLEVENINGSTAR", cdl_evening_star);
        registry.register("CDL3WHITESOLDIERS", cdl_three_white_soldiers);
        registry.register("CDL3BLACKCROWS", cdl_three_black_crows);
        registry
    }

    pub fn register(&mut self, id: &str, detector: DetectorFn) {
        self.detectors.insert(id.to_ascii_uppercase(), detector);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.detectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Detectors to run, in id order. `None` selects all; names match
    /// case-insensitively and unknown names are ignored.
    pub fn select(&self, enabled: Option<&[String]>) -> Vec<(&str, DetectorFn)> {
        match enabled {
            None => self
                .detectors
                .iter()
                .map(|(id, f)| (id.as_str(), *f))
                .collect(),
            Some(names) => self
                .detectors
                .iter()
                .filter(|(id, _)| names.iter().any(|n| n.eq_ignore_ascii_case(id)))
                .map(|(id, f)| (id.as_str(), *f))
                .collect(),
        }
    }
}

// --- Candle geometry ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Up,
    Down,
    Flat,
}

struct Candles<'a> {
    open: &'a [f64],
    high: &'a [f64],
    low: &'a [f64],
    close: &'a [f64],
    avg_body: Vec<Option<f64>>,
    avg_range: Vec<Option<f64>>,
}

impl<'a> Candles<'a> {
    fn new(
        open: &'a [f64],
        high: &'a [f64],
        low: &'a [f64],
        close: &'a [f64],
    ) -> Result<Self, DetectorError> {
        let len = open.len();
        if high.len() != len || low.len() != len || close.len() != len {
            return Err(DetectorError::LengthMismatch {
                open: open.len(),
                high: high.len(),
                low: low.len(),
                close: close.len(),
            });
        }
        for i in 0..len {
            if !(open[i].is_finite() && high[i].is_finite() && low[i].is_finite() && close[i].is_finite()) {
                return Err(DetectorError::NonFinite { index: i });
            }
        }

        let bodies: Vec<f64> = (0..len).map(|i| (close[i] - open[i]).abs()).collect();
        let ranges: Vec<f64> = (0..len).map(|i| high[i] - low[i]).collect();

        Ok(Self {
            open,
            high,
            low,
            close,
            avg_body: trailing_average(&bodies, AVG_PERIOD)?,
            avg_range: trailing_average(&ranges, AVG_PERIOD)?,
        })
    }

    /// Runs `rule` on every bar that has averages for all `bars` candles of
    /// the pattern; earlier bars read 0.
    fn scan(&self, bars: usize, rule: impl Fn(&Self, usize) -> i32) -> Vec<i32> {
        let first = AVG_PERIOD + bars - 1;
        (0..self.open.len())
            .map(|i| if i >= first { rule(self, i) } else { 0 })
            .collect()
    }

    fn body(&self, i: usize) -> f64 {
        (self.close[i] - self.open[i]).abs()
    }

    fn body_top(&self, i: usize) -> f64 {
        self.open[i].max(self.close[i])
    }

    fn body_bottom(&self, i: usize) -> f64 {
        self.open[i].min(self.close[i])
    }

    fn upper_shadow(&self, i: usize) -> f64 {
        self.high[i] - self.body_top(i)
    }

    fn lower_shadow(&self, i: usize) -> f64 {
        self.body_bottom(i) - self.low[i]
    }

    fn is_white(&self, i: usize) -> bool {
        self.close[i] > self.open[i]
    }

    fn is_black(&self, i: usize) -> bool {
        self.close[i] < self.open[i]
    }

    /// +1 for white (or unchanged) candles, -1 for black.
    fn color(&self, i: usize) -> i32 {
        if self.close[i] >= self.open[i] { 1 } else { -1 }
    }

    // Missing averages become NaN so every comparison below is false.
    fn avg_body(&self, i: usize) -> f64 {
        self.avg_body[i].unwrap_or(f64::NAN)
    }

    fn avg_range(&self, i: usize) -> f64 {
        self.avg_range[i].unwrap_or(f64::NAN)
    }

    fn body_long(&self, i: usize) -> bool {
        self.body(i) > self.avg_body(i)
    }

    fn body_short(&self, i: usize) -> bool {
        self.body(i) < self.avg_body(i)
    }

    fn body_doji(&self, i: usize) -> bool {
        self.body(i) <= DOJI_FACTOR * self.avg_range(i)
    }

    fn shadow_very_short(&self, shadow: f64, i: usize) -> bool {
        shadow < SHADOW_VERY_SHORT_FACTOR * self.avg_range(i)
    }

    fn shadow_very_long(&self, shadow: f64, i: usize) -> bool {
        shadow > 2.0 * self.body(i)
    }

    fn marubozu(&self, i: usize) -> bool {
        self.body_long(i)
            && self.shadow_very_short(self.upper_shadow(i), i)
            && self.shadow_very_short(self.lower_shadow(i), i)
    }

    /// Direction of the closes leading into bar `i`.
    fn trend_before(&self, i: usize) -> Trend {
        if i <= TREND_PERIOD {
            return Trend::Flat;
        }
        let last = self.close[i - 1];
        let earlier = self.close[i - 1 - TREND_PERIOD];
        if last < earlier {
            Trend::Down
        } else if last > earlier {
            Trend::Up
        } else {
            Trend::Flat
        }
    }
}

/// Mean of the `period` values before each index (`None` until available).
fn trailing_average(values: &[f64], period: usize) -> Result<Vec<Option<f64>>, DetectorError> {
    let mut sma =
        SimpleMovingAverage::new(period).map_err(|e| DetectorError::Indicator(format!("{e:?}")))?;
    let mut out = Vec::with_capacity(values.len());
    let mut previous = None;
    for (i, &value) in values.iter().enumerate() {
        out.push(if i >= period { previous } else { None });
        previous = Some(sma.next(value));
    }
    Ok(out)
}

// --- Single-bar patterns ---

pub fn cdl_doji(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| if cs.body_doji(i) { 100 } else { 0 }))
}

pub fn cdl_dragonfly_doji(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        let hit = cs.body_doji(i)
            && cs.shadow_very_short(cs.upper_shadow(i), i)
            && !cs.shadow_very_short(cs.lower_shadow(i), i);
        if hit { 100 } else { 0 }
    }))
}

pub fn cdl_gravestone_doji(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        let hit = cs.body_doji(i)
            && cs.shadow_very_short(cs.lower_shadow(i), i)
            && !cs.shadow_very_short(cs.upper_shadow(i), i);
        if hit { 100 } else { 0 }
    }))
}

fn hammer_shape(cs: &Candles, i: usize) -> bool {
    cs.body_short(i)
        && cs.shadow_very_long(cs.lower_shadow(i), i)
        && cs.shadow_very_short(cs.upper_shadow(i), i)
}

fn inverted_hammer_shape(cs: &Candles, i: usize) -> bool {
    cs.body_short(i)
        && cs.shadow_very_long(cs.upper_shadow(i), i)
        && cs.shadow_very_short(cs.lower_shadow(i), i)
}

pub fn cdl_hammer(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        if hammer_shape(cs, i) && cs.trend_before(i) == Trend::Down { 100 } else { 0 }
    }))
}

pub fn cdl_hanging_man(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        if hammer_shape(cs, i) && cs.trend_before(i) == Trend::Up { -100 } else { 0 }
    }))
}

pub fn cdl_inverted_hammer(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        if inverted_hammer_shape(cs, i) && cs.trend_before(i) == Trend::Down { 100 } else { 0 }
    }))
}

pub fn cdl_shooting_star(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        if inverted_hammer_shape(cs, i) && cs.trend_before(i) == Trend::Up { -100 } else { 0 }
    }))
}

pub fn cdl_marubozu(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| if cs.marubozu(i) { cs.color(i) * 100 } else { 0 }))
}

pub fn cdl_spinning_top(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(1, |cs, i| {
        let hit = cs.body_short(i)
            && !cs.body_doji(i)
            && cs.upper_shadow(i) > cs.body(i)
            && cs.lower_shadow(i) > cs.body(i);
        if hit { cs.color(i) * 100 } else { 0 }
    }))
}

// --- Two-bar patterns ---

pub fn cdl_engulfing(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(2, |cs, i| {
        let p = i - 1;
        let (open, close) = (cs.open[i], cs.close[i]);
        let (p_open, p_close) = (cs.open[p], cs.close[p]);
        if cs.is_white(i)
            && cs.is_black(p)
            && open <= p_close
            && close >= p_open
            && (open < p_close || close > p_open)
        {
            100
        } else if cs.is_black(i)
            && cs.is_white(p)
            && open >= p_close
            && close <= p_open
            && (open > p_close || close < p_open)
        {
            -100
        } else {
            0
        }
    }))
}

pub fn cdl_harami(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(2, |cs, i| {
        let p = i - 1;
        let inside = cs.body_top(i) < cs.body_top(p) && cs.body_bottom(i) > cs.body_bottom(p);
        if cs.body_long(p) && cs.body_short(i) && inside {
            -cs.color(p) * 100
        } else {
            0
        }
    }))
}

pub fn cdl_piercing(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(2, |cs, i| {
        let p = i - 1;
        let hit = cs.is_black(p)
            && cs.body_long(p)
            && cs.is_white(i)
            && cs.body_long(i)
            && cs.open[i] < cs.low[p]
            && cs.close[i] > cs.close[p] + cs.body(p) * 0.5
            && cs.close[i] < cs.open[p];
        if hit { 100 } else { 0 }
    }))
}

pub fn cdl_dark_cloud_cover(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(2, |cs, i| {
        let p = i - 1;
        let hit = cs.is_white(p)
            && cs.body_long(p)
            && cs.is_black(i)
            && cs.open[i] > cs.high[p]
            && cs.close[i] < cs.close[p] - cs.body(p) * 0.5
            && cs.close[i] > cs.open[p];
        if hit { -100 } else { 0 }
    }))
}

pub fn cdl_kicking_by_length(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(2, |cs, i| {
        let p = i - 1;
        if !(cs.marubozu(p) && cs.marubozu(i)) || cs.color(p) == cs.color(i) {
            return 0;
        }
        let gapped = if cs.is_white(i) {
            cs.low[i] > cs.high[p]
        } else {
            cs.high[i] < cs.low[p]
        };
        if !gapped {
            return 0;
        }
        let dominant = if cs.body(i) >= cs.body(p) { i } else { p };
        cs.color(dominant) * 100
    }))
}

// --- Three-bar patterns ---

pub fn cdl_morning_star(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(3, |cs, i| {
        let (first, star) = (i - 2, i - 1);
        let hit = cs.is_black(first)
            && cs.body_long(first)
            && cs.body_short(star)
            && cs.body_top(star) < cs.close[first]
            && cs.is_white(i)
            && cs.close[i] > cs.close[first] + cs.body(first) * STAR_PENETRATION;
        if hit { 100 } else { 0 }
    }))
}

pub fn cdl_evening_star(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(3, |cs, i| {
        let (first, star) = (i - 2, i - 1);
        let hit = cs.is_white(first)
            && cs.body_long(first)
            && cs.body_short(star)
            && cs.body_bottom(star) > cs.close[first]
            && cs.is_black(i)
            && cs.close[i] < cs.close[first] - cs.body(first) * STAR_PENETRATION;
        if hit { -100 } else { 0 }
    }))
}

pub fn cdl_three_white_soldiers(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(3, |cs, i| {
        let bars = [i - 2, i - 1, i];
        let each = bars.iter().all(|&k| {
            cs.is_white(k) && !cs.body_short(k) && cs.shadow_very_short(cs.upper_shadow(k), k)
        });
        let stepping = bars.windows(2).all(|w| {
            let (p, k) = (w[0], w[1]);
            cs.close[k] > cs.close[p] && cs.open[k] > cs.open[p] && cs.open[k] <= cs.close[p]
        });
        if each && stepping { 100 } else { 0 }
    }))
}

pub fn cdl_three_black_crows(o: &[f64], h: &[f64], l: &[f64], c: &[f64]) -> Result<Vec<i32>, DetectorError> {
    let cs = Candles::new(o, h, l, c)?;
    Ok(cs.scan(3, |cs, i| {
        let bars = [i - 2, i - 1, i];
        let each = bars.iter().all(|&k| {
            cs.is_black(k) && !cs.body_short(k) && cs.shadow_very_short(cs.lower_shadow(k), k)
        });
        let stepping = bars.windows(2).all(|w| {
            let (p, k) = (w[0], w[1]);
            cs.close[k] < cs.close[p] && cs.open[k] < cs.open[p] && cs.open[k] >= cs.close[p]
        });
        if each && stepping { -100 } else { 0 }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    type Columns = (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>);

    fn push(cols: &mut Columns, o: f64, h: f64, l: f64, c: f64) {
        cols.0.push(o);
        cols.1.push(h);
        cols.2.push(l);
        cols.3.push(c);
    }

    /// Ten small white candles: body 0.5, range 0.9.
    fn quiet_base() -> Columns {
        let mut cols = Columns::default();
        for _ in 0..AVG_PERIOD {
            push(&mut cols, 10.0, 10.7, 9.8, 10.5);
        }
        cols
    }

    /// Twelve black candles stepping down by 0.5 (body 0.4, range 0.6).
    fn falling_base() -> Columns {
        let mut cols = Columns::default();
        for k in 0..12 {
            let mid = 20.0 - k as f64 * 0.5;
            push(&mut cols, mid + 0.2, mid + 0.3, mid - 0.3, mid - 0.2);
        }
        cols
    }

    /// Twelve white candles stepping up by 0.5 (body 0.4, range 0.6).
    fn rising_base() -> Columns {
        let mut cols = Columns::default();
        for k in 0..12 {
            let mid = 10.0 + k as f64 * 0.5;
            push(&mut cols, mid - 0.2, mid + 0.3, mid - 0.3, mid + 0.2);
        }
        cols
    }

    fn run(f: DetectorFn, cols: &Columns) -> Vec<i32> {
        f(&cols.0, &cols.1, &cols.2, &cols.3).unwrap()
    }

    fn last(f: DetectorFn, cols: &Columns) -> i32 {
        run(f, cols).last().copied().unwrap_or_default()
    }

    fn with(base: fn() -> Columns, bars: &[(f64, f64, f64, f64)]) -> Columns {
        let mut cols = base();
        for &(o, h, l, c) in bars {
            push(&mut cols, o, h, l, c);
        }
        cols
    }

    #[test]
    fn bullish_and_bearish_engulfing() {
        let mut cols = quiet_base();
        push(&mut cols, 10.6, 10.7, 10.1, 10.2);
        push(&mut cols, 10.1, 10.9, 10.0, 10.8);
        let out = run(cdl_engulfing, &cols);
        assert_eq!(out.len(), 12);
        assert_eq!(out[11], 100);
        assert!(out[..11].iter().all(|&v| v == 0));

        let mut cols = quiet_base();
        push(&mut cols, 10.2, 10.7, 10.1, 10.6);
        push(&mut cols, 10.7, 10.8, 10.0, 10.1);
        assert_eq!(run(cdl_engulfing, &cols)[11], -100);
    }

    #[test]
    fn doji_after_warmup() {
        let mut cols = quiet_base();
        push(&mut cols, 10.3, 10.7, 9.9, 10.3);
        let out = run(cdl_doji, &cols);
        assert_eq!(out[10], 100);
        assert!(out[..10].iter().all(|&v| v == 0));
    }

    #[test]
    fn hammer_needs_a_downtrend() {
        let mut cols = falling_base();
        push(&mut cols, 14.0, 14.1, 13.5, 14.1);
        assert_eq!(run(cdl_hammer, &cols)[12], 100);
        assert_eq!(run(cdl_hanging_man, &cols)[12], 0);
    }

    #[test]
    fn dragonfly_and_gravestone_doji() {
        let dragonfly = with(falling_base, &[(14.0, 14.02, 13.5, 14.0)]);
        assert_eq!(last(cdl_dragonfly_doji, &dragonfly), 100);
        assert_eq!(last(cdl_gravestone_doji, &dragonfly), 0);

        let gravestone = with(falling_base, &[(14.0, 14.5, 13.98, 14.0)]);
        assert_eq!(last(cdl_gravestone_doji, &gravestone), 100);
        assert_eq!(last(cdl_dragonfly_doji, &gravestone), 0);
    }

    #[test]
    fn hanging_man_needs_an_uptrend() {
        let cols = with(rising_base, &[(16.0, 16.11, 15.5, 16.1)]);
        assert_eq!(last(cdl_hanging_man, &cols), -100);
        assert_eq!(last(cdl_hammer, &cols), 0);
    }

    #[test]
    fn inverted_hammer_and_shooting_star_follow_the_trend() {
        let down = with(falling_base, &[(14.0, 14.5, 13.99, 14.1)]);
        assert_eq!(last(cdl_inverted_hammer, &down), 100);
        assert_eq!(last(cdl_shooting_star, &down), 0);

        let up = with(rising_base, &[(16.0, 16.5, 15.99, 16.1)]);
        assert_eq!(last(cdl_shooting_star, &up), -100);
        assert_eq!(last(cdl_inverted_hammer, &up), 0);
    }

    #[test]
    fn marubozu_sign_is_the_candle_colour() {
        assert_eq!(last(cdl_marubozu, &with(quiet_base, &[(10.0, 11.05, 9.98, 11.0)])), 100);
        assert_eq!(last(cdl_marubozu, &with(quiet_base, &[(11.0, 11.02, 9.95, 10.0)])), -100);
        // An average-sized body is not long enough.
        let out = run(cdl_marubozu, &with(quiet_base, &[(10.0, 10.7, 9.8, 10.5)]));
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn spinning_top_sign_is_the_candle_colour() {
        assert_eq!(last(cdl_spinning_top, &with(quiet_base, &[(10.2, 10.8, 9.9, 10.4)])), 100);
        assert_eq!(last(cdl_spinning_top, &with(quiet_base, &[(10.4, 10.8, 9.9, 10.2)])), -100);
        assert_eq!(last(cdl_spinning_top, &with(quiet_base, &[(10.0, 10.7, 9.8, 10.5)])), 0);
    }

    #[test]
    fn harami_opposes_the_mother_candle() {
        let bullish = with(quiet_base, &[(11.0, 11.1, 9.9, 10.0), (10.4, 10.7, 10.3, 10.6)]);
        assert_eq!(last(cdl_harami, &bullish), 100);

        let bearish = with(quiet_base, &[(10.0, 11.1, 9.9, 11.0), (10.6, 10.7, 10.3, 10.4)]);
        assert_eq!(last(cdl_harami, &bearish), -100);

        // Second body pokes out of the first.
        let outside = with(quiet_base, &[(11.0, 11.1, 9.9, 10.0), (10.4, 11.3, 10.3, 11.2)]);
        assert_eq!(last(cdl_harami, &outside), 0);
    }

    #[test]
    fn piercing_must_close_past_the_midpoint() {
        let hit = with(quiet_base, &[(11.0, 11.1, 9.9, 10.0), (9.8, 10.8, 9.7, 10.7)]);
        assert_eq!(last(cdl_piercing, &hit), 100);
        let shallow = with(quiet_base, &[(11.0, 11.1, 9.9, 10.0), (9.8, 10.5, 9.7, 10.4)]);
        assert_eq!(last(cdl_piercing, &shallow), 0);
    }

    #[test]
    fn dark_cloud_must_close_past_the_midpoint() {
        let hit = with(quiet_base, &[(10.0, 11.1, 9.9, 11.0), (11.2, 11.3, 10.2, 10.3)]);
        assert_eq!(last(cdl_dark_cloud_cover, &hit), -100);
        let shallow = with(quiet_base, &[(10.0, 11.1, 9.9, 11.0), (11.2, 11.3, 10.6, 10.7)]);
        assert_eq!(last(cdl_dark_cloud_cover, &shallow), 0);
    }

    #[test]
    fn kicking_follows_the_longer_marubozu() {
        let up = with(quiet_base, &[(11.0, 11.02, 9.98, 10.0), (11.1, 12.32, 11.08, 12.3)]);
        assert_eq!(last(cdl_kicking_by_length, &up), 100);

        let down = with(quiet_base, &[(10.0, 11.02, 9.98, 11.0), (9.9, 9.92, 8.68, 8.7)]);
        assert_eq!(last(cdl_kicking_by_length, &down), -100);

        // White kick, but the black first bar has the longer body.
        let dominant_first =
            with(quiet_base, &[(11.5, 11.52, 9.98, 10.0), (11.6, 12.62, 11.58, 12.6)]);
        assert_eq!(last(cdl_kicking_by_length, &dominant_first), -100);

        let same_colour = with(quiet_base, &[(10.0, 11.02, 9.98, 11.0), (11.1, 12.32, 11.08, 12.3)]);
        assert_eq!(last(cdl_kicking_by_length, &same_colour), 0);
    }

    #[test]
    fn morning_and_evening_star() {
        let morning = with(
            quiet_base,
            &[(11.0, 11.1, 9.9, 10.0), (9.7, 9.9, 9.6, 9.8), (9.9, 10.7, 9.85, 10.6)],
        );
        assert_eq!(last(cdl_morning_star, &morning), 100);
        assert_eq!(last(cdl_evening_star, &morning), 0);
        let weak = with(
            quiet_base,
            &[(11.0, 11.1, 9.9, 10.0), (9.7, 9.9, 9.6, 9.8), (9.9, 10.3, 9.85, 10.2)],
        );
        assert_eq!(last(cdl_morning_star, &weak), 0);

        let evening = with(
            quiet_base,
            &[(10.0, 11.1, 9.9, 11.0), (11.3, 11.4, 11.1, 11.2), (11.1, 11.15, 10.3, 10.4)],
        );
        assert_eq!(last(cdl_evening_star, &evening), -100);
        let weak = with(
            quiet_base,
            &[(10.0, 11.1, 9.9, 11.0), (11.3, 11.4, 11.1, 11.2), (11.1, 11.15, 10.75, 10.8)],
        );
        assert_eq!(last(cdl_evening_star, &weak), 0);
    }

    #[test]
    fn three_white_soldiers_and_black_crows() {
        let soldiers = [
            (10.0, 10.82, 9.95, 10.8),
            (10.5, 11.32, 10.45, 11.3),
            (11.0, 11.82, 10.95, 11.8),
        ];
        assert_eq!(last(cdl_three_white_soldiers, &with(quiet_base, &soldiers)), 100);
        let mut capped = soldiers;
        capped[2].1 = 12.2;
        assert_eq!(last(cdl_three_white_soldiers, &with(quiet_base, &capped)), 0);

        let crows = [
            (10.8, 10.85, 9.98, 10.0),
            (10.3, 10.35, 9.48, 9.5),
            (9.8, 9.85, 8.98, 9.0),
        ];
        assert_eq!(last(cdl_three_black_crows, &with(quiet_base, &crows)), -100);
        let mut gapped = crows;
        gapped[2] = (9.4, 9.45, 8.58, 8.6);
        assert_eq!(last(cdl_three_black_crows, &with(quiet_base, &gapped)), 0);
    }

    #[test]
    fn short_series_reads_all_zero() {
        let cols = {
            let mut cols = Columns::default();
            for _ in 0..5 {
                push(&mut cols, 10.0, 10.7, 9.8, 10.0);
            }
            cols
        };
        for (_, f) in DetectorRegistry::builtin().select(None) {
            assert_eq!(run(f, &cols), vec![0; 5]);
        }
    }

    #[test]
    fn rejects_bad_input() {
        let err = cdl_doji(&[1.0, 2.0], &[1.0], &[1.0, 2.0], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, DetectorError::LengthMismatch { high: 1, .. }));

        let err = cdl_doji(&[1.0, f64::NAN], &[1.0, 2.0], &[1.0, 2.0], &[1.0, 2.0]).unwrap_err();
        assert_eq!(err, DetectorError::NonFinite { index: 1 });
    }

    #[test]
    fn registry_selection_is_case_insensitive() {
        let registry = DetectorRegistry::builtin();
        assert_eq!(registry.len(), 18);
        let names = vec!["cdlengulfing".to_string(), "CDLNOPE".to_string()];
        let picked = registry.select(Some(names.as_slice()));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].0, "CDLENGULFING");
        assert!(DetectorRegistry::empty().select(None).is_empty());
    }
}
