//! Pure, stateless transforms from OHLCV series to named indicator values.
//!
//! Indicators are explicit trait objects composed by the pipeline in a
//! fixed, ordered list. Series shorter than an indicator's lookback yield
//! [`IndicatorValue::Insufficient`] rather than failing, so short-history
//! symbols still produce a partial signal.

use crate::config::IndicatorConfig;
use crate::domain::types::{IndicatorSet, IndicatorValue, OhlcvSeries};
use statrs::statistics::Statistics;
use ta::Next;
use ta::indicators::{
    MovingAverageConvergenceDivergence, RateOfChange, RelativeStrengthIndex, SimpleMovingAverage,
};

/// One named indicator computation.
pub trait Indicator: Send + Sync {
    fn name(&self) -> &'static str;
    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue;
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if value <= min {
        0.0
    } else if value >= max {
        1.0
    } else {
        (value - min) / (max - min)
    }
}

fn stream_last<I>(indicator: &mut I, values: &[f64]) -> f64
where
    I: Next<f64, Output = f64>,
{
    let mut last = 0.0;
    for v in values {
        last = indicator.next(*v);
    }
    last
}

// A series with no price movement makes the RSI ratio 0/0.
fn last_rsi(rsi: &mut RelativeStrengthIndex, values: &[f64]) -> f64 {
    let value = stream_last(rsi, values);
    if value.is_finite() { value } else { 50.0 }
}

fn last_macd(
    fast: usize,
    slow: usize,
    signal: usize,
    values: &[f64],
) -> Option<(f64, f64, f64)> {
    let mut macd = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;
    let mut last = None;
    for v in values {
        let out = macd.next(*v);
        last = Some((out.macd, out.signal, out.histogram));
    }
    last
}

/// Composite trend score on [-1, 1], built from the moving-average stack,
/// MACD histogram direction, RSI positioning and volume confirmation.
pub struct TrendScore {
    rsi_period: usize,
    macd_fast: usize,
    macd_slow: usize,
    macd_signal: usize,
    sma_fast: usize,
    sma_slow: usize,
    sma_trend: usize,
}

impl TrendScore {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            rsi_period: config.rsi_period,
            macd_fast: config.macd_fast,
            macd_slow: config.macd_slow,
            macd_signal: config.macd_signal,
            sma_fast: config.sma_fast,
            sma_slow: config.sma_slow,
            sma_trend: config.sma_trend,
        }
    }
}

impl Indicator for TrendScore {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        let closes = series.closes();
        if closes.len() < self.sma_slow {
            return IndicatorValue::Insufficient;
        }
        let Some(&price) = closes.last() else {
            return IndicatorValue::Insufficient;
        };

        let Ok(mut sma_fast) = SimpleMovingAverage::new(self.sma_fast) else {
            return IndicatorValue::Insufficient;
        };
        let Ok(mut sma_slow) = SimpleMovingAverage::new(self.sma_slow) else {
            return IndicatorValue::Insufficient;
        };
        let Ok(mut rsi) = RelativeStrengthIndex::new(self.rsi_period) else {
            return IndicatorValue::Insufficient;
        };

        let s_fast = stream_last(&mut sma_fast, &closes);
        let s_slow = stream_last(&mut sma_slow, &closes);
        // The long-horizon average only participates when enough history exists.
        let s_trend = if closes.len() >= self.sma_trend {
            SimpleMovingAverage::new(self.sma_trend)
                .ok()
                .map(|mut sma| stream_last(&mut sma, &closes))
        } else {
            None
        };

        let Some((_, _, hist)) =
            last_macd(self.macd_fast, self.macd_slow, self.macd_signal, &closes)
        else {
            return IndicatorValue::Insufficient;
        };

        let rsi_score = normalize(last_rsi(&mut rsi, &closes), 30.0, 70.0) * 100.0;
        let macd_score = if hist > 0.0 {
            100.0
        } else if hist < 0.0 {
            0.0
        } else {
            50.0
        };

        let ma_score = if price > s_fast && s_fast > s_slow && s_trend.is_some_and(|s| s_slow > s)
        {
            100.0
        } else if price > s_fast && price > s_slow {
            75.0
        } else if price > s_fast {
            60.0
        } else if price < s_fast && s_fast < s_slow && s_trend.is_some_and(|s| s_slow < s) {
            0.0
        } else if price < s_fast && price < s_slow {
            25.0
        } else if price < s_fast {
            40.0
        } else {
            50.0
        };

        let volumes = series.volumes();
        let volume_score = match SimpleMovingAverage::new(self.sma_fast) {
            Ok(mut vol_sma) => {
                let v_avg = stream_last(&mut vol_sma, &volumes);
                let v_last = volumes.last().copied().unwrap_or(0.0);
                if v_last > v_avg && hist > 0.0 {
                    100.0
                } else if v_last > v_avg && hist < 0.0 {
                    0.0
                } else {
                    60.0
                }
            }
            Err(_) => 60.0,
        };

        let composite =
            0.25 * rsi_score + 0.25 * macd_score + 0.4 * ma_score + 0.1 * volume_score;
        IndicatorValue::Score(((composite - 50.0) / 50.0).clamp(-1.0, 1.0))
    }
}

/// Momentum score on [0, 100]: rate of change, price versus the fast and
/// slow averages, and RSI, blended 0.3/0.3/0.2/0.2.
pub struct MomentumScore {
    roc_period: usize,
    rsi_period: usize,
    sma_fast: usize,
    sma_slow: usize,
}

impl MomentumScore {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            roc_period: config.momentum_period,
            rsi_period: config.rsi_period,
            sma_fast: config.sma_fast,
            sma_slow: config.sma_slow,
        }
    }
}

impl Indicator for MomentumScore {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        let closes = series.closes();
        if closes.len() < self.sma_slow.max(self.roc_period + 1) {
            return IndicatorValue::Insufficient;
        }
        let Some(&price) = closes.last() else {
            return IndicatorValue::Insufficient;
        };

        let Ok(mut roc) = RateOfChange::new(self.roc_period) else {
            return IndicatorValue::Insufficient;
        };
        let Ok(mut sma_fast) = SimpleMovingAverage::new(self.sma_fast) else {
            return IndicatorValue::Insufficient;
        };
        let Ok(mut sma_slow) = SimpleMovingAverage::new(self.sma_slow) else {
            return IndicatorValue::Insufficient;
        };
        let Ok(mut rsi) = RelativeStrengthIndex::new(self.rsi_period) else {
            return IndicatorValue::Insufficient;
        };

        let roc_now = stream_last(&mut roc, &closes);
        let s_fast = stream_last(&mut sma_fast, &closes);
        let s_slow = stream_last(&mut sma_slow, &closes);
        let rsi_now = last_rsi(&mut rsi, &closes);

        if s_fast <= 0.0 || s_slow <= 0.0 {
            return IndicatorValue::Insufficient;
        }

        let score = 0.3 * normalize(roc_now, -10.0, 10.0)
            + 0.3 * normalize(price / s_fast - 1.0, -0.1, 0.1)
            + 0.2 * normalize(price / s_slow - 1.0, -0.2, 0.2)
            + 0.2 * normalize(rsi_now, 30.0, 70.0);

        IndicatorValue::Score((score * 100.0).clamp(0.0, 100.0))
    }
}

/// Raw Wilder RSI, carried in the set for reporting.
pub struct Rsi {
    period: usize,
}

impl Rsi {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            period: config.rsi_period,
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        let closes = series.closes();
        if closes.len() < self.period + 1 {
            return IndicatorValue::Insufficient;
        }
        let Ok(mut rsi) = RelativeStrengthIndex::new(self.period) else {
            return IndicatorValue::Insufficient;
        };
        IndicatorValue::Score(last_rsi(&mut rsi, &closes))
    }
}

/// MACD histogram (signal-line delta) normalized against 1% of price and
/// clamped to [-1, 1].
pub struct MacdScore {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdScore {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            fast: config.macd_fast,
            slow: config.macd_slow,
            signal: config.macd_signal,
        }
    }
}

impl Indicator for MacdScore {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        let closes = series.closes();
        if closes.len() < self.slow + self.signal {
            return IndicatorValue::Insufficient;
        }
        let Some(&price) = closes.last() else {
            return IndicatorValue::Insufficient;
        };
        if price <= 0.0 {
            return IndicatorValue::Insufficient;
        }
        let Some((_, _, hist)) = last_macd(self.fast, self.slow, self.signal, &closes) else {
            return IndicatorValue::Insufficient;
        };
        IndicatorValue::Score((hist / (price * 0.01)).clamp(-1.0, 1.0))
    }
}

/// Windowed local-extrema scan for sustained support and resistance levels.
///
/// A bar is a pivot low when its low is below the lows of `window` bars on
/// each side (pivot highs symmetric). Levels closer than the configured
/// minimum separation to an already accepted level are dropped, nearest to
/// price first. Missing levels fall back to fixed percentage steps off the
/// current price.
#[derive(Clone)]
pub struct SupportResistance {
    lookback: usize,
    window: usize,
    min_separation_pct: f64,
}

impl SupportResistance {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            lookback: config.sr_lookback,
            window: config.sr_window,
            min_separation_pct: config.sr_min_separation_pct,
        }
    }

    /// Up to three levels each side of the current price, sorted ascending.
    pub fn levels(&self, series: &OhlcvSeries) -> (Vec<f64>, Vec<f64>) {
        let closes = series.closes();
        let Some(&price) = closes.last() else {
            return (Vec::new(), Vec::new());
        };

        let candles = series.candles();
        let start = candles.len().saturating_sub(self.lookback);
        let recent = &candles[start..];

        let lows: Vec<f64> = recent
            .iter()
            .map(|c| rust_decimal::prelude::ToPrimitive::to_f64(&c.low).unwrap_or(0.0))
            .collect();
        let highs: Vec<f64> = recent
            .iter()
            .map(|c| rust_decimal::prelude::ToPrimitive::to_f64(&c.high).unwrap_or(0.0))
            .collect();

        let pivot_lows = self.pivots(&lows, |center, neighbor| center <= neighbor);
        let pivot_highs = self.pivots(&highs, |center, neighbor| center >= neighbor);

        let min_sep = price * self.min_separation_pct;

        // Supports: nearest sustained pivot lows below price.
        let mut candidates: Vec<f64> = pivot_lows.into_iter().filter(|l| *l < price).collect();
        candidates.sort_by(|a, b| b.total_cmp(a));
        let mut supports = accept_separated(&candidates, min_sep);

        // Resistances: nearest sustained pivot highs above price.
        let mut candidates: Vec<f64> = pivot_highs.into_iter().filter(|h| *h > price).collect();
        candidates.sort_by(|a, b| a.total_cmp(b));
        let mut resistances = accept_separated(&candidates, min_sep);

        // Percentage-step fallback so downstream always has three levels.
        while supports.len() < 3 {
            let step = 0.02 * (supports.len() + 1) as f64;
            let level = price * (1.0 - step);
            if !supports.iter().any(|s| (s - level).abs() < f64::EPSILON) {
                supports.push(level);
            }
        }
        while resistances.len() < 3 {
            let step = 0.02 * (resistances.len() + 1) as f64;
            let level = price * (1.0 + step);
            if !resistances.iter().any(|r| (r - level).abs() < f64::EPSILON) {
                resistances.push(level);
            }
        }

        supports.sort_by(|a, b| a.total_cmp(b));
        resistances.sort_by(|a, b| a.total_cmp(b));
        let keep = supports.len().saturating_sub(3);
        supports.drain(..keep);
        resistances.truncate(3);

        (supports, resistances)
    }

    fn pivots<F>(&self, values: &[f64], is_extreme: F) -> Vec<f64>
    where
        F: Fn(f64, f64) -> bool,
    {
        let w = self.window;
        if values.len() < 2 * w + 1 {
            return Vec::new();
        }
        let mut found = Vec::new();
        for i in w..values.len() - w {
            let center = values[i];
            let sustained = (1..=w)
                .all(|j| is_extreme(center, values[i - j]) && is_extreme(center, values[i + j]));
            if sustained {
                found.push(center);
            }
        }
        found
    }
}

fn accept_separated(candidates: &[f64], min_sep: f64) -> Vec<f64> {
    let mut accepted: Vec<f64> = Vec::new();
    for &level in candidates {
        if accepted.len() >= 3 {
            break;
        }
        if accepted.iter().all(|a| (a - level).abs() >= min_sep) {
            accepted.push(level);
        }
    }
    accepted
}

impl Indicator for SupportResistance {
    fn name(&self) -> &'static str {
        "support_resistance"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        if series.is_empty() {
            return IndicatorValue::Insufficient;
        }
        let (supports, resistances) = self.levels(series);
        match (supports.last(), resistances.first()) {
            (Some(&low), Some(&high)) => IndicatorValue::Band { low, high },
            _ => IndicatorValue::Insufficient,
        }
    }
}

/// Annualized close-to-close volatility percent over the configured window.
pub struct Volatility {
    window: usize,
}

impl Volatility {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            window: config.volatility_window,
        }
    }
}

impl Indicator for Volatility {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        let closes = series.closes();
        if closes.len() < self.window + 1 {
            return IndicatorValue::Insufficient;
        }
        let tail = &closes[closes.len() - self.window - 1..];
        let returns: Vec<f64> = tail
            .windows(2)
            .filter(|pair| pair[0] != 0.0)
            .map(|pair| (pair[1] - pair[0]) / pair[0])
            .collect();
        if returns.len() < 2 {
            return IndicatorValue::Insufficient;
        }
        let daily = returns.iter().std_dev();
        IndicatorValue::Score(daily * 252f64.sqrt() * 100.0)
    }
}

/// Last volume versus its moving average, in percent.
pub struct VolumeChange {
    period: usize,
}

impl VolumeChange {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            period: config.sma_fast,
        }
    }
}

impl Indicator for VolumeChange {
    fn name(&self) -> &'static str {
        "volume_change"
    }

    fn compute(&self, series: &OhlcvSeries) -> IndicatorValue {
        let volumes = series.volumes();
        if volumes.len() < self.period {
            return IndicatorValue::Insufficient;
        }
        let Ok(mut sma) = SimpleMovingAverage::new(self.period) else {
            return IndicatorValue::Insufficient;
        };
        let avg = stream_last(&mut sma, &volumes);
        if avg == 0.0 {
            return IndicatorValue::Score(0.0);
        }
        let last = volumes.last().copied().unwrap_or(0.0);
        IndicatorValue::Score((last - avg) / avg * 100.0)
    }
}

/// Fixed, ordered list of indicator computations for one symbol.
pub struct IndicatorPipeline {
    indicators: Vec<Box<dyn Indicator>>,
    support_resistance: SupportResistance,
}

impl IndicatorPipeline {
    pub fn new(config: &IndicatorConfig) -> Self {
        let support_resistance = SupportResistance::new(config);
        let indicators: Vec<Box<dyn Indicator>> = vec![
            Box::new(TrendScore::new(config)),
            Box::new(MomentumScore::new(config)),
            Box::new(Rsi::new(config)),
            Box::new(MacdScore::new(config)),
            Box::new(support_resistance.clone()),
            Box::new(Volatility::new(config)),
            Box::new(VolumeChange::new(config)),
        ];
        Self {
            indicators,
            support_resistance,
        }
    }

    pub fn compute(&self, series: &OhlcvSeries) -> IndicatorSet {
        let mut set = IndicatorSet::default();
        for indicator in &self.indicators {
            set.insert(indicator.name(), indicator.compute(series));
        }
        let (supports, resistances) = self.support_resistance.levels(series);
        set.support_levels = supports;
        set.resistance_levels = resistances;
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Candle;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn config() -> IndicatorConfig {
        IndicatorConfig {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            momentum_period: 10,
            sma_fast: 20,
            sma_slow: 50,
            sma_trend: 200,
            sr_lookback: 30,
            sr_window: 5,
            sr_min_separation_pct: 0.005,
            volatility_window: 30,
        }
    }

    fn series_from_closes(closes: &[f64]) -> OhlcvSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                timestamp: Utc.timestamp_opt(86_400 * i as i64, 0).unwrap(),
                open: Decimal::from_f64(*c).unwrap(),
                high: Decimal::from_f64(c * 1.01).unwrap(),
                low: Decimal::from_f64(c * 0.99).unwrap(),
                close: Decimal::from_f64(*c).unwrap(),
                volume: Decimal::from(10_000),
            })
            .collect();
        OhlcvSeries::new("TEST", candles).unwrap()
    }

    fn rising_series(bars: usize) -> OhlcvSeries {
        let closes: Vec<f64> = (0..bars).map(|i| 100.0 * 1.01f64.powi(i as i32)).collect();
        series_from_closes(&closes)
    }

    fn falling_series(bars: usize) -> OhlcvSeries {
        let closes: Vec<f64> = (0..bars).map(|i| 100.0 * 0.99f64.powi(i as i32)).collect();
        series_from_closes(&closes)
    }

    #[test]
    fn momentum_is_bounded_for_extreme_series() {
        let momentum = MomentumScore::new(&config());
        for series in [rising_series(80), falling_series(80)] {
            match momentum.compute(&series) {
                IndicatorValue::Score(v) => assert!((0.0..=100.0).contains(&v)),
                other => panic!("expected score, got {:?}", other),
            }
        }
    }

    #[test]
    fn trend_and_macd_are_bounded() {
        let cfg = config();
        for series in [rising_series(80), falling_series(80)] {
            if let IndicatorValue::Score(t) = TrendScore::new(&cfg).compute(&series) {
                assert!((-1.0..=1.0).contains(&t));
            } else {
                panic!("trend should compute on an 80-bar series");
            }
            if let IndicatorValue::Score(m) = MacdScore::new(&cfg).compute(&series) {
                assert!((-1.0..=1.0).contains(&m));
            } else {
                panic!("macd should compute on an 80-bar series");
            }
        }
    }

    #[test]
    fn rising_series_scores_bullish() {
        let cfg = config();
        let series = rising_series(60);
        let trend = TrendScore::new(&cfg).compute(&series).score().unwrap();
        let momentum = MomentumScore::new(&cfg).compute(&series).score().unwrap();
        assert!(trend > 0.3, "trend {trend} should be clearly positive");
        assert!(momentum > 55.0, "momentum {momentum} should vote bullish");
    }

    #[test]
    fn short_series_yields_insufficient_not_error() {
        let cfg = config();
        let series = rising_series(10);
        assert_eq!(
            TrendScore::new(&cfg).compute(&series),
            IndicatorValue::Insufficient
        );
        assert_eq!(
            MomentumScore::new(&cfg).compute(&series),
            IndicatorValue::Insufficient
        );
        assert_eq!(
            Volatility::new(&cfg).compute(&series),
            IndicatorValue::Insufficient
        );
    }

    #[test]
    fn pipeline_records_which_indicators_were_insufficient() {
        let pipeline = IndicatorPipeline::new(&config());
        let set = pipeline.compute(&rising_series(10));
        assert!(set.insufficient().contains(&"trend".to_string()));
        assert!(set.insufficient().contains(&"momentum".to_string()));
    }

    #[test]
    fn support_below_and_resistance_above_price() {
        // V-shaped dip then recovery past the old high.
        let mut closes: Vec<f64> = Vec::new();
        for i in 0..15 {
            closes.push(110.0 - i as f64);
        }
        for i in 0..15 {
            closes.push(96.0 + i as f64);
        }
        let series = series_from_closes(&closes);
        let sr = SupportResistance::new(&config());
        let (supports, resistances) = sr.levels(&series);
        let price = *closes.last().unwrap();

        assert!(!supports.is_empty());
        assert!(!resistances.is_empty());
        assert!(supports.iter().all(|s| *s < price));
        assert!(resistances.iter().all(|r| *r > price));
        // The dip low is a sustained pivot; its low should be among supports.
        assert!(supports.iter().any(|s| (*s - 96.0 * 0.99).abs() < 1.0));
    }

    #[test]
    fn near_duplicate_levels_are_separated() {
        let candidates = [100.0, 99.9, 99.0, 98.95, 97.0];
        let accepted = accept_separated(&candidates, 0.5);
        assert_eq!(accepted, vec![100.0, 99.0, 97.0]);
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let series = series_from_closes(&[100.0; 40]);
        match Volatility::new(&config()).compute(&series) {
            IndicatorValue::Score(v) => assert!(v.abs() < 1e-9),
            other => panic!("expected score, got {:?}", other),
        }
    }
}
