use anyhow::bail;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of upstream API calls sharing one quota budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointClass {
    Historical,
    Quote,
    OptionChain,
    Other,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 4] = [
        EndpointClass::Historical,
        EndpointClass::Quote,
        EndpointClass::OptionChain,
        EndpointClass::Other,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            EndpointClass::Historical => 0,
            EndpointClass::Quote => 1,
            EndpointClass::OptionChain => 2,
            EndpointClass::Other => 3,
        }
    }

    /// Default dispatch priority. Historical calls are the scarcest
    /// resource and tolerate the most delay, so they rank lowest.
    pub fn default_priority(self) -> u8 {
        match self {
            EndpointClass::Quote => 2,
            EndpointClass::OptionChain => 1,
            EndpointClass::Historical => 0,
            EndpointClass::Other => 0,
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointClass::Historical => write!(f, "historical"),
            EndpointClass::Quote => write!(f, "quote"),
            EndpointClass::OptionChain => write!(f, "option_chain"),
            EndpointClass::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Chronologically ordered OHLCV bars for one symbol.
///
/// Immutable after construction; out-of-order input is sorted and
/// duplicate timestamps are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvSeries {
    pub symbol: String,
    candles: Vec<Candle>,
}

impl OhlcvSeries {
    pub fn new(symbol: impl Into<String>, mut candles: Vec<Candle>) -> anyhow::Result<Self> {
        let symbol = symbol.into();
        candles.sort_by_key(|c| c.timestamp);
        for pair in candles.windows(2) {
            if pair[0].timestamp == pair[1].timestamp {
                bail!(
                    "duplicate candle timestamp {} in series for {}",
                    pair[0].timestamp,
                    symbol
                );
            }
        }
        Ok(Self { symbol, candles })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.candles.last().map(|c| c.close)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(0.0))
            .collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles
            .iter()
            .map(|c| c.volume.to_f64().unwrap_or(0.0))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub previous_close: Option<Decimal>,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CE"),
            OptionKind::Put => write!(f, "PE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionRecord {
    pub strike: Decimal,
    pub expiry: String,
    pub kind: OptionKind,
    pub open_interest: u64,
    pub implied_volatility: f64,
    pub last_price: Decimal,
}

/// Point-in-time snapshot of one symbol's option chain. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChainSnapshot {
    pub symbol: String,
    pub records: Vec<OptionRecord>,
}

/// One unit of fetch work, created by the orchestrator.
///
/// Retry count is incremented by the scheduler on failure; the request is
/// retired on success or once retries are exhausted.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub symbol: String,
    pub class: EndpointClass,
    pub priority: u8,
    pub retries: u32,
}

impl FetchRequest {
    pub fn new(symbol: impl Into<String>, class: EndpointClass) -> Self {
        Self {
            symbol: symbol.into(),
            class,
            priority: class.default_priority(),
            retries: 0,
        }
    }
}

/// A single computed indicator output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IndicatorValue {
    Score(f64),
    Band { low: f64, high: f64 },
    /// Series too short for the indicator's lookback. Not an error;
    /// downstream consumers degrade confidence instead.
    Insufficient,
}

impl IndicatorValue {
    pub fn score(&self) -> Option<f64> {
        match self {
            IndicatorValue::Score(v) => Some(*v),
            _ => None,
        }
    }
}

/// Named indicator values for one symbol, produced fresh per cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    values: BTreeMap<String, IndicatorValue>,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    insufficient: Vec<String>,
}

impl IndicatorSet {
    pub fn insert(&mut self, name: &str, value: IndicatorValue) {
        if matches!(value, IndicatorValue::Insufficient) {
            self.insufficient.push(name.to_string());
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorValue> {
        self.values.get(name)
    }

    pub fn score(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(|v| v.score())
    }

    pub fn insufficient(&self) -> &[String] {
        &self.insufficient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => write!(f, "BULLISH"),
            Direction::Bearish => write!(f, "BEARISH"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Moneyness {
    Atm,
    Itm,
    Otm,
}

/// Option-chain derived metrics for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionMetrics {
    /// Rank of at-the-money IV against the chain's own IV distribution, 0-100.
    pub iv_percentile: f64,
    pub max_pain: Option<Decimal>,
    pub max_oi_strike: Option<Decimal>,
    pub heavy_oi_strikes: Vec<Decimal>,
    pub recommended_strike: Option<Decimal>,
    pub moneyness: Option<Moneyness>,
    /// Set when the chain was empty or covered a single expiry.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAdvice {
    pub max_shares: u64,
    pub notional: Decimal,
    pub portfolio_pct: f64,
}

/// One directional call per symbol per cycle. Immutable once constructed;
/// superseded (not overwritten) by the next cycle's signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Raw indicator vote before any risk/reward downgrade.
    pub vote: Direction,
    pub confidence: f64,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub risk_reward: f64,
    pub position: Option<PositionAdvice>,
    pub indicators: IndicatorSet,
    pub options: Option<OptionMetrics>,
    /// Inputs that were unavailable or insufficient when the signal was built.
    pub degraded_inputs: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolStatus {
    Complete,
    Degraded { missing: Vec<String> },
    TimedOut,
    Failed,
}

/// Per-symbol batch outcome handed to the report sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub status: SymbolStatus,
    pub signal: Option<Signal>,
}
