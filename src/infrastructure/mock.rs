//! Deterministic mock market data source.
//!
//! Generates seeded random-walk price histories and synthetic option
//! chains, with configurable latency and periodic rate-limit injection so
//! the scheduler's throttling paths can be exercised end to end without a
//! broker session.

use crate::domain::errors::FetchError;
use crate::domain::ports::MarketDataSource;
use crate::domain::types::{
    Candle, OhlcvSeries, OptionChainSnapshot, OptionKind, OptionRecord, QuoteSnapshot,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

pub struct MockMarketDataSource {
    seed: u64,
    latency: Duration,
    /// Every nth call fails with a rate-limit rejection when set.
    rate_limit_every: Option<u32>,
    calls: AtomicU32,
}

impl MockMarketDataSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            latency: Duration::from_millis(50),
            rate_limit_every: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_rate_limit_every(mut self, every: u32) -> Self {
        self.rate_limit_every = Some(every.max(1));
        self
    }

    fn symbol_rng(&self, symbol: &str, salt: u64) -> StdRng {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        StdRng::seed_from_u64(self.seed ^ hasher.finish() ^ salt)
    }

    async fn simulate_call(&self) -> Result<(), FetchError> {
        sleep(self.latency).await;
        let call_no = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(every) = self.rate_limit_every {
            if call_no % every == 0 {
                debug!("mock: injecting rate-limit rejection on call {}", call_no);
                return Err(FetchError::RateLimited {
                    retry_after: Duration::from_secs(5),
                });
            }
        }
        Ok(())
    }

    fn base_price(&self, symbol: &str) -> f64 {
        let mut rng = self.symbol_rng(symbol, 0);
        rng.random_range(100.0..3000.0)
    }

    fn walk(&self, symbol: &str, days: u32) -> Vec<f64> {
        let mut rng = self.symbol_rng(symbol, 1);
        let mut price = self.base_price(symbol);
        let drift = rng.random_range(-0.001..0.002);
        (0..days)
            .map(|_| {
                let shock = rng.random_range(-0.02..0.02);
                price *= 1.0 + drift + shock;
                price.max(1.0)
            })
            .collect()
    }

    fn last_price(&self, symbol: &str, days: u32) -> f64 {
        self.walk(symbol, days)
            .last()
            .copied()
            .unwrap_or_else(|| self.base_price(symbol))
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp(2)
}

#[async_trait]
impl MarketDataSource for MockMarketDataSource {
    async fn fetch_historical(&self, symbol: &str, days: u32) -> Result<OhlcvSeries, FetchError> {
        self.simulate_call().await?;

        let closes = self.walk(symbol, days);
        let mut rng = self.symbol_rng(symbol, 2);
        let today = Utc::now();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let span = rng.random_range(0.002..0.02);
                let volume = rng.random_range(50_000.0..2_000_000.0);
                Candle {
                    timestamp: today - ChronoDuration::days((days as usize - i) as i64),
                    open: to_decimal(close * (1.0 - span / 2.0)),
                    high: to_decimal(close * (1.0 + span)),
                    low: to_decimal(close * (1.0 - span)),
                    close: to_decimal(*close),
                    volume: to_decimal(volume),
                }
            })
            .collect();

        OhlcvSeries::new(symbol, candles).map_err(|e| FetchError::Transient {
            reason: e.to_string(),
        })
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError> {
        self.simulate_call().await?;

        let last = self.last_price(symbol, 365);
        let mut rng = self.symbol_rng(symbol, 3);
        let jitter = rng.random_range(-0.005..0.005);
        Ok(QuoteSnapshot {
            symbol: symbol.to_string(),
            last_price: to_decimal(last * (1.0 + jitter)),
            previous_close: Some(to_decimal(last)),
            volume: to_decimal(rng.random_range(100_000.0..5_000_000.0)),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_option_chain(&self, symbol: &str) -> Result<OptionChainSnapshot, FetchError> {
        self.simulate_call().await?;

        let spot = self.last_price(symbol, 365);
        let mut rng = self.symbol_rng(symbol, 4);
        let expiries = ["2026-09-24", "2026-10-29"];

        let mut records = Vec::new();
        for offset in -4i32..=4 {
            let strike = spot * (1.0 + offset as f64 * 0.025);
            // Open interest concentrates near the money, IV forms a smile.
            let distance = offset.unsigned_abs() as f64;
            let smile = 15.0 + distance * distance * 1.5 + rng.random_range(0.0..6.0);
            for expiry in expiries {
                for kind in [OptionKind::Call, OptionKind::Put] {
                    let oi_scale = (5.0 - distance).max(0.5);
                    records.push(OptionRecord {
                        strike: to_decimal(strike),
                        expiry: expiry.to_string(),
                        kind,
                        open_interest: (rng.random_range(500.0..5_000.0) * oi_scale) as u64,
                        implied_volatility: smile.min(45.0),
                        last_price: to_decimal((spot * 0.02 + rng.random_range(0.0..spot * 0.02))
                            .max(0.05)),
                    });
                }
            }
        }

        Ok(OptionChainSnapshot {
            symbol: symbol.to_string(),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_seed_yields_identical_series() {
        let a = MockMarketDataSource::new(7).with_latency(Duration::ZERO);
        let b = MockMarketDataSource::new(7).with_latency(Duration::ZERO);

        let series_a = a.fetch_historical("RELIANCE", 30).await.unwrap();
        let series_b = b.fetch_historical("RELIANCE", 30).await.unwrap();
        assert_eq!(series_a.closes(), series_b.closes());
    }

    #[tokio::test(start_paused = true)]
    async fn different_symbols_diverge() {
        let source = MockMarketDataSource::new(7).with_latency(Duration::ZERO);
        let a = source.fetch_historical("TCS", 30).await.unwrap();
        let b = source.fetch_historical("INFY", 30).await.unwrap();
        assert_ne!(a.closes(), b.closes());
    }

    #[tokio::test(start_paused = true)]
    async fn chain_covers_both_sides_of_spot() {
        let source = MockMarketDataSource::new(7).with_latency(Duration::ZERO);
        let chain = source.fetch_option_chain("TCS").await.unwrap();
        let quote = source.fetch_quote("TCS").await.unwrap();

        assert!(!chain.records.is_empty());
        assert!(chain.records.iter().any(|r| r.strike < quote.last_price));
        assert!(chain.records.iter().any(|r| r.strike > quote.last_price));
        assert!(chain
            .records
            .iter()
            .all(|r| (15.0..=45.0).contains(&r.implied_volatility)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_injection_fires_on_schedule() {
        let source = MockMarketDataSource::new(7)
            .with_latency(Duration::ZERO)
            .with_rate_limit_every(2);

        assert!(source.fetch_quote("TCS").await.is_ok());
        assert!(matches!(
            source.fetch_quote("TCS").await,
            Err(FetchError::RateLimited { .. })
        ));
        assert!(source.fetch_quote("TCS").await.is_ok());
    }
}
