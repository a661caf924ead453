//! End-to-end batch runs: fetch, analyze, publish.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use stockscout::application::orchestrator::BatchOrchestrator;
use stockscout::config::Config;
use stockscout::domain::errors::FetchError;
use stockscout::domain::ports::{MarketDataSource, ReportSink};
use stockscout::domain::types::{
    Candle, Direction, OhlcvSeries, OptionChainSnapshot, OptionKind, OptionRecord, QuoteSnapshot,
    SymbolStatus,
};
use stockscout::infrastructure::sink::MemorySink;

/// Per-symbol scripted behavior: "UP" trends cleanly, "NOCHAIN" has no
/// option data, "BAD" has no history at all.
struct ScriptedSource;

fn series(symbol: &str, bars: usize, daily_factor: f64) -> OhlcvSeries {
    let candles = (0..bars)
        .map(|i| {
            let close = Decimal::from_f64(500.0 * daily_factor.powi(i as i32)).unwrap();
            Candle {
                timestamp: Utc.timestamp_opt(86_400 * i as i64, 0).unwrap(),
                open: close,
                high: close * dec!(1.01),
                low: close * dec!(0.99),
                close,
                volume: dec!(25000),
            }
        })
        .collect();
    OhlcvSeries::new(symbol, candles).unwrap()
}

fn chain_for(symbol: &str, spot: Decimal) -> OptionChainSnapshot {
    let mut records = Vec::new();
    for (offset, oi) in [(dec!(0.95), 800u64), (dec!(1.05), 4_000), (dec!(1.10), 600)] {
        for (kind, expiry) in [
            (OptionKind::Call, "2026-09-24"),
            (OptionKind::Put, "2026-10-29"),
        ] {
            records.push(OptionRecord {
                strike: spot * offset,
                expiry: expiry.to_string(),
                kind,
                open_interest: oi,
                implied_volatility: 22.0,
                last_price: dec!(15),
            });
        }
    }
    OptionChainSnapshot {
        symbol: symbol.to_string(),
        records,
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    async fn fetch_historical(&self, symbol: &str, _days: u32) -> Result<OhlcvSeries, FetchError> {
        match symbol {
            "BAD" => Err(FetchError::NotFound {
                symbol: symbol.to_string(),
            }),
            _ => Ok(series(symbol, 60, 1.01)),
        }
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError> {
        Ok(QuoteSnapshot {
            symbol: symbol.to_string(),
            last_price: series(symbol, 60, 1.01).last_close().unwrap(),
            previous_close: None,
            volume: dec!(25000),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_option_chain(
        &self,
        symbol: &str,
    ) -> Result<OptionChainSnapshot, FetchError> {
        match symbol {
            "NOCHAIN" => Err(FetchError::Transient {
                reason: "option chain unavailable".to_string(),
            }),
            _ => {
                let spot = series(symbol, 60, 1.01).last_close().unwrap();
                Ok(chain_for(symbol, spot))
            }
        }
    }
}

fn test_config(symbols: &[&str]) -> Config {
    let mut config = Config::from_env().unwrap();
    config.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.max_retries = 1;
    config.retry_backoff_floor = Duration::from_millis(100);
    config
}

#[tokio::test(start_paused = true)]
async fn mixed_batch_produces_per_symbol_statuses() {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = BatchOrchestrator::new(
        test_config(&["UP", "NOCHAIN", "BAD"]),
        Arc::new(ScriptedSource),
        Arc::clone(&sink) as Arc<dyn ReportSink>,
    );

    let reports = orchestrator.run(None).await.unwrap();
    assert_eq!(reports.len(), 3);

    let up = &reports[0];
    assert_eq!(up.symbol, "UP");
    assert_eq!(up.status, SymbolStatus::Complete);
    let signal = up.signal.as_ref().unwrap();
    assert_eq!(signal.direction, Direction::Bullish);
    assert!(signal.confidence >= 0.6);
    assert!(signal.position.is_some());

    let nochain = &reports[1];
    assert_eq!(nochain.symbol, "NOCHAIN");
    assert!(matches!(nochain.status, SymbolStatus::Degraded { .. }));
    let signal = nochain.signal.as_ref().unwrap();
    assert!(signal.degraded_inputs.contains(&"option_chain".to_string()));

    let bad = &reports[2];
    assert_eq!(bad.symbol, "BAD");
    assert_eq!(bad.status, SymbolStatus::Failed);
    assert!(bad.signal.is_none());

    // Every symbol was published, in configuration order.
    let published = sink.reports();
    assert_eq!(
        published.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>(),
        vec!["UP", "NOCHAIN", "BAD"]
    );
}

#[tokio::test(start_paused = true)]
async fn zero_deadline_times_out_every_symbol() {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = BatchOrchestrator::new(
        test_config(&["UP", "NOCHAIN"]),
        Arc::new(ScriptedSource),
        Arc::clone(&sink) as Arc<dyn ReportSink>,
    );

    let reports = orchestrator.run(Some(Duration::ZERO)).await.unwrap();

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.status, SymbolStatus::TimedOut);
        assert!(report.signal.is_none());
    }
}
