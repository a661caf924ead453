//! One batch cycle: fan out fetches, then fan out analysis.
//!
//! Fetching is async and quota-bound; the per-symbol computation is pure
//! CPU work and runs on the rayon pool inside `spawn_blocking` so the
//! scheduler's runtime threads stay free.

use crate::application::aggregator::SignalAggregator;
use crate::application::indicators::IndicatorPipeline;
use crate::application::quota::QuotaTracker;
use crate::application::scheduler::{FetchOutcome, FetchPayload, FetchScheduler};
use crate::config::Config;
use crate::domain::ports::{MarketDataSource, ReportSink};
use crate::domain::types::{
    Direction, EndpointClass, FetchRequest, OhlcvSeries, OptionChainSnapshot, QuoteSnapshot,
    SymbolReport, SymbolStatus,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Default)]
struct SymbolInputs {
    series: Option<OhlcvSeries>,
    quote: Option<QuoteSnapshot>,
    chain: Option<OptionChainSnapshot>,
    historical_timed_out: bool,
    missing: Vec<String>,
}

pub struct BatchOrchestrator {
    config: Config,
    scheduler: FetchScheduler,
    pipeline: Arc<IndicatorPipeline>,
    aggregator: Arc<SignalAggregator>,
    sink: Arc<dyn ReportSink>,
}

impl BatchOrchestrator {
    pub fn new(
        config: Config,
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let quota = Arc::new(QuotaTracker::new(&config.quota, config.retry_backoff_floor));
        let scheduler = FetchScheduler::new(source, quota, &config);
        let pipeline = Arc::new(IndicatorPipeline::new(&config.indicators));
        let aggregator = Arc::new(SignalAggregator::new(
            config.signal.clone(),
            config.account.clone(),
        ));
        Self {
            config,
            scheduler,
            pipeline,
            aggregator,
            sink,
        }
    }

    /// Run one full cycle over the configured symbols, publishing one
    /// report per symbol. Partial upstream failures degrade individual
    /// symbols; they never abort the batch.
    pub async fn run(&self, deadline: Option<Duration>) -> anyhow::Result<Vec<SymbolReport>> {
        let mut requests = Vec::with_capacity(self.config.symbols.len() * 3);
        for symbol in &self.config.symbols {
            requests.push(FetchRequest::new(symbol, EndpointClass::Quote));
            requests.push(FetchRequest::new(symbol, EndpointClass::OptionChain));
            requests.push(FetchRequest::new(symbol, EndpointClass::Historical));
        }
        info!(
            "batch: fetching {} requests for {} symbols",
            requests.len(),
            self.config.symbols.len()
        );

        let results = self.scheduler.run(requests, deadline).await;

        let mut buckets: HashMap<String, SymbolInputs> = HashMap::new();
        for result in results {
            let inputs = buckets.entry(result.symbol.clone()).or_default();
            match result.outcome {
                FetchOutcome::Success(FetchPayload::Historical(series)) => {
                    inputs.series = Some(series);
                }
                FetchOutcome::Success(FetchPayload::Quote(quote)) => {
                    inputs.quote = Some(quote);
                }
                FetchOutcome::Success(FetchPayload::OptionChain(chain)) => {
                    inputs.chain = Some(chain);
                }
                FetchOutcome::Exhausted(err) => {
                    warn!("batch [{}/{}]: {}", result.symbol, result.class, err);
                    inputs.missing.push(result.class.to_string());
                }
                FetchOutcome::TimedOut => {
                    if result.class == EndpointClass::Historical {
                        inputs.historical_timed_out = true;
                    }
                    inputs.missing.push(result.class.to_string());
                }
            }
        }

        let ordered: Vec<(String, SymbolInputs)> = self
            .config
            .symbols
            .iter()
            .filter_map(|s| buckets.remove(s).map(|inputs| (s.clone(), inputs)))
            .collect();

        let pipeline = Arc::clone(&self.pipeline);
        let aggregator = Arc::clone(&self.aggregator);
        let reports = tokio::task::spawn_blocking(move || {
            ordered
                .into_par_iter()
                .map(|(symbol, inputs)| build_report(&symbol, inputs, &pipeline, &aggregator))
                .collect::<Vec<_>>()
        })
        .await?;

        for report in &reports {
            self.sink.publish(report).await?;
        }

        let actionable = reports
            .iter()
            .filter(|r| {
                r.signal
                    .as_ref()
                    .is_some_and(|s| s.direction != Direction::Neutral)
            })
            .count();
        info!(
            "batch: {} symbols analyzed, {} actionable signals",
            reports.len(),
            actionable
        );
        Ok(reports)
    }
}

/// Pure per-symbol computation. Historical data is the one indispensable
/// input; everything else degrades the signal rather than dropping it.
fn build_report(
    symbol: &str,
    inputs: SymbolInputs,
    pipeline: &IndicatorPipeline,
    aggregator: &SignalAggregator,
) -> SymbolReport {
    let Some(series) = inputs.series else {
        let status = if inputs.historical_timed_out {
            SymbolStatus::TimedOut
        } else {
            SymbolStatus::Failed
        };
        return SymbolReport {
            symbol: symbol.to_string(),
            status,
            signal: None,
        };
    };

    let current_price = inputs
        .quote
        .as_ref()
        .map(|q| q.last_price)
        .or_else(|| series.last_close());
    let Some(current_price) = current_price else {
        return SymbolReport {
            symbol: symbol.to_string(),
            status: SymbolStatus::Failed,
            signal: None,
        };
    };

    let indicators = pipeline.compute(&series);
    let signal = aggregator.build(symbol, current_price, indicators, inputs.chain.as_ref());

    let status = if inputs.missing.is_empty() {
        SymbolStatus::Complete
    } else {
        SymbolStatus::Degraded {
            missing: inputs.missing,
        }
    };

    SymbolReport {
        symbol: symbol.to_string(),
        status,
        signal: Some(signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::FetchError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct StaticSource {
        chain_available: bool,
        historical_available: bool,
    }

    fn rising_series(symbol: &str) -> OhlcvSeries {
        let candles = (0..60)
            .map(|i| {
                let close = Decimal::from_f64(100.0 * 1.01f64.powi(i as i32)).unwrap();
                crate::domain::types::Candle {
                    timestamp: Utc.timestamp_opt(86_400 * i as i64, 0).unwrap(),
                    open: close,
                    high: close * dec!(1.01),
                    low: close * dec!(0.99),
                    close,
                    volume: dec!(10000),
                }
            })
            .collect();
        OhlcvSeries::new(symbol, candles).unwrap()
    }

    #[async_trait]
    impl MarketDataSource for StaticSource {
        async fn fetch_historical(
            &self,
            symbol: &str,
            _days: u32,
        ) -> Result<OhlcvSeries, FetchError> {
            if self.historical_available {
                Ok(rising_series(symbol))
            } else {
                Err(FetchError::NotFound {
                    symbol: symbol.to_string(),
                })
            }
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError> {
            Ok(QuoteSnapshot {
                symbol: symbol.to_string(),
                last_price: rising_series(symbol).last_close().unwrap(),
                previous_close: None,
                volume: dec!(10000),
                timestamp: Utc::now(),
            })
        }

        async fn fetch_option_chain(
            &self,
            symbol: &str,
        ) -> Result<OptionChainSnapshot, FetchError> {
            if self.chain_available {
                Ok(OptionChainSnapshot {
                    symbol: symbol.to_string(),
                    records: vec![],
                })
            } else {
                Err(FetchError::Transient {
                    reason: "upstream 502".to_string(),
                })
            }
        }
    }

    struct CollectingSink {
        published: Mutex<Vec<SymbolReport>>,
    }

    #[async_trait]
    impl ReportSink for CollectingSink {
        async fn publish(&self, report: &SymbolReport) -> anyhow::Result<()> {
            self.published.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn test_config(symbols: &[&str]) -> Config {
        let mut config = Config::from_env().unwrap();
        config.symbols = symbols.iter().map(|s| s.to_string()).collect();
        config.retry_backoff_floor = Duration::from_millis(10);
        config.max_retries = 1;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn complete_symbol_produces_signal_and_publishes() {
        let sink = Arc::new(CollectingSink {
            published: Mutex::new(Vec::new()),
        });
        let orchestrator = BatchOrchestrator::new(
            test_config(&["TCS"]),
            Arc::new(StaticSource {
                chain_available: true,
                historical_available: true,
            }),
            Arc::clone(&sink) as Arc<dyn ReportSink>,
        );

        let reports = orchestrator.run(None).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, SymbolStatus::Complete);
        assert!(reports[0].signal.is_some());
        assert_eq!(sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_chain_degrades_but_still_signals() {
        let sink = Arc::new(CollectingSink {
            published: Mutex::new(Vec::new()),
        });
        let orchestrator = BatchOrchestrator::new(
            test_config(&["INFY"]),
            Arc::new(StaticSource {
                chain_available: false,
                historical_available: true,
            }),
            Arc::clone(&sink) as Arc<dyn ReportSink>,
        );

        let reports = orchestrator.run(None).await.unwrap();

        assert_eq!(reports.len(), 1);
        match &reports[0].status {
            SymbolStatus::Degraded { missing } => {
                assert!(missing.contains(&"option_chain".to_string()));
            }
            other => panic!("expected Degraded, got {:?}", other),
        }
        let signal = reports[0].signal.as_ref().unwrap();
        assert!(signal.degraded_inputs.contains(&"option_chain".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_historical_fails_the_symbol_only() {
        let sink = Arc::new(CollectingSink {
            published: Mutex::new(Vec::new()),
        });
        let orchestrator = BatchOrchestrator::new(
            test_config(&["BAD"]),
            Arc::new(StaticSource {
                chain_available: true,
                historical_available: false,
            }),
            Arc::clone(&sink) as Arc<dyn ReportSink>,
        );

        let reports = orchestrator.run(None).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, SymbolStatus::Failed);
        assert!(reports[0].signal.is_none());
    }
}
