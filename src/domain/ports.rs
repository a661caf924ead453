use crate::domain::errors::FetchError;
use crate::domain::types::{OhlcvSeries, OptionChainSnapshot, QuoteSnapshot, SymbolReport};
use async_trait::async_trait;

/// Upstream market data collaborator. Authentication and session lifecycle
/// are entirely the implementor's responsibility; the scheduler only sees
/// these three calls and their typed failures.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_historical(&self, symbol: &str, days: u32) -> Result<OhlcvSeries, FetchError>;
    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError>;
    async fn fetch_option_chain(&self, symbol: &str)
    -> Result<OptionChainSnapshot, FetchError>;
}

/// Receives completed per-symbol reports. All serialization and storage
/// live behind this seam; the core never formats output itself.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, report: &SymbolReport) -> anyhow::Result<()>;
}
