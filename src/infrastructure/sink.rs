//! Report sinks: JSON lines on stdout for the CLI, in-memory for tests.

use crate::domain::ports::ReportSink;
use crate::domain::types::SymbolReport;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Writes each report as one JSON object per line on stdout.
pub struct JsonLinesSink;

#[async_trait]
impl ReportSink for JsonLinesSink {
    async fn publish(&self, report: &SymbolReport) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(report)?);
        if let Some(signal) = &report.signal {
            info!(
                "report [{}]: {} (confidence {:.2}, r/r {:.2})",
                report.symbol, signal.direction, signal.confidence, signal.risk_reward
            );
        }
        Ok(())
    }
}

/// Collects reports in memory. Test support.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<SymbolReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<SymbolReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn publish(&self, report: &SymbolReport) -> anyhow::Result<()> {
        self.reports
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(report.clone());
        Ok(())
    }
}
