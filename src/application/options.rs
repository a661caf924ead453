//! Derives positioning metrics from an option chain snapshot.

use crate::config::SignalConfig;
use crate::domain::types::{
    Moneyness, OptionChainSnapshot, OptionKind, OptionMetrics, OptionRecord,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct OptionAnalyzer {
    min_open_interest: u64,
}

impl OptionAnalyzer {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            min_open_interest: config.min_open_interest,
        }
    }

    /// Chain-wide metrics for one symbol at the given spot price.
    ///
    /// An empty chain or one covering a single expiry still yields metrics,
    /// flagged degraded so the aggregator discounts them.
    pub fn analyze(&self, chain: &OptionChainSnapshot, current_price: Decimal) -> OptionMetrics {
        if chain.records.is_empty() {
            debug!("options [{}]: empty chain", chain.symbol);
            return OptionMetrics {
                iv_percentile: 50.0,
                max_pain: None,
                max_oi_strike: None,
                heavy_oi_strikes: Vec::new(),
                recommended_strike: None,
                moneyness: None,
                degraded: true,
            };
        }

        let expiries: BTreeSet<&str> = chain
            .records
            .iter()
            .map(|r| r.expiry.as_str())
            .collect();
        let degraded = expiries.len() < 2;

        let mut oi_by_strike: BTreeMap<Decimal, u64> = BTreeMap::new();
        for record in &chain.records {
            *oi_by_strike.entry(record.strike).or_default() += record.open_interest;
        }

        let mut by_oi: Vec<(Decimal, u64)> =
            oi_by_strike.iter().map(|(s, oi)| (*s, *oi)).collect();
        by_oi.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let max_oi_strike = by_oi.first().map(|(s, _)| *s);
        // Strikes carrying 1.5x the mean open interest mark where writers
        // are concentrated.
        let mean_oi = by_oi.iter().map(|(_, oi)| *oi).sum::<u64>() as f64 / by_oi.len() as f64;
        let heavy_oi_strikes: Vec<Decimal> = by_oi
            .iter()
            .filter(|(_, oi)| *oi as f64 > 1.5 * mean_oi)
            .map(|(s, _)| *s)
            .collect();

        OptionMetrics {
            iv_percentile: iv_percentile(&chain.records, current_price),
            max_pain: max_pain(&chain.records, current_price),
            max_oi_strike,
            heavy_oi_strikes,
            recommended_strike: None,
            moneyness: None,
            degraded,
        }
    }

    /// Strike of `kind` nearest the price target, preferring liquid strikes.
    ///
    /// Strikes below the open-interest floor are only considered when no
    /// liquid strike exists at all.
    pub fn recommend_strike(
        &self,
        chain: &OptionChainSnapshot,
        target: Decimal,
        kind: OptionKind,
    ) -> Option<Decimal> {
        let nearest = |records: &mut dyn Iterator<Item = &OptionRecord>| -> Option<Decimal> {
            records
                .map(|r| r.strike)
                .min_by_key(|s| (*s - target).abs())
        };

        let mut liquid = chain
            .records
            .iter()
            .filter(|r| r.kind == kind && r.open_interest >= self.min_open_interest);
        if let Some(strike) = nearest(&mut liquid) {
            return Some(strike);
        }
        let mut any = chain.records.iter().filter(|r| r.kind == kind);
        nearest(&mut any)
    }
}

/// How a strike sits relative to spot for the given option kind. Within
/// half a percent of spot counts as at-the-money.
pub fn moneyness(strike: Decimal, current_price: Decimal, kind: OptionKind) -> Moneyness {
    if current_price.is_zero() {
        return Moneyness::Atm;
    }
    let band = current_price * Decimal::new(5, 3);
    if (strike - current_price).abs() <= band {
        Moneyness::Atm
    } else {
        match kind {
            OptionKind::Call if strike < current_price => Moneyness::Itm,
            OptionKind::Put if strike > current_price => Moneyness::Itm,
            _ => Moneyness::Otm,
        }
    }
}

/// Midrank percentile of at-the-money IV against the chain's own IV
/// distribution. Degenerate distributions rank at 50.
fn iv_percentile(records: &[OptionRecord], current_price: Decimal) -> f64 {
    let ivs: Vec<f64> = records
        .iter()
        .map(|r| r.implied_volatility)
        .filter(|iv| iv.is_finite() && *iv > 0.0)
        .collect();
    if ivs.len() < 2 {
        return 50.0;
    }

    let atm_iv = records
        .iter()
        .filter(|r| r.implied_volatility.is_finite() && r.implied_volatility > 0.0)
        .min_by_key(|r| (r.strike - current_price).abs())
        .map(|r| r.implied_volatility);
    let Some(atm_iv) = atm_iv else {
        return 50.0;
    };

    let below = ivs.iter().filter(|iv| **iv < atm_iv).count() as f64;
    let equal = ivs.iter().filter(|iv| **iv == atm_iv).count() as f64;
    let n = ivs.len() as f64;
    if equal == n {
        return 50.0;
    }
    (below + equal / 2.0) / n * 100.0
}

/// Strike where total intrinsic payout to option holders is smallest.
///
/// Computed over the sorted set of unique strikes; payout for expiry at S
/// is call OI times max(S - K, 0) plus put OI times max(K - S, 0). Ties
/// resolve to the strike nearest the current price.
fn max_pain(records: &[OptionRecord], current_price: Decimal) -> Option<Decimal> {
    let strikes: BTreeSet<Decimal> = records.iter().map(|r| r.strike).collect();
    if strikes.is_empty() {
        return None;
    }

    let mut best: Option<(Decimal, Decimal)> = None;
    for &settle in &strikes {
        let mut payout = Decimal::ZERO;
        for record in records {
            let oi = Decimal::from(record.open_interest);
            let intrinsic = match record.kind {
                OptionKind::Call if settle > record.strike => settle - record.strike,
                OptionKind::Put if settle < record.strike => record.strike - settle,
                _ => Decimal::ZERO,
            };
            payout += oi * intrinsic;
        }
        let better = match best {
            None => true,
            Some((best_strike, best_payout)) => {
                payout < best_payout
                    || (payout == best_payout
                        && (settle - current_price).abs() < (best_strike - current_price).abs())
            }
        };
        if better {
            best = Some((settle, payout));
        }
    }
    best.map(|(strike, _)| strike)
}
