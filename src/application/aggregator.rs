//! Combines indicator scores and option metrics into one directional signal.
//!
//! The weighting scheme is policy, not code: every blend ratio comes from
//! [`SignalConfig`] and missing inputs shrink confidence instead of
//! blocking the signal.

use crate::application::options::{OptionAnalyzer, moneyness};
use crate::config::{AccountConfig, SignalConfig};
use crate::domain::types::{
    Direction, IndicatorSet, OptionChainSnapshot, OptionKind, OptionMetrics, PositionAdvice,
    Signal,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tracing::debug;

pub struct SignalAggregator {
    config: SignalConfig,
    account: AccountConfig,
    options: OptionAnalyzer,
}

/// Per-component normalized scores on [-1, 1], `None` when the input was
/// insufficient or unavailable.
struct Components {
    trend: Option<f64>,
    momentum: Option<f64>,
    macd: Option<f64>,
    options: Option<f64>,
}

impl SignalAggregator {
    pub fn new(config: SignalConfig, account: AccountConfig) -> Self {
        let options = OptionAnalyzer::new(&config);
        Self {
            config,
            account,
            options,
        }
    }

    /// Build the signal for one symbol from whatever inputs survived the
    /// fetch stage.
    pub fn build(
        &self,
        symbol: &str,
        current_price: Decimal,
        indicators: IndicatorSet,
        chain: Option<&OptionChainSnapshot>,
    ) -> Signal {
        let mut option_metrics = chain.map(|c| self.options.analyze(c, current_price));

        let mut degraded_inputs: Vec<String> =
            indicators.insufficient().iter().cloned().collect();
        match &option_metrics {
            None => degraded_inputs.push("option_chain".to_string()),
            Some(m) if m.degraded => degraded_inputs.push("option_chain".to_string()),
            Some(_) => {}
        }

        let components = Components {
            trend: indicators.score("trend"),
            momentum: indicators.score("momentum").map(|m| (m - 50.0) / 50.0),
            macd: indicators.score("macd"),
            options: option_metrics
                .as_ref()
                .and_then(|m| options_score(m, current_price)),
        };

        let vote = self.vote(&components);
        let mut penalized_inputs = [
            components.trend,
            components.momentum,
            components.macd,
            components.options,
        ]
        .iter()
        .filter(|c| c.is_none())
        .count() as i32;
        // A chain that is present but degraded still costs confidence.
        if option_metrics.as_ref().is_some_and(|m| m.degraded) {
            penalized_inputs += 1;
        }
        let confidence = self.confidence(&components, vote) * self
            .config
            .degradation_penalty
            .powi(penalized_inputs);

        let (target_price, stop_loss, risk_reward) =
            self.price_targets(vote, current_price, &indicators);

        // Thin reward relative to risk demotes the call without erasing the
        // underlying vote.
        let direction = if vote != Direction::Neutral && risk_reward < self.config.min_risk_reward
        {
            debug!(
                "signal [{}]: {} vote downgraded, risk/reward {:.2} below {:.2}",
                symbol, vote, risk_reward, self.config.min_risk_reward
            );
            Direction::Neutral
        } else {
            vote
        };

        let position = match (direction, stop_loss) {
            (Direction::Neutral, _) | (_, None) => None,
            (_, Some(stop)) => self.position_advice(current_price, stop),
        };

        if let (Some(metrics), Some(chain), Some(target)) =
            (option_metrics.as_mut(), chain, target_price)
        {
            let kind = match direction {
                Direction::Bullish => Some(OptionKind::Call),
                Direction::Bearish => Some(OptionKind::Put),
                Direction::Neutral => None,
            };
            if let Some(kind) = kind {
                metrics.recommended_strike = self.options.recommend_strike(chain, target, kind);
                metrics.moneyness = metrics
                    .recommended_strike
                    .map(|strike| moneyness(strike, current_price, kind));
            }
        }

        Signal {
            symbol: symbol.to_string(),
            direction,
            vote,
            confidence,
            target_price,
            stop_loss,
            risk_reward,
            position,
            indicators,
            options: option_metrics,
            degraded_inputs,
            timestamp: Utc::now(),
        }
    }

    /// Majority vote over trend sign, momentum band and MACD sign.
    /// Momentum breaks ties.
    fn vote(&self, c: &Components) -> Direction {
        let trend_vote = c.trend.map(|t| classify(t, 0.1));
        let momentum_vote = c.momentum.map(|m| classify(m, 0.1));
        let macd_vote = c.macd.map(|m| classify(m, 0.0));

        let mut bullish = 0;
        let mut bearish = 0;
        for vote in [trend_vote, momentum_vote, macd_vote].into_iter().flatten() {
            match vote {
                Direction::Bullish => bullish += 1,
                Direction::Bearish => bearish += 1,
                Direction::Neutral => {}
            }
        }

        if bullish > bearish {
            Direction::Bullish
        } else if bearish > bullish {
            Direction::Bearish
        } else {
            momentum_vote.unwrap_or(Direction::Neutral)
        }
    }

    /// Weighted average of per-component conviction, renormalized over the
    /// components that are actually present.
    fn confidence(&self, c: &Components, vote: Direction) -> f64 {
        let w = &self.config.weights;
        let sign = match vote {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
            Direction::Neutral => 0.0,
        };

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (score, weight) in [
            (c.trend, w.trend),
            (c.momentum, w.momentum),
            (c.macd, w.macd),
            (c.options, w.options),
        ] {
            let Some(score) = score else { continue };
            let strength = if vote == Direction::Neutral {
                1.0 - score.abs()
            } else {
                ((score * sign) + 1.0) / 2.0
            };
            weighted += weight * strength.clamp(0.0, 1.0);
            total_weight += weight;
        }

        if total_weight <= 0.0 {
            0.0
        } else {
            weighted / total_weight
        }
    }

    /// Target from the support/resistance band, stop at the nearest level
    /// on the losing side with a minimum-distance floor.
    fn price_targets(
        &self,
        vote: Direction,
        current_price: Decimal,
        indicators: &IndicatorSet,
    ) -> (Option<Decimal>, Option<Decimal>, f64) {
        let Some(price) = current_price.to_f64().filter(|p| *p > 0.0) else {
            return (None, None, 0.0);
        };
        if vote == Direction::Neutral {
            return (None, None, 0.0);
        }
        // Without sustained levels, fall back to a five percent band.
        let (support, resistance) = match (
            indicators.support_levels.last(),
            indicators.resistance_levels.first(),
        ) {
            (Some(&s), Some(&r)) => (s, r),
            _ => (price * 0.975, price * 1.025),
        };

        let band = (resistance - support) * self.config.target_band_multiple;
        let floor = price * self.config.min_stop_distance_pct;

        let (target, stop) = match vote {
            Direction::Bullish => (price + band, support.min(price - floor)),
            Direction::Bearish => (price - band, resistance.max(price + floor)),
            Direction::Neutral => unreachable!(),
        };

        let reward = (target - price).abs();
        let risk = (stop - price).abs();
        let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

        (
            Decimal::from_f64(target),
            Decimal::from_f64(stop),
            risk_reward,
        )
    }

    /// Risk-based sizing: shares limited by per-trade risk budget, then by
    /// the maximum portfolio allocation.
    fn position_advice(&self, price: Decimal, stop: Decimal) -> Option<PositionAdvice> {
        let price_f = price.to_f64().filter(|p| *p > 0.0)?;
        let stop_f = stop.to_f64()?;
        let per_share_risk = (price_f - stop_f).abs();
        if per_share_risk <= 0.0 {
            return None;
        }

        let account = self.account.account_size.to_f64()?;
        let risk_budget = account * self.account.max_risk_pct / 100.0;
        let allocation_cap = account * self.account.max_position_pct / 100.0;

        let by_risk = (risk_budget / per_share_risk).floor();
        let by_allocation = (allocation_cap / price_f).floor();
        let shares = by_risk.min(by_allocation).max(0.0) as u64;
        if shares == 0 {
            return None;
        }

        let notional = Decimal::from(shares) * price;
        let portfolio_pct = (notional.to_f64().unwrap_or(0.0) / account) * 100.0;
        Some(PositionAdvice {
            max_shares: shares,
            notional,
            portfolio_pct,
        })
    }
}

fn classify(score: f64, deadband: f64) -> Direction {
    if score > deadband {
        Direction::Bullish
    } else if score < -deadband {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

/// Directional read of the option chain: max-pain drift off spot, leaned
/// on or against by how rich IV ranks within the chain.
fn options_score(metrics: &OptionMetrics, current_price: Decimal) -> Option<f64> {
    let max_pain = metrics.max_pain?;
    let price = current_price.to_f64().filter(|p| *p > 0.0)?;
    let drift = (max_pain.to_f64()? - price) / price;
    let pain = (drift / 0.02).clamp(-1.0, 1.0);
    let iv_lean = (50.0 - metrics.iv_percentile) / 50.0;
    Some((0.6 * pain + 0.4 * iv_lean * pain.signum()).clamp(-1.0, 1.0))
}
