//! Configuration module for Stockscout.
//!
//! All tunables are supplied externally (environment variables, with CLI
//! overrides applied in `main`); components never hardcode policy values.
//! Invalid configuration fails fast at startup.

use crate::domain::errors::ConfigError;
use crate::domain::types::EndpointClass;
use rust_decimal::Decimal;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Per-class call budgets over one rolling window.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub window: Duration,
    pub historical_max: u32,
    pub quote_max: u32,
    pub option_chain_max: u32,
    pub other_max: u32,
}

impl QuotaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            window: Duration::from_secs(env_parse("QUOTA_WINDOW_SECS", 60u64)?),
            // Zerodha-style budgets: historical data is the scarcest class.
            historical_max: env_parse("QUOTA_HISTORICAL_MAX", 3u32)?,
            quote_max: env_parse("QUOTA_QUOTE_MAX", 60u32)?,
            option_chain_max: env_parse("QUOTA_OPTION_CHAIN_MAX", 10u32)?,
            other_max: env_parse("QUOTA_OTHER_MAX", 30u32)?,
        })
    }

    pub fn limit_for(&self, class: EndpointClass) -> u32 {
        match class {
            EndpointClass::Historical => self.historical_max,
            EndpointClass::Quote => self.quote_max,
            EndpointClass::OptionChain => self.option_chain_max,
            EndpointClass::Other => self.other_max,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::NonPositive {
                name: "QUOTA_WINDOW_SECS",
                value: "0".to_string(),
            });
        }
        for (name, max) in [
            ("QUOTA_HISTORICAL_MAX", self.historical_max),
            ("QUOTA_QUOTE_MAX", self.quote_max),
            ("QUOTA_OPTION_CHAIN_MAX", self.option_chain_max),
            ("QUOTA_OTHER_MAX", self.other_max),
        ] {
            if max == 0 {
                return Err(ConfigError::NonPositive {
                    name,
                    value: max.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Lookback parameters for the indicator pipeline.
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub momentum_period: usize,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub sma_trend: usize,
    pub sr_lookback: usize,
    pub sr_window: usize,
    /// Levels closer than this fraction of price to an accepted level are
    /// dropped as near-duplicates.
    pub sr_min_separation_pct: f64,
    pub volatility_window: usize,
}

impl IndicatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rsi_period: env_parse("RSI_PERIOD", 14usize)?,
            macd_fast: env_parse("MACD_FAST", 12usize)?,
            macd_slow: env_parse("MACD_SLOW", 26usize)?,
            macd_signal: env_parse("MACD_SIGNAL", 9usize)?,
            momentum_period: env_parse("MOMENTUM_PERIOD", 10usize)?,
            sma_fast: env_parse("SMA_FAST", 20usize)?,
            sma_slow: env_parse("SMA_SLOW", 50usize)?,
            sma_trend: env_parse("SMA_TREND", 200usize)?,
            sr_lookback: env_parse("SR_LOOKBACK", 30usize)?,
            sr_window: env_parse("SR_WINDOW", 5usize)?,
            sr_min_separation_pct: env_parse("SR_MIN_SEPARATION_PCT", 0.005f64)?,
            volatility_window: env_parse("VOLATILITY_WINDOW", 30usize)?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("RSI_PERIOD", self.rsi_period),
            ("MACD_FAST", self.macd_fast),
            ("MACD_SLOW", self.macd_slow),
            ("MACD_SIGNAL", self.macd_signal),
            ("MOMENTUM_PERIOD", self.momentum_period),
            ("SMA_FAST", self.sma_fast),
            ("SMA_SLOW", self.sma_slow),
            ("SMA_TREND", self.sma_trend),
            ("SR_LOOKBACK", self.sr_lookback),
            ("SR_WINDOW", self.sr_window),
            ("VOLATILITY_WINDOW", self.volatility_window),
        ] {
            if v == 0 {
                return Err(ConfigError::NonPositive {
                    name,
                    value: v.to_string(),
                });
            }
        }
        if self.macd_fast >= self.macd_slow {
            return Err(ConfigError::InvalidValue {
                name: "MACD_FAST".to_string(),
                reason: format!(
                    "fast period {} must be below slow period {}",
                    self.macd_fast, self.macd_slow
                ),
            });
        }
        if !(self.sr_min_separation_pct.is_finite() && self.sr_min_separation_pct > 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "SR_MIN_SEPARATION_PCT".to_string(),
                reason: format!("must be a positive fraction, got {}", self.sr_min_separation_pct),
            });
        }
        Ok(())
    }
}

/// The primary tunable policy surface: how per-indicator scores combine
/// into one confidence number.
#[derive(Debug, Clone)]
pub struct SignalWeights {
    pub trend: f64,
    pub momentum: f64,
    pub macd: f64,
    pub options: f64,
}

impl SignalWeights {
    pub fn sum(&self) -> f64 {
        self.trend + self.momentum + self.macd + self.options
    }
}

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub weights: SignalWeights,
    /// Confidence multiplier applied once per insufficient or missing input.
    pub degradation_penalty: f64,
    pub min_risk_reward: f64,
    /// Floor on stop distance as a fraction of price.
    pub min_stop_distance_pct: f64,
    /// Target = price extended by this multiple of the S/R band width.
    pub target_band_multiple: f64,
    pub min_open_interest: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights {
                trend: 0.3,
                momentum: 0.3,
                macd: 0.2,
                options: 0.2,
            },
            degradation_penalty: 0.75,
            min_risk_reward: 1.0,
            min_stop_distance_pct: 0.01,
            target_band_multiple: 1.0,
            min_open_interest: 100,
        }
    }
}

impl SignalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            weights: SignalWeights {
                trend: env_parse("WEIGHT_TREND", 0.3f64)?,
                momentum: env_parse("WEIGHT_MOMENTUM", 0.3f64)?,
                macd: env_parse("WEIGHT_MACD", 0.2f64)?,
                options: env_parse("WEIGHT_OPTIONS", 0.2f64)?,
            },
            degradation_penalty: env_parse("DEGRADATION_PENALTY", 0.75f64)?,
            min_risk_reward: env_parse("MIN_RISK_REWARD", 1.0f64)?,
            min_stop_distance_pct: env_parse("MIN_STOP_DISTANCE_PCT", 0.01f64)?,
            target_band_multiple: env_parse("TARGET_BAND_MULTIPLE", 1.0f64)?,
            min_open_interest: env_parse("MIN_OPEN_INTEREST", 100u64)?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (name, v) in [
            ("WEIGHT_TREND", w.trend),
            ("WEIGHT_MOMENTUM", w.momentum),
            ("WEIGHT_MACD", w.macd),
            ("WEIGHT_OPTIONS", w.options),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::InvalidWeights {
                    reason: format!("{name} must be finite and non-negative, got {v}"),
                });
            }
        }
        if w.sum() <= 0.0 {
            return Err(ConfigError::InvalidWeights {
                reason: "weights sum to zero".to_string(),
            });
        }
        if !(self.degradation_penalty > 0.0 && self.degradation_penalty <= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "DEGRADATION_PENALTY".to_string(),
                reason: format!("must be in (0, 1], got {}", self.degradation_penalty),
            });
        }
        if !(self.min_risk_reward.is_finite() && self.min_risk_reward >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "MIN_RISK_REWARD".to_string(),
                reason: format!("must be non-negative, got {}", self.min_risk_reward),
            });
        }
        if !(self.min_stop_distance_pct > 0.0 && self.min_stop_distance_pct < 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "MIN_STOP_DISTANCE_PCT".to_string(),
                reason: format!("must be a fraction in (0, 1), got {}", self.min_stop_distance_pct),
            });
        }
        if !(self.target_band_multiple.is_finite() && self.target_band_multiple > 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "TARGET_BAND_MULTIPLE".to_string(),
                reason: format!("must be positive, got {}", self.target_band_multiple),
            });
        }
        Ok(())
    }
}

/// Account assumptions used for position sizing recommendations.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub account_size: Decimal,
    pub max_risk_pct: f64,
    pub max_position_pct: f64,
}

impl AccountConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::var("ACCOUNT_SIZE").unwrap_or_else(|_| "100000".to_string());
        let account_size = raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: "ACCOUNT_SIZE".to_string(),
            reason: format!("not a decimal number: {raw}"),
        })?;
        Ok(Self {
            account_size,
            max_risk_pct: env_parse("MAX_RISK_PCT", 2.0f64)?,
            max_position_pct: env_parse("MAX_POSITION_PCT", 10.0f64)?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.account_size <= Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                name: "ACCOUNT_SIZE",
                value: self.account_size.to_string(),
            });
        }
        if self.max_risk_pct <= 0.0 || self.max_position_pct <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_RISK_PCT / MAX_POSITION_PCT".to_string(),
                reason: "risk percentages must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Main application configuration, aggregated from the sub-sections above.
#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    pub fetch_workers: usize,
    pub historical_days: u32,
    pub max_retries: u32,
    pub retry_backoff_floor: Duration,
    pub quota: QuotaConfig,
    pub indicators: IndicatorConfig,
    pub signal: SignalConfig,
    pub account: AccountConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let symbols = env::var("SYMBOLS")
            .unwrap_or_else(|_| "RELIANCE,TCS,HDFCBANK,INFY,ICICIBANK".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Self {
            symbols,
            fetch_workers: env_parse("FETCH_WORKERS", 4usize)?,
            historical_days: env_parse("HISTORICAL_DAYS", 365u32)?,
            max_retries: env_parse("MAX_RETRIES", 3u32)?,
            retry_backoff_floor: Duration::from_millis(env_parse(
                "RETRY_BACKOFF_FLOOR_MS",
                2_000u64,
            )?),
            quota: QuotaConfig::from_env()?,
            indicators: IndicatorConfig::from_env()?,
            signal: SignalConfig::from_env()?,
            account: AccountConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_workers == 0 {
            return Err(ConfigError::NonPositive {
                name: "FETCH_WORKERS",
                value: "0".to_string(),
            });
        }
        if self.historical_days == 0 {
            return Err(ConfigError::NonPositive {
                name: "HISTORICAL_DAYS",
                value: "0".to_string(),
            });
        }
        if self.retry_backoff_floor.is_zero() {
            return Err(ConfigError::NonPositive {
                name: "RETRY_BACKOFF_FLOOR_MS",
                value: "0".to_string(),
            });
        }
        self.quota.validate()?;
        self.indicators.validate()?;
        self.signal.validate()?;
        self.account.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> Config {
        Config {
            symbols: vec!["TCS".to_string()],
            fetch_workers: 4,
            historical_days: 365,
            max_retries: 3,
            retry_backoff_floor: Duration::from_secs(2),
            quota: QuotaConfig {
                window: Duration::from_secs(60),
                historical_max: 3,
                quote_max: 60,
                option_chain_max: 10,
                other_max: 30,
            },
            indicators: IndicatorConfig {
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
            },
            signal: SignalConfig {
                weights: SignalWeights {
                    trend: 0.3,
                    momentum: 0.3,
                    macd: 0.2,
                    options: 0.2,
                },
                degradation_penalty: 0.75,
                min_risk_reward: 1.0,
                min_stop_distance_pct: 0.01,
                target_band_multiple: 1.0,
                min_open_interest: 100,
            },
            account: AccountConfig {
                account_size: dec!(100000),
                max_risk_pct: 2.0,
                max_position_pct: 10.0,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = base_config();
        config.fetch_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_quota_window_rejected() {
        let mut config = base_config();
        config.quota.window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let mut config = base_config();
        config.signal.weights.macd = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn all_zero_weights_rejected() {
        let mut config = base_config();
        config.signal.weights = SignalWeights {
            trend: 0.0,
            momentum: 0.0,
            macd: 0.0,
            options: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_macd_periods_rejected() {
        let mut config = base_config();
        config.indicators.macd_fast = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn quota_limit_lookup_per_class() {
        let config = base_config();
        assert_eq!(config.quota.limit_for(EndpointClass::Historical), 3);
        assert_eq!(config.quota.limit_for(EndpointClass::Quote), 60);
    }
}
