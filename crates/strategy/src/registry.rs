use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use common::{Error, Result};

use crate::config::{StrategyConfig, StrategyFileConfig};
use crate::strategies::{MacdStrategy, MomentumStrategy, RsiStrategy};
use crate::Strategy;

/// Named, constructed strategy instances shared by every scheduled job.
///
/// Built once at startup and read-only afterwards; `get` hands out clones of
/// the same `Arc` so jobs never reconstruct a strategy per tick.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from config. Entries that fail to resolve are
    /// logged and left out; startup continues with the rest.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Self {
        let mut registry = Self::new();

        for cfg in &file_cfg.strategies {
            if registry.strategies.contains_key(&cfg.name) {
                warn!(name = %cfg.name, "Duplicate strategy name in config, keeping the first");
                continue;
            }
            match build_strategy(cfg) {
                Ok(strategy) => {
                    info!(name = %cfg.name, kind = strategy.kind(), "Registered strategy");
                    registry.strategies.insert(cfg.name.clone(), strategy);
                }
                Err(e) => {
                    error!(name = %cfg.name, error = %e, "Failed to load strategy");
                }
            }
        }

        registry
    }

    /// Explicit registration for strategies built outside the config file.
    /// Replaces any instance already registered under `name`.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn Strategy>) {
        let name = name.into();
        if self.strategies.insert(name.clone(), strategy).is_some() {
            warn!(name = %name, "Replaced previously registered strategy");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    /// Names of every strategy that resolved, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

// ─── Strategy builders ────────────────────────────────────────────────────────

/// Construct one strategy from its config entry. The set of types is closed;
/// unknown types and parameters a type does not take are rejected.
pub fn build_strategy(cfg: &StrategyConfig) -> Result<Arc<dyn Strategy>> {
    let params = Params::new(cfg);
    match cfg.strategy_type.as_str() {
        "macd" => {
            params.only(&["fast", "slow", "signal"])?;
            let fast = params.usize("fast", 12)?;
            let slow = params.usize("slow", 26)?;
            let signal = params.usize("signal", 9)?;
            Ok(Arc::new(MacdStrategy::new(fast, slow, signal)?))
        }
        "momentum" => {
            params.only(&["period", "buy_threshold", "sell_threshold"])?;
            let period = params.usize("period", 10)?;
            let buy = params.f64("buy_threshold", 0.0)?;
            let sell = params.f64("sell_threshold", 0.0)?;
            Ok(Arc::new(MomentumStrategy::new(period, buy, sell)?))
        }
        "rsi" => {
            params.only(&["period", "overbought", "oversold"])?;
            let period = params.usize("period", 14)?;
            let overbought = params.f64("overbought", 70.0)?;
            let oversold = params.f64("oversold", 30.0)?;
            Ok(Arc::new(RsiStrategy::new(period, overbought, oversold)?))
        }
        other => Err(Error::UnknownStrategy(other.to_string())),
    }
}

struct Params<'a> {
    cfg: &'a StrategyConfig,
}

impl<'a> Params<'a> {
    fn new(cfg: &'a StrategyConfig) -> Self {
        Self { cfg }
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidParameter {
            strategy: self.cfg.name.clone(),
            reason,
        }
    }

    fn only(&self, allowed: &[&str]) -> Result<()> {
        let mut unknown: Vec<&str> = self
            .cfg
            .params
            .keys()
            .map(String::as_str)
            .filter(|k| !allowed.contains(k))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort();
        Err(self.invalid(format!("unknown parameters: {}", unknown.join(", "))))
    }

    fn f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.cfg.params.get(key) {
            None => Ok(default),
            Some(toml::Value::Float(v)) => Ok(*v),
            Some(toml::Value::Integer(v)) => Ok(*v as f64),
            Some(other) => Err(self.invalid(format!("'{key}' must be a number, got {other}"))),
        }
    }

    fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.cfg.params.get(key) {
            None => Ok(default),
            Some(toml::Value::Integer(v)) => usize::try_from(*v)
                .map_err(|_| self.invalid(format!("'{key}' must be non-negative, got {v}"))),
            Some(other) => Err(self.invalid(format!("'{key}' must be an integer, got {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kind: &str, name: &str, params: &[(&str, toml::Value)]) -> StrategyConfig {
        StrategyConfig {
            strategy_type: kind.into(),
            name: name.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn unknown_type_is_omitted_not_fatal() {
        let file = StrategyFileConfig {
            strategies: vec![cfg("macd", "a", &[]), cfg("bollinger", "b", &[])],
        };
        let registry = StrategyRegistry::from_config(&file);
        assert_eq!(registry.available(), vec!["a".to_string()]);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn unregistered_parameter_is_rejected() {
        let err = build_strategy(&cfg("macd", "a", &[("fastest", toml::Value::Integer(3))]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn invalid_value_is_rejected() {
        let err = build_strategy(&cfg(
            "macd",
            "a",
            &[("fast", toml::Value::Integer(30)), ("slow", toml::Value::Integer(10))],
        ))
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidParameter { .. }));

        assert!(build_strategy(&cfg("rsi", "r", &[("period", toml::Value::Integer(-3))])).is_err());
        assert!(build_strategy(&cfg(
            "momentum",
            "m",
            &[("buy_threshold", toml::Value::String("high".into()))]
        ))
        .is_err());
    }

    #[test]
    fn integer_thresholds_are_accepted() {
        let strategy = build_strategy(&cfg(
            "momentum",
            "m",
            &[("buy_threshold", toml::Value::Integer(1))],
        ))
        .unwrap();
        assert_eq!(strategy.kind(), "momentum");
    }

    #[test]
    fn get_returns_the_same_instance() {
        let file = StrategyFileConfig {
            strategies: vec![cfg("rsi", "rsi14", &[])],
        };
        let registry = StrategyRegistry::from_config(&file);
        let a = registry.get("rsi14").unwrap();
        let b = registry.get("rsi14").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn duplicate_names_keep_first() {
        let file = StrategyFileConfig {
            strategies: vec![cfg("rsi", "x", &[]), cfg("macd", "x", &[])],
        };
        let registry = StrategyRegistry::from_config(&file);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("x").unwrap().kind(), "rsi");
    }

    #[test]
    fn register_adds_plugin_strategy() {
        let mut registry = StrategyRegistry::new();
        assert!(registry.is_empty());
        registry.register("custom", Arc::new(MomentumStrategy::new(3, 0.0, 0.0).unwrap()));
        assert_eq!(registry.available(), vec!["custom".to_string()]);
    }
}
