use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use common::{Error, Result};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "macd"
/// name = "macd_default"
///
/// [strategy.params]
/// fast = 12
/// slow = 26
/// signal = 9
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier: "macd", "momentum" or "rsi".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Name scheduled jobs use to refer to this instance.
    pub name: String,
    /// Indicator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read strategy config '{}': {e}", path.display()))
        })?;
        Self::parse(&content).map_err(|e| {
            Error::Config(format!("failed to parse strategy config '{}': {e}", path.display()))
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}
