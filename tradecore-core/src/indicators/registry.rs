//! Name -> indicator registry, the lookup table playbooks and the backtest
//! engine use to turn an `IndicatorConfig` into a runnable [`Indicator`].

use std::collections::HashMap;

use super::{
    Adx, Atr, Bollinger, Cci, Ema, IndicatorError, KeltnerChannel, Macd, NwEnvelope, NwKernel,
    OrderBlocksFvg, RollingTpo, Rsi, Sma, SmcStructure, Stochastic, WilliamsR,
};
use crate::indicators::Indicator;

pub struct IndicatorRegistry {
    indicators: HashMap<String, Box<dyn Indicator>>,
}

impl Default for IndicatorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            indicators: HashMap::new(),
        };
        registry.register_defaults();
        registry
    }
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the standard-library indicators plus the bundled custom
    /// ones, all under their default parameters. A playbook that needs
    /// non-default parameters registers its own instance under a distinct id
    /// via [`IndicatorRegistry::register`].
    fn register_defaults(&mut self) {
        self.register(Box::new(Rsi::default()));
        self.register(Box::new(Ema::default()));
        self.register(Box::new(Sma::default()));
        self.register(Box::new(Macd::default()));
        self.register(Box::new(Stochastic::default()));
        self.register(Box::new(Bollinger::default()));
        self.register(Box::new(Atr::default()));
        self.register(Box::new(Adx::default()));
        self.register(Box::new(Cci::default()));
        self.register(Box::new(WilliamsR::default()));
        self.register(Box::new(SmcStructure::default()));
        self.register(Box::new(OrderBlocksFvg::default()));
        self.register(Box::new(NwKernel::default()));
        self.register(Box::new(NwEnvelope::default()));
        self.register(Box::new(RollingTpo::default()));
        self.register(Box::new(KeltnerChannel::default()));
    }

    /// Registers an indicator instance under its own `name()`. Later
    /// registrations under the same name replace the earlier one, since a
    /// playbook that instantiates e.g. `rsi` with a non-default period needs
    /// to shadow the registry default under the same lookup key it uses.
    pub fn register(&mut self, indicator: Box<dyn Indicator>) {
        self.indicators.insert(indicator.name().to_string(), indicator);
    }

    /// Registers an indicator under an explicit id distinct from its
    /// `name()`, so a playbook can run the same indicator kind twice with
    /// different parameters (e.g. `h1_rsi` and `h4_rsi`, both RSIs).
    pub fn register_as(&mut self, id: impl Into<String>, indicator: Box<dyn Indicator>) {
        self.indicators.insert(id.into(), indicator);
    }

    pub fn get(&self, id: &str) -> Result<&dyn Indicator, IndicatorError> {
        self.indicators
            .get(id)
            .map(|b| b.as_ref())
            .ok_or_else(|| IndicatorError::UnknownIndicator(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indicators.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.indicators.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_standard_and_structure_indicators() {
        let registry = IndicatorRegistry::new();
        for id in [
            "rsi",
            "ema",
            "sma",
            "macd",
            "stochastic",
            "bollinger",
            "atr",
            "adx",
            "cci",
            "williams_r",
            "smc_structure",
            "order_blocks_fvg",
            "nw_kernel",
            "nw_envelope",
            "rolling_tpo",
            "keltner_channel",
        ] {
            assert!(registry.contains(id), "missing indicator: {id}");
        }
    }

    #[test]
    fn unknown_id_is_an_error_not_a_panic() {
        let registry = IndicatorRegistry::new();
        assert!(registry.get("not_a_real_indicator").is_err());
    }

    #[test]
    fn register_as_allows_parameterized_duplicates() {
        let mut registry = IndicatorRegistry::new();
        registry.register_as("h4_rsi", Box::new(Rsi { period: 21 }));
        assert!(registry.contains("h4_rsi"));
        assert!(registry.contains("rsi"));
    }
}
