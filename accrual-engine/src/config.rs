//! Accrual engine configuration

use crate::volatility::{SeededVolatility, VolatilitySource, DEFAULT_VOLATILITY_BOUND};
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Accrual configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    /// Noise bound applied to in-progress profit
    pub volatility_bound: Decimal,

    /// Fixed PRNG seed; entropy when unset
    pub volatility_seed: Option<u64>,

    /// Refuse withdrawals before the plan completes
    pub require_completion_for_withdrawal: bool,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            volatility_bound: DEFAULT_VOLATILITY_BOUND,
            volatility_seed: None,
            require_completion_for_withdrawal: false,
        }
    }
}

impl AccrualConfig {
    /// Build the volatility source described by this config
    pub fn volatility_source(&self) -> Result<Arc<dyn VolatilitySource>> {
        let source = match self.volatility_seed {
            Some(seed) => SeededVolatility::from_seed(seed, self.volatility_bound)?,
            None => SeededVolatility::from_entropy(self.volatility_bound)?,
        };
        Ok(Arc::new(source))
    }
}
