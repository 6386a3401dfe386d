//! Bounded multiplicative noise applied to in-progress profit

use crate::{Error, Result};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Decimal places of sampled volatility
const SAMPLE_SCALE: u32 = 6;

/// Default noise bound (plus or minus 12.5%)
pub const DEFAULT_VOLATILITY_BOUND: Decimal = Decimal::from_parts(125, 0, 0, false, 3);

/// Source of volatility samples in `[-bound, +bound]`
pub trait VolatilitySource: Send + Sync + std::fmt::Debug {
    /// Draw one sample
    fn sample(&self) -> Decimal;
}

/// Uniform samples from a seedable PRNG
#[derive(Debug)]
pub struct SeededVolatility {
    /// Bound in units of 10^-SAMPLE_SCALE
    bound_units: i64,
    rng: Mutex<StdRng>,
}

impl SeededVolatility {
    /// Reproducible sequence for `seed`
    pub fn from_seed(seed: u64, bound: Decimal) -> Result<Self> {
        Self::with_rng(StdRng::seed_from_u64(seed), bound)
    }

    /// Sequence seeded from OS entropy
    pub fn from_entropy(bound: Decimal) -> Result<Self> {
        Self::with_rng(StdRng::from_entropy(), bound)
    }

    fn with_rng(rng: StdRng, bound: Decimal) -> Result<Self> {
        if bound.is_sign_negative() || bound >= Decimal::ONE {
            return Err(Error::InvalidConfig(format!(
                "volatility bound must be in [0, 1), got {}",
                bound
            )));
        }

        let bound_units = (bound * Decimal::from(10u64.pow(SAMPLE_SCALE)))
            .trunc()
            .to_i64()
            .ok_or_else(|| Error::InvalidConfig(format!("volatility bound {} out of range", bound)))?;

        Ok(Self {
            bound_units,
            rng: Mutex::new(rng),
        })
    }

    /// Configured bound
    pub fn bound(&self) -> Decimal {
        Decimal::new(self.bound_units, SAMPLE_SCALE)
    }
}

impl VolatilitySource for SeededVolatility {
    fn sample(&self) -> Decimal {
        let units = self
            .rng
            .lock()
            .gen_range(-self.bound_units..=self.bound_units);
        Decimal::new(units, SAMPLE_SCALE)
    }
}

/// Always returns the same value
#[derive(Debug, Clone, Copy)]
pub struct FixedVolatility(pub Decimal);

impl VolatilitySource for FixedVolatility {
    fn sample(&self) -> Decimal {
        self.0
    }
}
