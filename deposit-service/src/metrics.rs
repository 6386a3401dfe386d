//! Prometheus metrics for the deposit service
//!
//! # Metrics
//!
//! - `deposit_submissions_total` - Deposits submitted
//! - `deposit_confirmations_total` - Deposits confirmed
//! - `deposit_confirmation_mismatches_total` - Confirmations rejected for amount mismatch
//! - `deposit_referral_bonuses_total` - Referral bonuses paid
//! - `deposit_cascade_halts_total` - Cascades stopped by a broken or cyclic referral graph
//! - `deposit_withdrawals_total` - Positions withdrawn
//! - `deposit_notifications_dropped_total` - Notifications dropped at the queue
//! - `deposit_active_positions` - Positions currently accruing

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metrics collector
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    /// Deposits submitted
    pub submissions_total: IntCounter,

    /// Deposits confirmed
    pub confirmations_total: IntCounter,

    /// Amount mismatches
    pub mismatches_total: IntCounter,

    /// Referral bonuses paid
    pub referral_bonuses_total: IntCounter,

    /// Cascades halted by graph problems
    pub cascade_halts_total: IntCounter,

    /// Withdrawals
    pub withdrawals_total: IntCounter,

    /// Notifications dropped
    pub notifications_dropped_total: IntCounter,

    /// Open positions
    pub active_positions: IntGauge,

    registry: Registry,
}

impl ServiceMetrics {
    /// Create collectors on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let submissions_total = counter("deposit_submissions_total", "Deposits submitted")?;
        let confirmations_total = counter("deposit_confirmations_total", "Deposits confirmed")?;
        let mismatches_total = counter(
            "deposit_confirmation_mismatches_total",
            "Confirmations rejected for amount mismatch",
        )?;
        let referral_bonuses_total =
            counter("deposit_referral_bonuses_total", "Referral bonuses paid")?;
        let cascade_halts_total = counter(
            "deposit_cascade_halts_total",
            "Cascades stopped by a broken or cyclic referral graph",
        )?;
        let withdrawals_total = counter("deposit_withdrawals_total", "Positions withdrawn")?;
        let notifications_dropped_total = counter(
            "deposit_notifications_dropped_total",
            "Notifications dropped at the queue",
        )?;

        let active_positions =
            IntGauge::new("deposit_active_positions", "Positions currently accruing")?;
        registry.register(Box::new(active_positions.clone()))?;

        Ok(Self {
            submissions_total,
            confirmations_total,
            mismatches_total,
            referral_bonuses_total,
            cascade_halts_total,
            withdrawals_total,
            notifications_dropped_total,
            active_positions,
            registry,
        })
    }

    /// Registry holding every collector
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
