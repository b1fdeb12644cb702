//! Withdrawal fee computation.
//!
//! The fee table is configuration, not business logic baked into the orchestrator:
//! rates are basis points per plan tier and can be overridden per deployment.

use crate::ledger::PlanTier;
use std::collections::HashMap;

/// A plan tier without a configured rate. Withdrawals for such a tier are rejected
/// outright instead of silently charging some other tier's rate.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
#[error("no fee rate configured for plan tier `{0}`")]
pub struct UnknownTier(pub PlanTier);

/// Per-tier withdrawal fee rates, in basis points of the withdrawn amount.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    rates_bps: HashMap<PlanTier, u32>,
}

impl Default for FeeSchedule {
    /// The standard schedule: business 1%, professional 2%, starter 5%.
    fn default() -> Self {
        Self {
            rates_bps: [
                (PlanTier::Business, 100),
                (PlanTier::Professional, 200),
                (PlanTier::Starter, 500),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl FeeSchedule {
    /// A schedule with no configured tiers. Useful as a base for explicit overrides.
    pub fn empty() -> Self {
        Self {
            rates_bps: HashMap::new(),
        }
    }

    /// Sets the rate for a tier, replacing any previous value.
    pub fn with_rate_bps(mut self, tier: PlanTier, bps: u32) -> Self {
        self.rates_bps.insert(tier, bps);
        self
    }

    /// Computes the withdrawal fee for `amount_in_minor`, in the same minor units.
    ///
    /// Pure and deterministic; rounds half up to the minor unit.
    pub fn fee_for(&self, tier: PlanTier, amount_in_minor: u64) -> Result<u64, UnknownTier> {
        let bps = *self.rates_bps.get(&tier).ok_or(UnknownTier(tier))?;

        // bps <= 10_000 keeps the result within u64
        let fee = (amount_in_minor as u128 * bps as u128 + 5_000) / 10_000;
        Ok(fee as u64)
    }
}
