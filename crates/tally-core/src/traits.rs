//! Trait interfaces for the collaborators the fee pool consumes.
//!
//! - [`PriceOracle`]: current prices with publication timestamps
//! - [`IssuanceLedger`]: each participant's issued debt and collateral value
//! - [`SupplySchedule`]: inflationary rewards minted per closed period
//! - [`FeeCreditor`]: pays claimed fees out in a synth
//! - [`Clock`]: the time source injected into time-sensitive operations
//!
//! All collaborators are synchronous: they return a value or fail, and a
//! failure aborts the operation that asked.

use crate::constants::PRECISE_UNIT;
use crate::error::TallyError;
use crate::math::mul_div;
use crate::types::{CurrencyKey, ParticipantId, PriceQuote};

/// Source of current prices.
pub trait PriceOracle: Send + Sync {
    /// Latest price for `currency` and when it was published.
    fn current_price(&self, currency: &CurrencyKey) -> Result<PriceQuote, TallyError>;
}

/// External record of each participant's debt and backing collateral.
pub trait IssuanceLedger: Send + Sync {
    /// Issued debt value in the stable unit.
    fn issued_debt_value(&self, participant: &ParticipantId) -> Result<u64, TallyError>;

    /// Collateral value in the stable unit.
    fn collateral_value(&self, participant: &ParticipantId) -> Result<u64, TallyError>;

    /// Issuance ratio `debt / collateral` over `PRECISE_UNIT`; higher is worse.
    ///
    /// Zero debt yields 0 (no penalty). Debt without collateral is fully
    /// unbacked and yields `u128::MAX`.
    fn issuance_ratio(&self, participant: &ParticipantId) -> Result<u128, TallyError> {
        let debt = self.issued_debt_value(participant)?;
        if debt == 0 {
            return Ok(0);
        }
        let collateral = self.collateral_value(participant)?;
        if collateral == 0 {
            return Ok(u128::MAX);
        }
        mul_div(debt as u128, PRECISE_UNIT, collateral as u128)
            .ok_or_else(|| TallyError::Collaborator("issuance ratio overflow".into()))
    }
}

/// Inflationary supply released into each closing fee period.
pub trait SupplySchedule: Send + Sync {
    /// Rewards to attach to the period `period_id` as it closes.
    ///
    /// Called exactly once per successful close.
    fn mintable_supply_for_period(&self, period_id: u64) -> Result<u64, TallyError>;
}

/// Pays claimed fees to participants.
pub trait FeeCreditor: Send + Sync {
    /// Credit `amount` units of `synth` to `participant`.
    fn credit_fees(
        &self,
        participant: &ParticipantId,
        synth: &CurrencyKey,
        amount: u64,
    ) -> Result<(), TallyError>;
}

/// Time source in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}
