//! In-process collaborators for simulation runs and tests.
//!
//! Each stands in for an external system the pool only reads from or pays
//! into: a price table, an issuance register, a flat supply schedule and a
//! creditor that records balances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tally_core::error::{OracleError, TallyError};
use tally_core::traits::{FeeCreditor, IssuanceLedger, PriceOracle, SupplySchedule};
use tally_core::types::{CurrencyKey, ParticipantId, PriceQuote};
use tally_rewards::fee_pool::Collaborators;

/// Price table keyed by currency.
#[derive(Debug, Default)]
pub struct StaticOracle {
    prices: RwLock<HashMap<CurrencyKey, PriceQuote>>,
}

impl StaticOracle {
    pub fn set_price(&self, currency: &CurrencyKey, price: u64, updated_at: u64) {
        self.prices
            .write()
            .insert(currency.clone(), PriceQuote { price, updated_at });
    }

    /// Re-stamp every known price as published at `now`.
    pub fn touch_all(&self, now: u64) {
        for quote in self.prices.write().values_mut() {
            quote.updated_at = now;
        }
    }
}

impl PriceOracle for StaticOracle {
    fn current_price(&self, currency: &CurrencyKey) -> Result<PriceQuote, TallyError> {
        self.prices
            .read()
            .get(currency)
            .copied()
            .ok_or_else(|| OracleError::UnknownCurrency(currency.clone()).into())
    }
}

/// Issued debt and collateral value per participant, in the stable unit.
#[derive(Debug, Default)]
pub struct MemoryIssuance {
    positions: RwLock<HashMap<ParticipantId, (u64, u64)>>,
}

impl MemoryIssuance {
    pub fn set(&self, participant: ParticipantId, debt: u64, collateral: u64) {
        self.positions.write().insert(participant, (debt, collateral));
    }

    pub fn set_collateral(&self, participant: ParticipantId, collateral: u64) {
        self.positions.write().entry(participant).or_default().1 = collateral;
    }
}

impl IssuanceLedger for MemoryIssuance {
    fn issued_debt_value(&self, participant: &ParticipantId) -> Result<u64, TallyError> {
        Ok(self.positions.read().get(participant).map_or(0, |p| p.0))
    }

    fn collateral_value(&self, participant: &ParticipantId) -> Result<u64, TallyError> {
        Ok(self.positions.read().get(participant).map_or(0, |p| p.1))
    }
}

/// Releases the same amount into every closing period until changed.
#[derive(Debug, Default)]
pub struct FlatSupply {
    per_period: AtomicU64,
}

impl FlatSupply {
    pub fn set(&self, per_period: u64) {
        self.per_period.store(per_period, Ordering::SeqCst);
    }
}

impl SupplySchedule for FlatSupply {
    fn mintable_supply_for_period(&self, _period_id: u64) -> Result<u64, TallyError> {
        Ok(self.per_period.load(Ordering::SeqCst))
    }
}

/// Accumulates credited fees per participant and synth.
#[derive(Debug, Default)]
pub struct RecordingCreditor {
    balances: RwLock<HashMap<(ParticipantId, CurrencyKey), u64>>,
}

impl RecordingCreditor {
    pub fn balance(&self, participant: &ParticipantId, synth: &CurrencyKey) -> u64 {
        self.balances
            .read()
            .get(&(*participant, synth.clone()))
            .copied()
            .unwrap_or(0)
    }
}

impl FeeCreditor for RecordingCreditor {
    fn credit_fees(
        &self,
        participant: &ParticipantId,
        synth: &CurrencyKey,
        amount: u64,
    ) -> Result<(), TallyError> {
        let mut balances = self.balances.write();
        let balance = balances.entry((*participant, synth.clone())).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TallyError::Collaborator("credited balance overflow".into()))?;
        Ok(())
    }
}

/// The full set of simulated collaborators.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    pub oracle: Arc<StaticOracle>,
    pub issuance: Arc<MemoryIssuance>,
    pub supply: Arc<FlatSupply>,
    pub creditor: Arc<RecordingCreditor>,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            oracle: self.oracle.clone(),
            issuance: self.issuance.clone(),
            supply: self.supply.clone(),
            creditor: self.creditor.clone(),
        }
    }
}
