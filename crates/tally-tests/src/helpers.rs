//! Shared harness for the scenario and adversarial tests.

use std::sync::Arc;

use tally_core::clock::ManualClock;
use tally_core::constants::PRICE_PRECISION;
use tally_core::error::TallyError;
use tally_core::traits::Clock;
use tally_core::types::{ClaimReceipt, CurrencyKey, ParticipantId};
use tally_node_lib::{FeePoolService, Simulation, TallyConfig};
use tally_rewards::fee_period::CloseOutcome;
use tally_rewards::{FeePool, FeePoolParams, PenaltySchedule};

/// Unix time every harness starts at.
pub const START: u64 = 1_700_000_000;

/// Participant id from a label.
pub fn pid(label: &str) -> ParticipantId {
    ParticipantId::from_label(label)
}

/// The default stable currency.
pub fn stable() -> CurrencyKey {
    CurrencyKey::new("XDR")
}

/// The default collateral currency.
pub fn collateral() -> CurrencyKey {
    CurrencyKey::new("SNX")
}

/// A pool service over simulated collaborators and a manual clock.
///
/// Stable and collateral prices start at 1.0 and are re-stamped by
/// [`Harness::advance`].
pub struct Harness {
    pub sim: Simulation,
    pub clock: Arc<ManualClock>,
    pub service: FeePoolService,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(FeePoolParams::default(), PenaltySchedule::default())
    }

    pub fn with_params(params: FeePoolParams, penalties: PenaltySchedule) -> Self {
        let sim = Simulation::new();
        let clock = Arc::new(ManualClock::new(START));
        let pool = FeePool::new(params, penalties, sim.collaborators(), START);
        let service = FeePoolService::in_memory(pool, clock.clone());
        Self::seeded(sim, clock, service)
    }

    /// A harness persisting to `config.data_dir`, restoring what is there.
    pub fn persistent(config: &TallyConfig, sim: Simulation, clock: Arc<ManualClock>) -> Self {
        let service = FeePoolService::open(config, sim.collaborators(), clock.clone())
            .expect("open pool store");
        Self::seeded(sim, clock, service)
    }

    fn seeded(sim: Simulation, clock: Arc<ManualClock>, service: FeePoolService) -> Self {
        let now = clock.now();
        sim.oracle.set_price(&stable(), PRICE_PRECISION, now);
        sim.oracle.set_price(&collateral(), PRICE_PRECISION, now);
        Self { sim, clock, service }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Issue `debt` backed by ten times as much collateral (10% issuance ratio).
    pub fn issue(&self, label: &str, debt: u64) -> u64 {
        self.issue_with_collateral(label, debt, debt.saturating_mul(10))
    }

    pub fn issue_with_collateral(&self, label: &str, debt: u64, collateral: u64) -> u64 {
        self.sim.issuance.set(pid(label), debt, collateral);
        self.service
            .record_debt_change(pid(label), debt)
            .expect("record debt change")
    }

    /// Release `amount` into every following close.
    pub fn mint(&self, amount: u64) {
        self.sim.supply.set(amount);
    }

    pub fn fee(&self, amount: u64) {
        self.service.record_fee_paid(amount).expect("record fee");
    }

    /// Advance the clock and keep oracle prices fresh.
    pub fn advance(&self, secs: u64) {
        let now = self.clock.advance(secs);
        self.sim.oracle.touch_all(now);
    }

    /// Let the open period run its full duration, then close it.
    pub fn close_period(&self) -> CloseOutcome {
        let duration = self.service.read(|pool| pool.params().fee_period_duration);
        self.advance(duration);
        self.service
            .close_current_fee_period()
            .expect("close fee period")
    }

    pub fn claim(&self, label: &str, period: u64) -> Result<ClaimReceipt, TallyError> {
        self.service.claim(pid(label), period, &stable())
    }

    pub fn claim_all(&self, label: &str) -> Result<ClaimReceipt, TallyError> {
        self.service.claim_all(pid(label), &stable())
    }

    /// Frozen share of `label` in closed period `period`.
    pub fn ratio(&self, label: &str, period: u64) -> u128 {
        self.service
            .read(|pool| pool.effective_debt_ratio_for_period(&pid(label), period))
            .expect("effective debt ratio")
    }

    pub fn escrowed(&self, label: &str) -> u64 {
        self.service.read(|pool| pool.escrow().balance_of(&pid(label)))
    }

    pub fn escrow_entries(&self, label: &str) -> usize {
        self.service.read(|pool| pool.escrow().entry_count(&pid(label)))
    }

    pub fn credited(&self, label: &str) -> u64 {
        self.sim.creditor.balance(&pid(label), &stable())
    }
}

/// `|a - b| <= tolerance`.
pub fn within(a: u128, b: u128, tolerance: u128) -> bool {
    a.abs_diff(b) <= tolerance
}
