//! Claim orchestration over the ledger, the period window, the penalty
//! schedule and the escrow.
//!
//! A claim computes every fallible input first (frozen ratio, issuance
//! ratio, oracle prices, escrow capacity) and only then credits fees,
//! marks the periods claimed and grants the escrow entry. A failure before
//! the credit leaves the pool exactly as it was.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_core::constants::{
    DEFAULT_COLLATERAL_CURRENCY, DEFAULT_ESCROW_LOCK_SECS, DEFAULT_FEE_PERIOD_DURATION_SECS,
    DEFAULT_MAX_ESCROW_ENTRIES, DEFAULT_PRICE_STALENESS_SECS, DEFAULT_RETAINED_PERIODS,
    DEFAULT_STABLE_CURRENCY,
};
use tally_core::error::{LedgerError, OracleError, PeriodError, TallyError};
use tally_core::math::{apply_bps, apply_ratio, convert};
use tally_core::traits::{FeeCreditor, IssuanceLedger, PriceOracle, SupplySchedule};
use tally_core::types::{ClaimReceipt, CurrencyKey, FeePeriod, ParticipantId};
use tracing::{debug, info, warn};

use crate::debt_ledger::DebtLedger;
use crate::escrow::RewardEscrow;
use crate::fee_period::{CloseOutcome, FeePeriodWindow};
use crate::penalty::PenaltySchedule;

/// Tunables of a fee pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FeePoolParams {
    /// Minimum length of a fee period in seconds.
    pub fee_period_duration: u64,
    /// Closed periods kept claimable.
    pub retained_periods: usize,
    pub escrow_lock_duration: u64,
    pub max_escrow_entries: usize,
    /// Oldest acceptable oracle price, in seconds.
    pub price_staleness: u64,
    /// Currency fees are accounted in.
    pub stable_currency: CurrencyKey,
    /// Currency backing debt; its price must be fresh to claim.
    pub collateral_currency: CurrencyKey,
    /// Apply the collateralization penalty to fees as well as rewards.
    pub penalize_fees: bool,
}

impl Default for FeePoolParams {
    fn default() -> Self {
        Self {
            fee_period_duration: DEFAULT_FEE_PERIOD_DURATION_SECS,
            retained_periods: DEFAULT_RETAINED_PERIODS,
            escrow_lock_duration: DEFAULT_ESCROW_LOCK_SECS,
            max_escrow_entries: DEFAULT_MAX_ESCROW_ENTRIES,
            price_staleness: DEFAULT_PRICE_STALENESS_SECS,
            stable_currency: CurrencyKey::new(DEFAULT_STABLE_CURRENCY),
            collateral_currency: CurrencyKey::new(DEFAULT_COLLATERAL_CURRENCY),
            penalize_fees: false,
        }
    }
}

/// External services a pool consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub issuance: Arc<dyn IssuanceLedger>,
    pub supply: Arc<dyn SupplySchedule>,
    pub creditor: Arc<dyn FeeCreditor>,
}

/// One participant's entitlement in one period.
#[derive(Debug, Clone, Copy)]
struct Share {
    period: u64,
    fees: u64,
    rewards_raw: u64,
    rewards: u64,
}

pub struct FeePool {
    params: FeePoolParams,
    penalties: PenaltySchedule,
    ledger: DebtLedger,
    window: FeePeriodWindow,
    escrow: RewardEscrow,
    collaborators: Collaborators,
}

impl FeePool {
    /// An empty pool whose first fee period opens at `now`.
    pub fn new(
        params: FeePoolParams,
        penalties: PenaltySchedule,
        collaborators: Collaborators,
        now: u64,
    ) -> Self {
        let window =
            FeePeriodWindow::new(params.fee_period_duration, params.retained_periods, now, 0);
        let escrow = RewardEscrow::new(params.escrow_lock_duration, params.max_escrow_entries);
        Self {
            params,
            penalties,
            ledger: DebtLedger::new(),
            window,
            escrow,
            collaborators,
        }
    }

    /// Reassemble a pool from restored parts.
    pub fn from_parts(
        params: FeePoolParams,
        penalties: PenaltySchedule,
        collaborators: Collaborators,
        mut ledger: DebtLedger,
        window: FeePeriodWindow,
        escrow: RewardEscrow,
    ) -> Self {
        if let Some(floor) = window.retention_floor() {
            ledger.set_retention_floor(floor);
        }
        Self {
            params,
            penalties,
            ledger,
            window,
            escrow,
            collaborators,
        }
    }

    pub fn params(&self) -> &FeePoolParams {
        &self.params
    }

    pub fn penalties(&self) -> &PenaltySchedule {
        &self.penalties
    }

    pub fn ledger(&self) -> &DebtLedger {
        &self.ledger
    }

    pub fn window(&self) -> &FeePeriodWindow {
        &self.window
    }

    pub fn escrow(&self) -> &RewardEscrow {
        &self.escrow
    }

    // --- mutations feeding the pool ---

    /// Set `participant`'s issued debt; returns the ledger index written.
    pub fn record_debt_change(
        &mut self,
        participant: ParticipantId,
        new_issued_value: u64,
    ) -> Result<u64, TallyError> {
        Ok(self.ledger.record_debt_change(participant, new_issued_value)?)
    }

    /// Revalue the pool total after a price move.
    pub fn revalue_pool(&mut self, new_total: u64) -> Result<(), TallyError> {
        Ok(self.ledger.revalue(new_total)?)
    }

    /// Accrue exchange fees (stable currency) into the open period.
    pub fn record_fee_paid(&mut self, amount: u64) -> Result<(), TallyError> {
        Ok(self.window.record_fee_paid(amount)?)
    }

    /// Close the open fee period.
    ///
    /// The supply schedule is consulted once, and only after the period is
    /// known to have elapsed.
    pub fn close_current_fee_period(&mut self, now: u64) -> Result<CloseOutcome, TallyError> {
        self.window.check_elapsed(now)?;
        let period_id = self.window.current().id;
        let minted = self
            .collaborators
            .supply
            .mintable_supply_for_period(period_id)?;
        let outcome = self
            .window
            .close_current(now, self.ledger.last_index(), minted)?;
        if let Some(floor) = self.window.retention_floor() {
            self.ledger.set_retention_floor(floor);
        }
        Ok(outcome)
    }

    // --- views ---

    /// `participant`'s share of the pool frozen at period `period_id`'s close.
    pub fn effective_debt_ratio_for_period(
        &self,
        participant: &ParticipantId,
        period_id: u64,
    ) -> Result<u128, TallyError> {
        self.window
            .effective_debt_ratio_for_period(&self.ledger, participant, period_id)
    }

    /// Reward multiplier for `participant`'s current issuance ratio, in bps.
    pub fn reward_multiplier(&self, participant: &ParticipantId) -> Result<u64, TallyError> {
        let ratio = self.collaborators.issuance.issuance_ratio(participant)?;
        Ok(self.penalties.penalty_for(ratio))
    }

    /// Fees (in `synth`) and penalized rewards `participant` could claim now.
    ///
    /// Only closed periods count, so this is `(0, 0)` until the first close.
    pub fn fees_available(
        &self,
        participant: &ParticipantId,
        synth: &CurrencyKey,
        now: u64,
    ) -> Result<(u64, u64), TallyError> {
        let pending = self.pending_periods(participant);
        if pending.is_empty() {
            return Ok((0, 0));
        }
        let multiplier = self.reward_multiplier(participant)?;
        let shares = pending
            .iter()
            .map(|period| self.share(participant, period, multiplier))
            .collect::<Result<Vec<_>, _>>()?;
        let (fees, _, rewards) = totals(&shares)?;
        Ok((self.to_synth(fees, synth, now)?, rewards))
    }

    pub fn total_fees_available(&self) -> u64 {
        self.window.total_fees_available()
    }

    pub fn total_rewards_available(&self) -> u64 {
        self.window.total_rewards_available()
    }

    // --- claims ---

    /// Claim one closed period.
    pub fn claim(
        &mut self,
        participant: ParticipantId,
        period_id: u64,
        synth: &CurrencyKey,
        now: u64,
    ) -> Result<ClaimReceipt, TallyError> {
        let period = self.window.claimable(period_id)?;
        if period.has_claimed(&participant) {
            debug!(%participant, period = period_id, "repeat claim rejected");
            return Err(PeriodError::AlreadyClaimed {
                participant,
                period: period_id,
            }
            .into());
        }
        self.fresh_price(&self.params.collateral_currency, now)?;
        let multiplier = self.reward_multiplier(&participant)?;
        let share = self.share(&participant, period, multiplier)?;
        self.settle(participant, vec![share], synth, multiplier, now)
    }

    /// Claim every retained period `participant` has not claimed yet, as one
    /// fee credit and one escrow entry.
    pub fn claim_all(
        &mut self,
        participant: ParticipantId,
        synth: &CurrencyKey,
        now: u64,
    ) -> Result<ClaimReceipt, TallyError> {
        let pending = self.pending_periods(&participant);
        if pending.is_empty() {
            return Err(PeriodError::NothingToClaim(participant).into());
        }
        self.fresh_price(&self.params.collateral_currency, now)?;
        let multiplier = self.reward_multiplier(&participant)?;
        let shares = pending
            .iter()
            .map(|period| self.share(&participant, period, multiplier))
            .collect::<Result<Vec<_>, _>>()?;
        self.settle(participant, shares, synth, multiplier, now)
    }

    fn pending_periods(&self, participant: &ParticipantId) -> Vec<&FeePeriod> {
        self.window
            .claimable_periods()
            .filter(|p| !p.has_claimed(participant))
            .collect()
    }

    /// Entitlement in one period, clamped to what is left unclaimed.
    fn share(
        &self,
        participant: &ParticipantId,
        period: &FeePeriod,
        multiplier: u64,
    ) -> Result<Share, TallyError> {
        let ratio = match self
            .window
            .effective_debt_ratio_for_period(&self.ledger, participant, period.id)
        {
            Ok(ratio) => ratio,
            // Nobody held debt at the close; the period pays no one.
            Err(TallyError::Ledger(LedgerError::EmptyPool)) => 0,
            Err(e) => return Err(e),
        };

        let raw_fees = apply_ratio(period.fees_to_distribute, ratio)
            .ok_or(PeriodError::ArithmeticOverflow)?
            .min(period.unclaimed_fees());
        let rewards_raw = apply_ratio(period.rewards_to_distribute, ratio)
            .ok_or(PeriodError::ArithmeticOverflow)?
            .min(period.unclaimed_rewards());

        let rewards = apply_bps(rewards_raw, multiplier).ok_or(PeriodError::ArithmeticOverflow)?;
        let fees = if self.params.penalize_fees {
            apply_bps(raw_fees, multiplier).ok_or(PeriodError::ArithmeticOverflow)?
        } else {
            raw_fees
        };

        Ok(Share {
            period: period.id,
            fees,
            rewards_raw,
            rewards,
        })
    }

    fn settle(
        &mut self,
        participant: ParticipantId,
        shares: Vec<Share>,
        synth: &CurrencyKey,
        multiplier: u64,
        now: u64,
    ) -> Result<ClaimReceipt, TallyError> {
        let (fees_stable, rewards_raw, rewards) = totals(&shares)?;
        if fees_stable == 0 && rewards == 0 {
            debug!(%participant, "claim with nothing owed rejected");
            return Err(PeriodError::NothingToClaim(participant).into());
        }
        let fees_paid = self.to_synth(fees_stable, synth, now)?;
        self.escrow.check_grant(&participant, rewards, now)?;

        if fees_paid > 0 {
            self.collaborators
                .creditor
                .credit_fees(&participant, synth, fees_paid)?;
        }
        for share in &shares {
            self.window
                .mark_claimed(share.period, participant, share.fees, share.rewards)?;
        }
        let escrow_index = self.escrow.grant(participant, rewards, now)?;

        let periods: Vec<u64> = shares.iter().map(|s| s.period).collect();
        info!(
            %participant,
            periods = ?periods,
            %synth,
            fees_paid,
            rewards,
            multiplier_bps = multiplier,
            "fees claimed"
        );

        Ok(ClaimReceipt {
            participant,
            periods,
            synth: synth.clone(),
            fees_stable,
            fees_paid,
            rewards_raw,
            rewards_escrowed: rewards,
            multiplier_bps: multiplier,
            escrow_index,
        })
    }

    /// Convert a stable-currency amount into `synth` at fresh prices.
    fn to_synth(&self, amount: u64, synth: &CurrencyKey, now: u64) -> Result<u64, TallyError> {
        if amount == 0 || *synth == self.params.stable_currency {
            return Ok(amount);
        }
        let stable_price = self.fresh_price(&self.params.stable_currency, now)?;
        let synth_price = self.fresh_price(synth, now)?;
        Ok(convert(amount, stable_price, synth_price).ok_or(PeriodError::ArithmeticOverflow)?)
    }

    fn fresh_price(&self, currency: &CurrencyKey, now: u64) -> Result<u64, TallyError> {
        let quote = self.collaborators.oracle.current_price(currency)?;
        let age = now.saturating_sub(quote.updated_at);
        if age > self.params.price_staleness {
            warn!(%currency, age, max_age = self.params.price_staleness, "stale price");
            return Err(OracleError::StalePrice {
                currency: currency.clone(),
                age,
                max_age: self.params.price_staleness,
            }
            .into());
        }
        if quote.price == 0 {
            return Err(OracleError::ZeroPrice(currency.clone()).into());
        }
        Ok(quote.price)
    }
}

fn totals(shares: &[Share]) -> Result<(u64, u64, u64), PeriodError> {
    let add = |a: u64, b: u64| a.checked_add(b).ok_or(PeriodError::ArithmeticOverflow);
    shares
        .iter()
        .try_fold((0, 0, 0), |(fees, raw, paid), s| {
            Ok((add(fees, s.fees)?, add(raw, s.rewards_raw)?, add(paid, s.rewards)?))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use mockall::mock;
    use tally_core::constants::{PRECISE_UNIT, PRICE_PRECISION, UNIT, WEEK_SECS};
    use tally_core::error::{EscrowError, PeriodError};
    use tally_core::types::PriceQuote;

    const START: u64 = 1_700_000_000;

    mock! {
        Creditor {}
        impl FeeCreditor for Creditor {
            fn credit_fees(
                &self,
                participant: &ParticipantId,
                synth: &CurrencyKey,
                amount: u64,
            ) -> Result<(), TallyError>;
        }
    }

    mock! {
        Supply {}
        impl SupplySchedule for Supply {
            fn mintable_supply_for_period(&self, period_id: u64) -> Result<u64, TallyError>;
        }
    }

    #[derive(Default)]
    struct Prices(Mutex<HashMap<CurrencyKey, PriceQuote>>);

    impl Prices {
        fn set(&self, symbol: &str, price: u64, updated_at: u64) {
            self.0
                .lock()
                .unwrap()
                .insert(CurrencyKey::new(symbol), PriceQuote { price, updated_at });
        }
    }

    impl PriceOracle for Prices {
        fn current_price(&self, currency: &CurrencyKey) -> Result<PriceQuote, TallyError> {
            self.0
                .lock()
                .unwrap()
                .get(currency)
                .copied()
                .ok_or_else(|| OracleError::UnknownCurrency(currency.clone()).into())
        }
    }

    /// Debt and collateral per participant.
    #[derive(Default)]
    struct Issuance(Mutex<HashMap<ParticipantId, (u64, u64)>>);

    impl Issuance {
        fn set(&self, p: ParticipantId, debt: u64, collateral: u64) {
            self.0.lock().unwrap().insert(p, (debt, collateral));
        }
    }

    impl IssuanceLedger for Issuance {
        fn issued_debt_value(&self, p: &ParticipantId) -> Result<u64, TallyError> {
            Ok(self.0.lock().unwrap().get(p).map_or(0, |v| v.0))
        }

        fn collateral_value(&self, p: &ParticipantId) -> Result<u64, TallyError> {
            Ok(self.0.lock().unwrap().get(p).map_or(0, |v| v.1))
        }
    }

    #[derive(Default)]
    struct Credits(Mutex<Vec<(ParticipantId, CurrencyKey, u64)>>);

    impl FeeCreditor for Credits {
        fn credit_fees(
            &self,
            participant: &ParticipantId,
            synth: &CurrencyKey,
            amount: u64,
        ) -> Result<(), TallyError> {
            self.0.lock().unwrap().push((*participant, synth.clone(), amount));
            Ok(())
        }
    }

    struct FixedSupply(u64);

    impl SupplySchedule for FixedSupply {
        fn mintable_supply_for_period(&self, _: u64) -> Result<u64, TallyError> {
            Ok(self.0)
        }
    }

    struct Harness {
        pool: FeePool,
        prices: Arc<Prices>,
        issuance: Arc<Issuance>,
        credits: Arc<Credits>,
    }

    fn pid(label: &str) -> ParticipantId {
        ParticipantId::from_label(label)
    }

    fn xdr() -> CurrencyKey {
        CurrencyKey::new("XDR")
    }

    fn harness_with(
        supply: Arc<dyn SupplySchedule>,
        creditor: Option<Arc<dyn FeeCreditor>>,
    ) -> Harness {
        let prices = Arc::new(Prices::default());
        prices.set("XDR", PRICE_PRECISION, START);
        prices.set("SNX", PRICE_PRECISION, START);
        prices.set("sAUD", PRICE_PRECISION / 2, START);
        let issuance = Arc::new(Issuance::default());
        let credits = Arc::new(Credits::default());
        let collaborators = Collaborators {
            oracle: prices.clone(),
            issuance: issuance.clone(),
            supply,
            creditor: creditor.unwrap_or_else(|| credits.clone() as Arc<dyn FeeCreditor>),
        };
        let pool = FeePool::new(
            FeePoolParams::default(),
            PenaltySchedule::default(),
            collaborators,
            START,
        );
        Harness { pool, prices, issuance, credits }
    }

    fn harness(minted: u64) -> Harness {
        harness_with(Arc::new(FixedSupply(minted)), None)
    }

    /// Issue `debt` for `p` with collateral at five times the debt (20%).
    fn issue(h: &mut Harness, p: ParticipantId, debt: u64) {
        h.pool.record_debt_change(p, debt).unwrap();
        h.issuance.set(p, debt, debt * 5);
    }

    fn refresh_prices(h: &Harness, now: u64) {
        h.prices.set("XDR", PRICE_PRECISION, now);
        h.prices.set("SNX", PRICE_PRECISION, now);
        h.prices.set("sAUD", PRICE_PRECISION / 2, now);
    }

    #[test]
    fn fifty_fifty_claim() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 10_000 * UNIT);
        issue(&mut h, pid("b"), 10_000 * UNIT);
        h.pool.record_fee_paid(200 * UNIT).unwrap();
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);

        let receipt = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap();
        assert_eq!(receipt.fees_paid, 100 * UNIT);
        assert_eq!(receipt.rewards_escrowed, 500 * UNIT);
        assert_eq!(receipt.multiplier_bps, 10_000);
        assert_eq!(receipt.escrow_index, Some(0));
        assert_eq!(h.pool.escrow().balance_of(&pid("a")), 500 * UNIT);
        assert_eq!(h.credits.0.lock().unwrap().len(), 1);
        assert_eq!(h.pool.total_rewards_available(), 500 * UNIT);
        assert_eq!(h.pool.total_fees_available(), 100 * UNIT);
    }

    #[test]
    fn fees_convert_into_requested_synth() {
        let mut h = harness(0);
        issue(&mut h, pid("a"), 100 * UNIT);
        h.pool.record_fee_paid(10 * UNIT).unwrap();
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);

        let receipt = h.pool.claim(pid("a"), 1, &CurrencyKey::new("sAUD"), now).unwrap();
        assert_eq!(receipt.fees_stable, 10 * UNIT);
        assert_eq!(receipt.fees_paid, 20 * UNIT);
        assert_eq!(receipt.escrow_index, None);
    }

    #[test]
    fn second_claim_is_already_claimed() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 100 * UNIT);
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);

        h.pool.claim(pid("a"), 1, &xdr(), now).unwrap();
        let err = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap_err();
        assert!(err.is_already_claimed());
        assert_eq!(h.pool.escrow().entry_count(&pid("a")), 1);
    }

    #[test]
    fn open_period_is_not_claimable() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 100 * UNIT);
        let err = h.pool.claim(pid("a"), 1, &xdr(), START).unwrap_err();
        assert!(matches!(err, TallyError::Period(PeriodError::PeriodNotClaimable(1))));
        assert_eq!(h.pool.fees_available(&pid("a"), &xdr(), START).unwrap(), (0, 0));
    }

    #[test]
    fn penalty_scales_rewards_not_fees() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 100 * UNIT);
        h.pool.record_fee_paid(10 * UNIT).unwrap();
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);
        // 25% issuance ratio -> 0.75x
        h.issuance.set(pid("a"), 100 * UNIT, 400 * UNIT);

        let receipt = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap();
        assert_eq!(receipt.multiplier_bps, 7_500);
        assert_eq!(receipt.rewards_raw, 1_000 * UNIT);
        assert_eq!(receipt.rewards_escrowed, 750 * UNIT);
        assert_eq!(receipt.fees_paid, 10 * UNIT);
        // The withheld quarter stays in the period.
        assert_eq!(h.pool.total_rewards_available(), 250 * UNIT);
    }

    #[test]
    fn penalize_fees_flag_scales_fees_too() {
        let mut h = harness(0);
        h.pool.params.penalize_fees = true;
        issue(&mut h, pid("a"), 100 * UNIT);
        h.pool.record_fee_paid(10 * UNIT).unwrap();
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);
        h.issuance.set(pid("a"), 100 * UNIT, 250 * UNIT); // 40% -> 0.25x

        let receipt = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap();
        assert_eq!(receipt.fees_paid, 10 * UNIT / 4);
    }

    #[test]
    fn fully_penalized_claim_has_nothing_owed() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 100 * UNIT);
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);
        h.issuance.set(pid("a"), 100 * UNIT, 0);

        let err = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap_err();
        assert!(matches!(err, TallyError::Period(PeriodError::NothingToClaim(_))));
        assert!(!h.pool.window().period(1).unwrap().has_claimed(&pid("a")));
    }

    #[test]
    fn stale_collateral_price_leaves_state_untouched() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 100 * UNIT);
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        // Prices still stamped at START: a week old.

        let err = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap_err();
        assert!(matches!(err, TallyError::Oracle(OracleError::StalePrice { .. })));
        assert!(!h.pool.window().period(1).unwrap().has_claimed(&pid("a")));
        assert_eq!(h.pool.escrow().total_escrowed(), 0);
        assert!(h.credits.0.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_credit_leaves_state_untouched() {
        let mut creditor = MockCreditor::new();
        creditor
            .expect_credit_fees()
            .times(1)
            .returning(|_, _, _| Err(TallyError::Collaborator("ledger offline".into())));
        let mut h = harness_with(Arc::new(FixedSupply(1_000 * UNIT)), Some(Arc::new(creditor)));
        issue(&mut h, pid("a"), 100 * UNIT);
        h.pool.record_fee_paid(10 * UNIT).unwrap();
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);

        let err = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap_err();
        assert!(matches!(err, TallyError::Collaborator(_)));
        let period = h.pool.window().period(1).unwrap();
        assert!(!period.has_claimed(&pid("a")));
        assert_eq!(period.fees_claimed, 0);
        assert_eq!(h.pool.escrow().entry_count(&pid("a")), 0);
    }

    #[test]
    fn full_escrow_is_checked_before_credit() {
        let mut creditor = MockCreditor::new();
        creditor.expect_credit_fees().never();
        let mut h = harness_with(Arc::new(FixedSupply(1_000 * UNIT)), Some(Arc::new(creditor)));
        h.pool.escrow = RewardEscrow::new(WEEK_SECS, 0);
        issue(&mut h, pid("a"), 100 * UNIT);
        h.pool.record_fee_paid(10 * UNIT).unwrap();
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);

        let err = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap_err();
        assert!(matches!(err, TallyError::Escrow(EscrowError::EscrowFull { .. })));
    }

    #[test]
    fn supply_is_read_once_per_successful_close() {
        let mut supply = MockSupply::new();
        supply
            .expect_mintable_supply_for_period()
            .withf(|id| *id == 1)
            .times(1)
            .returning(|_| Ok(77));
        let mut h = harness_with(Arc::new(supply), None);
        assert!(h.pool.close_current_fee_period(START + 10).is_err());
        h.pool.close_current_fee_period(START + WEEK_SECS).unwrap();
        assert_eq!(h.pool.window().period(1).unwrap().rewards_to_distribute, 77);
    }

    #[test]
    fn claim_all_sums_periods_into_one_entry() {
        let mut h = harness(1_000 * UNIT);
        issue(&mut h, pid("a"), 100 * UNIT);
        issue(&mut h, pid("b"), 100 * UNIT);
        let mut now = START;
        for _ in 0..3 {
            now += WEEK_SECS;
            h.pool.close_current_fee_period(now).unwrap();
        }
        refresh_prices(&h, now);

        let (_, rewards) = h.pool.fees_available(&pid("a"), &xdr(), now).unwrap();
        assert_eq!(rewards, 1_500 * UNIT);
        let receipt = h.pool.claim_all(pid("a"), &xdr(), now).unwrap();
        assert_eq!(receipt.periods, vec![1, 2, 3]);
        assert_eq!(receipt.rewards_escrowed, 1_500 * UNIT);
        assert_eq!(h.pool.escrow().entry_count(&pid("a")), 1);

        let err = h.pool.claim_all(pid("a"), &xdr(), now).unwrap_err();
        assert!(matches!(err, TallyError::Period(PeriodError::NothingToClaim(_))));
    }

    #[test]
    fn effective_ratio_ignores_later_changes() {
        let mut h = harness(0);
        issue(&mut h, pid("a"), 100 * UNIT);
        issue(&mut h, pid("b"), 100 * UNIT);
        h.pool.close_current_fee_period(START + WEEK_SECS).unwrap();
        issue(&mut h, pid("c"), 200 * UNIT);
        assert_eq!(
            h.pool.effective_debt_ratio_for_period(&pid("a"), 1).unwrap(),
            PRECISE_UNIT / 2
        );
    }

    #[test]
    fn period_closed_on_empty_pool_pays_nobody() {
        let mut h = harness(1_000 * UNIT);
        let now = START + WEEK_SECS;
        h.pool.close_current_fee_period(now).unwrap();
        refresh_prices(&h, now);
        let err = h.pool.claim(pid("a"), 1, &xdr(), now).unwrap_err();
        assert!(matches!(err, TallyError::Period(PeriodError::NothingToClaim(_))));
    }
}
