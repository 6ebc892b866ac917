//! End-to-end fee pool scenarios.
//!
//! Each test drives the pool service through debt changes, fee accrual,
//! period closes and claims, then checks escrow grants, credited fees and
//! the frozen per-period ratios.

use std::sync::Arc;

use tally_core::clock::ManualClock;
use tally_core::constants::{PRECISE_UNIT, PRICE_PRECISION, UNIT};
use tally_core::error::{OracleError, PeriodError, TallyError};
use tally_core::types::{CurrencyKey, PeriodState};
use tally_node_lib::{Simulation, TallyConfig};
use tally_rewards::{FeePoolParams, PenaltySchedule};
use tally_tests::helpers::*;

// ---------------------------------------------------------------------------
// Debt-share splits
// ---------------------------------------------------------------------------

#[test]
fn even_split_between_two_holders() {
    let h = Harness::new();
    h.issue("alice", 50 * UNIT);
    h.issue("bob", 50 * UNIT);
    h.mint(900_000 * UNIT);
    h.close_period();

    let alice = h.claim("alice", 1).unwrap();
    let bob = h.claim("bob", 1).unwrap();
    assert_eq!(alice.rewards_escrowed, 450_000 * UNIT);
    assert_eq!(bob.rewards_escrowed, 450_000 * UNIT);
    assert_eq!(h.escrowed("alice"), 450_000 * UNIT);
    assert_eq!(h.escrow_entries("bob"), 1);
}

#[test]
fn forty_forty_twenty_split() {
    let h = Harness::new();
    h.issue("alice", 40 * UNIT);
    h.issue("bob", 40 * UNIT);
    h.issue("carol", 20 * UNIT);
    h.mint(500_000 * UNIT);
    h.close_period();

    assert_eq!(h.claim("alice", 1).unwrap().rewards_escrowed, 200_000 * UNIT);
    assert_eq!(h.claim("bob", 1).unwrap().rewards_escrowed, 200_000 * UNIT);
    assert_eq!(h.claim("carol", 1).unwrap().rewards_escrowed, 100_000 * UNIT);
    assert_eq!(h.service.read(|p| p.total_rewards_available()), 0);
}

#[test]
fn thirds_sum_to_whole_within_rounding() {
    let h = Harness::new();
    for label in ["a", "b", "c"] {
        h.issue(label, 100 * UNIT);
    }
    h.mint(1_000 * UNIT);
    h.close_period();

    let sum: u128 = ["a", "b", "c"].iter().map(|l| h.ratio(l, 1)).sum();
    assert!(within(sum, PRECISE_UNIT, 3), "sum = {sum}");

    let paid: u64 = ["a", "b", "c"]
        .iter()
        .map(|l| h.claim(l, 1).unwrap().rewards_escrowed)
        .sum();
    assert!(paid <= 1_000 * UNIT);
    assert!(1_000 * UNIT - paid <= 3);
}

#[test]
fn revaluation_keeps_proportions() {
    let h = Harness::new();
    h.issue("alice", 50 * UNIT);
    h.issue("bob", 50 * UNIT);
    // Prices doubled: the pool is now worth 200 without anyone acting.
    h.service.revalue_pool(200 * UNIT).unwrap();
    // Carol's 50 is a fifth of the revalued 250.
    h.issue("carol", 50 * UNIT);
    h.mint(1_000 * UNIT);
    h.close_period();

    assert_eq!(h.ratio("alice", 1), PRECISE_UNIT * 2 / 5);
    assert_eq!(h.ratio("bob", 1), PRECISE_UNIT * 2 / 5);
    assert_eq!(h.ratio("carol", 1), PRECISE_UNIT / 5);
    assert_eq!(h.service.read(|p| p.ledger().total_debt()), 250 * UNIT);
}

#[test]
fn departed_share_is_redistributed() {
    let h = Harness::new();
    h.issue("alice", 50 * UNIT);
    h.issue("bob", 30 * UNIT);
    h.issue("carol", 20 * UNIT);
    h.close_period();
    h.issue("carol", 0);
    h.close_period();

    let p2: u128 = ["alice", "bob", "carol"].iter().map(|l| h.ratio(l, 2)).sum();
    assert!(within(p2, PRECISE_UNIT, 2), "period 2 sum = {p2}");
    assert_eq!(h.ratio("carol", 2), 0);
    assert_eq!(h.ratio("alice", 2), PRECISE_UNIT * 5 / 8);

    // Period 1 stays frozen at the old split.
    assert_eq!(h.ratio("carol", 1), PRECISE_UNIT / 5);
    assert_eq!(h.ratio("alice", 1), PRECISE_UNIT / 2);
}

#[test]
fn mid_period_visitor_leaves_no_trace() {
    let h = Harness::new();
    h.issue("alice", 60 * UNIT);
    h.issue("bob", 40 * UNIT);
    h.close_period();

    h.issue("visitor", 400 * UNIT);
    h.issue("visitor", 0);
    h.close_period();

    assert!(within(h.ratio("alice", 2), PRECISE_UNIT * 3 / 5, 2));
    assert!(within(h.ratio("bob", 2), PRECISE_UNIT * 2 / 5, 2));
    assert_eq!(h.ratio("visitor", 2), 0);
    assert_eq!(h.ratio("alice", 1), PRECISE_UNIT * 3 / 5);
}

#[test]
fn rejoining_after_the_pool_emptied() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.issue("alice", 0);
    h.issue("bob", 30 * UNIT);
    h.issue("alice", 10 * UNIT);
    h.close_period();

    assert_eq!(h.ratio("bob", 1), PRECISE_UNIT * 3 / 4);
    assert_eq!(h.ratio("alice", 1), PRECISE_UNIT / 4);
}

#[test]
fn period_closed_over_empty_pool_pays_no_one() {
    let h = Harness::new();
    h.mint(100 * UNIT);
    h.close_period();
    h.issue("alice", 10 * UNIT);

    let err = h.claim("alice", 1).unwrap_err();
    assert!(matches!(err, TallyError::Period(PeriodError::NothingToClaim(_))));
    assert_eq!(h.service.read(|p| p.total_rewards_available()), 100 * UNIT);
}

// ---------------------------------------------------------------------------
// Fee period window
// ---------------------------------------------------------------------------

#[test]
fn six_closed_periods_stay_claimable() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.mint(100 * UNIT);
    for _ in 0..6 {
        h.close_period();
    }

    let receipt = h.claim_all("alice").unwrap();
    assert_eq!(receipt.periods, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(receipt.rewards_escrowed, 600 * UNIT);
    assert_eq!(h.escrow_entries("alice"), 1);
}

#[test]
fn seventh_close_rolls_unclaimed_rewards_forward() {
    let h = Harness::new();
    h.issue("alice", 50 * UNIT);
    h.issue("bob", 50 * UNIT);
    h.mint(100 * UNIT);
    h.close_period();
    h.claim("alice", 1).unwrap();

    for _ in 0..5 {
        h.close_period();
    }
    let outcome = h.close_period();
    assert_eq!(outcome.closed_id, 7);
    assert_eq!(outcome.retired.as_ref().map(|p| p.id), Some(1));
    assert_eq!(outcome.rolled_rewards, 50 * UNIT);

    h.service.read(|pool| {
        assert_eq!(pool.window().state(1), Some(PeriodState::Retired));
        assert_eq!(pool.window().period(2).unwrap().rewards_to_distribute, 150 * UNIT);
    });

    let err = h.claim("bob", 1).unwrap_err();
    assert!(matches!(err, TallyError::Period(PeriodError::PeriodNotClaimable(1))));
    assert_eq!(h.claim("bob", 2).unwrap().rewards_escrowed, 75 * UNIT);
    assert_eq!(h.claim("alice", 2).unwrap().rewards_escrowed, 75 * UNIT);
}

#[test]
fn unclaimed_fees_roll_forward_too() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.fee(7 * UNIT);
    for _ in 0..7 {
        h.close_period();
    }
    h.service.read(|pool| {
        assert_eq!(pool.window().period(2).unwrap().fees_to_distribute, 7 * UNIT);
        assert_eq!(pool.total_fees_available(), 7 * UNIT);
    });
    let receipt = h.claim_all("alice").unwrap();
    assert_eq!(receipt.fees_paid, 7 * UNIT);
    assert_eq!(h.credited("alice"), 7 * UNIT);
}

#[test]
fn premature_close_is_rejected() {
    let h = Harness::new();
    let err = h.service.close_current_fee_period().unwrap_err();
    assert!(matches!(err, TallyError::Period(PeriodError::PeriodNotElapsed { .. })));

    h.close_period();
    let err = h.service.close_current_fee_period().unwrap_err();
    assert!(matches!(
        err,
        TallyError::Period(PeriodError::PeriodNotElapsed { elapsed: 0, .. })
    ));
}

#[test]
fn open_period_is_not_claimable() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.fee(UNIT);
    assert_eq!(h.service.fees_available(&pid("alice"), &stable()).unwrap(), (0, 0));
    let err = h.claim("alice", 1).unwrap_err();
    assert!(matches!(err, TallyError::Period(PeriodError::PeriodNotClaimable(1))));

    h.mint(40 * UNIT);
    h.close_period();
    assert_eq!(
        h.service.fees_available(&pid("alice"), &stable()).unwrap(),
        (UNIT, 40 * UNIT)
    );
}

// ---------------------------------------------------------------------------
// Collateralization penalty
// ---------------------------------------------------------------------------

#[test]
fn quarter_issuance_ratio_takes_three_quarters() {
    let h = Harness::new();
    h.issue_with_collateral("alice", 25 * UNIT, 100 * UNIT);
    h.mint(120_000 * UNIT);
    h.fee(8 * UNIT);
    h.close_period();

    let receipt = h.claim("alice", 1).unwrap();
    assert_eq!(receipt.multiplier_bps, 7_500);
    assert_eq!(receipt.rewards_raw, 120_000 * UNIT);
    assert_eq!(receipt.rewards_escrowed, 90_000 * UNIT);
    // Fees are not penalized by default.
    assert_eq!(receipt.fees_paid, 8 * UNIT);
    // The withheld quarter stays in the period for later eviction.
    assert_eq!(h.service.read(|p| p.total_rewards_available()), 30_000 * UNIT);
}

#[test]
fn penalty_bands_follow_issuance_ratio() {
    let cases = [
        (10, 10_000),
        (22, 7_500),
        (29, 7_500),
        (30, 5_000),
        (39, 5_000),
        (40, 2_500),
        (50, 1_000),
        (99, 1_000),
        (100, 0),
    ];
    for (percent, expected) in cases {
        let h = Harness::new();
        h.issue_with_collateral("alice", percent * UNIT, 100 * UNIT);
        assert_eq!(
            h.service.read(|p| p.reward_multiplier(&pid("alice"))).unwrap(),
            expected,
            "issuance ratio {percent}%"
        );
    }
}

#[test]
fn penalized_fees_when_configured() {
    let params = FeePoolParams {
        penalize_fees: true,
        ..FeePoolParams::default()
    };
    let h = Harness::with_params(params, PenaltySchedule::default());
    h.issue_with_collateral("alice", 35 * UNIT, 100 * UNIT);
    h.fee(10 * UNIT);
    h.mint(10 * UNIT);
    h.close_period();

    let receipt = h.claim("alice", 1).unwrap();
    assert_eq!(receipt.fees_paid, 5 * UNIT);
    assert_eq!(receipt.rewards_escrowed, 5 * UNIT);
}

#[test]
fn unbacked_debt_earns_fees_but_no_rewards() {
    let h = Harness::new();
    h.issue_with_collateral("alice", 10 * UNIT, 0);
    h.fee(3 * UNIT);
    h.mint(50 * UNIT);
    h.close_period();

    let receipt = h.claim("alice", 1).unwrap();
    assert_eq!(receipt.multiplier_bps, 0);
    assert_eq!(receipt.rewards_escrowed, 0);
    assert_eq!(receipt.escrow_index, None);
    assert_eq!(receipt.fees_paid, 3 * UNIT);
    assert_eq!(h.escrow_entries("alice"), 0);
}

#[test]
fn multiplier_uses_ratio_at_claim_time() {
    let h = Harness::new();
    h.issue_with_collateral("alice", 35 * UNIT, 100 * UNIT);
    h.mint(100 * UNIT);
    h.close_period();
    // Topping up collateral before claiming lifts the penalty.
    h.sim.issuance.set_collateral(pid("alice"), 1_000 * UNIT);
    assert_eq!(h.claim("alice", 1).unwrap().rewards_escrowed, 100 * UNIT);
}

// ---------------------------------------------------------------------------
// Claim semantics
// ---------------------------------------------------------------------------

#[test]
fn second_claim_is_already_claimed() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.mint(10 * UNIT);
    h.close_period();

    h.claim("alice", 1).unwrap();
    let err = h.claim("alice", 1).unwrap_err();
    assert!(err.is_already_claimed());
    assert_eq!(h.escrow_entries("alice"), 1);
    assert_eq!(h.escrowed("alice"), 10 * UNIT);

    let err = h.claim_all("alice").unwrap_err();
    assert!(matches!(err, TallyError::Period(PeriodError::NothingToClaim(_))));
}

#[test]
fn stale_price_leaves_everything_untouched() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.fee(5 * UNIT);
    h.mint(10 * UNIT);
    h.close_period();
    // Move past the staleness bound without re-stamping prices.
    h.clock.advance(4 * 60 * 60);

    let err = h.claim("alice", 1).unwrap_err();
    assert!(matches!(err, TallyError::Oracle(OracleError::StalePrice { .. })));
    h.service.read(|pool| {
        let period = pool.window().period(1).unwrap();
        assert_eq!(period.fees_claimed, 0);
        assert_eq!(period.rewards_claimed, 0);
        assert!(!period.has_claimed(&pid("alice")));
    });
    assert_eq!(h.escrow_entries("alice"), 0);
    assert_eq!(h.credited("alice"), 0);

    h.sim.oracle.touch_all(h.now());
    assert_eq!(h.claim("alice", 1).unwrap().fees_paid, 5 * UNIT);
}

#[test]
fn fees_paid_in_requested_synth() {
    let h = Harness::new();
    let susd = CurrencyKey::new("sUSD");
    h.sim.oracle.set_price(&stable(), 2 * PRICE_PRECISION, h.now());
    h.sim.oracle.set_price(&susd, PRICE_PRECISION, h.now());
    h.issue("alice", 10 * UNIT);
    h.fee(3 * UNIT);
    h.close_period();

    let receipt = h.service.claim(pid("alice"), 1, &susd).unwrap();
    assert_eq!(receipt.fees_stable, 3 * UNIT);
    assert_eq!(receipt.fees_paid, 6 * UNIT);
    assert_eq!(h.sim.creditor.balance(&pid("alice"), &susd), 6 * UNIT);
    assert_eq!(h.credited("alice"), 0);
}

#[test]
fn unknown_synth_fails_before_any_effect() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.fee(3 * UNIT);
    h.mint(10 * UNIT);
    h.close_period();

    let err = h
        .service
        .claim(pid("alice"), 1, &CurrencyKey::new("sJPY"))
        .unwrap_err();
    assert!(matches!(err, TallyError::Oracle(OracleError::UnknownCurrency(_))));
    assert_eq!(h.escrow_entries("alice"), 0);
    assert!(!h.service.read(|p| p.window().period(1).unwrap().has_claimed(&pid("alice"))));
}

#[test]
fn escrow_grant_matures_after_lock() {
    let h = Harness::new();
    h.issue("alice", 10 * UNIT);
    h.mint(10 * UNIT);
    h.close_period();
    let claimed_at = h.now();
    let receipt = h.claim("alice", 1).unwrap();

    h.service.read(|pool| {
        let escrow = pool.escrow();
        let entry = escrow.entry_at(&pid("alice"), receipt.escrow_index.unwrap()).unwrap();
        assert_eq!(entry.quantity, 10 * UNIT);
        assert_eq!(entry.matures_at, claimed_at + escrow.lock_duration());
        assert!(!entry.is_mature(claimed_at));
        assert_eq!(escrow.next_maturation(&pid("alice"), claimed_at), Some(entry.matures_at));
        assert!(escrow
            .matured_entries(&pid("alice"), entry.matures_at)
            .next()
            .is_some());
    });
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn reloaded_pool_answers_identically() {
    let dir = tempfile::tempdir().unwrap();
    let config = TallyConfig {
        data_dir: dir.path().to_path_buf(),
        ..TallyConfig::default()
    };
    let sim = Simulation::new();
    let clock = Arc::new(ManualClock::new(START));

    let (ratios, available) = {
        let h = Harness::persistent(&config, sim.clone(), clock.clone());
        h.issue("alice", 40 * UNIT);
        h.issue("bob", 40 * UNIT);
        h.issue("carol", 20 * UNIT);
        h.mint(500 * UNIT);
        h.fee(9 * UNIT);
        h.close_period();
        h.issue("carol", 0);
        h.close_period();
        h.claim("alice", 1).unwrap();
        h.service.flush().unwrap();

        let ratios: Vec<u128> = [1, 2]
            .iter()
            .flat_map(|&p| ["alice", "bob", "carol"].map(|l| h.ratio(l, p)))
            .collect();
        let available = h.service.fees_available(&pid("bob"), &stable()).unwrap();
        (ratios, available)
    };

    let h = Harness::persistent(&config, sim, clock);
    let reloaded: Vec<u128> = [1, 2]
        .iter()
        .flat_map(|&p| ["alice", "bob", "carol"].map(|l| h.ratio(l, p)))
        .collect();
    assert_eq!(reloaded, ratios);
    assert_eq!(h.service.fees_available(&pid("bob"), &stable()).unwrap(), available);
    assert!(h.claim("alice", 1).unwrap_err().is_already_claimed());
    assert_eq!(h.escrow_entries("alice"), 1);
    assert_eq!(h.service.read(|p| p.window().current().id), 3);
}
