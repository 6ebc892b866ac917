//! # tally-rewards: Debt-share fee pool accounting.
//!
//! All calculations use integer arithmetic only for determinism.
//!
//! - **Debt ledger**: a cumulative dilution index makes every debt change
//!   O(1) while keeping each participant's share of the pool answerable at
//!   any retained ledger index.
//! - **Fee periods**: a rotating window of one open period and a fixed number
//!   of closed, claimable ones; unclaimed leftovers roll forward on eviction.
//! - **Penalty schedule**: tiered reward multipliers over the issuance ratio.
//! - **Reward escrow**: append-only, time-locked grants per participant.
//! - **Fee pool**: claim orchestration that computes every fallible input
//!   before mutating anything.

pub mod debt_ledger;
pub mod escrow;
pub mod fee_period;
pub mod fee_pool;
pub mod penalty;

pub use debt_ledger::DebtLedger;
pub use escrow::RewardEscrow;
pub use fee_period::FeePeriodWindow;
pub use fee_pool::{FeePool, FeePoolParams};
pub use penalty::{PenaltySchedule, PenaltyTier};
