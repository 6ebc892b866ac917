//! Protocol constants. All monetary values in base units (1 token = 10^8 units).

pub const UNIT: u64 = 100_000_000;

/// Fixed-point denominator for ratios and ledger index values (1.0).
///
/// # Examples
///
/// ```
/// use tally_core::constants::PRECISE_UNIT;
/// // 40% ownership
/// let forty = PRECISE_UNIT * 2 / 5;
/// assert_eq!(forty, 400_000_000_000_000_000);
/// ```
pub const PRECISE_UNIT: u128 = 1_000_000_000_000_000_000;

/// Debt ledger multiplier written by a pool reset or rebase.
pub const LEDGER_BASE: u128 = PRECISE_UNIT * 1_000_000_000;
/// Smallest multiplier an ordinary ledger entry may carry before the ledger rebases.
pub const LEDGER_FLOOR: u128 = PRECISE_UNIT;
/// Largest multiplier an ordinary ledger entry may carry before the ledger rebases.
pub const LEDGER_CEILING: u128 = LEDGER_BASE * 1_000_000_000;

/// Denominator for penalty fractions and reward multipliers.
pub const BPS_PRECISION: u64 = 10_000;

/// Denominator for oracle prices (1.0 = one unit of the stable currency).
pub const PRICE_PRECISION: u64 = UNIT;

pub const MINUTE_SECS: u64 = 60;
pub const DAY_SECS: u64 = 86_400;
pub const WEEK_SECS: u64 = 7 * DAY_SECS;
pub const YEAR_SECS: u64 = 31_556_926;

/// Default length of a fee period.
pub const DEFAULT_FEE_PERIOD_DURATION_SECS: u64 = WEEK_SECS;
/// Shortest fee period a configuration may request.
pub const MIN_FEE_PERIOD_DURATION_SECS: u64 = DAY_SECS;
/// Longest fee period a configuration may request.
pub const MAX_FEE_PERIOD_DURATION_SECS: u64 = 60 * DAY_SECS;

/// Closed periods kept claimable before the oldest is retired.
pub const DEFAULT_RETAINED_PERIODS: usize = 6;
/// Upper bound on the retention depth; keeps the fee-period slot table small.
pub const MAX_RETAINED_PERIODS: usize = 64;

/// Time a reward grant stays locked in escrow.
pub const DEFAULT_ESCROW_LOCK_SECS: u64 = 52 * WEEK_SECS;
/// Escrow entries one participant may accumulate (five years of weekly grants).
pub const DEFAULT_MAX_ESCROW_ENTRIES: usize = 52 * 5;

/// Oldest acceptable oracle price.
pub const DEFAULT_PRICE_STALENESS_SECS: u64 = 3 * 60 * 60;

/// Currency fees are accounted in.
pub const DEFAULT_STABLE_CURRENCY: &str = "XDR";
/// Currency backing participants' debt.
pub const DEFAULT_COLLATERAL_CURRENCY: &str = "SNX";

/// Default collateralization penalty bands as
/// `(lower bound inclusive, penalty bps)`; each band ends where the next
/// begins and the last is unbounded.
///
/// | Issuance ratio | Penalty | Reward multiplier |
/// |----------------|---------|-------------------|
/// | 0% – 22%       | 0%      | 1.00×             |
/// | 22% – 30%      | 25%     | 0.75×             |
/// | 30% – 40%      | 50%     | 0.50×             |
/// | 40% – 50%      | 75%     | 0.25×             |
/// | 50% – 100%     | 90%     | 0.10×             |
/// | ≥ 100%         | 100%    | 0×                |
pub const DEFAULT_PENALTY_BANDS: &[(u128, u64)] = &[
    (0, 0),
    (PRECISE_UNIT * 22 / 100, 2_500),
    (PRECISE_UNIT * 30 / 100, 5_000),
    (PRECISE_UNIT * 40 / 100, 7_500),
    (PRECISE_UNIT * 50 / 100, 9_000),
    (PRECISE_UNIT, 10_000),
];
