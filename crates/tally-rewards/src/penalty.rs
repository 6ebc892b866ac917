//! Collateralization penalty schedule.
//!
//! Tiers partition the issuance ratio `debt / collateral` (over
//! `PRECISE_UNIT`, higher is worse) into contiguous bands. Each band carries
//! a penalty in basis points; the reward multiplier is
//! `BPS_PRECISION - penalty`. Bounds are inclusive-lower, exclusive-upper.

use serde::{Deserialize, Serialize};
use tally_core::constants::{BPS_PRECISION, DEFAULT_PENALTY_BANDS};
use tally_core::error::PenaltyError;

/// One band of the schedule.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PenaltyTier {
    /// Inclusive lower bound on the issuance ratio.
    pub lower: u128,
    /// Exclusive upper bound; `None` for the last, unbounded tier.
    pub upper: Option<u128>,
    /// Fraction of the reward withheld, in bps.
    pub penalty_bps: u64,
}

/// A validated, immutable tier table.
///
/// Deserializes from a tier list through [`PenaltySchedule::new`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "Vec<PenaltyTier>", into = "Vec<PenaltyTier>")]
pub struct PenaltySchedule {
    tiers: Vec<PenaltyTier>,
}

impl PenaltySchedule {
    /// Validate and build a schedule.
    ///
    /// Tiers must be non-empty, start at 0, be contiguous with strictly
    /// increasing bounds, end unbounded, and carry non-decreasing penalties
    /// no larger than 100%.
    pub fn new(tiers: Vec<PenaltyTier>) -> Result<Self, PenaltyError> {
        let first = tiers
            .first()
            .ok_or_else(|| PenaltyError::InvalidTier("schedule has no tiers".into()))?;
        if first.lower != 0 {
            return Err(PenaltyError::InvalidTier(format!(
                "first tier starts at {}, not 0",
                first.lower
            )));
        }

        for (i, tier) in tiers.iter().enumerate() {
            if tier.penalty_bps > BPS_PRECISION {
                return Err(PenaltyError::InvalidTier(format!(
                    "tier {i} penalty {} bps exceeds {BPS_PRECISION}",
                    tier.penalty_bps
                )));
            }
            let is_last = i + 1 == tiers.len();
            match (tier.upper, is_last) {
                (None, true) => {}
                (None, false) => {
                    return Err(PenaltyError::InvalidTier(format!(
                        "tier {i} is unbounded but not last"
                    )));
                }
                (Some(_), true) => {
                    return Err(PenaltyError::InvalidTier(
                        "last tier must be unbounded".into(),
                    ));
                }
                (Some(upper), false) => {
                    if upper <= tier.lower {
                        return Err(PenaltyError::InvalidTier(format!(
                            "tier {i} is empty: [{}, {upper})",
                            tier.lower
                        )));
                    }
                    let next = &tiers[i + 1];
                    if next.lower != upper {
                        return Err(PenaltyError::InvalidTier(format!(
                            "gap or overlap between tier {i} and tier {}",
                            i + 1
                        )));
                    }
                    if next.penalty_bps < tier.penalty_bps {
                        return Err(PenaltyError::InvalidTier(format!(
                            "tier {} penalty decreases",
                            i + 1
                        )));
                    }
                }
            }
        }

        Ok(Self { tiers })
    }

    /// Build a schedule from `(lower bound, penalty bps)` pairs; each band
    /// ends where the next begins and the last is unbounded.
    pub fn from_bands(bands: &[(u128, u64)]) -> Result<Self, PenaltyError> {
        Self::new(bands_to_tiers(bands))
    }

    pub fn tiers(&self) -> &[PenaltyTier] {
        &self.tiers
    }

    /// The tier containing `ratio`.
    pub fn tier_for(&self, ratio: u128) -> &PenaltyTier {
        let idx = self
            .tiers
            .partition_point(|t| t.lower <= ratio)
            .saturating_sub(1);
        &self.tiers[idx]
    }

    /// Penalty withheld at `ratio`, in bps.
    pub fn penalty_bps(&self, ratio: u128) -> u64 {
        self.tier_for(ratio).penalty_bps
    }

    /// Reward multiplier at `ratio`, in bps.
    pub fn penalty_for(&self, ratio: u128) -> u64 {
        BPS_PRECISION - self.penalty_bps(ratio)
    }
}

impl Default for PenaltySchedule {
    fn default() -> Self {
        Self {
            tiers: bands_to_tiers(DEFAULT_PENALTY_BANDS),
        }
    }
}

impl TryFrom<Vec<PenaltyTier>> for PenaltySchedule {
    type Error = PenaltyError;

    fn try_from(tiers: Vec<PenaltyTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<PenaltySchedule> for Vec<PenaltyTier> {
    fn from(schedule: PenaltySchedule) -> Self {
        schedule.tiers
    }
}

fn bands_to_tiers(bands: &[(u128, u64)]) -> Vec<PenaltyTier> {
    bands
        .iter()
        .enumerate()
        .map(|(i, &(lower, penalty_bps))| PenaltyTier {
            lower,
            upper: bands.get(i + 1).map(|&(next, _)| next),
            penalty_bps,
        })
        .collect()
}
