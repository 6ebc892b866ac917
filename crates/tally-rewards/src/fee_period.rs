//! Rotating window of fee periods.
//!
//! The window always holds exactly one open period plus up to
//! `retained_periods` closed ones, newest first. Closing the open period
//! freezes its closing ledger index, attaches the rewards minted for it and
//! opens the next period. When the window overflows, the oldest closed period
//! is retired and whatever was left unclaimed in it moves into the
//! next-oldest retained period.

use std::collections::VecDeque;

use tally_core::error::{LedgerError, PeriodError, TallyError};
use tally_core::types::{FeePeriod, ParticipantId, PeriodState};
use tracing::info;

use crate::debt_ledger::DebtLedger;

/// What a successful close did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub closed_id: u64,
    pub opened_id: u64,
    /// Period evicted from the window, as it was before eviction.
    pub retired: Option<FeePeriod>,
    pub rolled_fees: u64,
    pub rolled_rewards: u64,
}

#[derive(Debug, Clone)]
pub struct FeePeriodWindow {
    duration: u64,
    retained: usize,
    /// `periods[0]` is open; the rest are closed, newest first.
    periods: VecDeque<FeePeriod>,
}

impl FeePeriodWindow {
    /// A window whose first period (id 1) opens at `now`.
    ///
    /// `retained` is clamped to at least one closed period.
    pub fn new(duration: u64, retained: usize, now: u64, starting_debt_index: u64) -> Self {
        let mut periods = VecDeque::with_capacity(retained.max(1) + 1);
        periods.push_front(FeePeriod::open(1, starting_debt_index, now));
        Self {
            duration,
            retained: retained.max(1),
            periods,
        }
    }

    /// Rebuild from persisted periods, newest first.
    ///
    /// Returns `None` unless exactly the first period is open. Closed periods
    /// beyond `retained` are retired oldest first, rolling their leftovers
    /// forward the way a close does.
    pub fn from_periods(duration: u64, retained: usize, periods: Vec<FeePeriod>) -> Option<Self> {
        let (first, rest) = periods.split_first()?;
        if first.is_closed() || rest.iter().any(|p| !p.is_closed()) {
            return None;
        }
        let mut window = Self {
            duration,
            retained: retained.max(1),
            periods: periods.into(),
        };
        while window.periods.len() > window.retained + 1 {
            window.retire_oldest().ok()?;
        }
        Some(window)
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn retained_periods(&self) -> usize {
        self.retained
    }

    /// The open period.
    pub fn current(&self) -> &FeePeriod {
        &self.periods[0]
    }

    /// Period by recency: 0 is the open period, 1 the most recently closed.
    pub fn recent(&self, index: usize) -> Option<&FeePeriod> {
        self.periods.get(index)
    }

    /// All held periods, newest first.
    pub fn periods(&self) -> impl Iterator<Item = &FeePeriod> {
        self.periods.iter()
    }

    /// Period by sequence id, if still held.
    pub fn period(&self, id: u64) -> Option<&FeePeriod> {
        let offset = self.current().id.checked_sub(id)?;
        self.periods.get(usize::try_from(offset).ok()?)
    }

    fn period_mut(&mut self, id: u64) -> Option<&mut FeePeriod> {
        let offset = self.current().id.checked_sub(id)?;
        self.periods.get_mut(usize::try_from(offset).ok()?)
    }

    /// Lifecycle state of period `id`; `None` for ids never issued.
    pub fn state(&self, id: u64) -> Option<PeriodState> {
        let current = self.current().id;
        if id == 0 || id > current {
            return None;
        }
        Some(match self.period(id) {
            Some(p) if !p.is_closed() => PeriodState::Open,
            Some(_) => PeriodState::Closed,
            None => PeriodState::Retired,
        })
    }

    /// Closed, retained periods, oldest first.
    pub fn claimable_periods(&self) -> impl Iterator<Item = &FeePeriod> {
        self.periods.iter().skip(1).rev()
    }

    /// Closed period `id`, or [`PeriodError::PeriodNotClaimable`].
    pub fn claimable(&self, id: u64) -> Result<&FeePeriod, PeriodError> {
        self.period(id)
            .filter(|p| p.is_closed())
            .ok_or(PeriodError::PeriodNotClaimable(id))
    }

    /// Oldest ledger index any retained period can still be asked about.
    pub fn retention_floor(&self) -> Option<u64> {
        self.claimable_periods()
            .filter_map(|p| p.closing_debt_index)
            .min()
    }

    /// Unclaimed fees across closed periods.
    pub fn total_fees_available(&self) -> u64 {
        self.claimable_periods()
            .map(FeePeriod::unclaimed_fees)
            .fold(0u64, u64::saturating_add)
    }

    /// Unclaimed rewards across closed periods.
    pub fn total_rewards_available(&self) -> u64 {
        self.claimable_periods()
            .map(FeePeriod::unclaimed_rewards)
            .fold(0u64, u64::saturating_add)
    }

    /// Accrue exchange fees into the open period.
    pub fn record_fee_paid(&mut self, amount: u64) -> Result<(), PeriodError> {
        let open = &mut self.periods[0];
        open.fees_to_distribute = open
            .fees_to_distribute
            .checked_add(amount)
            .ok_or(PeriodError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Fails with [`PeriodError::PeriodNotElapsed`] unless the open period
    /// has run for a positive time of at least the configured duration.
    pub fn check_elapsed(&self, now: u64) -> Result<(), PeriodError> {
        let elapsed = now.saturating_sub(self.current().start_time);
        if elapsed == 0 || elapsed < self.duration {
            return Err(PeriodError::PeriodNotElapsed {
                elapsed,
                required: self.duration,
            });
        }
        Ok(())
    }

    /// Close the open period and open the next one.
    ///
    /// `closing_index` is the last ledger index at `now` (`None` if the
    /// ledger is empty) and `minted_rewards` the supply released for the
    /// closing period. Either everything below happens or nothing does.
    pub fn close_current(
        &mut self,
        now: u64,
        closing_index: Option<u64>,
        minted_rewards: u64,
    ) -> Result<CloseOutcome, PeriodError> {
        self.check_elapsed(now)?;
        let current = self.current();
        let closed_id = current.id;
        let opened_id = closed_id
            .checked_add(1)
            .ok_or(PeriodError::ArithmeticOverflow)?;
        let rewards = current
            .rewards_to_distribute
            .checked_add(minted_rewards)
            .ok_or(PeriodError::ArithmeticOverflow)?;

        // After closing there are `len` closed periods; one too many evicts.
        let len = self.periods.len();
        let (mut rolled_fees, mut rolled_rewards) = (0, 0);
        let mut heir_totals = None;
        if len > self.retained {
            let oldest = &self.periods[len - 1];
            let heir = &self.periods[len - 2];
            rolled_fees = oldest.unclaimed_fees();
            rolled_rewards = oldest.unclaimed_rewards();
            // With a single retained period the heir is the one closing now.
            let heir_rewards = if heir.id == closed_id {
                rewards
            } else {
                heir.rewards_to_distribute
            };
            heir_totals = Some((
                heir.fees_to_distribute
                    .checked_add(rolled_fees)
                    .ok_or(PeriodError::ArithmeticOverflow)?,
                heir_rewards
                    .checked_add(rolled_rewards)
                    .ok_or(PeriodError::ArithmeticOverflow)?,
            ));
        }

        let closing = &mut self.periods[0];
        closing.closing_debt_index = closing_index;
        closing.closed_at = Some(now);
        closing.rewards_to_distribute = rewards;

        let mut retired = None;
        if let Some((fees, rewards)) = heir_totals {
            retired = self.periods.pop_back();
            if let Some(heir) = self.periods.back_mut() {
                heir.fees_to_distribute = fees;
                heir.rewards_to_distribute = rewards;
            }
        }

        let next_start = closing_index.map_or(0, |i| i + 1);
        self.periods
            .push_front(FeePeriod::open(opened_id, next_start, now));

        info!(
            period = closed_id,
            closing_index = ?closing_index,
            minted = minted_rewards,
            retired = ?retired.as_ref().map(|p| p.id),
            rolled_fees,
            rolled_rewards,
            "fee period closed"
        );

        Ok(CloseOutcome {
            closed_id,
            opened_id,
            retired,
            rolled_fees,
            rolled_rewards,
        })
    }

    /// Retire the oldest closed period into the next-oldest closed one.
    fn retire_oldest(&mut self) -> Result<Option<FeePeriod>, PeriodError> {
        let len = self.periods.len();
        if len < 3 {
            return Ok(None);
        }
        let (oldest, heir) = (&self.periods[len - 1], &self.periods[len - 2]);
        let (rolled_fees, rolled_rewards) = (oldest.unclaimed_fees(), oldest.unclaimed_rewards());
        let fees = heir
            .fees_to_distribute
            .checked_add(rolled_fees)
            .ok_or(PeriodError::ArithmeticOverflow)?;
        let rewards = heir
            .rewards_to_distribute
            .checked_add(rolled_rewards)
            .ok_or(PeriodError::ArithmeticOverflow)?;

        let retired = self.periods.pop_back();
        if let Some(heir) = self.periods.back_mut() {
            heir.fees_to_distribute = fees;
            heir.rewards_to_distribute = rewards;
        }
        info!(
            retired = ?retired.as_ref().map(|p| p.id),
            rolled_fees,
            rolled_rewards,
            "fee period retired past retention depth"
        );
        Ok(retired)
    }

    /// `participant`'s share of the pool frozen at period `id`'s close.
    pub fn effective_debt_ratio_for_period(
        &self,
        ledger: &DebtLedger,
        participant: &ParticipantId,
        id: u64,
    ) -> Result<u128, TallyError> {
        let period = self.claimable(id)?;
        let index = period.closing_debt_index.ok_or(LedgerError::EmptyPool)?;
        Ok(ledger.ownership_ratio(participant, index)?)
    }

    /// Record a settled claim against period `id`.
    pub fn mark_claimed(
        &mut self,
        id: u64,
        participant: ParticipantId,
        fees: u64,
        rewards: u64,
    ) -> Result<(), PeriodError> {
        let period = self
            .period_mut(id)
            .filter(|p| p.is_closed())
            .ok_or(PeriodError::PeriodNotClaimable(id))?;
        if period.has_claimed(&participant) {
            return Err(PeriodError::AlreadyClaimed { participant, period: id });
        }
        let fees_claimed = period
            .fees_claimed
            .checked_add(fees)
            .ok_or(PeriodError::ArithmeticOverflow)?;
        let rewards_claimed = period
            .rewards_claimed
            .checked_add(rewards)
            .ok_or(PeriodError::ArithmeticOverflow)?;
        period.fees_claimed = fees_claimed;
        period.rewards_claimed = rewards_claimed;
        period.claimed_by.insert(participant);
        Ok(())
    }
}
