//! Debt pool ledger.
//!
//! Each participant stores the share of the pool it held when its position
//! last changed, stamped with the ledger index that change wrote. Every debt
//! mutation appends one [`IndexEntry`] whose cumulative `value` scales all
//! *other* holders at once, so a mutation is O(1) regardless of the number of
//! participants:
//!
//! ```text
//! share(p, i) = ownership(p) * L[i] / L[stamp(p)]
//! ```
//!
//! Historical lookups binary-search the participant's snapshot history, so a
//! frozen ratio for an old index stays answerable after later changes.
//!
//! When a change leaves every other holder with zero value (first issuer,
//! or the last holder re-issuing) the entry is written as a pool reset:
//! the multiplier restarts at [`LEDGER_BASE`] and stamps older than the reset
//! resolve to zero from then on.
//!
//! The multiplier is kept within `[LEDGER_FLOOR, LEDGER_CEILING]`. A change
//! that would push it outside writes a rebase instead: a reset entry at
//! which every remaining holder is re-stamped with its scaled share. Rebases
//! cost O(holders) and only follow a billion-fold move of the multiplier.

use std::collections::HashMap;

use tally_core::constants::{LEDGER_BASE, LEDGER_CEILING, LEDGER_FLOOR, PRECISE_UNIT};
use tally_core::error::LedgerError;
use tally_core::math::{apply_ratio, mul_div, ratio_of};
use tally_core::types::{DebtSnapshot, IndexEntry, ParticipantId};
use tracing::debug;

/// Append-only cumulative index plus per-participant snapshots.
#[derive(Debug, Clone, Default)]
pub struct DebtLedger {
    entries: Vec<IndexEntry>,
    /// Indices of entries flagged `resets_pool`, ascending.
    resets: Vec<u64>,
    positions: HashMap<ParticipantId, Vec<DebtSnapshot>>,
    total_debt: u64,
    /// Oldest index a retained fee period may still query.
    retention_floor: u64,
}

impl DebtLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted parts.
    pub fn from_parts(
        entries: Vec<IndexEntry>,
        positions: HashMap<ParticipantId, Vec<DebtSnapshot>>,
        total_debt: u64,
        retention_floor: u64,
    ) -> Self {
        let resets = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.resets_pool)
            .map(|(i, _)| i as u64)
            .collect();
        Self {
            entries,
            resets,
            positions,
            total_debt,
            retention_floor,
        }
    }

    /// Number of ledger entries.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the most recent entry.
    pub fn last_index(&self) -> Option<u64> {
        self.len().checked_sub(1)
    }

    pub fn entry(&self, index: u64) -> Option<&IndexEntry> {
        self.entries.get(index as usize)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Current pool total debt value.
    pub fn total_debt(&self) -> u64 {
        self.total_debt
    }

    pub fn retention_floor(&self) -> u64 {
        self.retention_floor
    }

    /// Snapshot history of one participant, oldest first.
    pub fn position(&self, participant: &ParticipantId) -> Option<&[DebtSnapshot]> {
        self.positions.get(participant).map(Vec::as_slice)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&ParticipantId, &[DebtSnapshot])> {
        self.positions.iter().map(|(p, s)| (p, s.as_slice()))
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.positions.keys()
    }

    /// Share of the pool `participant` owned at ledger index `as_of`.
    ///
    /// Fails with [`LedgerError::EmptyPool`] when the pool total at `as_of`
    /// was zero and [`LedgerError::IndexOutOfRange`] past the end of the log.
    pub fn ownership_ratio(
        &self,
        participant: &ParticipantId,
        as_of: u64,
    ) -> Result<u128, LedgerError> {
        let entry = self.entry(as_of).ok_or(LedgerError::IndexOutOfRange {
            index: as_of,
            len: self.len(),
        })?;
        if entry.total_debt == 0 {
            return Err(LedgerError::EmptyPool);
        }

        let Some(snapshot) = self.snapshot_at(participant, as_of) else {
            return Ok(0);
        };
        if snapshot.ownership == 0 || self.reset_between(snapshot.entry_index, as_of) {
            return Ok(0);
        }

        let base = self.entries[snapshot.entry_index as usize].value;
        mul_div(snapshot.ownership, entry.value, base).ok_or(LedgerError::ArithmeticOverflow)
    }

    /// Share of the pool `participant` owns now.
    pub fn current_ownership(&self, participant: &ParticipantId) -> Result<u128, LedgerError> {
        let last = self.last_index().ok_or(LedgerError::EmptyPool)?;
        self.ownership_ratio(participant, last)
    }

    /// Debt value `participant` currently owes, in the pool's unit.
    pub fn debt_value(&self, participant: &ParticipantId) -> Result<u64, LedgerError> {
        if self.total_debt == 0 {
            return Ok(0);
        }
        let ratio = self.current_ownership(participant)?;
        apply_ratio(self.total_debt, ratio).ok_or(LedgerError::ArithmeticOverflow)
    }

    /// Set `participant`'s issued debt to `new_value` and return the ledger
    /// index the change wrote.
    pub fn record_debt_change(
        &mut self,
        participant: ParticipantId,
        new_value: u64,
    ) -> Result<u64, LedgerError> {
        let current = self.settled_value(&participant)?;
        let others = self.total_debt.saturating_sub(current);
        let new_total = others
            .checked_add(new_value)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        // Other holders keep their value; their share moves by T / T'.
        let scaled = match self.entries.last() {
            Some(last) if others > 0 => {
                mul_div(last.value, self.total_debt as u128, new_total as u128)
                    .filter(|v| (LEDGER_FLOOR..=LEDGER_CEILING).contains(v))
            }
            _ => None,
        };
        let restamped = if others > 0 && scaled.is_none() {
            self.restamp_others(&participant, new_total)?
        } else {
            Vec::new()
        };
        let entry = match scaled {
            Some(value) => IndexEntry {
                value,
                total_debt: new_total,
                resets_pool: false,
            },
            None => IndexEntry {
                value: LEDGER_BASE,
                total_debt: new_total,
                resets_pool: true,
            },
        };

        let ownership = if new_total == 0 {
            0
        } else {
            ratio_of(new_value, new_total).ok_or(LedgerError::ArithmeticOverflow)?
        };

        let index = self.len();
        self.entries.push(entry);
        if entry.resets_pool {
            self.resets.push(index);
        }
        if !restamped.is_empty() {
            debug!(index, holders = restamped.len(), "debt ledger rebased");
        }
        for (holder, share) in restamped {
            self.push_snapshot(holder, share, index);
        }
        self.push_snapshot(participant, ownership, index);
        self.total_debt = new_total;

        debug!(
            %participant,
            index,
            previous = current,
            new_value,
            total = new_total,
            reset = entry.resets_pool,
            "debt ledger entry appended"
        );
        Ok(index)
    }

    /// Revalue the whole pool after a price move.
    ///
    /// Proportions are unchanged, so no entry is appended.
    pub fn revalue(&mut self, new_total: u64) -> Result<(), LedgerError> {
        if self.total_debt == 0 || new_total == 0 {
            return Err(LedgerError::EmptyPool);
        }
        debug!(from = self.total_debt, to = new_total, "debt pool revalued");
        self.total_debt = new_total;
        Ok(())
    }

    /// Raise the oldest index still queried by retained fee periods.
    ///
    /// Older snapshots are pruned lazily on the participant's next change.
    pub fn set_retention_floor(&mut self, floor: u64) {
        self.retention_floor = self.retention_floor.max(floor);
    }

    /// Value `participant` gives up when its position changes.
    ///
    /// The other holders' value is rounded down and the participant takes the
    /// remainder, so the last real holder leaving always empties the pool.
    fn settled_value(&self, participant: &ParticipantId) -> Result<u64, LedgerError> {
        if self.total_debt == 0 {
            return Ok(0);
        }
        let ratio = self.current_ownership(participant)?;
        let others = apply_ratio(self.total_debt, PRECISE_UNIT.saturating_sub(ratio))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(self.total_debt - others)
    }

    /// Shares every holder but `changing` will own once the pool total moves
    /// to `new_total`.
    fn restamp_others(
        &self,
        changing: &ParticipantId,
        new_total: u64,
    ) -> Result<Vec<(ParticipantId, u128)>, LedgerError> {
        let last = self.last_index().ok_or(LedgerError::EmptyPool)?;
        let mut shares = Vec::new();
        for holder in self.positions.keys().filter(|p| *p != changing) {
            let share = self.ownership_ratio(holder, last)?;
            if share == 0 {
                continue;
            }
            let scaled = mul_div(share, self.total_debt as u128, new_total as u128)
                .ok_or(LedgerError::ArithmeticOverflow)?;
            shares.push((*holder, scaled));
        }
        Ok(shares)
    }

    fn push_snapshot(&mut self, participant: ParticipantId, ownership: u128, index: u64) {
        let floor = self.retention_floor;
        let history = self.positions.entry(participant).or_default();
        // Keep the newest snapshot at or below the floor; drop older ones.
        let at_or_below = history.partition_point(|s| s.entry_index <= floor);
        if at_or_below > 1 {
            history.drain(..at_or_below - 1);
        }
        history.push(DebtSnapshot {
            ownership,
            entry_index: index,
        });
    }

    fn snapshot_at(&self, participant: &ParticipantId, index: u64) -> Option<DebtSnapshot> {
        let history = self.positions.get(participant)?;
        let k = history.partition_point(|s| s.entry_index <= index);
        k.checked_sub(1).map(|i| history[i])
    }

    /// Whether a pool reset landed in `(stamp, index]`.
    fn reset_between(&self, stamp: u64, index: u64) -> bool {
        let k = self.resets.partition_point(|&r| r <= stamp);
        self.resets.get(k).is_some_and(|&r| r <= index)
    }
}
