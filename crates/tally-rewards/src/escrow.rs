//! Time-locked reward escrow.
//!
//! Every reward claim appends one entry that matures `lock_duration` seconds
//! later. Entries are never edited or removed here; releasing matured
//! entries belongs to an external vesting process, which reads them through
//! [`RewardEscrow::matured_entries`].

use std::collections::HashMap;

use tally_core::constants::{DEFAULT_ESCROW_LOCK_SECS, DEFAULT_MAX_ESCROW_ENTRIES};
use tally_core::error::EscrowError;
use tally_core::types::{EscrowEntry, ParticipantId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RewardEscrow {
    lock_duration: u64,
    max_entries: usize,
    entries: HashMap<ParticipantId, Vec<EscrowEntry>>,
    total_escrowed: u64,
}

impl RewardEscrow {
    pub fn new(lock_duration: u64, max_entries: usize) -> Self {
        Self {
            lock_duration,
            max_entries,
            entries: HashMap::new(),
            total_escrowed: 0,
        }
    }

    /// Rebuild from persisted entries, in per-participant append order.
    pub fn from_entries(
        lock_duration: u64,
        max_entries: usize,
        entries: impl IntoIterator<Item = EscrowEntry>,
    ) -> Result<Self, EscrowError> {
        let mut escrow = Self::new(lock_duration, max_entries);
        for entry in entries {
            escrow.total_escrowed = escrow
                .total_escrowed
                .checked_add(entry.quantity)
                .ok_or(EscrowError::ArithmeticOverflow)?;
            escrow.entries.entry(entry.participant).or_default().push(entry);
        }
        Ok(escrow)
    }

    pub fn lock_duration(&self) -> u64 {
        self.lock_duration
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Whether a grant of `quantity` at `now` would succeed.
    ///
    /// Fails with [`EscrowError::EscrowFull`] if `participant` cannot take
    /// another entry.
    pub fn check_grant(
        &self,
        participant: &ParticipantId,
        quantity: u64,
        now: u64,
    ) -> Result<(), EscrowError> {
        if quantity == 0 {
            return Ok(());
        }
        if self.entry_count(participant) >= self.max_entries {
            return Err(EscrowError::EscrowFull {
                participant: *participant,
                max: self.max_entries,
            });
        }
        now.checked_add(self.lock_duration)
            .and_then(|_| self.total_escrowed.checked_add(quantity))
            .map(|_| ())
            .ok_or(EscrowError::ArithmeticOverflow)
    }

    /// Lock `quantity` for `participant` until `now + lock_duration`.
    ///
    /// Returns the new entry's index, or `None` for a zero quantity.
    pub fn grant(
        &mut self,
        participant: ParticipantId,
        quantity: u64,
        now: u64,
    ) -> Result<Option<usize>, EscrowError> {
        if quantity == 0 {
            return Ok(None);
        }
        self.check_grant(&participant, quantity, now)?;
        let matures_at = now + self.lock_duration;

        let list = self.entries.entry(participant).or_default();
        let index = list.len();
        list.push(EscrowEntry {
            participant,
            quantity,
            created_at: now,
            matures_at,
        });
        self.total_escrowed += quantity;

        debug!(%participant, index, quantity, matures_at, "escrow entry appended");
        Ok(Some(index))
    }

    pub fn entry_at(
        &self,
        participant: &ParticipantId,
        index: usize,
    ) -> Result<&EscrowEntry, EscrowError> {
        self.entries_of(participant)
            .get(index)
            .ok_or(EscrowError::EntryNotFound {
                participant: *participant,
                index,
            })
    }

    pub fn entry_count(&self, participant: &ParticipantId) -> usize {
        self.entries_of(participant).len()
    }

    pub fn entries_of(&self, participant: &ParticipantId) -> &[EscrowEntry] {
        self.entries.get(participant).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.entries.keys()
    }

    /// Total quantity held for `participant`, matured or not.
    pub fn balance_of(&self, participant: &ParticipantId) -> u64 {
        self.entries_of(participant).iter().map(|e| e.quantity).sum()
    }

    pub fn total_escrowed(&self) -> u64 {
        self.total_escrowed
    }

    /// Entries of `participant` that have matured by `now`, with their indices.
    pub fn matured_entries(
        &self,
        participant: &ParticipantId,
        now: u64,
    ) -> impl Iterator<Item = (usize, &EscrowEntry)> {
        self.entries_of(participant)
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.is_mature(now))
    }

    /// Earliest maturation strictly after `now`.
    pub fn next_maturation(&self, participant: &ParticipantId, now: u64) -> Option<u64> {
        self.entries_of(participant)
            .iter()
            .map(|e| e.matures_at)
            .filter(|&t| t > now)
            .min()
    }
}

impl Default for RewardEscrow {
    fn default() -> Self {
        Self::new(DEFAULT_ESCROW_LOCK_SECS, DEFAULT_MAX_ESCROW_ENTRIES)
    }
}
