//! Core domain types: participants, currencies, ledger entries, fee periods,
//! escrow entries and claim receipts.
//!
//! Amounts are `u64` base units; ratios are `u128` over
//! [`PRECISE_UNIT`](crate::constants::PRECISE_UNIT).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 32-byte participant identifier.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct ParticipantId(pub [u8; 32]);

impl ParticipantId {
    /// Derive an identifier from a human-readable label (BLAKE3 of the label).
    ///
    /// # Examples
    ///
    /// ```
    /// use tally_core::types::ParticipantId;
    /// assert_eq!(ParticipantId::from_label("alice"), ParticipantId::from_label("alice"));
    /// assert_ne!(ParticipantId::from_label("alice"), ParticipantId::from_label("bob"));
    /// ```
    pub fn from_label(label: &str) -> Self {
        Self(*blake3::hash(label.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ParticipantId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for ParticipantId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Currency symbol such as `sUSD`, `XDR` or `SNX`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct CurrencyKey(String);

impl CurrencyKey {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CurrencyKey {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

/// A price reading from the oracle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceQuote {
    /// Price in the stable unit, over `PRICE_PRECISION`.
    pub price: u64,
    /// Unix seconds at which the price was published.
    pub updated_at: u64,
}

/// One entry of the append-only debt ledger.
///
/// `value` is the cumulative dilution multiplier: a holder stamped at index
/// `e` with ownership `o` owns `o * L[i] / L[e]` of the pool at index `i`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct IndexEntry {
    /// Cumulative multiplier; a reset or rebase restarts it at `LEDGER_BASE`.
    pub value: u128,
    /// Pool total debt value right after the mutation.
    pub total_debt: u64,
    /// Holders stamped before this entry resolve to zero from here on. Holders
    /// that still owned value were re-stamped at this entry.
    pub resets_pool: bool,
}

/// A participant's ownership as of one ledger index.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct DebtSnapshot {
    /// Share of the pool at `entry_index`, over `PRECISE_UNIT`.
    pub ownership: u128,
    /// Ledger index written by the change that produced this snapshot.
    pub entry_index: u64,
}

/// Lifecycle of a fee period.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeriodState {
    /// Accruing fees; exactly one period is open.
    Open,
    /// Closed and claimable.
    Closed,
    /// Evicted from the claimable window.
    Retired,
}

/// A settlement window.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct FeePeriod {
    /// Sequence number, starting at 1.
    pub id: u64,
    /// First ledger index written while this period was open.
    pub starting_debt_index: u64,
    /// Last ledger index at the close instant. `None` while open, or when the
    /// ledger was still empty at close.
    pub closing_debt_index: Option<u64>,
    /// Unix seconds the period opened.
    pub start_time: u64,
    /// Unix seconds the period closed.
    pub closed_at: Option<u64>,
    /// Fees in the stable currency.
    pub fees_to_distribute: u64,
    pub fees_claimed: u64,
    /// Inflationary rewards minted for this period.
    pub rewards_to_distribute: u64,
    pub rewards_claimed: u64,
    /// Participants that have claimed this period.
    pub claimed_by: BTreeSet<ParticipantId>,
}

impl FeePeriod {
    /// A fresh open period.
    pub fn open(id: u64, starting_debt_index: u64, start_time: u64) -> Self {
        Self {
            id,
            starting_debt_index,
            closing_debt_index: None,
            start_time,
            closed_at: None,
            fees_to_distribute: 0,
            fees_claimed: 0,
            rewards_to_distribute: 0,
            rewards_claimed: 0,
            claimed_by: BTreeSet::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn unclaimed_fees(&self) -> u64 {
        self.fees_to_distribute.saturating_sub(self.fees_claimed)
    }

    pub fn unclaimed_rewards(&self) -> u64 {
        self.rewards_to_distribute.saturating_sub(self.rewards_claimed)
    }

    pub fn has_claimed(&self, participant: &ParticipantId) -> bool {
        self.claimed_by.contains(participant)
    }
}

/// A time-locked reward grant. Never edited after creation.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct EscrowEntry {
    pub participant: ParticipantId,
    pub quantity: u64,
    pub created_at: u64,
    pub matures_at: u64,
}

impl EscrowEntry {
    pub fn is_mature(&self, now: u64) -> bool {
        now >= self.matures_at
    }
}

/// Outcome of a successful claim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub participant: ParticipantId,
    /// Period ids settled by this claim, oldest first.
    pub periods: Vec<u64>,
    /// Currency the fees were paid in.
    pub synth: CurrencyKey,
    /// Fee entitlement in the stable currency, after any fee penalty.
    pub fees_stable: u64,
    /// Fees credited, in `synth` units.
    pub fees_paid: u64,
    /// Reward entitlement before the collateralization penalty.
    pub rewards_raw: u64,
    /// Reward actually escrowed.
    pub rewards_escrowed: u64,
    /// Multiplier applied to the reward stream, in bps.
    pub multiplier_bps: u64,
    /// Index of the escrow entry created, if any reward was granted.
    pub escrow_index: Option<usize>,
}
