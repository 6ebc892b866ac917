//! Error types for the Tally fee pool.
use thiserror::Error;

use crate::types::{CurrencyKey, ParticipantId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("debt pool is empty")] EmptyPool,
    #[error("ledger index out of range: {index} >= {len}")] IndexOutOfRange { index: u64, len: u64 },
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("fee period not elapsed: {elapsed}s of {required}s")] PeriodNotElapsed { elapsed: u64, required: u64 },
    #[error("fee period {0} is not claimable")] PeriodNotClaimable(u64),
    #[error("{participant} already claimed fee period {period}")] AlreadyClaimed { participant: ParticipantId, period: u64 },
    #[error("nothing to claim for {0}")] NothingToClaim(ParticipantId),
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PenaltyError {
    #[error("invalid penalty tier: {0}")] InvalidTier(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("escrow entry {index} not found for {participant}")] EntryNotFound { participant: ParticipantId, index: usize },
    #[error("escrow full for {participant}: {max} entries")] EscrowFull { participant: ParticipantId, max: usize },
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("stale price for {currency}: {age}s old, max {max_age}s")] StalePrice { currency: CurrencyKey, age: u64, max_age: u64 },
    #[error("unknown currency: {0}")] UnknownCurrency(CurrencyKey),
    #[error("zero price for {0}")] ZeroPrice(CurrencyKey),
}

#[derive(Error, Debug)]
pub enum TallyError {
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error(transparent)] Period(#[from] PeriodError),
    #[error(transparent)] Penalty(#[from] PenaltyError),
    #[error(transparent)] Escrow(#[from] EscrowError),
    #[error(transparent)] Oracle(#[from] OracleError),
    #[error("collaborator: {0}")] Collaborator(String),
    #[error("storage: {0}")] Storage(String),
    #[error("config: {0}")] Config(String),
}

impl TallyError {
    /// A repeated claim is a defined outcome rather than a fault.
    pub fn is_already_claimed(&self) -> bool {
        matches!(self, Self::Period(PeriodError::AlreadyClaimed { .. }))
    }
}
