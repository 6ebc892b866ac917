//! RocksDB-backed persistence for a fee pool.
//!
//! Column families:
//! - `debt_ledger`: append-only index entries keyed by big-endian index
//! - `positions`: each participant's snapshot history
//! - `fee_periods`: held periods keyed by big-endian id
//! - `escrow`: entries keyed by participant ‖ big-endian entry index
//! - `metadata`: pool total, retention floor, schema version
//!
//! Every mutation is written as one [`WriteBatch`].

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use tally_core::error::TallyError;
use tally_core::types::{DebtSnapshot, EscrowEntry, FeePeriod, IndexEntry, ParticipantId};
use tally_rewards::fee_pool::Collaborators;
use tally_rewards::{DebtLedger, FeePeriodWindow, FeePool, FeePoolParams, PenaltySchedule, RewardEscrow};
use tracing::{info, warn};

// --- Column family names ---

const CF_DEBT_LEDGER: &str = "debt_ledger";
const CF_POSITIONS: &str = "positions";
const CF_FEE_PERIODS: &str = "fee_periods";
const CF_ESCROW: &str = "escrow";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_DEBT_LEDGER,
    CF_POSITIONS,
    CF_FEE_PERIODS,
    CF_ESCROW,
    CF_METADATA,
];

// --- Metadata keys ---

const META_SCHEMA_VERSION: &[u8] = b"schema_version";
const META_TOTAL_DEBT: &[u8] = b"total_debt";
const META_RETENTION_FLOOR: &[u8] = b"retention_floor";

const SCHEMA_VERSION: u64 = 1;

/// What a single pool mutation changed.
#[derive(Debug, Clone, Default)]
pub struct Touched {
    /// Ledger entries at or after this index are new.
    pub ledger_from: Option<u64>,
    /// Participants whose snapshot history changed.
    pub positions: Vec<ParticipantId>,
    /// Rewrite the held fee periods.
    pub periods: bool,
    /// Periods evicted from the window.
    pub retired_periods: Vec<u64>,
    /// Escrow entries appended.
    pub escrow: Vec<(ParticipantId, usize)>,
}

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a store at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TallyError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| TallyError::Storage(e.to_string()))?;
        info!(path = %path.as_ref().display(), "pool store opened");
        Ok(Self { db })
    }

    /// True until a pool has been written.
    pub fn is_empty(&self) -> Result<bool, TallyError> {
        Ok(self.get_meta_u64(META_SCHEMA_VERSION)?.is_none())
    }

    /// Write the whole pool.
    pub fn save_all(&self, pool: &FeePool) -> Result<(), TallyError> {
        let touched = Touched {
            ledger_from: Some(0),
            positions: pool.ledger().participants().copied().collect(),
            periods: true,
            retired_periods: Vec::new(),
            escrow: pool
                .escrow()
                .participants()
                .flat_map(|p| (0..pool.escrow().entry_count(p)).map(move |i| (*p, i)))
                .collect(),
        };
        self.save(pool, &touched)
    }

    /// Write what `touched` names, plus the pool metadata, atomically.
    pub fn save(&self, pool: &FeePool, touched: &Touched) -> Result<(), TallyError> {
        let mut batch = WriteBatch::default();
        let ledger = pool.ledger();

        if let Some(from) = touched.ledger_from {
            let cf = self.cf_handle(CF_DEBT_LEDGER)?;
            for index in from..ledger.len() {
                if let Some(entry) = ledger.entry(index) {
                    batch.put_cf(cf, Self::index_key(index), encode(entry)?);
                }
            }
        }

        if !touched.positions.is_empty() {
            let cf = self.cf_handle(CF_POSITIONS)?;
            for participant in &touched.positions {
                match ledger.position(participant) {
                    Some(history) => {
                        batch.put_cf(cf, participant.as_bytes(), encode(&history.to_vec())?)
                    }
                    None => batch.delete_cf(cf, participant.as_bytes()),
                }
            }
        }

        if touched.periods {
            let cf = self.cf_handle(CF_FEE_PERIODS)?;
            for period in pool.window().periods() {
                batch.put_cf(cf, Self::index_key(period.id), encode(period)?);
            }
        }
        if !touched.retired_periods.is_empty() {
            let cf = self.cf_handle(CF_FEE_PERIODS)?;
            for id in &touched.retired_periods {
                batch.delete_cf(cf, Self::index_key(*id));
            }
        }

        if !touched.escrow.is_empty() {
            let cf = self.cf_handle(CF_ESCROW)?;
            for (participant, index) in &touched.escrow {
                let entry = pool.escrow().entry_at(participant, *index)?;
                batch.put_cf(cf, Self::escrow_key(participant, *index), encode(entry)?);
            }
        }

        let meta = self.cf_handle(CF_METADATA)?;
        batch.put_cf(meta, META_SCHEMA_VERSION, SCHEMA_VERSION.to_le_bytes());
        batch.put_cf(meta, META_TOTAL_DEBT, ledger.total_debt().to_le_bytes());
        batch.put_cf(meta, META_RETENTION_FLOOR, ledger.retention_floor().to_le_bytes());

        self.db
            .write(batch)
            .map_err(|e| TallyError::Storage(e.to_string()))
    }

    /// Rebuild a pool, or `None` if nothing has been written yet.
    pub fn load(
        &self,
        params: FeePoolParams,
        penalties: PenaltySchedule,
        collaborators: Collaborators,
    ) -> Result<Option<FeePool>, TallyError> {
        match self.get_meta_u64(META_SCHEMA_VERSION)? {
            None => return Ok(None),
            Some(SCHEMA_VERSION) => {}
            Some(other) => {
                return Err(TallyError::Storage(format!(
                    "unsupported schema version {other}"
                )));
            }
        }

        let ledger = self.load_ledger()?;
        let periods = self.load_periods()?;
        let stored_ids: Vec<u64> = periods.iter().map(|p| p.id).collect();
        let window =
            FeePeriodWindow::from_periods(params.fee_period_duration, params.retained_periods, periods)
                .ok_or_else(|| TallyError::Storage("corrupt fee period window".into()))?;
        let escrow = RewardEscrow::from_entries(
            params.escrow_lock_duration,
            params.max_escrow_entries,
            self.load_escrow()?,
        )?;

        let retired: Vec<u64> = stored_ids
            .into_iter()
            .filter(|id| window.period(*id).is_none())
            .collect();

        info!(
            ledger_entries = ledger.len(),
            open_period = window.current().id,
            escrowed = escrow.total_escrowed(),
            "pool state loaded"
        );
        let pool = FeePool::from_parts(params, penalties, collaborators, ledger, window, escrow);
        if !retired.is_empty() {
            // The retention depth shrank; persist the trimmed window so the
            // rolled leftovers are not folded a second time on the next load.
            warn!(?retired, "retired fee periods beyond the configured depth");
            self.save(
                &pool,
                &Touched {
                    periods: true,
                    retired_periods: retired,
                    ..Touched::default()
                },
            )?;
        }
        Ok(Some(pool))
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), TallyError> {
        self.db
            .flush()
            .map_err(|e| TallyError::Storage(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn load_ledger(&self) -> Result<DebtLedger, TallyError> {
        let cf = self.cf_handle(CF_DEBT_LEDGER)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| TallyError::Storage(e.to_string()))?;
            let index = Self::decode_index_key(&key)?;
            if index != entries.len() as u64 {
                return Err(TallyError::Storage(format!(
                    "debt ledger gap: expected index {}, found {index}",
                    entries.len()
                )));
            }
            entries.push(decode::<IndexEntry>(&value)?);
        }

        let cf = self.cf_handle(CF_POSITIONS)?;
        let mut positions = HashMap::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| TallyError::Storage(e.to_string()))?;
            let participant = Self::decode_participant(&key)?;
            positions.insert(participant, decode::<Vec<DebtSnapshot>>(&value)?);
        }

        let total_debt = self.get_meta_u64(META_TOTAL_DEBT)?.unwrap_or(0);
        let floor = self.get_meta_u64(META_RETENTION_FLOOR)?.unwrap_or(0);
        Ok(DebtLedger::from_parts(entries, positions, total_debt, floor))
    }

    /// Held periods, newest first.
    fn load_periods(&self) -> Result<Vec<FeePeriod>, TallyError> {
        let cf = self.cf_handle(CF_FEE_PERIODS)?;
        let mut periods = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (_, value) = item.map_err(|e| TallyError::Storage(e.to_string()))?;
            periods.push(decode::<FeePeriod>(&value)?);
        }
        Ok(periods)
    }

    fn load_escrow(&self) -> Result<Vec<EscrowEntry>, TallyError> {
        let cf = self.cf_handle(CF_ESCROW)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| TallyError::Storage(e.to_string()))?;
            entries.push(decode::<EscrowEntry>(&value)?);
        }
        Ok(entries)
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, TallyError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| TallyError::Storage(e.to_string()))?
        {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    TallyError::Storage("invalid metadata value length".into())
                })?;
                Ok(Some(u64::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, TallyError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| TallyError::Storage(format!("missing column family: {name}")))
    }

    /// Big-endian so iteration follows numeric order.
    fn index_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn decode_index_key(key: &[u8]) -> Result<u64, TallyError> {
        let raw: [u8; 8] = key
            .try_into()
            .map_err(|_| TallyError::Storage("invalid index key length".into()))?;
        Ok(u64::from_be_bytes(raw))
    }

    fn decode_participant(key: &[u8]) -> Result<ParticipantId, TallyError> {
        let raw: [u8; 32] = key
            .try_into()
            .map_err(|_| TallyError::Storage("invalid participant key length".into()))?;
        Ok(ParticipantId(raw))
    }

    /// participant (32) ‖ entry index (8, big-endian).
    fn escrow_key(participant: &ParticipantId, index: usize) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[0..32].copy_from_slice(participant.as_bytes());
        key[32..40].copy_from_slice(&(index as u64).to_be_bytes());
        key
    }
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, TallyError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| TallyError::Storage(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, TallyError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| TallyError::Storage(e.to_string()))
}
