//! Serialized access to a [`FeePool`].
//!
//! Every mutation takes the write lock for its whole duration and persists
//! what it touched before releasing it, so debt changes, period closes and
//! claims never interleave. Reads share the read lock.
//!
//! A persistence failure after a successful in-memory mutation is returned
//! as [`TallyError::Storage`]; the in-memory pool has already moved on and
//! the process should stop rather than keep serving.

use std::sync::Arc;

use parking_lot::RwLock;
use tally_core::error::TallyError;
use tally_core::traits::Clock;
use tally_core::types::{ClaimReceipt, CurrencyKey, ParticipantId};
use tally_rewards::fee_pool::Collaborators;
use tally_rewards::fee_period::CloseOutcome;
use tally_rewards::FeePool;
use tracing::{error, info};

use crate::config::TallyConfig;
use crate::storage::{RocksStore, Touched};

pub struct FeePoolService {
    pool: RwLock<FeePool>,
    store: Option<RocksStore>,
    clock: Arc<dyn Clock>,
}

impl FeePoolService {
    /// A service without persistence.
    pub fn in_memory(pool: FeePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: RwLock::new(pool),
            store: None,
            clock,
        }
    }

    /// Open the store under `config.data_dir`, restoring the pool if one was
    /// saved and creating a fresh one otherwise.
    pub fn open(
        config: &TallyConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TallyError> {
        let store = RocksStore::open(config.db_path())?;
        let params = config.fee_pool_params();
        let penalties = config.penalty_schedule()?;

        let pool = match store.load(params.clone(), penalties.clone(), collaborators.clone())? {
            Some(pool) => pool,
            None => {
                let pool = FeePool::new(params, penalties, collaborators, clock.now());
                store.save_all(&pool)?;
                info!(period = pool.window().current().id, "initialized new fee pool");
                pool
            }
        };

        Ok(Self {
            pool: RwLock::new(pool),
            store: Some(store),
            clock,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&FeePool) -> R) -> R {
        f(&self.pool.read())
    }

    pub fn record_debt_change(
        &self,
        participant: ParticipantId,
        new_issued_value: u64,
    ) -> Result<u64, TallyError> {
        let mut pool = self.pool.write();
        let from = pool.ledger().len();
        let index = pool.record_debt_change(participant, new_issued_value)?;
        // A rebase re-stamps every remaining holder at the new index.
        let positions = pool
            .ledger()
            .positions()
            .filter(|(_, history)| history.last().is_some_and(|s| s.entry_index == index))
            .map(|(p, _)| *p)
            .collect();
        self.persist(
            &pool,
            &Touched {
                ledger_from: Some(from),
                positions,
                ..Touched::default()
            },
        )?;
        Ok(index)
    }

    pub fn revalue_pool(&self, new_total: u64) -> Result<(), TallyError> {
        let mut pool = self.pool.write();
        pool.revalue_pool(new_total)?;
        self.persist(&pool, &Touched::default())
    }

    pub fn record_fee_paid(&self, amount: u64) -> Result<(), TallyError> {
        let mut pool = self.pool.write();
        pool.record_fee_paid(amount)?;
        self.persist(
            &pool,
            &Touched {
                periods: true,
                ..Touched::default()
            },
        )
    }

    pub fn close_current_fee_period(&self) -> Result<CloseOutcome, TallyError> {
        let now = self.clock.now();
        let mut pool = self.pool.write();
        let outcome = pool.close_current_fee_period(now)?;
        self.persist(
            &pool,
            &Touched {
                periods: true,
                retired_periods: outcome.retired.iter().map(|p| p.id).collect(),
                ..Touched::default()
            },
        )?;
        Ok(outcome)
    }

    pub fn claim(
        &self,
        participant: ParticipantId,
        period_id: u64,
        synth: &CurrencyKey,
    ) -> Result<ClaimReceipt, TallyError> {
        let now = self.clock.now();
        let mut pool = self.pool.write();
        let receipt = pool.claim(participant, period_id, synth, now)?;
        self.persist(&pool, &claim_touched(&receipt))?;
        Ok(receipt)
    }

    pub fn claim_all(
        &self,
        participant: ParticipantId,
        synth: &CurrencyKey,
    ) -> Result<ClaimReceipt, TallyError> {
        let now = self.clock.now();
        let mut pool = self.pool.write();
        let receipt = pool.claim_all(participant, synth, now)?;
        self.persist(&pool, &claim_touched(&receipt))?;
        Ok(receipt)
    }

    pub fn fees_available(
        &self,
        participant: &ParticipantId,
        synth: &CurrencyKey,
    ) -> Result<(u64, u64), TallyError> {
        let now = self.clock.now();
        self.pool.read().fees_available(participant, synth, now)
    }

    pub fn flush(&self) -> Result<(), TallyError> {
        match &self.store {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }

    fn persist(&self, pool: &FeePool, touched: &Touched) -> Result<(), TallyError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save(pool, touched).inspect_err(|e| {
            error!(error = %e, "failed to persist pool mutation");
        })
    }
}

fn claim_touched(receipt: &ClaimReceipt) -> Touched {
    Touched {
        periods: true,
        escrow: receipt
            .escrow_index
            .map(|i| vec![(receipt.participant, i)])
            .unwrap_or_default(),
        ..Touched::default()
    }
}
