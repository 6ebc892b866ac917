//! Configuration for a Tally fee pool instance.
//!
//! [`TallyConfig`] layers an optional TOML file under `TALLY__`-prefixed
//! environment variables (`TALLY__FEE_POOL__RETAINED_PERIODS=8`). Every
//! section falls back to its defaults, so an empty file is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tally_core::constants::{
    BPS_PRECISION, DEFAULT_COLLATERAL_CURRENCY, DEFAULT_ESCROW_LOCK_SECS,
    DEFAULT_FEE_PERIOD_DURATION_SECS, DEFAULT_MAX_ESCROW_ENTRIES, DEFAULT_PENALTY_BANDS,
    DEFAULT_PRICE_STALENESS_SECS, DEFAULT_RETAINED_PERIODS, DEFAULT_STABLE_CURRENCY,
    MAX_FEE_PERIOD_DURATION_SECS, MAX_RETAINED_PERIODS, MIN_FEE_PERIOD_DURATION_SECS,
    PRECISE_UNIT,
};
use tally_core::error::TallyError;
use tally_core::types::CurrencyKey;
use tally_rewards::{FeePoolParams, PenaltySchedule};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TALLY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "tally_rewards=debug").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
    pub fee_pool: FeePoolConfig,
    pub escrow: EscrowConfig,
    pub oracle: OracleConfig,
    pub penalty: PenaltyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePoolConfig {
    pub period_duration_secs: u64,
    pub retained_periods: usize,
    pub stable_currency: String,
    pub collateral_currency: String,
    pub penalize_fees: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    pub lock_duration_secs: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub staleness_secs: u64,
}

/// Penalty bands over the issuance ratio, expressed in basis points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub bands: Vec<PenaltyBand>,
}

/// A band starting at `from_bps` (2_200 = 22% issuance ratio) and running
/// to the next band's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyBand {
    pub from_bps: u64,
    pub penalty_bps: u64,
}

impl Default for TallyConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            fee_pool: FeePoolConfig::default(),
            escrow: EscrowConfig::default(),
            oracle: OracleConfig::default(),
            penalty: PenaltyConfig::default(),
        }
    }
}

impl Default for FeePoolConfig {
    fn default() -> Self {
        Self {
            period_duration_secs: DEFAULT_FEE_PERIOD_DURATION_SECS,
            retained_periods: DEFAULT_RETAINED_PERIODS,
            stable_currency: DEFAULT_STABLE_CURRENCY.to_string(),
            collateral_currency: DEFAULT_COLLATERAL_CURRENCY.to_string(),
            penalize_fees: false,
        }
    }
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            lock_duration_secs: DEFAULT_ESCROW_LOCK_SECS,
            max_entries: DEFAULT_MAX_ESCROW_ENTRIES,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            staleness_secs: DEFAULT_PRICE_STALENESS_SECS,
        }
    }
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        let bands = DEFAULT_PENALTY_BANDS
            .iter()
            .map(|&(lower, penalty_bps)| PenaltyBand {
                from_bps: (lower * BPS_PRECISION as u128 / PRECISE_UNIT) as u64,
                penalty_bps,
            })
            .collect();
        Self { bands }
    }
}

impl TallyConfig {
    /// Load from an optional file plus the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, TallyError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TallyError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> Result<(), TallyError> {
        let duration = self.fee_pool.period_duration_secs;
        if !(MIN_FEE_PERIOD_DURATION_SECS..=MAX_FEE_PERIOD_DURATION_SECS).contains(&duration) {
            return Err(TallyError::Config(format!(
                "fee_pool.period_duration_secs {duration} outside \
                 {MIN_FEE_PERIOD_DURATION_SECS}..={MAX_FEE_PERIOD_DURATION_SECS}"
            )));
        }
        let retained = self.fee_pool.retained_periods;
        if !(1..=MAX_RETAINED_PERIODS).contains(&retained) {
            return Err(TallyError::Config(format!(
                "fee_pool.retained_periods {retained} outside 1..={MAX_RETAINED_PERIODS}"
            )));
        }
        if self.fee_pool.stable_currency.is_empty() || self.fee_pool.collateral_currency.is_empty()
        {
            return Err(TallyError::Config("currency symbols must not be empty".into()));
        }
        if self.escrow.max_entries == 0 {
            return Err(TallyError::Config("escrow.max_entries must be positive".into()));
        }
        if self.oracle.staleness_secs == 0 {
            return Err(TallyError::Config("oracle.staleness_secs must be positive".into()));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(TallyError::Config(format!(
                "log_format must be \"text\" or \"json\", got {:?}",
                self.log_format
            )));
        }
        self.penalty_schedule()?;
        Ok(())
    }

    /// Path to the RocksDB pool data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("pooldata")
    }

    pub fn fee_pool_params(&self) -> FeePoolParams {
        FeePoolParams {
            fee_period_duration: self.fee_pool.period_duration_secs,
            retained_periods: self.fee_pool.retained_periods,
            escrow_lock_duration: self.escrow.lock_duration_secs,
            max_escrow_entries: self.escrow.max_entries,
            price_staleness: self.oracle.staleness_secs,
            stable_currency: CurrencyKey::new(self.fee_pool.stable_currency.as_str()),
            collateral_currency: CurrencyKey::new(self.fee_pool.collateral_currency.as_str()),
            penalize_fees: self.fee_pool.penalize_fees,
        }
    }

    pub fn penalty_schedule(&self) -> Result<PenaltySchedule, TallyError> {
        let bands: Vec<(u128, u64)> = self
            .penalty
            .bands
            .iter()
            .map(|b| (PRECISE_UNIT * b.from_bps as u128 / BPS_PRECISION as u128, b.penalty_bps))
            .collect();
        Ok(PenaltySchedule::from_bands(&bands)?)
    }
}
