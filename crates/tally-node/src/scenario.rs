//! Scripted pool runs.
//!
//! A [`Scenario`] is a JSON list of steps replayed against a pool wired to
//! the [`Simulation`] collaborators and a [`ManualClock`]. Amounts are base
//! units and participants are labels hashed into ids.
//!
//! ```json
//! {
//!   "start_time": 1700000000,
//!   "steps": [
//!     { "action": "price", "currency": "SNX", "price": 100000000 },
//!     { "action": "supply", "per_period": 100000000000 },
//!     { "action": "issue", "participant": "alice", "debt": 5000000000, "collateral": 50000000000 },
//!     { "action": "fee", "amount": 1000000000 },
//!     { "action": "advance", "secs": 604800 },
//!     { "action": "close" },
//!     { "action": "claim", "participant": "alice", "period": 1 }
//!   ]
//! }
//! ```
//!
//! A step the pool rejects is reported and the run continues. Storage
//! failures end the run.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_core::clock::ManualClock;
use tally_core::error::TallyError;
use tally_core::traits::Clock;
use tally_core::types::{ClaimReceipt, CurrencyKey, ParticipantId};
use tally_rewards::{FeePool, FeePoolParams, PenaltySchedule};
use tracing::{info, warn};

use crate::service::FeePoolService;
use crate::sim::Simulation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unix seconds the simulated clock starts at.
    #[serde(default)]
    pub start_time: u64,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Set a participant's issued debt and collateral, then record the change.
    Issue {
        participant: String,
        debt: u64,
        collateral: u64,
    },
    SetCollateral {
        participant: String,
        collateral: u64,
    },
    /// Move the clock forward.
    Advance {
        secs: u64,
        /// Re-stamp every oracle price at the new time.
        #[serde(default = "default_true")]
        refresh_prices: bool,
    },
    Price {
        currency: String,
        price: u64,
    },
    /// Set what the supply schedule releases at each close.
    Supply {
        per_period: u64,
    },
    Fee {
        amount: u64,
    },
    Close,
    Claim {
        participant: String,
        period: u64,
        /// Defaults to the stable currency.
        #[serde(default)]
        synth: Option<String>,
    },
    ClaimAll {
        participant: String,
        #[serde(default)]
        synth: Option<String>,
    },
    Revalue {
        total: u64,
    },
}

fn default_true() -> bool {
    true
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Indexed {
        index: u64,
    },
    Closed {
        closed: u64,
        opened: u64,
        retired: Option<u64>,
        rolled_fees: u64,
        rolled_rewards: u64,
    },
    Claimed {
        receipt: ClaimReceipt,
    },
    Rejected {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: usize,
    /// Simulated time after the step.
    pub at: u64,
    pub outcome: Outcome,
}

/// Pool totals at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub current_period: u64,
    pub ledger_entries: u64,
    pub total_debt: u64,
    pub fees_available: u64,
    pub rewards_available: u64,
    pub total_escrowed: u64,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, TallyError> {
        serde_json::from_str(json).map_err(|e| TallyError::Config(format!("scenario: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, TallyError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| TallyError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}

pub struct ScenarioRunner {
    service: FeePoolService,
    sim: Simulation,
    clock: Arc<ManualClock>,
}

impl ScenarioRunner {
    /// Run against an existing service. `service` must read time from `clock`
    /// and pay through `sim`.
    pub fn new(service: FeePoolService, sim: Simulation, clock: Arc<ManualClock>) -> Self {
        Self {
            service,
            sim,
            clock,
        }
    }

    /// A fresh unpersisted pool opening at `start_time`.
    pub fn in_memory(params: FeePoolParams, penalties: PenaltySchedule, start_time: u64) -> Self {
        let sim = Simulation::new();
        let clock = Arc::new(ManualClock::new(start_time));
        let pool = FeePool::new(params, penalties, sim.collaborators(), start_time);
        let service = FeePoolService::in_memory(pool, clock.clone());
        Self::new(service, sim, clock)
    }

    pub fn service(&self) -> &FeePoolService {
        &self.service
    }

    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    pub fn run(&self, scenario: &Scenario) -> Result<Vec<StepReport>, TallyError> {
        let mut reports = Vec::with_capacity(scenario.steps.len());
        for (i, step) in scenario.steps.iter().enumerate() {
            let outcome = match self.apply(step) {
                Ok(outcome) => outcome,
                Err(e @ TallyError::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!(step = i, error = %e, "step rejected");
                    Outcome::Rejected {
                        error: e.to_string(),
                    }
                }
            };
            reports.push(StepReport {
                step: i,
                at: self.clock.now(),
                outcome,
            });
        }
        info!(steps = reports.len(), "scenario finished");
        Ok(reports)
    }

    pub fn apply(&self, step: &Step) -> Result<Outcome, TallyError> {
        match step {
            Step::Issue {
                participant,
                debt,
                collateral,
            } => {
                let id = ParticipantId::from_label(participant);
                self.sim.issuance.set(id, *debt, *collateral);
                let index = self.service.record_debt_change(id, *debt)?;
                Ok(Outcome::Indexed { index })
            }
            Step::SetCollateral {
                participant,
                collateral,
            } => {
                self.sim
                    .issuance
                    .set_collateral(ParticipantId::from_label(participant), *collateral);
                Ok(Outcome::Done)
            }
            Step::Advance {
                secs,
                refresh_prices,
            } => {
                let now = self.clock.advance(*secs);
                if *refresh_prices {
                    self.sim.oracle.touch_all(now);
                }
                Ok(Outcome::Done)
            }
            Step::Price { currency, price } => {
                self.sim
                    .oracle
                    .set_price(&CurrencyKey::new(currency.as_str()), *price, self.clock.now());
                Ok(Outcome::Done)
            }
            Step::Supply { per_period } => {
                self.sim.supply.set(*per_period);
                Ok(Outcome::Done)
            }
            Step::Fee { amount } => {
                self.service.record_fee_paid(*amount)?;
                Ok(Outcome::Done)
            }
            Step::Close => {
                let outcome = self.service.close_current_fee_period()?;
                Ok(Outcome::Closed {
                    closed: outcome.closed_id,
                    opened: outcome.opened_id,
                    retired: outcome.retired.map(|p| p.id),
                    rolled_fees: outcome.rolled_fees,
                    rolled_rewards: outcome.rolled_rewards,
                })
            }
            Step::Claim {
                participant,
                period,
                synth,
            } => {
                let synth = self.synth_or_stable(synth.as_deref());
                let receipt =
                    self.service
                        .claim(ParticipantId::from_label(participant), *period, &synth)?;
                Ok(Outcome::Claimed { receipt })
            }
            Step::ClaimAll { participant, synth } => {
                let synth = self.synth_or_stable(synth.as_deref());
                let receipt = self
                    .service
                    .claim_all(ParticipantId::from_label(participant), &synth)?;
                Ok(Outcome::Claimed { receipt })
            }
            Step::Revalue { total } => {
                self.service.revalue_pool(*total)?;
                Ok(Outcome::Done)
            }
        }
    }

    pub fn summary(&self) -> PoolSummary {
        self.service.read(|pool| PoolSummary {
            current_period: pool.window().current().id,
            ledger_entries: pool.ledger().len(),
            total_debt: pool.ledger().total_debt(),
            fees_available: pool.total_fees_available(),
            rewards_available: pool.total_rewards_available(),
            total_escrowed: pool.escrow().total_escrowed(),
        })
    }

    fn synth_or_stable(&self, synth: Option<&str>) -> CurrencyKey {
        match synth {
            Some(symbol) => CurrencyKey::new(symbol),
            None => self.service.read(|pool| pool.params().stable_currency.clone()),
        }
    }
}
