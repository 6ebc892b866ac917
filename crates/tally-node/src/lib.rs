//! # tally-node: Pool service, storage and simulation.
//!
//! Composes the fee pool with its surroundings:
//! - [`service::FeePoolService`]: serialized mutations, persisted per call
//! - [`storage::RocksStore`]: pool state backed by RocksDB
//! - [`config::TallyConfig`]: file and environment configuration
//! - [`sim`]: in-process collaborators for simulation and tests
//! - [`scenario`]: scripted runs over a simulated pool

pub mod config;
pub mod scenario;
pub mod service;
pub mod sim;
pub mod storage;

pub use config::TallyConfig;
pub use scenario::{Scenario, ScenarioRunner};
pub use service::FeePoolService;
pub use sim::Simulation;
pub use storage::RocksStore;
