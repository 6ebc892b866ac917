//! Tally fee pool binary.
//!
//! Replays scripted scenarios against a simulated pool, optionally persisted
//! to RocksDB, and inspects a stored pool's fee periods and escrow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tally_core::clock::ManualClock;
use tally_core::traits::Clock;
use tally_core::types::ParticipantId;
use tally_node_lib::{FeePoolService, RocksStore, Scenario, ScenarioRunner, Simulation, TallyConfig};
use tally_rewards::FeePool;
use tracing::info;

/// Tally debt-share fee pool.
#[derive(Parser, Debug)]
#[command(name = "tally-node", version, about = "Debt-share fee pool simulator and inspector")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// TOML config file. `TALLY__*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the pool store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario file and print one JSON report per step.
    Run(RunArgs),
    /// List the fee periods held by the stored pool.
    Periods,
    /// List a participant's escrow entries in the stored pool.
    Escrow(EscrowArgs),
    /// Print the effective configuration.
    ShowConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario JSON file.
    scenario: PathBuf,

    /// Run against the pool stored under the data directory instead of a
    /// fresh in-memory one.
    #[arg(long)]
    persist: bool,
}

#[derive(Args, Debug)]
struct EscrowArgs {
    /// Participant label, or a 64-character hex id.
    participant: String,
}

impl GlobalArgs {
    /// Load the layered config, then apply command-line overrides.
    fn into_config(self) -> Result<TallyConfig> {
        let mut config =
            TallyConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.global.into_config()?;

    init_logging(&config.log_level, &config.log_format);
    info!("Tally v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => run_scenario(&config, args),
        Commands::Periods => list_periods(&config),
        Commands::Escrow(args) => list_escrow(&config, args),
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_scenario(config: &TallyConfig, args: RunArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("failed to read scenario {}", args.scenario.display()))?;

    let runner = if args.persist {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data_dir: {}", config.data_dir.display())
        })?;
        let sim = Simulation::new();
        let clock = Arc::new(ManualClock::new(scenario.start_time));
        let service = FeePoolService::open(config, sim.collaborators(), clock.clone())
            .context("failed to open pool store")?;
        info!(data_dir = %config.data_dir.display(), now = clock.now(), "running against stored pool");
        ScenarioRunner::new(service, sim, clock)
    } else {
        ScenarioRunner::in_memory(
            config.fee_pool_params(),
            config.penalty_schedule()?,
            scenario.start_time,
        )
    };

    let reports = runner.run(&scenario).context("scenario aborted")?;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }
    println!("{}", serde_json::to_string(&runner.summary())?);
    runner.service().flush()?;
    Ok(())
}

fn list_periods(config: &TallyConfig) -> Result<()> {
    let pool = load_stored(config)?;
    for period in pool.window().periods() {
        let state = pool.window().state(period.id);
        println!(
            "{}",
            json!({
                "id": period.id,
                "state": state,
                "start_time": period.start_time,
                "closed_at": period.closed_at,
                "starting_debt_index": period.starting_debt_index,
                "closing_debt_index": period.closing_debt_index,
                "fees_to_distribute": period.fees_to_distribute,
                "fees_claimed": period.fees_claimed,
                "rewards_to_distribute": period.rewards_to_distribute,
                "rewards_claimed": period.rewards_claimed,
                "claimants": period.claimed_by.len(),
            })
        );
    }
    Ok(())
}

fn list_escrow(config: &TallyConfig, args: EscrowArgs) -> Result<()> {
    let pool = load_stored(config)?;
    let participant = parse_participant(&args.participant);
    let now = tally_core::clock::SystemClock.now();
    let escrow = pool.escrow();
    for (index, entry) in escrow.entries_of(&participant).iter().enumerate() {
        println!(
            "{}",
            json!({
                "index": index,
                "quantity": entry.quantity,
                "created_at": entry.created_at,
                "matures_at": entry.matures_at,
                "mature": entry.is_mature(now),
            })
        );
    }
    println!(
        "{}",
        json!({
            "participant": participant.to_string(),
            "balance": escrow.balance_of(&participant),
            "entries": escrow.entry_count(&participant),
            "next_maturation": escrow.next_maturation(&participant, now),
        })
    );
    Ok(())
}

/// Restore the stored pool for read-only inspection.
fn load_stored(config: &TallyConfig) -> Result<FeePool> {
    let store = RocksStore::open(config.db_path()).context("failed to open pool store")?;
    let pool = store
        .load(
            config.fee_pool_params(),
            config.penalty_schedule()?,
            Simulation::new().collaborators(),
        )
        .context("failed to load pool")?;
    match pool {
        Some(pool) => Ok(pool),
        None => bail!("no pool stored under {}", config.db_path().display()),
    }
}

fn parse_participant(arg: &str) -> ParticipantId {
    match arg.parse::<ParticipantId>() {
        Ok(id) if arg.len() == 64 => id,
        _ => ParticipantId::from_label(arg),
    }
}

/// Initialize tracing with the given level and output format.
///
/// Logs go to stderr so stdout carries only reports. Pass `format = "json"`
/// for structured output.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
