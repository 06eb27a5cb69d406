//! FlightSure CLI
//!
//! Runs an in-memory FlightSure node through a full insurance round.

use anyhow::Context;
use clap::{Parser, Subcommand};
use flightsure_consensus::{AdmissionOutcome, OracleEvent};
use flightsure_core::constants::ONE_ETHER;
use flightsure_core::types::{Amount, FlightRef, Identity, StatusCode};
use flightsure_node::{FlightSure, FlightSureConfig, LoggingConfig, OracleSimulator, StatusPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "flightsure")]
#[command(version = "0.1.0")]
#[command(about = "FlightSure - decentralized flight-delay insurance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one insurance round against simulated oracles
    Simulate {
        /// Configuration file path (defaults if omitted)
        #[arg(short, long, env = "FLIGHTSURE_CONFIG")]
        config: Option<PathBuf>,

        /// Number of simulated oracles
        #[arg(short, long, default_value = "25")]
        oracles: usize,

        /// Number of airlines, including the genesis airline
        #[arg(short, long, default_value = "5")]
        airlines: usize,

        /// Number of insured passengers
        #[arg(short, long, default_value = "3")]
        passengers: usize,

        /// Status reported by oracles: a status name or "random"
        #[arg(short, long, default_value = "late-airline")]
        status: String,

        /// Entropy seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Print the Prometheus metrics after the round
        #[arg(long)]
        metrics: bool,
    },

    /// Print the default configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List flight status codes
    Codes,

    /// Version information
    Version,
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FlightSureConfig> {
    match path {
        Some(path) => FlightSureConfig::from_file(path),
        None => Ok(FlightSureConfig::default()),
    }
}

fn parse_policy(status: &str, seed: Option<u64>) -> anyhow::Result<StatusPolicy> {
    let code = match status.to_ascii_lowercase().as_str() {
        "random" => return Ok(StatusPolicy::Random { seed: seed.unwrap_or(0) }),
        "unknown" => StatusCode::Unknown,
        "on-time" => StatusCode::OnTime,
        "late-airline" => StatusCode::LateAirline,
        "late-weather" => StatusCode::LateWeather,
        "late-technical" => StatusCode::LateTechnical,
        "late-other" => StatusCode::LateOther,
        other => match other.parse::<u8>() {
            Ok(value) => StatusCode::try_from(value)?,
            Err(_) => anyhow::bail!("unknown status {:?}", other),
        },
    };
    Ok(StatusPolicy::Fixed(code))
}

fn format_ether(amount: Amount) -> String {
    let whole = amount / ONE_ETHER;
    let frac = amount % ONE_ETHER;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:018}", frac);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Fund the genesis airline and vote in `count - 1` more
fn admit_airlines(svc: &FlightSure, count: usize) -> anyhow::Result<Vec<Identity>> {
    let funding = svc.config().ledger.airline_funding();
    let genesis = svc.config().node.genesis_identity();
    svc.fund_airline(&genesis, funding)?;

    let mut members = vec![genesis];
    for i in 1..count {
        let candidate = Identity::from_label(&format!("airline-{}", i));
        for voter in members.clone() {
            if let AdmissionOutcome::Admitted { votes } = svc.register_airline(candidate, voter)? {
                tracing::info!(%candidate, votes, "Airline joined");
                break;
            }
        }
        svc.fund_airline(&candidate, funding)?;
        members.push(candidate);
    }
    Ok(members)
}

async fn simulate(
    config: FlightSureConfig,
    oracles: usize,
    airlines: usize,
    passengers: usize,
    policy: StatusPolicy,
    show_metrics: bool,
) -> anyhow::Result<()> {
    let svc = Arc::new(FlightSure::new(config)?);
    let members = admit_airlines(&svc, airlines.max(1))?;
    let airline = members[0];

    let departure = chrono::Utc::now().timestamp() + 3_600;
    let flight: FlightRef = svc.register_flight(&airline, "ND1309", departure)?;

    let premium = svc.config().ledger.max_insurance();
    let insured: Vec<Identity> = (0..passengers)
        .map(|i| Identity::from_label(&format!("passenger-{}", i)))
        .collect();
    for passenger in &insured {
        svc.buy_insurance(*passenger, &flight, departure, premium)?;
    }

    let simulator = OracleSimulator::register(svc.clone(), oracles, policy)?;
    let mut watcher = svc.subscribe();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(simulator.run(shutdown_rx));

    let opened = svc.fetch_flight_status(airline, flight.clone(), departure)?;
    tracing::info!(index = opened.index, key = %opened.key, "Waiting for oracle consensus");

    let finalized = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match watcher.recv().await {
                Ok(OracleEvent::StatusFinalized { key, status, .. }) if key == opened.key => {
                    break Some(status)
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break None,
            }
        }
    })
    .await
    .unwrap_or(None);

    if finalized.is_none() {
        tracing::warn!(index = opened.index, "No status reached consensus");
    }

    let _ = shutdown_tx.send(()).await;
    let stats = task.await.context("oracle simulator task failed")?;

    let credits: Vec<serde_json::Value> = insured
        .iter()
        .map(|p| {
            serde_json::json!({
                "passenger": p.to_hex(),
                "credit_ether": format_ether(svc.credit_of(p)),
            })
        })
        .collect();

    let summary = serde_json::json!({
        "flight": flight.to_string(),
        "departure": departure,
        "airlines": svc.airline_count(),
        "oracles": svc.oracle_count(),
        "request_index": opened.index,
        "request_key": opened.key.to_hex(),
        "status": finalized.map(|s| s.to_string()),
        "simulator": stats,
        "requests": svc.request_stats(),
        "credits": credits,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if show_metrics {
        println!("{}", svc.metrics().gather_text()?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            oracles,
            airlines,
            passengers,
            status,
            seed,
            metrics,
        } => {
            let mut config = load_config(config.as_ref())?;
            init_logging(cli.verbose, &config.logging);
            if seed.is_some() {
                config.node.entropy_seed = seed;
            }
            let policy = parse_policy(&status, seed)?;
            simulate(config, oracles, airlines, passengers, policy, metrics).await?;
        }

        Commands::Config { output } => {
            let text = FlightSureConfig::default().to_toml()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Default configuration written to {}", path.display());
                }
                None => print!("{}", text),
            }
        }

        Commands::Codes => {
            for code in StatusCode::ALL {
                let note = if code.is_compensable() { "  (compensable)" } else { "" };
                println!("{}{}", code, note);
            }
        }

        Commands::Version => {
            println!("FlightSure v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
