//! # FlightSure Node
//!
//! Runs a complete flight-delay insurance node in memory:
//!
//! - **Config**: TOML node configuration with per-field defaults
//! - **Ledger**: airline deposits, flights, policies and passenger credit
//! - **Processor**: turns finalized flight statuses into payouts
//! - **Service**: the `FlightSure` facade wiring ledger and consensus
//! - **Simulator**: a fleet of oracles answering status requests
//! - **Metrics**: Prometheus counters

pub mod config;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod service;
pub mod simulator;

pub use config::{FlightSureConfig, LedgerConfig, LoggingConfig, MetricsConfig, NodeSettings};
pub use ledger::{AirlineAccount, InMemoryLedger, Policy};
pub use metrics::ConsensusMetrics;
pub use processor::FlightStatusProcessor;
pub use service::FlightSure;
pub use simulator::{OracleSimulator, SimulatedOracle, SimulatorStats, StatusPolicy};
