//! A benchmark for content-addressed storage nodes under constrained networks.
//!
//! A run uploads a fixed set of files to one storage node and downloads them again from a second
//! node, once for every configured network scenario. Before each scenario, external commands
//! constrain the bandwidth of both nodes; afterwards the constraint is removed again.
//!
//! Every transfer produces a [`TransferResult`](results::TransferResult). Results are written to
//! a JSON file after every scenario and summarized into per-scenario, per-file
//! [`Statistics`](stats::Statistics) at the end of the run.
//!
//! The main entry point is [`ScenarioController`](scenario::ScenarioController):
//!
//! ```no_run
//! # async fn run() -> Result<(), transferbench::error::RunError> {
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use transferbench::config::Config;
//! use transferbench::scenario::ScenarioController;
//!
//! let config = Arc::new(Config::load(Path::new("test-scenarios.json"))?);
//! let report = ScenarioController::from_config(config)?.run().await?;
//! println!("results in {}", report.results_path.display());
//! # Ok(())
//! # }
//! ```
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod payload;
pub mod report;
pub mod results;
pub mod scenario;
pub mod shaping;
pub mod stats;
pub mod summary;
pub mod transfer;
