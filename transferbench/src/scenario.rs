//! Drives network scenarios: shape the network, run all transfers, restore the network.
//!
//! Every enabled scenario goes through the same lifecycle:
//!
//! ```text
//! Idle -> ShapingApplied -> Running -> ShapingRemoved -> Done
//!   \
//!    `-> Skipped (shaping failed, no transfers)
//! ```
//!
//! Scenarios never overlap, and every transfer within a scenario is awaited before the next one
//! starts. The controller owns the [`ResultsStore`] for the duration of a run and persists it
//! after each scenario, so an interrupted run still leaves all completed scenarios on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;

use crate::config::{Config, NetworkScenario, PayloadMode, TestFile, TestTarget};
use crate::error::RunError;
use crate::http::StorageClient;
use crate::payload::PayloadSource;
use crate::results::{ResultsStore, TransferResult};
use crate::shaping::{CommandShaper, Shaper, ShapingError};
use crate::summary::{FileSummary, RunSummary};
use crate::transfer::{TransferExecutor, TransferRequest};

/// Progress is logged after every this many iterations of a file.
const PROGRESS_INTERVAL: u32 = 10;

/// A type-erased [`Shaper`].
pub type BoxedShaper = Box<dyn Shaper>;

/// Lifecycle state of a scenario.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScenarioState {
    Idle,
    ShapingApplied,
    Running,
    ShapingRemoved,
    Done,
    /// Shaping could not be applied and no transfers ran.
    Skipped,
}

impl ScenarioState {
    /// Returns `true` if the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ScenarioState::*;
        matches!(
            (self, next),
            (Idle, ShapingApplied)
                | (Idle, Skipped)
                | (ShapingApplied, Running)
                | (Running, ShapingRemoved)
                | (ShapingRemoved, Done)
        )
    }
}

/// The result of running a single scenario.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub scenario_id: String,
    /// Either [`ScenarioState::Done`] or [`ScenarioState::Skipped`].
    pub state: ScenarioState,
    /// Transfer results in production order, empty if the scenario was skipped.
    pub results: Vec<TransferResult>,
    /// The shaping error that caused the scenario to be skipped.
    pub error: Option<ShapingError>,
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Location of the result file.
    pub results_path: PathBuf,
    /// Ids of scenarios skipped because shaping failed.
    pub skipped: Vec<String>,
}

/// Runs scenarios against the configured upload and download targets.
#[derive(Debug)]
pub struct ScenarioController {
    config: Arc<Config>,
    executor: TransferExecutor,
    shaper: BoxedShaper,
    upload: TestTarget,
    download: TestTarget,
}

impl ScenarioController {
    /// Creates a controller with explicit collaborators.
    pub fn new(
        config: Arc<Config>,
        executor: TransferExecutor,
        shaper: BoxedShaper,
    ) -> Result<Self, RunError> {
        let (upload, download) = config.transfer_targets()?;
        let (upload, download) = (upload.clone(), download.clone());

        Ok(Self {
            config,
            executor,
            shaper,
            upload,
            download,
        })
    }

    /// Creates a controller that talks HTTP to the targets and shapes them with external
    /// commands.
    pub fn from_config(config: Arc<Config>) -> Result<Self, RunError> {
        let client = StorageClient::new().map_err(RunError::Client)?;
        let executor = TransferExecutor::new(client, config.runner.propagation_delay);
        let shaper = CommandShaper::new(
            config.runner.stop_command.clone(),
            config.runner.shaping_settle,
        );

        Self::new(config, executor, Box::new(shaper))
    }

    /// Checks that both targets answer on the storage API.
    pub async fn preflight(&self) -> Result<(), RunError> {
        for target in [&self.upload, &self.download] {
            match self.executor.client().version(target).await {
                Ok(version) => tracing::info!(
                    role = %target.role,
                    container = %target.container,
                    version,
                    "target is reachable"
                ),
                Err(cause) => {
                    return Err(RunError::Prerequisite {
                        role: target.role,
                        container: target.container.clone(),
                        url: target.base_url(),
                        cause,
                    });
                }
            }
        }

        Ok(())
    }

    /// Runs all enabled scenarios in configuration order.
    ///
    /// The result file is rewritten after every scenario. Failing to write it in between is
    /// logged and the run continues; only the final write, which includes the summary, fails
    /// the run.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started_at = Local::now();
        let start = Instant::now();
        let mut store = ResultsStore::new(self.config.clone(), started_at);

        if self.config.runner.preflight {
            self.preflight().await?;
        }
        tracing::info!(path = %store.path().display(), "recording results");

        let total = self.config.enabled_scenarios().count();
        let mut skipped = Vec::new();

        for (index, scenario) in self.config.enabled_scenarios().enumerate() {
            tracing::info!("Scenario {}/{total}: {}", index + 1, scenario.name);

            let outcome = self.run_scenario(scenario).await;
            if outcome.state == ScenarioState::Skipped {
                skipped.push(outcome.scenario_id);
            }
            store.extend(outcome.results);

            if let Err(err) = store.persist(None) {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "failed to persist intermediate results"
                );
            }
        }

        let summary = RunSummary::build(&self.config, store.results(), start.elapsed());
        store.persist(Some(&summary))?;
        tracing::info!(
            path = %store.path().display(),
            results = store.results().len(),
            "run complete"
        );

        Ok(RunReport {
            summary,
            results_path: store.path().to_owned(),
            skipped,
        })
    }

    /// Runs a single scenario through its full lifecycle.
    ///
    /// Shaping is removed from every target on all paths, including when applying it failed
    /// halfway, so the next scenario starts from an unconstrained network.
    pub async fn run_scenario(&self, scenario: &NetworkScenario) -> ScenarioOutcome {
        let mut state = ScenarioState::Idle;
        tracing::info!(
            scenario = %scenario.id,
            bandwidth = %scenario.bandwidth,
            "starting scenario"
        );

        if let Err(error) = self.apply_shaping(scenario).await {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                scenario = %scenario.id,
                "failed to apply bandwidth limit, skipping scenario"
            );
            self.remove_shaping().await;
            transition(scenario, &mut state, ScenarioState::Skipped);

            return ScenarioOutcome {
                scenario_id: scenario.id.clone(),
                state,
                results: Vec::new(),
                error: Some(error),
            };
        }
        transition(scenario, &mut state, ScenarioState::ShapingApplied);

        transition(scenario, &mut state, ScenarioState::Running);
        let results = self.run_transfers(scenario).await;

        self.remove_shaping().await;
        transition(scenario, &mut state, ScenarioState::ShapingRemoved);
        transition(scenario, &mut state, ScenarioState::Done);

        ScenarioOutcome {
            scenario_id: scenario.id.clone(),
            state,
            results,
            error: None,
        }
    }

    async fn apply_shaping(&self, scenario: &NetworkScenario) -> Result<(), ShapingError> {
        for target in &self.config.test_targets {
            self.shaper.apply(target, scenario).await?;
        }
        Ok(())
    }

    async fn remove_shaping(&self) {
        for target in &self.config.test_targets {
            if let Err(err) = self.shaper.remove(target).await {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    container = %target.container,
                    "failed to remove bandwidth limit"
                );
            }
        }
    }

    /// Transfers every file `iterations` times, file by file.
    async fn run_transfers(&self, scenario: &NetworkScenario) -> Vec<TransferResult> {
        let iterations = self.config.test_configuration.iterations;
        let timeout = self.config.test_configuration.request_timeout();
        let mut results = Vec::new();

        for file in &self.config.test_files {
            tracing::info!(file = %file.filename, size = %file.size, "testing file");
            let first = results.len();

            for iteration in 1..=iterations {
                let request = TransferRequest {
                    payload: self.payload(file),
                    expected_size: file.size_bytes,
                    upload: &self.upload,
                    download: &self.download,
                    timeout,
                };
                let outcome = self.executor.execute(request).await;

                if self.config.runner.collect_garbage {
                    self.executor
                        .collect_garbage(&[&self.upload, &self.download])
                        .await;
                }

                results.push(TransferResult::new(iteration, file, scenario, outcome));

                if iteration % PROGRESS_INTERVAL == 0 {
                    let successes = results[first..].iter().filter(|r| r.success).count();
                    tracing::info!(
                        "Progress: {iteration}/{iterations} (Success rate: {successes}/{iteration})"
                    );
                }
            }

            log_file_stats(file, &results[first..]);
        }

        results
    }

    fn payload(&self, file: &TestFile) -> PayloadSource {
        match self.config.runner.payload {
            PayloadMode::File => {
                let path = self.config.test_configuration.test_directory.join(&file.filename);
                PayloadSource::File(path)
            }
            PayloadMode::Random => PayloadSource::random(file.size_bytes),
        }
    }
}

fn transition(scenario: &NetworkScenario, state: &mut ScenarioState, next: ScenarioState) {
    debug_assert!(state.can_transition_to(next), "{state:?} -> {next:?}");
    tracing::debug!(scenario = %scenario.id, from = ?state, to = ?next, "scenario state");
    *state = next;
}

fn log_file_stats(file: &TestFile, results: &[TransferResult]) {
    match FileSummary::from_results(file, results) {
        Some(summary) => tracing::info!(
            file = %file.filename,
            "Success rate: {}/{} ({:.1}%), avg upload: {:.3}s, avg download: {:.3}s",
            summary.success_count,
            summary.total_count,
            summary.success_rate * 100.0,
            summary.upload_stats.mean,
            summary.download_stats.mean,
        ),
        None => tracing::warn!(
            file = %file.filename,
            "Success rate: 0/{}, no successful transfers",
            results.len()
        ),
    }
}
