//! Aggregates transfer results into per-scenario, per-file summaries.

use std::time::Duration;

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::config::{Bandwidth, Config, NetworkScenario, TestFile};
use crate::results::TransferResult;
use crate::stats::Statistics;

/// Metadata about the whole run.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TestInfo {
    pub name: String,
    pub description: String,
    /// ISO-8601 time at which the summary was computed.
    pub timestamp: String,
    /// Iterations per file and scenario.
    pub total_iterations: u32,
    pub files_tested: usize,
    pub scenarios_tested: usize,
    /// Wall-clock runtime of all scenarios in seconds.
    pub total_runtime: f64,
}

/// Aggregated results of one file within one scenario.
///
/// Timing and throughput statistics only cover successful iterations, while failed iterations
/// still count towards the success rate.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FileSummary {
    pub file: String,
    pub size: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    pub total_count: usize,
    pub success_count: usize,
    /// `success_count / total_count`.
    pub success_rate: f64,
    /// Successful downloads whose byte count differed from the declared size.
    pub size_mismatches: usize,
    pub upload_stats: Statistics,
    pub download_stats: Statistics,
    pub upload_throughput_stats: Statistics,
    pub download_throughput_stats: Statistics,
}

impl FileSummary {
    /// Summarizes all results of `file`.
    ///
    /// Returns `None` when there is no successful iteration to compute statistics from.
    pub fn from_results<'a>(
        file: &TestFile,
        results: impl IntoIterator<Item = &'a TransferResult>,
    ) -> Option<Self> {
        let results: Vec<_> = results.into_iter().collect();
        let successful: Vec<_> = results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return None;
        }

        let stats_of = |f: fn(&TransferResult) -> f64| {
            let samples: Vec<f64> = successful.iter().map(|r| f(r)).collect();
            Statistics::from_samples(&samples)
        };

        Some(Self {
            file: file.filename.clone(),
            size: file.size.clone(),
            size_bytes: file.size_bytes,
            total_count: results.len(),
            success_count: successful.len(),
            success_rate: successful.len() as f64 / results.len() as f64,
            size_mismatches: successful.iter().filter(|r| !r.size_match).count(),
            upload_stats: stats_of(|r| r.upload_time)?,
            download_stats: stats_of(|r| r.download_time)?,
            upload_throughput_stats: stats_of(|r| r.upload_throughput)?,
            download_throughput_stats: stats_of(|r| r.download_throughput)?,
        })
    }
}

/// Aggregated results of one scenario.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ScenarioSummary {
    /// Scenario id.
    pub scenario: String,
    pub scenario_name: String,
    pub bandwidth: Bandwidth,
    /// Files with at least one successful iteration, in configuration order.
    pub file_summaries: Vec<FileSummary>,
}

impl ScenarioSummary {
    fn build(scenario: &NetworkScenario, files: &[TestFile], results: &[TransferResult]) -> Self {
        let file_summaries = files
            .iter()
            .filter_map(|file| {
                let group = results
                    .iter()
                    .filter(|r| r.scenario == scenario.id && r.file == file.filename);
                FileSummary::from_results(file, group)
            })
            .collect();

        Self {
            scenario: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            bandwidth: scenario.bandwidth.clone(),
            file_summaries,
        }
    }
}

/// The summary of a complete run, computed once after all scenarios finished.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RunSummary {
    pub test_info: TestInfo,
    pub scenario_summaries: Vec<ScenarioSummary>,
}

impl RunSummary {
    /// Groups `results` by scenario and file and computes their statistics.
    ///
    /// Scenarios appear in configuration order; enabled scenarios without any results (for
    /// instance because shaping failed) are omitted.
    pub fn build(config: &Config, results: &[TransferResult], total_runtime: Duration) -> Self {
        let scenario_summaries = config
            .enabled_scenarios()
            .filter(|scenario| results.iter().any(|r| r.scenario == scenario.id))
            .map(|scenario| ScenarioSummary::build(scenario, &config.test_files, results))
            .collect();

        let test_info = TestInfo {
            name: config.test_configuration.name.clone(),
            description: config.test_configuration.description.clone(),
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            total_iterations: config.test_configuration.iterations,
            files_tested: config.test_files.len(),
            scenarios_tested: config.enabled_scenarios().count(),
            total_runtime: total_runtime.as_secs_f64(),
        };

        Self {
            test_info,
            scenario_summaries,
        }
    }
}
