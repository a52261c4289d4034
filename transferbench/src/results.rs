//! Transfer results and their durable, append-only store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Bandwidth, Config, NetworkScenario, TestFile};
use crate::summary::RunSummary;
use crate::transfer::TransferOutcome;

/// The measurements of one upload-then-download cycle.
///
/// Field names follow the result file schema consumed by the analysis tooling.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TransferResult {
    /// 1-based iteration index within the file.
    pub iteration: u32,
    pub file: String,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    /// Scenario id.
    pub scenario: String,
    pub scenario_name: String,
    pub bandwidth: Bandwidth,
    /// Whether the download completed; upload failures are always unsuccessful.
    pub success: bool,
    /// Content hash returned by the upload, if it succeeded.
    pub ipfs_hash: Option<String>,
    /// Upload duration in seconds.
    pub upload_time: f64,
    /// Download duration in seconds, `0` if no download was attempted.
    pub download_time: f64,
    /// Upload throughput in bytes per second.
    pub upload_throughput: f64,
    /// Download throughput in bytes per second.
    pub download_throughput: f64,
    pub total_time: f64,
    /// Whether the downloaded byte count equals the declared file size.
    pub size_match: bool,
    pub error: Option<String>,
}

impl TransferResult {
    /// Labels the outcome of a transfer with the iteration, file and scenario it belongs to.
    pub fn new(
        iteration: u32,
        file: &TestFile,
        scenario: &NetworkScenario,
        outcome: TransferOutcome,
    ) -> Self {
        Self {
            iteration,
            file: file.filename.clone(),
            file_size: file.size_bytes,
            scenario: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            bandwidth: scenario.bandwidth.clone(),
            success: outcome.success,
            ipfs_hash: outcome.hash,
            upload_time: outcome.upload_time,
            download_time: outcome.download_time,
            upload_throughput: outcome.upload_throughput,
            download_throughput: outcome.download_throughput,
            total_time: outcome.upload_time + outcome.download_time,
            size_match: outcome.size_match,
            error: outcome.error,
        }
    }
}

/// Errors persisting results.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating, writing or renaming the result file failed.
    #[error("failed to write results to `{}`: {cause}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },

    /// Results could not be serialized.
    #[error("failed to serialize results: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The result file document.
#[derive(Debug, Serialize)]
struct ResultDocument<'a> {
    config: &'a Config,
    results: &'a [TransferResult],
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a RunSummary>,
}

/// Accumulates [`TransferResult`]s in production order and persists them to a single file.
///
/// The file name is derived from the run's start time. Every [`persist`](Self::persist)
/// overwrites the same file, so it always reflects the latest known state of the run.
#[derive(Debug)]
pub struct ResultsStore {
    config: Arc<Config>,
    path: PathBuf,
    results: Vec<TransferResult>,
}

impl ResultsStore {
    /// Creates an empty store writing into the configured output directory.
    pub fn new(config: Arc<Config>, started_at: DateTime<Local>) -> Self {
        let file_name = format!("test_results_{}.json", started_at.format("%Y%m%d_%H%M%S"));
        let path = config.test_configuration.output_directory.join(file_name);

        Self {
            config,
            path,
            results: Vec::new(),
        }
    }

    /// Path of the result file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All results in the order they were produced.
    pub fn results(&self) -> &[TransferResult] {
        &self.results
    }

    pub fn append(&mut self, result: TransferResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = TransferResult>) {
        self.results.extend(results);
    }

    /// Serializes the configuration, all results, the current time and an optional summary.
    ///
    /// The document is written to a temporary sibling file first and then renamed over the
    /// result file, so readers and crashes never observe a partially written file.
    pub fn persist(&self, summary: Option<&RunSummary>) -> Result<(), StoreError> {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        let document = ResultDocument {
            config: &self.config,
            results: &self.results,
            timestamp,
            summary,
        };
        let mut contents = serde_json::to_vec_pretty(&document)?;
        contents.push(b'\n');

        let io_err = |cause| StoreError::Io {
            path: self.path.clone(),
            cause,
        };

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let written = fs::File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(&contents)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(cause) = written {
            // a failed write must not leave a partial file next to the results
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(cause));
        }

        tracing::debug!(
            path = %self.path.display(),
            results = self.results.len(),
            "persisted results"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn config(output: &Path) -> Arc<Config> {
        let mut config = Config::default();
        config.test_configuration.output_directory = output.join("nested/results");
        Arc::new(config)
    }

    fn result(iteration: u32) -> TransferResult {
        TransferResult {
            iteration,
            file: "1kb.bin".into(),
            file_size: 1000,
            scenario: "baseline".into(),
            scenario_name: "Baseline".into(),
            bandwidth: Bandwidth::Unlimited,
            success: true,
            ipfs_hash: Some("abc".into()),
            upload_time: 0.5,
            download_time: 0.25,
            upload_throughput: 2000.0,
            download_throughput: 4000.0,
            total_time: 0.75,
            size_match: true,
            error: None,
        }
    }

    fn started_at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn without_timestamp(path: &Path) -> serde_json::Value {
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("timestamp");
        value
    }

    #[test]
    fn file_name_derives_from_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(config(dir.path()), started_at());
        assert!(store.path().ends_with("test_results_20240309_140507.json"));
    }

    #[test]
    fn persist_overwrites_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::new(config(dir.path()), started_at());

        store.append(result(1));
        store.persist(None).unwrap();
        store.extend([result(2), result(3)]);
        store.persist(None).unwrap();

        let results_dir = store.path().parent().unwrap();
        let files: Vec<_> = fs::read_dir(results_dir).unwrap().collect();
        assert_eq!(files.len(), 1);

        let document = without_timestamp(store.path());
        let iterations: Vec<_> = document["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["iteration"].as_u64().unwrap())
            .collect();
        assert_eq!(iterations, [1, 2, 3]);
        assert!(document.get("summary").is_none());
    }

    #[test]
    fn persist_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::new(config(dir.path()), started_at());
        store.append(result(1));

        store.persist(None).unwrap();
        let first = fs::read_to_string(store.path()).unwrap();
        store.persist(None).unwrap();
        let second = fs::read_to_string(store.path()).unwrap();

        let strip = |s: &str| -> String {
            s.lines()
                .filter(|line| !line.trim_start().starts_with("\"timestamp\""))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(&first), strip(&second));
    }

    #[test]
    fn result_schema_field_names() {
        let value = serde_json::to_value(result(1)).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();

        let mut expected = vec![
            "iteration",
            "file",
            "fileSize",
            "scenario",
            "scenario_name",
            "bandwidth",
            "success",
            "ipfs_hash",
            "upload_time",
            "download_time",
            "upload_throughput",
            "download_throughput",
            "total_time",
            "size_match",
            "error",
        ];
        expected.sort();
        assert_eq!(keys, expected);
        assert_eq!(value["bandwidth"], serde_json::Value::Null);
    }

    #[test]
    fn unwritable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let mut config = Config::default();
        config.test_configuration.output_directory = blocker.join("results");
        let store = ResultsStore::new(Arc::new(config), started_at());

        let err = store.persist(None).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn failed_rename_removes_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::new(config(dir.path()), started_at());
        store.append(result(1));

        // a non-empty directory at the target path makes the final rename fail
        fs::create_dir_all(store.path().join("occupied")).unwrap();

        let err = store.persist(None).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!store.path().with_extension("json.tmp").exists());
        assert!(store.path().join("occupied").is_dir());
    }
}
