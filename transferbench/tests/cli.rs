use std::fs;
use std::path::Path;
use std::process::Output;

use serde_json::json;
use tokio::process::Command;
use transferbench_test::server::{MockStorage, unused_port};

const TRANSFERBENCH_EXE: &str = env!("CARGO_BIN_EXE_transferbench");

fn write_config(dir: &Path, upload_port: u16, download_port: u16) -> std::path::PathBuf {
    fs::write(dir.join("1kb.bin"), vec![1u8; 1000]).unwrap();

    let config = json!({
        "testConfiguration": {
            "name": "cli",
            "iterations": 1,
            "timeout": 5,
            "outputDirectory": dir.join("results"),
            "testDirectory": dir,
        },
        "testFiles": [{ "filename": "1kb.bin", "size": "1KB", "sizeBytes": 1000 }],
        "networkScenarios": [{
            "id": "baseline",
            "name": "Baseline",
            "enabled": true,
            "bandwidth": null,
        }],
        "testTargets": [
            { "role": "upload", "container": "org1", "apiPort": upload_port },
            { "role": "download", "container": "org2", "apiPort": download_port },
        ],
        "runner": {
            "stop_command": "true",
            "shaping_settle": "0s",
            "propagation_delay": "0s",
        },
        "logging": { "format": "simplified" },
    });

    let path = dir.join("test-scenarios.json");
    fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
    path
}

async fn transferbench(args: &[&str], cwd: &Path) -> Output {
    Command::new(TRANSFERBENCH_EXE)
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .await
        .expect("failed to run transferbench")
}

#[tokio::test]
async fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = transferbench(&["version"], dir.path()).await;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("transferbench "), "{stdout}");
}

#[tokio::test]
async fn test_run_uses_default_config_path() {
    let upload = MockStorage::new().await;
    let download = MockStorage::new().await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), upload.port(), download.port());

    let output = transferbench(&["run"], dir.path()).await;

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Test Summary:"), "{stdout}");
    assert!(stdout.contains("Results saved to"), "{stdout}");

    let results: Vec<_> = fs::read_dir(dir.path().join("results")).unwrap().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(upload.add_calls(), 1);
}

#[tokio::test]
async fn test_check_reports_unreachable_target() {
    let upload = MockStorage::new().await;
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), upload.port(), unused_port());

    let output = transferbench(&["-c", config.to_str().unwrap(), "check"], dir.path()).await;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("download target `org2` is not reachable"), "{stderr}");
    assert_eq!(upload.add_calls(), 0);
}

#[tokio::test]
async fn test_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = transferbench(&["run"], dir.path()).await;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("test-scenarios.json"), "{stderr}");
}
