//! Configuration for a benchmark run.
//!
//! The run is described by a single structured file (JSON or YAML, picked by the file
//! extension). The file is loaded once at startup, validated, and never mutated afterwards.
//! Configuration sources are merged with the following precedence (highest to lowest):
//!
//! 1. Environment variables (prefixed with `TB__`)
//! 2. The configuration file
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `TB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. Only the snake_case sections ([`Runner`] and [`Logging`]) are meant to
//! be overridden this way:
//!
//! - `TB__RUNNER__PAYLOAD=random` generates random payloads instead of reading test files
//! - `TB__RUNNER__SHAPING_SETTLE=5s` waits longer for bandwidth limits to take effect
//! - `TB__LOGGING__LEVEL=debug` increases log verbosity
//!
//! # Configuration File
//!
//! ```json
//! {
//!   "testConfiguration": {
//!     "name": "Bandwidth Test",
//!     "description": "Upload/download under constrained links",
//!     "iterations": 10,
//!     "timeout": 300,
//!     "outputDirectory": "results",
//!     "testDirectory": "test-data"
//!   },
//!   "testFiles": [{ "filename": "1mb.bin", "size": "1MB", "sizeBytes": 1048576 }],
//!   "networkScenarios": [{
//!     "id": "10mbit",
//!     "name": "10 Mbit/s",
//!     "description": "Constrained uplink",
//!     "enabled": true,
//!     "bandwidth": "10mbit",
//!     "bandwidthCommand": "./scripts/network-chaos/limit-bandwidth.sh"
//!   }],
//!   "testTargets": [
//!     { "role": "upload", "container": "ipfs-org1", "apiPort": 5001 },
//!     { "role": "download", "container": "ipfs-org2", "apiPort": 5002 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Yaml};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "TB__";

/// Literal accepted in place of `null` to denote an unconstrained scenario.
const UNLIMITED: &str = "unlimited";

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file `{}` not found", .0.display())]
    NotFound(PathBuf),

    /// The configuration could not be parsed or merged.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] Box<figment::Error>),

    /// The configuration parsed, but is not usable for a run.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Parse(Box::new(error))
    }
}

/// Immutable parameters of a run.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestConfiguration {
    /// Display name of the run.
    pub name: String,
    /// Free-form description, copied into the summary.
    #[serde(default)]
    pub description: String,
    /// Number of upload/download cycles per file and scenario.
    pub iterations: u32,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Directory receiving the result file.
    pub output_directory: PathBuf,
    /// Directory containing the test files.
    pub test_directory: PathBuf,
}

impl TestConfiguration {
    /// The per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            name: "Bandwidth Test".into(),
            description: String::new(),
            iterations: 1,
            timeout: 300,
            output_directory: PathBuf::from("results"),
            test_directory: PathBuf::from("test-data"),
        }
    }
}

/// A file transferred in every scenario.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestFile {
    /// File name relative to [`TestConfiguration::test_directory`].
    pub filename: String,
    /// Human readable size label, such as `"10MB"`.
    pub size: String,
    /// Exact size in bytes, used to verify downloads.
    pub size_bytes: u64,
}

/// The bandwidth cap of a scenario.
///
/// Serialized as `null` when unlimited, otherwise as the string handed to the shaping command.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum Bandwidth {
    /// No constraint is applied.
    #[default]
    Unlimited,
    /// A limit in the notation of the shaping command, such as `"10mbit"`.
    Limited(String),
}

impl Bandwidth {
    /// Returns `true` for the unlimited sentinel.
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Returns the limit passed to the shaping command.
    pub fn as_limit(&self) -> Option<&str> {
        match self {
            Self::Unlimited => None,
            Self::Limited(limit) => Some(limit),
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("Unlimited"),
            Self::Limited(limit) => f.write_str(limit),
        }
    }
}

impl Serialize for Bandwidth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_limit().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bandwidth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(match value {
            None => Self::Unlimited,
            Some(s) if s.is_empty() || s.eq_ignore_ascii_case(UNLIMITED) => Self::Unlimited,
            Some(s) => Self::Limited(s),
        })
    }
}

/// A named network condition applied to all targets before a batch of transfers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkScenario {
    /// Stable identifier, used as the grouping key in results.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Disabled scenarios are skipped and produce no results.
    pub enabled: bool,
    /// The bandwidth cap, `null` for unlimited.
    #[serde(default)]
    pub bandwidth: Bandwidth,
    /// Executable that applies the cap, invoked as `<command> <container> <bandwidth>`.
    #[serde(default)]
    pub bandwidth_command: String,
}

/// The role a target plays in a transfer.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The node receiving uploads.
    Upload,
    /// The node serving downloads.
    Download,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Upload => f.write_str("upload"),
            Role::Download => f.write_str("download"),
        }
    }
}

/// A storage node addressed by the benchmark.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestTarget {
    pub role: Role,
    /// Container name, handed to the shaping commands.
    pub container: String,
    /// Port of the storage HTTP API.
    pub api_port: u16,
    /// Host name of the storage API, defaults to `localhost`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl TestTarget {
    /// Base URL of the storage API on this target.
    pub fn base_url(&self) -> String {
        let host = self.host.as_deref().unwrap_or("localhost");
        format!("http://{host}:{}", self.api_port)
    }
}

/// Where upload payloads come from.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Read the test file from [`TestConfiguration::test_directory`].
    #[default]
    File,
    /// Generate fresh random bytes of the declared size for every iteration.
    ///
    /// Prevents the content-addressed store from deduplicating repeated uploads.
    Random,
}

/// Operational knobs of the orchestrator.
///
/// Used in: [`Config::runner`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Runner {
    /// Companion command removing a bandwidth limit, invoked as `<command> <container>`.
    ///
    /// # Environment Variable
    ///
    /// `TB__RUNNER__STOP_COMMAND`
    pub stop_command: String,

    /// Wait after applying or removing a limit before trusting the network state.
    ///
    /// Defaults to `2s`.
    #[serde(with = "humantime_serde")]
    pub shaping_settle: Duration,

    /// Wait between upload and download, covering propagation in the distributed store.
    ///
    /// Defaults to `500ms`.
    #[serde(with = "humantime_serde")]
    pub propagation_delay: Duration,

    /// Source of upload payloads.
    pub payload: PayloadMode,

    /// Run garbage collection on both targets after every transfer.
    pub collect_garbage: bool,

    /// Verify that both targets answer before starting the first scenario.
    pub preflight: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            stop_command: "./scripts/network-chaos/stop-chaos.sh".into(),
            shaping_settle: Duration::from_secs(2),
            propagation_delay: Duration::from_millis(500),
            payload: PayloadMode::File,
            collect_garbage: false,
            preflight: true,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Logging configuration.
///
/// Logs are always written to stderr, the summary goes to stdout.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Environment Variable
    ///
    /// `TB__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Environment Variable
    ///
    /// `TB__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The complete, validated configuration of a benchmark run.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub test_configuration: TestConfiguration,
    pub test_files: Vec<TestFile>,
    pub network_scenarios: Vec<NetworkScenario>,
    pub test_targets: Vec<TestTarget>,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Loads and validates the configuration file at `path`.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    /// Environment variables prefixed with `TB__` override values from the file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration file does not exist
    /// - The file or environment variables cannot be parsed
    /// - The result fails [`validate`](Self::validate)
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_owned()));
        }

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            _ => figment.merge(Json::file(path)),
        };
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.test_configuration.iterations == 0 {
            return invalid("`iterations` must be at least 1".into());
        }
        if self.test_configuration.timeout == 0 {
            return invalid("`timeout` must be greater than 0".into());
        }
        if self.test_files.is_empty() {
            return invalid("no test files configured".into());
        }

        let mut filenames = HashSet::new();
        for file in &self.test_files {
            if !filenames.insert(file.filename.as_str()) {
                return invalid(format!("duplicate test file `{}`", file.filename));
            }
        }

        let mut ids = HashSet::new();
        for scenario in &self.network_scenarios {
            if !ids.insert(scenario.id.as_str()) {
                return invalid(format!("duplicate scenario id `{}`", scenario.id));
            }
            if !scenario.bandwidth.is_unlimited() && scenario.bandwidth_command.is_empty() {
                return invalid(format!(
                    "scenario `{}` limits bandwidth but has no `bandwidthCommand`",
                    scenario.id
                ));
            }
        }

        let (upload, download) = self.transfer_targets()?;
        if upload.container == download.container || upload.base_url() == download.base_url()
        {
            return invalid("upload and download must use different targets".into());
        }

        Ok(())
    }

    /// Returns the upload and download target.
    ///
    /// Exactly one target per role must be configured.
    pub fn transfer_targets(&self) -> Result<(&TestTarget, &TestTarget), ConfigError> {
        let upload = self.single_target(Role::Upload)?;
        let download = self.single_target(Role::Download)?;
        Ok((upload, download))
    }

    fn single_target(&self, role: Role) -> Result<&TestTarget, ConfigError> {
        let mut targets = self.test_targets.iter().filter(|t| t.role == role);
        match (targets.next(), targets.next()) {
            (Some(target), None) => Ok(target),
            (None, _) => Err(ConfigError::Invalid(format!("no {role} target configured"))),
            (Some(_), Some(_)) => Err(ConfigError::Invalid(format!(
                "more than one {role} target configured"
            ))),
        }
    }

    /// Iterates the scenarios that will actually run, in configuration order.
    pub fn enabled_scenarios(&self) -> impl Iterator<Item = &NetworkScenario> {
        self.network_scenarios.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"{
        "testConfiguration": {
            "name": "IPFS Bandwidth Test",
            "description": "upload and download under constraints",
            "iterations": 3,
            "timeout": 60,
            "outputDirectory": "out",
            "testDirectory": "data"
        },
        "testFiles": [
            { "filename": "1mb.bin", "size": "1MB", "sizeBytes": 1048576 },
            { "filename": "10mb.bin", "size": "10MB", "sizeBytes": 10485760 }
        ],
        "networkScenarios": [
            {
                "id": "baseline",
                "name": "Baseline",
                "description": "no limits",
                "enabled": true,
                "bandwidth": null,
                "bandwidthCommand": ""
            },
            {
                "id": "10mbit",
                "name": "10 Mbit/s",
                "description": "constrained",
                "enabled": false,
                "bandwidth": "10mbit",
                "bandwidthCommand": "./limit.sh"
            }
        ],
        "testTargets": [
            { "role": "upload", "container": "ipfs-org1", "apiPort": 5001 },
            { "role": "download", "container": "ipfs-org2", "apiPort": 5002, "host": "ipfs-org2" }
        ]
    }"#;

    fn write_config(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut tempfile = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        tempfile.write_all(contents.as_bytes()).unwrap();
        tempfile
    }

    #[test]
    fn loads_json() {
        let tempfile = write_config(SAMPLE, ".json");

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(tempfile.path()).unwrap();

            assert_eq!(config.test_configuration.iterations, 3);
            assert_eq!(
                config.test_configuration.request_timeout(),
                Duration::from_secs(60)
            );
            assert_eq!(config.test_files[1].size_bytes, 10_485_760);
            assert_eq!(config.network_scenarios[0].bandwidth, Bandwidth::Unlimited);
            assert_eq!(
                config.network_scenarios[1].bandwidth,
                Bandwidth::Limited("10mbit".into())
            );
            assert_eq!(config.enabled_scenarios().count(), 1);

            let (upload, download) = config.transfer_targets().unwrap();
            assert_eq!(upload.base_url(), "http://localhost:5001");
            assert_eq!(download.base_url(), "http://ipfs-org2:5002");

            // Sections missing from the file fall back to defaults
            assert_eq!(config.runner, Runner::default());
            assert_eq!(config.logging.level, LevelFilter::INFO);

            Ok(())
        });
    }

    #[test]
    fn loads_yaml() {
        let tempfile = write_config(
            r#"
            testConfiguration:
              name: yaml run
              iterations: 2
              timeout: 10
              outputDirectory: out
              testDirectory: data
            testFiles:
              - { filename: a.bin, size: 1KB, sizeBytes: 1000 }
            networkScenarios:
              - { id: unl, name: Unlimited, enabled: true, bandwidth: unlimited }
            testTargets:
              - { role: upload, container: a, apiPort: 5001 }
              - { role: download, container: b, apiPort: 5002 }
            runner:
              payload: random
              propagation_delay: 1s
            "#,
            ".yaml",
        );

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(tempfile.path()).unwrap();

            assert_eq!(config.test_configuration.name, "yaml run");
            assert!(config.network_scenarios[0].bandwidth.is_unlimited());
            assert_eq!(config.runner.payload, PayloadMode::Random);
            assert_eq!(config.runner.propagation_delay, Duration::from_secs(1));
            assert_eq!(config.runner.shaping_settle, Duration::from_secs(2));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        let tempfile = write_config(SAMPLE, ".json");

        figment::Jail::expect_with(|jail| {
            jail.set_env("TB__RUNNER__SHAPING_SETTLE", "5s");
            jail.set_env("TB__RUNNER__COLLECT_GARBAGE", "true");
            jail.set_env("TB__RUNNER__STOP_COMMAND", "/usr/local/bin/unshape");
            jail.set_env("TB__LOGGING__LEVEL", "debug");
            jail.set_env("TB__LOGGING__FORMAT", "json");

            let config = Config::load(tempfile.path()).unwrap();

            assert_eq!(config.runner.shaping_settle, Duration::from_secs(5));
            assert!(config.runner.collect_garbage);
            assert_eq!(config.runner.stop_command, "/usr/local/bin/unshape");
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            Ok(())
        });
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = Config::load(Path::new("/nonexistent/test-scenarios.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_file_is_fatal() {
        let tempfile = write_config(r#"{ "testConfiguration": { "iterations": "many" } }"#, ".json");

        figment::Jail::expect_with(|_jail| {
            let err = Config::load(tempfile.path()).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "{err}");
            Ok(())
        });
    }

    fn valid_config() -> Config {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn rejects_missing_download_target() {
        let mut config = valid_config();
        config.test_targets.retain(|t| t.role == Role::Upload);

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: no download target configured"
        );
    }

    #[test]
    fn rejects_duplicate_roles() {
        let mut config = valid_config();
        let extra = config.test_targets[0].clone();
        config.test_targets.push(extra);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than one upload target"));
    }

    #[test]
    fn rejects_loopback_transfer() {
        let mut config = valid_config();
        config.test_targets[1] = TestTarget {
            role: Role::Download,
            ..config.test_targets[0].clone()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("different targets"));
    }

    #[test]
    fn rejects_zero_iterations() {
        let mut config = valid_config();
        config.test_configuration.iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_limit_without_command() {
        let mut config = valid_config();
        config.network_scenarios[1].bandwidth_command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bandwidth_serializes_as_nullable_string() {
        assert_eq!(serde_json::to_string(&Bandwidth::Unlimited).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&Bandwidth::Limited("1mbit".into())).unwrap(),
            r#""1mbit""#
        );
        let parsed: Bandwidth = serde_json::from_str(r#""Unlimited""#).unwrap();
        assert!(parsed.is_unlimited());
    }
}
