use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::scenario::ScenarioController;
use crate::{observability, report};

/// Configuration file used when `-c` is not given.
const DEFAULT_CONFIG: &str = "test-scenarios.json";

/// Upload/download benchmark for content-addressed storage nodes under shaped networks.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the JSON or YAML configuration file (default: test-scenarios.json)
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Check(CheckCommand),
    Version(VersionCommand),
}

/// run all enabled scenarios and write the result file
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// validate the configuration and check that both targets are reachable
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "check")]
struct CheckCommand {}

/// print the transferbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("transferbench {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = args.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = Arc::new(Config::load(&path)?);

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    // Transfers run strictly one after another, a single thread is all the run needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let controller = ScenarioController::from_config(config.clone())?;

        match args.command {
            Command::Run(RunCommand {}) => {
                let report = controller.run().await?;

                let mut stdout = std::io::stdout().lock();
                writeln!(stdout)?;
                report::render(&report.summary, &mut stdout)?;
                writeln!(stdout)?;
                writeln!(stdout, "Results saved to {}", report.results_path.display())?;

                if !report.skipped.is_empty() {
                    tracing::warn!(skipped = ?report.skipped, "scenarios skipped");
                }
            }
            Command::Check(CheckCommand {}) => {
                controller.preflight().await?;
                println!(
                    "{}: {} files, {} enabled scenarios, targets reachable",
                    path.display(),
                    config.test_files.len(),
                    config.enabled_scenarios().count()
                );
            }
            Command::Version(VersionCommand {}) => unreachable!(),
        }

        Ok::<_, anyhow::Error>(())
    })
}
