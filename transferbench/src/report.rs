//! Renders a [`RunSummary`] as human readable console output.

use std::io::{self, Write};
use std::time::Duration;

use bytesize::ByteSize;
use yansi::Paint;

use crate::stats::{Statistics, throughput};
use crate::summary::{FileSummary, RunSummary, ScenarioSummary};

/// Writes the summary grouped by scenario, then by file.
pub fn render(summary: &RunSummary, out: &mut impl Write) -> io::Result<()> {
    let info = &summary.test_info;

    writeln!(out, "{} {}", "## Test Summary:".bold(), info.name.bold().blue())?;
    if !info.description.is_empty() {
        writeln!(out, "  {}", info.description)?;
    }
    writeln!(
        out,
        "  {} files, {} scenarios, {} iterations; runtime: {:.2?}",
        info.files_tested.bold(),
        info.scenarios_tested.bold(),
        info.total_iterations.bold(),
        secs(info.total_runtime),
    )?;

    if summary.scenario_summaries.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "No scenario produced any results".bold().red())?;
    }

    for scenario in &summary.scenario_summaries {
        writeln!(out)?;
        render_scenario(scenario, out)?;
    }

    Ok(())
}

fn render_scenario(scenario: &ScenarioSummary, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "{} {} ({})",
        "## Scenario:".bold(),
        scenario.scenario_name.bold().blue(),
        scenario.scenario
    )?;
    writeln!(out, "  Bandwidth: {}", scenario.bandwidth.bold())?;

    if scenario.file_summaries.is_empty() {
        writeln!(out, "  {}", "no successful transfers".bold().red())?;
    }

    for file in &scenario.file_summaries {
        render_file(file, out)?;
    }

    Ok(())
}

fn render_file(file: &FileSummary, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "{} ({})",
        file.file.bold().green(),
        ByteSize::b(file.size_bytes)
    )?;

    write!(
        out,
        "  success: {:.1}% ({}/{})",
        (file.success_rate * 100.0).bold(),
        file.success_count,
        file.total_count
    )?;
    if file.success_count < file.total_count {
        let failures = file.total_count - file.success_count;
        write!(out, ", {}", format!("{failures} FAILURES").bold().red())?;
    }
    if file.size_mismatches > 0 {
        let mismatches = file.size_mismatches;
        write!(out, ", {}", format!("{mismatches} SIZE MISMATCHES").bold().red())?;
    }
    writeln!(out)?;

    render_timing("upload", &file.upload_stats, out)?;
    render_timing("download", &file.download_stats, out)?;

    writeln!(
        out,
        "  throughput: \u{2191} {:.2} Mbit/s, \u{2193} {:.2} Mbit/s",
        mbit(file.size_bytes, file.upload_stats.mean).bold(),
        mbit(file.size_bytes, file.download_stats.mean).bold(),
    )
}

fn render_timing(label: &str, stats: &Statistics, out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "  {label}: avg {:.2?} \u{b1} {:.2?}; p95: {:.2?}; p99: {:.2?}",
        secs(stats.mean).bold(),
        secs(stats.stddev),
        secs(stats.p95),
        secs(stats.p99),
    )
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Effective throughput of the declared file size over the mean duration, in Mbit/s.
fn mbit(size_bytes: u64, mean_seconds: f64) -> f64 {
    throughput(size_bytes, mean_seconds) * 8.0 / 1e6
}
