//! Command line entry point of the transfer benchmark.
//!
//! See [`transferbench`] for an overview of what a run does.

fn main() -> anyhow::Result<()> {
    transferbench::cli::execute()
}
