//! Test utilities for transferbench.
//!
//! This crate provides an in-process mock of the storage API and test logging setup. See the
//! modules for all available utilities.

pub mod server;
pub mod tracing;
