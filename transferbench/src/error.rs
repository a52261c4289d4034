//! Errors that abort a benchmark run.

use thiserror::Error;

use crate::config::{ConfigError, Role};
use crate::http::ApiError;
use crate::results::StoreError;

/// A failure that ends the run.
///
/// Failures of individual transfers never surface here, they are recorded in the results.
/// Shaping failures only skip the affected scenario.
#[derive(Debug, Error)]
pub enum RunError {
    /// The configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be constructed.
    #[error("failed to initialize HTTP client: {0}")]
    Client(#[source] ApiError),

    /// A target did not answer before the first scenario.
    #[error("{role} target `{container}` is not reachable at {url}: {cause}")]
    Prerequisite {
        role: Role,
        container: String,
        url: String,
        #[source]
        cause: ApiError,
    },

    /// The final result file could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),
}
