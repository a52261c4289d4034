//! Contains a client for the HTTP API of the content-addressed storage service.
//!
//! Only the handful of endpoints needed for a transfer cycle are covered: `add` to upload
//! content, `cat` to fetch it by hash, plus `version` and `repo/gc` for preflight checks and
//! cleanup.

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;

use crate::config::TestTarget;

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("transferbench/", env!("CARGO_PKG_VERSION"));

/// Timeout for the auxiliary preflight and cleanup requests.
const AUX_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors talking to the storage API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with a status other than `200 OK`.
    #[error("HTTP {}", .0.as_u16())]
    Status(StatusCode),

    /// Transport errors, timeouts and body decoding errors from the underlying client.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// The service answered `200 OK` with a body we cannot use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for storage API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// The size field of an `add` response.
///
/// Depending on the service version this is reported as a number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportedSize {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawAddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size")]
    size: ReportedSize,
}

/// The response returned from the service after adding content.
#[derive(Clone, Debug, PartialEq)]
pub struct AddResponse {
    /// The content hash under which the upload can be fetched.
    pub hash: String,
    /// The size of the stored content as reported by the service.
    pub size: u64,
}

impl TryFrom<RawAddResponse> for AddResponse {
    type Error = ApiError;

    fn try_from(raw: RawAddResponse) -> ApiResult<Self> {
        let size = match raw.size {
            ReportedSize::Number(size) => size,
            ReportedSize::Text(text) => text.trim().parse().map_err(|_| {
                ApiError::InvalidResponse(format!("size `{text}` is not a number"))
            })?,
        };

        if raw.hash.is_empty() {
            return Err(ApiError::InvalidResponse("empty content hash".into()));
        }

        Ok(Self {
            hash: raw.hash,
            size,
        })
    }
}

/// A thin client for the storage API of any [`TestTarget`].
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: reqwest::Client,
}

impl StorageClient {
    /// Creates a client with the default user agent.
    pub fn new() -> ApiResult<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    fn endpoint(target: &TestTarget, path: &str) -> String {
        format!("{}/api/v0/{path}", target.base_url())
    }

    /// Uploads `payload` as a multipart file and returns the content hash.
    ///
    /// Content is added unpinned, so garbage collection can reclaim it after the transfer.
    ///
    /// The returned future completes once the response body has been fully received.
    pub async fn add(
        &self,
        target: &TestTarget,
        payload: Bytes,
        file_name: String,
        timeout: Duration,
    ) -> ApiResult<AddResponse> {
        let len = payload.len() as u64;
        let part = Part::stream_with_length(payload, len).file_name(file_name);
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(Self::endpoint(target, "add"))
            .query(&[("pin", "false")])
            .multipart(form)
            .timeout(timeout)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ApiError::Status(response.status()));
        }

        let raw: RawAddResponse = response.json().await?;
        raw.try_into()
    }

    /// Starts fetching the content stored under `hash`.
    ///
    /// Returns the response as soon as headers arrive; the caller consumes the body stream.
    pub async fn cat(
        &self,
        target: &TestTarget,
        hash: &str,
        timeout: Duration,
    ) -> ApiResult<reqwest::Response> {
        let response = self
            .client
            .post(Self::endpoint(target, "cat"))
            .query(&[("arg", hash)])
            .timeout(timeout)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ApiError::Status(response.status()));
        }

        Ok(response)
    }

    /// Queries the service version, used to check that a target is reachable.
    pub async fn version(&self, target: &TestTarget) -> ApiResult<String> {
        let response = self
            .client
            .post(Self::endpoint(target, "version"))
            .timeout(AUX_TIMEOUT)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ApiError::Status(response.status()));
        }

        #[derive(Deserialize)]
        struct Version {
            #[serde(rename = "Version", default)]
            version: String,
        }

        let version: Version = response.json().await?;
        Ok(version.version)
    }

    /// Runs garbage collection on a target, waiting for it to complete.
    pub async fn collect_garbage(&self, target: &TestTarget) -> ApiResult<()> {
        let response = self
            .client
            .post(Self::endpoint(target, "repo/gc"))
            .timeout(AUX_TIMEOUT)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ApiError::Status(response.status()));
        }

        // The service streams progress while collecting, so drain it to wait for completion.
        response.bytes().await?;
        Ok(())
    }
}
