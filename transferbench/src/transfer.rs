//! Executes a single upload-then-download cycle and measures it.

use std::time::{Duration, Instant};

use futures_util::StreamExt;

use crate::config::TestTarget;
use crate::http::{ApiError, StorageClient};
use crate::payload::PayloadSource;
use crate::stats::throughput;

/// Everything needed to run one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub payload: PayloadSource,
    /// The declared size the download is verified against.
    pub expected_size: u64,
    pub upload: &'a TestTarget,
    pub download: &'a TestTarget,
    /// Timeout applied to each of the two requests.
    pub timeout: Duration,
}

/// The measured outcome of a transfer.
///
/// `success` reflects the download exchange only. When the upload fails, no download is
/// attempted and all download measurements are zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferOutcome {
    pub success: bool,
    pub hash: Option<String>,
    pub upload_time: f64,
    pub download_time: f64,
    pub upload_throughput: f64,
    pub download_throughput: f64,
    pub size_match: bool,
    pub error: Option<String>,
}

impl TransferOutcome {
    fn upload_failed(upload_time: f64, error: impl ToString) -> Self {
        Self {
            upload_time,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Runs upload/download cycles against the storage API.
///
/// The executor performs no retries. Apart from the two requests it only sleeps for the
/// propagation delay between upload and download.
#[derive(Debug, Clone)]
pub struct TransferExecutor {
    client: StorageClient,
    propagation_delay: Duration,
}

impl TransferExecutor {
    pub fn new(client: StorageClient, propagation_delay: Duration) -> Self {
        Self {
            client,
            propagation_delay,
        }
    }

    /// The underlying storage API client.
    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    /// Executes exactly one transfer cycle.
    pub async fn execute(&self, request: TransferRequest<'_>) -> TransferOutcome {
        let body = match request.payload.load().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = &err as &dyn std::error::Error, "failed to load payload");
                return TransferOutcome::upload_failed(0.0, format!("payload: {err}"));
            }
        };
        let file_name = request.payload.file_name();

        let start = Instant::now();
        let added = self
            .client
            .add(request.upload, body, file_name, request.timeout)
            .await;
        let upload_time = start.elapsed().as_secs_f64();

        let added = match added {
            Ok(added) => added,
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    target = %request.upload.container,
                    "upload failed"
                );
                return TransferOutcome::upload_failed(upload_time, err);
            }
        };
        let upload_throughput = throughput(added.size, upload_time);
        tracing::debug!(
            hash = %added.hash,
            upload_time,
            upload_mbps = upload_throughput * 8.0 / 1e6,
            "uploaded"
        );

        tokio::time::sleep(self.propagation_delay).await;

        let start = Instant::now();
        let downloaded = self.download(request.download, &added.hash, request.timeout).await;
        let download_time = start.elapsed().as_secs_f64();

        let mut outcome = TransferOutcome {
            hash: Some(added.hash),
            upload_time,
            upload_throughput,
            download_time,
            ..Default::default()
        };

        match downloaded {
            Ok(received) => {
                outcome.success = true;
                outcome.size_match = received == request.expected_size;
                outcome.download_throughput = throughput(received, download_time);
                if !outcome.size_match {
                    tracing::warn!(
                        expected = request.expected_size,
                        received,
                        "downloaded size does not match"
                    );
                }
                tracing::debug!(
                    download_time,
                    download_mbps = outcome.download_throughput * 8.0 / 1e6,
                    "downloaded"
                );
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    target = %request.download.container,
                    "download failed"
                );
                outcome.error = Some(err.to_string());
            }
        }

        outcome
    }

    /// Fetches `hash` and consumes the full body, returning the number of bytes received.
    async fn download(
        &self,
        target: &TestTarget,
        hash: &str,
        timeout: Duration,
    ) -> Result<u64, ApiError> {
        let response = self.client.cat(target, hash, timeout).await?;

        let mut received = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            received += chunk?.len() as u64;
        }

        Ok(received)
    }

    /// Runs garbage collection on the given targets, logging failures.
    pub async fn collect_garbage(&self, targets: &[&TestTarget]) {
        for target in targets {
            if let Err(err) = self.client.collect_garbage(target).await {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    target = %target.container,
                    "garbage collection failed"
                );
            }
        }
    }
}
