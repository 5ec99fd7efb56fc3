//! HTTP client for the external challenge-solving service.
//!
//! The service is a black box: it accepts the renewal page's embedded
//! challenge image (as its data-URI payload) in a POST body and answers with
//! the decoded text, expected to be a short numeric string. No retry or
//! rate-limit contract is assumed.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;

/// Bound on the solver round trip.
pub const SOLVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the challenge-solving endpoint.
#[derive(Clone)]
pub struct SolverClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SolverClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SOLVER_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Submit a challenge image and return the decoded text.
    ///
    /// The payload is forwarded verbatim (the service accepts the data URI
    /// itself). Empty responses are treated as failures.
    pub async fn solve(&self, image_data_uri: &str) -> Result<String> {
        match decode_data_uri(image_data_uri) {
            Ok(bytes) => tracing::debug!(bytes = bytes.len(), "submitting challenge image"),
            Err(e) => tracing::warn!(error = %e, "challenge payload is not a well-formed data URI"),
        }

        let response = self
            .client
            .post(&self.endpoint)
            .body(image_data_uri.to_string())
            .send()
            .await
            .context("challenge solver is unreachable")?;

        let status = response.status();
        if !status.is_success() {
            bail!("challenge solver returned {status}");
        }

        let code = response
            .text()
            .await
            .context("failed to read solver response")?
            .trim()
            .to_string();
        if code.is_empty() {
            bail!("challenge solver returned an empty response");
        }
        Ok(code)
    }
}

/// Decode the base64 payload of a data URI into raw bytes.
pub fn decode_data_uri(data_uri: &str) -> Result<Vec<u8>> {
    let (_, payload) = data_uri
        .split_once("base64,")
        .context("payload is not a base64 data URI")?;
    BASE64
        .decode(payload.trim())
        .context("data URI payload is not valid base64")
}
