// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thin HTTP client for a running gateway.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use zerowake_core::{FunctionSpec, RawFunctionSpec, StatusReport};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Cannot reach gateway at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Gateway returned {status}: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Unexpected response from gateway: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct Applied {
    pub generation: u64,
}

pub struct GatewayClient {
    base: String,
    client: Client,
}

impl GatewayClient {
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| ClientError::Unreachable {
                url: base.to_string(),
                source,
            })?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn apply(&self, spec: &FunctionSpec) -> Result<Applied, ClientError> {
        let url = format!("{}/functions/{}", self.base, spec.id);
        let response = self
            .client
            .put(&url)
            .json(&RawFunctionSpec::from(spec.clone()))
            .send()
            .await
            .map_err(|source| ClientError::Unreachable { url, source })?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(ClientError::Decode)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let url = format!("{}/functions/{}", self.base, id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|source| ClientError::Unreachable { url, source })?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusReport, ClientError> {
        let url = format!("{}/status", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Unreachable { url, source })?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(ClientError::Decode)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(ClientError::Rejected { status, message })
    }
}
