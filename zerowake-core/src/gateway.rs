// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Admission Gateway.
//!
//! `invoke` resolves a function to a ready endpoint through the scale
//! controller and forwards the call. The forward has its own timeout,
//! independent of the scale deadline. A transport failure is reported as
//! `UpstreamError` and never triggers another scale-up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HOST};
use reqwest::{Client, Method, StatusCode};
use tokio::time::Instant;

use crate::error::InvokeError;
use crate::lock::ReadyEndpoint;
use crate::scale::ScaleController;
use crate::store::DesiredStateStore;
use crate::types::FunctionId;

/// Inbound call, with the path already made relative to the function.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub method: Method,
    /// Always starts with `/`.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Invocation {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            method,
            path,
            query: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Target URL on `address`.
    pub fn target_url(&self, address: &str) -> String {
        let base = address.trim_end_matches('/');
        match &self.query {
            Some(query) if !query.is_empty() => format!("{}{}?{}", base, self.path, query),
            _ => format!("{}{}", base, self.path),
        }
    }
}

/// Response returned by the workload, passed through unchanged.
#[derive(Debug, Clone)]
pub struct InvocationResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Delivers an invocation to a ready endpoint.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        endpoint: &ReadyEndpoint,
        invocation: Invocation,
    ) -> Result<InvocationResponse, InvokeError>;
}

/// HTTP forwarder backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
}

impl HttpForwarder {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        endpoint: &ReadyEndpoint,
        invocation: Invocation,
    ) -> Result<InvocationResponse, InvokeError> {
        let url = invocation.target_url(&endpoint.address);
        let upstream = |e: reqwest::Error| InvokeError::UpstreamError {
            function_id: endpoint.function_id.clone(),
            reason: e.to_string(),
        };

        let mut request = self
            .client
            .request(invocation.method, &url)
            .body(invocation.body);
        for (name, value) in &invocation.headers {
            if name != HOST {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(upstream)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(upstream)?;

        Ok(InvocationResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Request admission in front of scale-to-zero functions.
pub struct AdmissionGateway {
    store: Arc<DesiredStateStore>,
    scale: Arc<ScaleController>,
    forwarder: Arc<dyn Forwarder>,
}

impl AdmissionGateway {
    pub fn new(
        store: Arc<DesiredStateStore>,
        scale: Arc<ScaleController>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            store,
            scale,
            forwarder,
        }
    }

    /// Invoke a function, scaling it up first if it has no ready replica.
    pub async fn invoke(
        &self,
        id: &FunctionId,
        invocation: Invocation,
    ) -> Result<InvocationResponse, InvokeError> {
        if !self.store.contains(id) {
            return Err(InvokeError::FunctionNotFound(id.clone()));
        }

        // Held across the scale wait too, so an idle timer never fires under us.
        let _in_flight = self.scale.begin_request(id);
        let endpoint = self.scale.ensure_scaled(id).await?;

        let started = Instant::now();
        let result = self.forwarder.forward(&endpoint, invocation).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => tracing::debug!(
                function_id = %id,
                status = response.status.as_u16(),
                elapsed_ms,
                "Forwarded invocation"
            ),
            Err(e) => tracing::warn!(
                function_id = %id,
                error = %e,
                elapsed_ms,
                "Forward failed"
            ),
        }
        result
    }
}
