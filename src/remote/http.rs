// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! reqwest-backed [`NetworkAdapter`].
//!
//! Base URL and auth header are read from the [`AuthBridge`] on every request,
//! so endpoint changes and token refreshes take effect without rebuilding the
//! client. Connectivity is whatever the host last reported through
//! [`HttpRemote::set_online`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{NetworkAdapter, RecordOutcome, RemoteError, RemoteSnapshot};
use crate::auth::AuthBridge;
use crate::record::RecordType;

#[derive(Serialize)]
struct UploadRequest<'a> {
    records: &'a [Value],
}

#[derive(Deserialize)]
struct UploadResponse {
    results: Vec<RecordOutcome>,
}

pub struct HttpRemote {
    client: Client,
    auth: Arc<AuthBridge>,
    online: AtomicBool,
}

impl HttpRemote {
    /// Build a client whose requests give up after `request_timeout`.
    pub fn new(auth: Arc<AuthBridge>, request_timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, auth, online: AtomicBool::new(true) })
    }

    /// Record the host's view of connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.auth.base_url().trim_end_matches('/'), path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth.auth_header().await {
            Some((name, value)) => builder.header(name, value),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorized(builder).await.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status: status.as_u16(), body });
        }
        Ok(response)
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl NetworkAdapter for HttpRemote {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    async fn wake_up(&self) -> Result<(), RemoteError> {
        let url = self.url("health");
        debug!(url = %url, "Waking remote");
        self.send(self.client.get(&url)).await.map(|_| ())
    }

    async fn upload(
        &self,
        record_type: RecordType,
        records: &[Value],
    ) -> Result<Vec<RecordOutcome>, RemoteError> {
        let url = self.url(&format!("sync/{}", record_type));
        let response = self
            .send(self.client.post(&url).json(&UploadRequest { records }))
            .await?;

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(body.results)
    }

    async fn download(&self) -> Result<RemoteSnapshot, RemoteError> {
        let url = self.url("sync/download");
        let response = self.send(self.client.get(&url)).await?;
        response.json().await.map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
