use super::wire::{CoordinatesQuery, CoordinatesResponse, SinkStatus, UploadBatch};
use crate::config::types::SinkConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Sink returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Unexpected response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SinkError::Timeout
        } else if e.is_decode() {
            SinkError::Body(e.to_string())
        } else {
            SinkError::Http(e)
        }
    }
}

/// Remote endpoint that accepts uploads.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one bucket's points. Any 2xx response counts as accepted.
    async fn upload(&self, batch: &UploadBatch) -> Result<(), SinkError>;

    /// Liveness ping.
    async fn heartbeat(&self) -> Result<(), SinkError>;

    async fn status(&self) -> Result<SinkStatus, SinkError>;

    /// Recent history held by the sink.
    async fn coordinates(&self, query: &CoordinatesQuery)
        -> Result<CoordinatesResponse, SinkError>;
}

/// reqwest client for the sink's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        Self::with_timeout(&config.url, config.timeout)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        if !response.status().is_success() {
            return Err(SinkError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn upload(&self, batch: &UploadBatch) -> Result<(), SinkError> {
        let url = format!("{}/dump", self.base_url);
        debug!(url = %url, points = batch.len(), "Posting upload batch");

        let response = self.client.post(&url).json(batch).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), SinkError> {
        let url = format!("{}/heartbeat", self.base_url);
        let response = self.client.post(&url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn status(&self) -> Result<SinkStatus, SinkError> {
        let url = format!("{}/status", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = Self::check(response).await?.json().await?;
        Ok(status)
    }

    async fn coordinates(
        &self,
        query: &CoordinatesQuery,
    ) -> Result<CoordinatesResponse, SinkError> {
        let url = format!("{}/coordinates", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;
        let coordinates = Self::check(response).await?.json().await?;
        Ok(coordinates)
    }
}
