//! HTTP client mapping every failure onto [`BpmError::NetworkError`].

use anyhow::{Context, Result};
use log::debug;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::time::Duration;

use crate::error::BpmError;

/// Default bound on a whole request, body included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = "bpm-cli";

/// Result of a streamed download.
#[derive(Debug)]
pub struct Download {
    /// Number of body bytes written.
    pub bytes: u64,
    /// Response headers, for metadata such as a content digest.
    pub headers: HeaderMap,
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Performs a GET request with query parameters and deserializes the JSON response.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!("GET JSON from {} with query {:?}...", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;
        let response = check_status(url, response)?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// Streams the body of `url` into the writer returned by `create_writer`.
    ///
    /// The writer is only created once the response status is known to be
    /// successful, so a failed request never leaves a file behind.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F) -> Result<Download>
    where
        W: Write,
        F: FnOnce() -> Result<W>,
    {
        debug!("Downloading file from {}...", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;
        let mut response = check_status(url, response)?;
        let headers = response.headers().clone();

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(url, e))?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer.flush().context("Failed to flush downloaded file")?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(Download {
            bytes: downloaded_bytes,
            headers,
        })
    }

    /// POSTs `payload` as JSON with extra `headers`; returns the success status.
    #[tracing::instrument(skip(self, payload, headers))]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        headers: HeaderMap,
    ) -> Result<StatusCode> {
        debug!("POST JSON to {}...", url);

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;
        let response = check_status(url, response)?;
        Ok(response.status())
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> anyhow::Error {
    let message = if error.is_timeout() {
        format!("request to {} timed out", url)
    } else {
        format!("request to {} failed: {}", url, error)
    };
    BpmError::NetworkError {
        status: error.status().map(|s| s.as_u16()),
        message,
    }
    .into()
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(BpmError::NetworkError {
        status: Some(status.as_u16()),
        message: format!("{} returned {}", url, status),
    }
    .into())
}
