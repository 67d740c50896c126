//! HTTP client for fetching remote assets.
//!
//! Wraps reqwest with:
//! - Redirect following with a fixed hop limit
//! - A semaphore capping in-flight requests, independent of worker count
//! - Status-to-error mapping the retry policy can classify

use crate::config::NetworkConfig;
use crate::error::{RehostError, Result};
use reqwest::{redirect, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// HTTP client shared by all asset workers.
pub struct HttpClient {
    client: Client,
    in_flight: Arc<Semaphore>,
    max_connections: usize,
}

impl HttpClient {
    /// Create a client with a custom timeout and in-flight request cap.
    pub fn with_limits(timeout: Duration, max_connections: usize) -> Result<Self> {
        let max_connections = max_connections.max(1);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .redirect(redirect::Policy::limited(NetworkConfig::MAX_REDIRECTS))
            .pool_max_idle_per_host(max_connections)
            .build()
            .map_err(|e| RehostError::Network {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// GET a URL and return the full body.
    ///
    /// Non-success statuses come back as [`RehostError::HttpStatus`];
    /// connection and body-read failures as [`RehostError::Network`].
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|e| RehostError::Other(format!("HTTP permit pool closed: {}", e)))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RehostError::Network {
                url: url.to_string(),
                message: format!("GET failed: {}", e),
                source: Some(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RehostError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| RehostError::Network {
            url: url.to_string(),
            message: format!("Error reading body: {}", e),
            source: Some(e),
        })?;

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }
}
