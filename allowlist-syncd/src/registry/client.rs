use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use shared::protocol::{CATALOG_SERVICE_PATH, META_ENV, META_STAGE};
use shared::types::EndpointRecord;

use crate::config::RegistryConfig;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unreachable after {attempts} attempts")]
    Unavailable {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid catalog response for service '{service}'")]
    Decode {
        service: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Client for the registry's catalog API.
///
/// Transport failures and non-2xx statuses are retried with a linearly
/// growing backoff. A body that does not decode is terminal: a malformed
/// catalog response will not fix itself on retry.
pub struct RegistryClient {
    address: String,
    http: reqwest::Client,
    attempts: u32,
    backoff_unit: Duration,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build registry HTTP client")?;

        Ok(Self {
            address: config.address.trim_end_matches('/').to_string(),
            http,
            attempts: config.attempts.max(1),
            backoff_unit: Duration::from_secs(config.backoff_secs),
        })
    }

    /// Fetch every catalog entry for `service` matching the filter
    /// expression.
    pub async fn fetch_service(
        &self,
        service: &str,
        filter: &str,
    ) -> Result<Vec<EndpointRecord>, RegistryError> {
        let url = format!("{}{}/{}", self.address, CATALOG_SERVICE_PATH, service);

        let mut attempt: u32 = 1;
        let body = loop {
            match self.try_fetch(&url, filter).await {
                Ok(body) => break body,
                Err(err) => {
                    tracing::warn!(
                        "Attempt {}/{}: registry request for '{}' failed: {}",
                        attempt,
                        self.attempts,
                        service,
                        err
                    );
                    if attempt >= self.attempts {
                        return Err(RegistryError::Unavailable {
                            attempts: self.attempts,
                            source: err,
                        });
                    }
                    tokio::time::sleep(self.backoff_unit * attempt).await;
                    attempt += 1;
                }
            }
        };

        let records: Vec<EndpointRecord> =
            serde_json::from_str(&body).map_err(|source| RegistryError::Decode {
                service: service.to_string(),
                source,
            })?;

        tracing::debug!(
            "Fetched {} record(s) for '{}' (filter: {})",
            records.len(),
            service,
            filter
        );

        Ok(records)
    }

    async fn try_fetch(&self, url: &str, filter: &str) -> Result<String, reqwest::Error> {
        let resp = self
            .http
            .get(url)
            .query(&[("filter", filter)])
            .send()
            .await?
            .error_for_status()?;

        resp.text().await
    }
}

/// Build a catalog filter expression selecting nodes tagged with the given
/// environment and stage.
pub fn node_meta_filter(env: &str, stage: &str) -> String {
    format!(
        "NodeMeta.{}=={} and NodeMeta.{}=={}",
        META_ENV, env, META_STAGE, stage
    )
}
