use std::time::Duration;

use reqwest::Client;
use tracing::{debug, error};
use xorlist_config::Endpoint;
use xorlist_contracts::{Identifier, USER_ID_QUERY_PARAM};
use xorlist_kernel::{decode_whitelist_body, whitelist_endpoint};

use crate::error::SyncError;

/// Issues `GET <base>/get_whitelist?user_id=<id>` and decodes the body.
pub struct RemoteFetcher {
    client: Result<Client, String>,
    endpoint: String,
    timeout_ms: u64,
}

impl RemoteFetcher {
    pub fn new(cfg: &Endpoint) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| e.to_string());
        if let Err(e) = &client {
            error!(target: "xorlist::fetch", error = %e, "http client construction failed");
        }
        Self {
            client,
            endpoint: whitelist_endpoint(&cfg.base_url),
            timeout_ms: cfg.timeout_ms,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn fetch(&self, user_id: &str) -> Result<Vec<Identifier>, SyncError> {
        if user_id.trim().is_empty() {
            return Err(SyncError::InvalidUserId);
        }
        let client = self
            .client
            .as_ref()
            .map_err(|e| SyncError::Transport(format!("http client unavailable: {e}")))?;

        let response = client
            .get(&self.endpoint)
            .query(&[(USER_ID_QUERY_PARAM, user_id)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let ids = decode_whitelist_body(&body).map_err(SyncError::Parse)?;
        debug!(target: "xorlist::fetch", user_id, count = ids.len(), "whitelist fetched");
        Ok(ids)
    }

    fn transport_error(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                stage: "whitelist fetch",
                after_ms: self.timeout_ms,
            }
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}
