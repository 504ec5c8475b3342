//! Balancer-to-node calls.
//!
//! Every call has a timeout and a bounded number of retries. A node that never
//! answers surfaces as [`StoreError::Unreachable`]; a node that answers with a
//! failed [`State`] is not retried and its state is returned as-is.
//!
//! A timed-out push may still have been applied by the node, so retried pushes
//! always overwrite.

use crate::blocks::{Block, PartialFile};
use crate::config::BalancerConfig;
use crate::error::{Result, StoreError};
use crate::node::protocol::{
    AddBlockRequest, ENDPOINT_ADD_BLOCK, ENDPOINT_FILES, ENDPOINT_SAVE_FILE, SaveFileRequest,
};
use crate::state::State;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn save_file(
        &self,
        host: &str,
        partial: PartialFile,
        force_overwrite: bool,
    ) -> Result<State>;

    async fn add_or_replace_block(
        &self,
        host: &str,
        block: Block,
        allow_overwrite: bool,
    ) -> Result<State>;

    async fn delete_file(&self, host: &str, file_name: &str) -> Result<State>;

    /// `Ok(None)` when the node does not hold the block.
    async fn download_block(
        &self,
        host: &str,
        file_name: &str,
        index: u32,
    ) -> Result<Option<Block>>;
}

pub struct HttpNodeTransport {
    http_client: reqwest::Client,
    attempts: usize,
}

impl HttpNodeTransport {
    pub fn new(config: &BalancerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.node_timeout())
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            attempts: config.node_retry_attempts.max(1),
        })
    }

    /// `build` gets the zero-based attempt number.
    async fn send_with_retry<F>(&self, host: &str, mut build: F) -> Result<reqwest::Response>
    where
        F: FnMut(&reqwest::Client, usize) -> reqwest::RequestBuilder,
    {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            match build(&self.http_client, attempt).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(StoreError::Unreachable {
                            node: host.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    tracing::debug!("Call to {} failed (attempt {}): {}", host, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(StoreError::Unreachable {
            node: host.to_string(),
            reason: "retry attempts exhausted".to_string(),
        })
    }
}

/// Appends `path` and then each of `params` to the node's base url. Parameters
/// are percent-encoded as single segments.
fn node_url(host: &str, path: &str, params: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(host).map_err(|e| StoreError::Http(format!("invalid node url {}: {}", host, e)))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| StoreError::Http(format!("invalid node url {}", host)))?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        segments.extend(params);
    }
    Ok(url)
}

/// Overwrite flag for a push: whatever was requested first, then always set.
fn overwrite_on_attempt(requested: bool, attempt: usize) -> bool {
    requested || attempt > 0
}

/// Nodes answer with a `State` body on success and on refusal alike.
async fn read_state(host: &str, resp: reqwest::Response) -> Result<State> {
    let status = resp.status();
    match resp.json::<State>().await {
        Ok(state) => Ok(state),
        Err(e) if status.is_success() => Err(StoreError::Http(format!(
            "unreadable response from {}: {}",
            host, e
        ))),
        Err(_) => Err(StoreError::Http(format!("{} answered {}", host, status))),
    }
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn save_file(
        &self,
        host: &str,
        partial: PartialFile,
        force_overwrite: bool,
    ) -> Result<State> {
        let url = node_url(host, ENDPOINT_SAVE_FILE, &[])?;
        let mut payload = SaveFileRequest {
            partial_file: partial,
            force_overwrite,
        };
        let resp = self
            .send_with_retry(host, |client, attempt| {
                payload.force_overwrite = overwrite_on_attempt(force_overwrite, attempt);
                client.post(url.clone()).json(&payload)
            })
            .await?;
        read_state(host, resp).await
    }

    async fn add_or_replace_block(
        &self,
        host: &str,
        block: Block,
        allow_overwrite: bool,
    ) -> Result<State> {
        let url = node_url(host, ENDPOINT_ADD_BLOCK, &[])?;
        let mut payload = AddBlockRequest {
            file_name: block.info.file_name,
            index: block.info.index,
            total_block_count: block.info.total_block_count,
            data: block.data,
            allow_overwrite,
        };
        let resp = self
            .send_with_retry(host, |client, attempt| {
                payload.allow_overwrite = overwrite_on_attempt(allow_overwrite, attempt);
                client.post(url.clone()).json(&payload)
            })
            .await?;
        read_state(host, resp).await
    }

    async fn delete_file(&self, host: &str, file_name: &str) -> Result<State> {
        let url = node_url(host, ENDPOINT_FILES, &[file_name])?;
        let resp = self
            .send_with_retry(host, |client, _| client.delete(url.clone()))
            .await?;
        read_state(host, resp).await
    }

    async fn download_block(
        &self,
        host: &str,
        file_name: &str,
        index: u32,
    ) -> Result<Option<Block>> {
        let index = index.to_string();
        let url = node_url(host, ENDPOINT_FILES, &[file_name, "blocks", &index])?;
        let resp = self
            .send_with_retry(host, |client, _| client.get(url.clone()))
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => resp
                .json::<Block>()
                .await
                .map(Some)
                .map_err(|e| StoreError::Http(format!("unreadable block from {}: {}", host, e))),
            status => Err(StoreError::Http(format!("{} answered {}", host, status))),
        }
    }
}
