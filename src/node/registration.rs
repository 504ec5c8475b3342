//! Startup handshake with the balancer.
//!
//! Runs once, after the catalog is established. A node with no files still
//! registers, sending a single placeholder entry so the balancer learns it exists
//! and can place blocks on it.

use super::agent::NodeAgent;
use crate::balancer::protocol::{ENDPOINT_REGISTER, RegisterNodeRequest, RegisterNodeResponse};
use crate::balancer::types::FileMeta;
use crate::config::NodeConfig;
use crate::error::{Result, StoreError};

use std::time::Duration;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds the registration payload from the catalog.
pub fn registration_request(agent: &NodeAgent, node_url: &str) -> RegisterNodeRequest {
    let mut files = agent.file_metas();
    if files.is_empty() {
        files.push(FileMeta::sentinel());
    }

    RegisterNodeRequest {
        node_url: node_url.to_string(),
        files,
    }
}

/// Announces this node's holdings, retrying with backoff while the balancer is
/// not reachable yet.
pub async fn register_with_balancer(
    client: &reqwest::Client,
    config: &NodeConfig,
    agent: &NodeAgent,
) -> Result<RegisterNodeResponse> {
    let request = registration_request(agent, &config.advertised_url);
    let url = format!(
        "{}{}",
        config.balancer_url.trim_end_matches('/'),
        ENDPOINT_REGISTER
    );
    let attempts = config.registration_attempts.max(1);
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        let response = client
            .post(url.clone())
            .json(&request)
            .timeout(REGISTRATION_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let ack: RegisterNodeResponse = resp
                    .json()
                    .await
                    .map_err(|e| StoreError::Http(e.to_string()))?;
                tracing::info!(
                    "Registered {} with balancer {} ({} files reported)",
                    request.node_url,
                    config.balancer_url,
                    request.files.len()
                );
                return Ok(ack);
            }
            Ok(resp) => {
                return Err(StoreError::Http(format!(
                    "registration rejected by {}: {}",
                    url,
                    resp.status()
                )));
            }
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(StoreError::Unreachable {
                        node: config.balancer_url.clone(),
                        reason: e.to_string(),
                    });
                }
                tracing::warn!(
                    "Registration attempt {} of {} failed: {}",
                    attempt + 1,
                    attempts,
                    e
                );
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }

    Err(StoreError::Unreachable {
        node: config.balancer_url.clone(),
        reason: "retry attempts exhausted".to_string(),
    })
}
