//! Node Configuration

use coproc_consensus::DEFAULT_ROUND_WINDOW_SECS;
use coproc_runtime::{CoordinatorConfig, DEFAULT_SYNC_INTERVAL_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default compute gateway endpoint
pub const DEFAULT_GATEWAY_ENDPOINT: &str = "http://34.46.119.33:3000/run/dummy";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's validator identity
    pub identity: String,
    /// Other validators known at startup
    pub validators: Vec<String>,
    /// HTTP bind address
    pub http_addr: String,
    /// Compute gateway endpoint
    pub gateway_endpoint: String,
    /// Gateway call timeout in seconds
    pub gateway_timeout_secs: u64,
    /// Election round length in seconds
    pub round_window_secs: u64,
    /// Periodic re-election interval in seconds
    pub sync_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: generate_identity(),
            validators: vec!["0x3333".into(), "0x4444".into(), "0x5555".into()],
            http_addr: "0.0.0.0:8080".to_string(),
            gateway_endpoint: DEFAULT_GATEWAY_ENDPOINT.to_string(),
            gateway_timeout_secs: 30,
            round_window_secs: DEFAULT_ROUND_WINDOW_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl NodeConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.is_empty() {
            anyhow::bail!("identity must not be empty");
        }
        if self.round_window_secs == 0 {
            anyhow::bail!("round window must be at least one second");
        }
        if self.gateway_timeout_secs == 0 {
            anyhow::bail!("gateway timeout must be at least one second");
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            local_id: self.identity.clone(),
            validators: self.validators.clone(),
            round_window_secs: self.round_window_secs,
            dispatch_timeout: self.gateway_timeout(),
        }
    }
}

/// Random node identity: `0x` + hex(blake3(random bytes))
pub fn generate_identity() -> String {
    let seed: [u8; 32] = rand::random();
    format!("0x{}", hex::encode(blake3::hash(&seed).as_bytes()))
}
