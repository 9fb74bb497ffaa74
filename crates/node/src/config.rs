//! Node Configuration
//!
//! Optional JSON file overriding the built-in timings. Every field has a
//! default, so a file only needs the values it changes.

use broadcast_hub::HubConfig;
use chain_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use sync_client::ClientConfig;

/// Node configuration (durations in milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// Per-request timeout on the ledger connection
    pub request_timeout_ms: u64,
    pub relay: RelaySection,
    pub hub: HubSection,
    pub client: ClientSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySection {
    pub reconnect_delay_ms: u64,
    pub block_timeout_ms: u64,
    pub block_check_interval_ms: u64,
    pub health_check_interval_ms: u64,
    pub resync_attempts: u32,
    pub resync_retry_delay_ms: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubSection {
    pub sync_window_ms: u64,
    pub outbox_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSection {
    pub poll_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub block_poll_interval_ms: u64,
    pub receipt_check_interval_ms: u64,
    pub receipt_check_age_ms: u64,
    pub nonce_resync_interval_ms: u64,
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            relay: RelaySection::default(),
            hub: HubSection::default(),
            client: ClientSection::default(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        let d = RelayConfig::default();
        Self {
            reconnect_delay_ms: ms(d.reconnect_delay),
            block_timeout_ms: ms(d.block_timeout),
            block_check_interval_ms: ms(d.block_check_interval),
            health_check_interval_ms: ms(d.health_check_interval),
            resync_attempts: d.resync_attempts,
            resync_retry_delay_ms: ms(d.resync_retry_delay),
            channel_capacity: d.channel_capacity,
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        let d = HubConfig::default();
        Self {
            sync_window_ms: ms(d.sync_window),
            outbox_capacity: d.outbox_capacity,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        let d = ClientConfig::default();
        Self {
            poll_interval_ms: ms(d.poll_interval),
            ping_interval_ms: ms(d.ping_interval),
            reconnect_delay_ms: ms(d.reconnect_delay),
            block_poll_interval_ms: ms(d.block_poll_interval),
            receipt_check_interval_ms: ms(d.receipt_check_interval),
            receipt_check_age_ms: ms(d.receipt_check_age),
            nonce_resync_interval_ms: ms(d.nonce_resync_interval),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn relay_config(&self) -> RelayConfig {
        let r = &self.relay;
        RelayConfig {
            reconnect_delay: Duration::from_millis(r.reconnect_delay_ms),
            block_timeout: Duration::from_millis(r.block_timeout_ms),
            block_check_interval: Duration::from_millis(r.block_check_interval_ms),
            health_check_interval: Duration::from_millis(r.health_check_interval_ms),
            resync_attempts: r.resync_attempts,
            resync_retry_delay: Duration::from_millis(r.resync_retry_delay_ms),
            channel_capacity: r.channel_capacity,
        }
    }

    pub fn hub_config(&self, ws_addr: &str, http_addr: &str) -> HubConfig {
        HubConfig {
            ws_addr: ws_addr.to_string(),
            http_addr: http_addr.to_string(),
            sync_window: Duration::from_millis(self.hub.sync_window_ms),
            outbox_capacity: self.hub.outbox_capacity,
        }
    }

    pub fn client_config(&self, ws_url: &str) -> ClientConfig {
        let c = &self.client;
        ClientConfig {
            ws_url: ws_url.to_string(),
            poll_interval: Duration::from_millis(c.poll_interval_ms),
            ping_interval: Duration::from_millis(c.ping_interval_ms),
            reconnect_delay: Duration::from_millis(c.reconnect_delay_ms),
            block_poll_interval: Duration::from_millis(c.block_poll_interval_ms),
            receipt_check_interval: Duration::from_millis(c.receipt_check_interval_ms),
            receipt_check_age: Duration::from_millis(c.receipt_check_age_ms),
            nonce_resync_interval: Duration::from_millis(c.nonce_resync_interval_ms),
            ..ClientConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_components() {
        let config = NodeConfig::default();
        assert_eq!(config.relay.reconnect_delay_ms, 5_000);
        assert_eq!(config.hub.sync_window_ms, 2_000);
        assert_eq!(config.client.poll_interval_ms, 500);
        assert_eq!(config.relay_config().block_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"hub": {"syncWindowMs": 500}, "client": {"reconnectDelayMs": 1000}}"#).unwrap();
        assert_eq!(config.hub_config("a", "b").sync_window, Duration::from_millis(500));
        assert_eq!(config.hub.outbox_capacity, 256);
        assert_eq!(config.client_config("ws://x").reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.client.ping_interval_ms, 30_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }
}
