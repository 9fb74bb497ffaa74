//! Chain Event Relay
//!
//! Turns a live ledger subscription into authoritative state:
//! - blocks advance the cursor, expire pending actions and probe receipts
//! - contract events mutate the participant store and become deltas
//! - a stale block stream, a failed health probe or a transport error
//!   tears the session down and schedules a single reconnect

pub mod abi;
pub mod error;
pub mod evm;
pub mod ledger;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod relay;

pub use error::{LedgerError, RelayError};
pub use evm::EvmLedger;
pub use ledger::{fetch_participants, ChainEvent, ChainEventStream, LedgerClient};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockLedger;
pub use relay::ChainRelay;

use std::time::Duration;

/// Relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Maximum silence on the block stream before the session is declared dead
    pub block_timeout: Duration,
    /// How often the block stream silence is checked
    pub block_check_interval: Duration,
    /// Period of the independent `block_number` probe
    pub health_check_interval: Duration,
    /// Resync attempts per connect
    pub resync_attempts: u32,
    /// Delay between resync attempts
    pub resync_retry_delay: Duration,
    /// Capacity of the delta broadcast channel
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            block_timeout: Duration::from_secs(30),
            block_check_interval: Duration::from_secs(15),
            health_check_interval: Duration::from_secs(30),
            resync_attempts: 3,
            resync_retry_delay: Duration::from_secs(1),
            channel_capacity: 1024,
        }
    }
}
