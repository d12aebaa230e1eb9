//! # Node Configuration & Protocol Constants
//!
//! Every tunable of a ledger node lives in [`NodeConfig`]; every protocol
//! constant lives here as a named value. Changing a constant below changes
//! what counts as a valid chain, so treat this file as consensus-critical.

use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Constants
// ---------------------------------------------------------------------------

/// Timestamp baked into the genesis block. Fixed so that every node derives
/// the identical genesis hash without coordination.
pub const GENESIS_TIMESTAMP: &str = "2024-01-01T00:00:00.000000";

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Default proof-of-work difficulty: number of leading zero hex characters
/// a block hash must carry.
pub const DEFAULT_DIFFICULTY: usize = 2;

/// The miner re-checks its cancellation flag every this many nonce attempts.
pub const CANCEL_CHECK_STRIDE: u64 = 10_000;

/// How deep recursive peer discovery walks from a bootstrap node.
pub const DISCOVERY_DEPTH: usize = 2;

/// Timestamp format for block seals and server-side bookkeeping:
/// ISO-8601 with microseconds, UTC, no offset suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Returns the current UTC time in the ledger's wire format.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Complete configuration of a single ledger node.
///
/// Constructed by the binary from CLI flags and environment variables;
/// library consumers (tests) build it directly. `Default` yields a config
/// suitable for a standalone in-process node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// HTTP port this node listens on and advertises to peers.
    pub port: u16,

    /// Hostname used when advertising this node's URL to peers.
    pub host: String,

    /// Proof-of-work difficulty (leading zero hex characters).
    pub difficulty: usize,

    /// Path of the sled database directory.
    pub db_path: PathBuf,

    /// Directory holding `<actor>_private.pem` / `<actor>_public.pem` files.
    pub keys_dir: PathBuf,

    /// Peer URLs contacted on startup to join the network.
    pub bootstrap: Vec<String>,

    /// When true, unsigned transactions are rejected on every admission path.
    pub require_signatures: bool,

    /// Maximum transactions sealed into a single block.
    pub max_block_txs: usize,

    /// Mempool size at which a mining attempt is triggered automatically.
    pub mine_threshold: usize,

    /// Hard cap on mempool size. Beyond this, the oldest unsigned entries
    /// are evicted; signed valid entries are never silently dropped.
    pub mempool_cap: usize,

    /// How long a pending transaction may sit in the mempool before expiry.
    pub tx_ttl: Duration,

    /// Interval between longest-chain resolution rounds.
    pub sync_interval: Duration,

    /// Interval between peer health probes.
    pub health_interval: Duration,

    /// Interval between auto-mining checks when the mempool is non-empty.
    pub automine_interval: Duration,

    /// Interval between full local chain re-validations.
    pub revalidate_interval: Duration,

    /// Per-call timeout for outbound peer HTTP requests.
    pub peer_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "localhost".to_string(),
            difficulty: DEFAULT_DIFFICULTY,
            db_path: PathBuf::from("blockchain_5000.db"),
            keys_dir: PathBuf::from("keys"),
            bootstrap: Vec::new(),
            require_signatures: true,
            max_block_txs: 100,
            mine_threshold: 10,
            mempool_cap: 1000,
            tx_ttl: Duration::from_secs(3600),
            sync_interval: Duration::from_secs(10),
            health_interval: Duration::from_secs(30),
            automine_interval: Duration::from_secs(60),
            revalidate_interval: Duration::from_secs(30),
            peer_timeout: Duration::from_secs(10),
        }
    }
}

impl NodeConfig {
    /// The URL this node advertises to peers.
    pub fn self_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_url_combines_host_and_port() {
        let config = NodeConfig {
            host: "node-1".to_string(),
            port: 5001,
            ..NodeConfig::default()
        };
        assert_eq!(config.self_url(), "http://node-1:5001");
    }

    #[test]
    fn default_thresholds_are_ordered() {
        let config = NodeConfig::default();
        assert!(config.mine_threshold < config.mempool_cap);
        assert!(config.max_block_txs <= config.mempool_cap);
    }

    #[test]
    fn timestamp_format_has_microseconds() {
        let ts = now_timestamp();
        // "2026-08-02T12:34:56.123456" — date, 'T', time, dot, 6 digits.
        let (_, frac) = ts.split_once('.').expect("fractional seconds");
        assert_eq!(frac.len(), 6);
        assert!(!ts.ends_with('Z'));
    }
}
