//! # CLI Interface
//!
//! Flat argument set for `provchain-node` using `clap` derive. Every
//! networked value has an environment variable override so a container
//! entrypoint never needs a wall of flags: `NODE_PORT`, `NODE_DIFFICULTY`,
//! `NODE_BOOTSTRAP`, `KEYS_DIR`, `NODE_HOST`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use provchain_ledger::NodeConfig;

/// Supply-chain provenance ledger node.
///
/// Runs one full replica: HTTP API, mempool, proof-of-work miner, peer
/// gossip, and longest-valid-chain sync.
#[derive(Parser, Debug, Clone)]
#[command(name = "provchain-node", about = "Supply-chain provenance ledger node", version)]
pub struct NodeCli {
    /// HTTP port to listen on and advertise to peers.
    #[arg(long, env = "NODE_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Hostname advertised to peers (the Docker service name in a
    /// container network).
    #[arg(long, env = "NODE_HOST", default_value = "localhost")]
    pub host: String,

    /// Proof-of-work difficulty: leading zero hex characters required of a
    /// block hash.
    #[arg(long, env = "NODE_DIFFICULTY", default_value_t = 2)]
    pub difficulty: usize,

    /// Bootstrap peer URLs, comma separated. Empty means standalone.
    #[arg(long, env = "NODE_BOOTSTRAP", value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Database directory. Defaults to `blockchain_<port>.db`.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Directory of `<actor>_private.pem` / `<actor>_public.pem` files.
    #[arg(long, env = "KEYS_DIR", default_value = "keys")]
    pub keys_dir: PathBuf,

    /// Accept unsigned transactions. Off by default; only for local
    /// experiments where no key material exists.
    #[arg(long)]
    pub allow_unsigned: bool,

    /// Seconds between longest-chain resolution rounds.
    #[arg(long, default_value_t = 10)]
    pub sync_interval: u64,

    /// Seconds between peer health probes.
    #[arg(long, default_value_t = 30)]
    pub health_interval: u64,

    /// Seconds between auto-mining checks.
    #[arg(long, default_value_t = 60)]
    pub automine_interval: u64,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, env = "NODE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output.
    #[arg(long)]
    pub log_json: bool,
}

impl NodeCli {
    /// Resolves the CLI into the ledger's runtime configuration.
    pub fn into_config(self) -> NodeConfig {
        let db_path = self
            .db
            .unwrap_or_else(|| PathBuf::from(format!("blockchain_{}.db", self.port)));
        NodeConfig {
            port: self.port,
            host: self.host,
            difficulty: self.difficulty,
            db_path,
            keys_dir: self.keys_dir,
            bootstrap: self
                .bootstrap
                .into_iter()
                .filter(|url| !url.trim().is_empty())
                .collect(),
            require_signatures: !self.allow_unsigned,
            sync_interval: Duration::from_secs(self.sync_interval),
            health_interval: Duration::from_secs(self.health_interval),
            automine_interval: Duration::from_secs(self.automine_interval),
            ..NodeConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
