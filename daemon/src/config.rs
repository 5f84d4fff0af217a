//! Node configuration.
//!
//! Options come from CLI flags with an optional TOML file underneath
//! (`--config`); flags win. `chain_id` is the one setting with no default:
//! a node that does not know its chain cannot validate anything.

use clap::Parser;
use kura_common::config::{
    DEFAULT_MAX_SNAPSHOTS, DEFAULT_SNAPSHOT_CHUNK_SIZE, DEFAULT_SNAPSHOT_INTERVAL,
    DEFAULT_SOCKET_PATH,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::error::ChainError;

#[derive(Parser, Debug)]
#[command(name = "kura_daemon", about = "Kura ABCI application daemon", version)]
pub struct NodeOptions {
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data directory for state, snapshots and genesis
    #[arg(long)]
    pub home: Option<PathBuf>,

    /// Chain id this node validates for
    #[arg(long)]
    pub chain_id: Option<String>,

    /// Consensus-driver socket path
    #[arg(long)]
    pub socket_path: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn default_home() -> PathBuf {
    PathBuf::from(".kura")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_snapshot_interval() -> u64 {
    DEFAULT_SNAPSHOT_INTERVAL
}

fn default_max_snapshots() -> usize {
    DEFAULT_MAX_SNAPSHOTS
}

fn default_chunk_size() -> usize {
    DEFAULT_SNAPSHOT_CHUNK_SIZE
}

fn default_blocks_to_keep() -> usize {
    100_000
}

fn default_true() -> bool {
    true
}

/// Resolved node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Anti-replay domain; required.
    pub chain_id: String,

    #[serde(default = "default_home")]
    pub home: PathBuf,

    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Height cadence for snapshot creation; zero disables.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,

    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Snapshot chunk cap in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Enables the extended query paths.
    #[serde(default)]
    pub block_service_mode: bool,

    #[serde(default)]
    pub pruning_enabled: bool,

    /// Blocks of write-log history kept when pruning.
    #[serde(default = "default_blocks_to_keep")]
    pub blocks_to_keep: usize,

    /// Whether the executor charges stamps.
    #[serde(default = "default_true")]
    pub enable_tx_fee: bool,
}

impl NodeConfig {
    /// Build the configuration from CLI options plus the optional file.
    pub fn resolve(options: &NodeOptions) -> Result<Self, ChainError> {
        let mut config = match &options.config {
            Some(path) => Self::from_file(path)?,
            None => Self::from_file_optional(),
        };

        if let Some(home) = &options.home {
            config.home = home.clone();
        }
        if let Some(chain_id) = &options.chain_id {
            config.chain_id = chain_id.clone();
        }
        if let Some(socket_path) = &options.socket_path {
            config.socket_path = socket_path.clone();
        }

        if config.chain_id.is_empty() {
            return Err(ChainError::Config(
                "no chain_id configured (set --chain-id or the config file)".into(),
            ));
        }
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ChainError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ChainError::Config(format!("{}: {}", path.display(), e)))
    }

    fn from_file_optional() -> Self {
        NodeConfig {
            chain_id: String::new(),
            home: default_home(),
            socket_path: default_socket_path(),
            snapshot_interval: default_snapshot_interval(),
            max_snapshots: default_max_snapshots(),
            chunk_size: default_chunk_size(),
            block_service_mode: false,
            pruning_enabled: false,
            blocks_to_keep: default_blocks_to_keep(),
            enable_tx_fee: true,
        }
    }

    /// In-memory configuration for tests.
    pub fn for_tests(chain_id: &str, home: &Path) -> Self {
        NodeConfig {
            chain_id: chain_id.to_string(),
            home: home.to_path_buf(),
            socket_path: home.join("abci.sock"),
            snapshot_interval: 0,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            chunk_size: DEFAULT_SNAPSHOT_CHUNK_SIZE,
            block_service_mode: true,
            pruning_enabled: false,
            blocks_to_keep: default_blocks_to_keep(),
            enable_tx_fee: true,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home.join("state")
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.home.join("genesis.json")
    }

    pub fn state_patches_path(&self) -> PathBuf {
        self.home.join("state_patches.json")
    }
}
