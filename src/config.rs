use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Bytes evicted from a queue before a range compaction is requested.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Payload bytes carried per journal chunk on SET.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Runtime settings, assembled from defaults, then an optional JSON config
/// file, then command-line flags, in increasing precedence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Port upon which to listen.
    pub port: u16,
    /// Directory holding one journal sub-directory per queue.
    pub data: PathBuf,
    /// Number of worker threads.
    pub workers: usize,
    /// Debug (verbose) output.
    pub debug: bool,
    pub chunk_size: usize,
    pub compact_threshold: u64,
    /// Sync journal commits to disk before acknowledging.
    pub sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 22133,
            data: PathBuf::from("./data"),
            workers: 1,
            debug: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            sync: false,
        }
    }
}

impl Config {
    /// Reads settings from a JSON file keyed like the CLI flags.
    pub fn load(path: &Path) -> Result<Config> {
        let file =
            File::open(path).map_err(|e| Error::Other(format!("{}: {}", path.display(), e)))?;
        serde_json::from_reader(file).map_err(|e| Error::Other(format!("{}: {}", path.display(), e)))
    }
}
