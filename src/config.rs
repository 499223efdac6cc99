//! Configuration options.
//!
//! The inquisitor core is usable with no configuration at all (see
//! [`Config::default`]), but a TOML file can tune the ring capacity, the
//! hijack-detection window, and the inactivity reaper. See
//! [configs](../../configs) for an example.

use crate::error::InquisitorError;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, InquisitorError> {
    let path_str = path.as_ref().display().to_string();
    let config_str = fs::read_to_string(&path).map_err(|source| InquisitorError::ConfigRead {
        path: path_str.clone(),
        source,
    })?;
    toml::from_str(&config_str).map_err(|source| InquisitorError::ConfigParse {
        path: path_str,
        source,
    })
}

/// Runtime configuration for the connection tracker.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Per-direction ring capacity, in segments. Defaults to
    /// [`crate::ring::MAX_CONN_PACKETS`].
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Number of packets after entering `DataTransfer` during which the
    /// hijack detector is consulted. Defaults to `FIRST_FEW_PACKETS`.
    #[serde(default = "default_first_few_packets")]
    pub first_few_packets: u32,

    /// Number of subsequent packets, across the whole tracker, after which a
    /// connection stranded in `TimeWait`/`Closing`/`CloseWait` is force
    /// closed. `None` disables the reaper.
    #[serde(default = "default_inactivity_timeout_packets")]
    pub inactivity_timeout_packets: Option<u64>,

    /// Path to an offline pcap file to read (binary-only; ignored by the
    /// library).
    #[serde(default)]
    pub offline_pcap: Option<String>,
}

fn default_ring_capacity() -> usize {
    crate::ring::MAX_CONN_PACKETS
}

fn default_first_few_packets() -> u32 {
    crate::detect::hijack::FIRST_FEW_PACKETS
}

fn default_inactivity_timeout_packets() -> Option<u64> {
    Some(100_000)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ring_capacity: default_ring_capacity(),
            first_few_packets: default_first_few_packets(),
            inactivity_timeout_packets: default_inactivity_timeout_packets(),
            offline_pcap: None,
        }
    }
}
