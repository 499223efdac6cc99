//! Leaf error types for the ambient boundary (config loading, offline packet
//! parsing). The core state machine itself never returns an error: it is
//! total on its input (see [`crate::conn`]).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InquisitorError {
    #[error("failed to read config file {path}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("failed to open pcap file {path}")]
    PcapOpen {
        path: String,
        #[source]
        source: pcap::Error,
    },
}
