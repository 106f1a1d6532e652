//! Error types for flowanon-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    #[error("Prefix {prefix} has host bits set (network is {network})")]
    HostBitsSet { prefix: String, network: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid VLAN tag for {prefix}: {value}")]
    InvalidTag { prefix: String, value: String },

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Cache format error: {0}")]
    CacheFormat(#[from] crate::cache::CacheFormatError),

    #[error("Line {line} of {path}: {source}")]
    SourceLine {
        path: String,
        line: usize,
        #[source]
        source: Box<Error>,
    },
}
