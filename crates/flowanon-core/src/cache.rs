//! On-disk cache for the sealed public trie
//!
//! Layout: a fixed 48-byte header followed by a zstd stream holding the
//! bincode-encoded [`PrefixTrie`]. All header integers are little-endian.
//!
//! | offset | size | field         |
//! |--------|------|---------------|
//! | 0      | 4    | magic `FAT1`  |
//! | 4      | 2    | version       |
//! | 6      | 1    | split policy  |
//! | 7      | 1    | reserved      |
//! | 8      | 8    | node count    |
//! | 16     | 32   | SHA-256 of the source CSV |
//!
//! A cache is only reused when its digest matches the current source file
//! and it was built with the requested split policy.
//! The private trie is never cached.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::trie::{PrefixTrie, SplitPolicy};

/// Magic bytes identifying a trie cache file
pub const CACHE_MAGIC: [u8; 4] = *b"FAT1";

/// Header size in bytes
pub const CACHE_HEADER_SIZE: usize = 48;

const ZSTD_LEVEL: i32 = 3;

/// SHA-256 digest of a source file
pub type SourceDigest = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub split_policy: SplitPolicy,
    pub node_count: u64,
    pub source_digest: SourceDigest,
}

fn policy_byte(policy: SplitPolicy) -> u8 {
    match policy {
        SplitPolicy::Overwrite => 0,
        SplitPolicy::PreserveBroader => 1,
    }
}

impl CacheHeader {
    pub const VERSION: u16 = 1;

    pub fn new(split_policy: SplitPolicy, node_count: u64, source_digest: SourceDigest) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: Self::VERSION,
            split_policy,
            node_count,
            source_digest,
        }
    }

    pub fn to_bytes(&self) -> [u8; CACHE_HEADER_SIZE] {
        let mut buf = [0u8; CACHE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = policy_byte(self.split_policy);
        buf[8..16].copy_from_slice(&self.node_count.to_le_bytes());
        buf[16..48].copy_from_slice(&self.source_digest);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CacheFormatError> {
        if data.len() < CACHE_HEADER_SIZE {
            return Err(CacheFormatError::HeaderTooShort { actual: data.len() });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != CACHE_MAGIC {
            return Err(CacheFormatError::InvalidMagic { actual: magic });
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != Self::VERSION {
            return Err(CacheFormatError::UnsupportedVersion { actual: version });
        }

        let split_policy = match data[6] {
            0 => SplitPolicy::Overwrite,
            1 => SplitPolicy::PreserveBroader,
            other => return Err(CacheFormatError::UnknownPolicy { actual: other }),
        };

        let mut count = [0u8; 8];
        count.copy_from_slice(&data[8..16]);
        let mut source_digest = [0u8; 32];
        source_digest.copy_from_slice(&data[16..48]);

        Ok(Self {
            magic,
            version,
            split_policy,
            node_count: u64::from_le_bytes(count),
            source_digest,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheFormatError {
    HeaderTooShort { actual: usize },
    InvalidMagic { actual: [u8; 4] },
    UnsupportedVersion { actual: u16 },
    UnknownPolicy { actual: u8 },
    /// Cache was built with another split policy
    PolicyMismatch {
        expected: SplitPolicy,
        actual: SplitPolicy,
    },
    /// Source file changed since the cache was written
    StaleSource {
        expected: SourceDigest,
        actual: SourceDigest,
    },
    NodeCountMismatch { header: u64, actual: u64 },
}

impl fmt::Display for CacheFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderTooShort { actual } => {
                write!(f, "header too short: {} bytes (need {})", actual, CACHE_HEADER_SIZE)
            }
            Self::InvalidMagic { actual } => {
                write!(f, "invalid magic: {:?} (expected {:?})", actual, CACHE_MAGIC)
            }
            Self::UnsupportedVersion { actual } => {
                write!(f, "unsupported version {} (expected {})", actual, CacheHeader::VERSION)
            }
            Self::UnknownPolicy { actual } => write!(f, "unknown split policy byte {}", actual),
            Self::PolicyMismatch { expected, actual } => {
                write!(f, "cache built with {:?} policy, {:?} requested", actual, expected)
            }
            Self::StaleSource { expected, actual } => write!(
                f,
                "source digest {} does not match cache {}",
                hex::encode(expected),
                hex::encode(actual)
            ),
            Self::NodeCountMismatch { header, actual } => {
                write!(f, "header declares {} nodes, body has {}", header, actual)
            }
        }
    }
}

impl std::error::Error for CacheFormatError {}

/// Digest a source file without reading it into memory at once
pub fn source_digest(path: impl AsRef<Path>) -> crate::Result<SourceDigest> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// Write a trie cache, replacing any existing file
pub fn save_trie(
    path: impl AsRef<Path>,
    trie: &PrefixTrie,
    policy: SplitPolicy,
    source_digest: SourceDigest,
) -> crate::Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");

    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let header = CacheHeader::new(policy, trie.node_count() as u64, source_digest);
        writer.write_all(&header.to_bytes())?;

        let mut encoder = zstd::Encoder::new(writer, ZSTD_LEVEL)?;
        bincode::serialize_into(&mut encoder, trie)?;
        encoder.finish()?.flush()?;
    }
    std::fs::rename(&tmp, path)?;

    tracing::info!(
        path = %path.display(),
        nodes = trie.node_count(),
        "Trie cache written"
    );
    Ok(())
}

/// Read a trie cache, requiring it to match the split policy and the
/// `expected` source digest
pub fn load_trie(
    path: impl AsRef<Path>,
    policy: SplitPolicy,
    expected: SourceDigest,
) -> crate::Result<PrefixTrie> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header_bytes = [0u8; CACHE_HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = CacheHeader::from_bytes(&header_bytes)?;
    if header.split_policy != policy {
        return Err(CacheFormatError::PolicyMismatch {
            expected: policy,
            actual: header.split_policy,
        }
        .into());
    }
    if header.source_digest != expected {
        return Err(CacheFormatError::StaleSource {
            expected,
            actual: header.source_digest,
        }
        .into());
    }

    let decoder = zstd::Decoder::new(reader)?;
    let trie: PrefixTrie = bincode::deserialize_from(decoder)?;
    if trie.node_count() as u64 != header.node_count {
        return Err(CacheFormatError::NodeCountMismatch {
            header: header.node_count,
            actual: trie.node_count() as u64,
        }
        .into());
    }
    Ok(trie)
}

/// Load a cache when present and fresh; any failure means rebuild
pub fn load_if_fresh(
    path: impl AsRef<Path>,
    policy: SplitPolicy,
    expected: SourceDigest,
) -> Option<PrefixTrie> {
    let path = path.as_ref();
    if !path.exists() {
        return None;
    }
    match load_trie(path, policy, expected) {
        Ok(trie) => {
            tracing::info!(path = %path.display(), nodes = trie.node_count(), "Trie cache loaded");
            Some(trie)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring trie cache");
            None
        }
    }
}
