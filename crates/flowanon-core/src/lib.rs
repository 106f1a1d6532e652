//! flowanon-core: topology enrichment and address anonymization for flow records
//!
//! Each flow endpoint is resolved against one of two prefix tries:
//! - Private trie: internal prefixes tagged with their VLAN
//! - Public trie: announced prefixes from the ASN database, tag 0
//!
//! Private endpoints carry the deployment's own location; public endpoints
//! carry a per-address geo lookup. After enrichment every address-bearing
//! field passes through a keyed per-octet substitution cipher.
//!
//! # Privacy model
//!
//! | Information | Preserved in output |
//! |-------------|---------------------|
//! | Exact addresses | NO - substituted per octet |
//! | Equality of octets at one position | YES |
//! | Owning prefix length, VLAN | YES |
//! | Country, coordinates, ASN | YES |
//! | Ports, protocol, byte counts, timing | YES |
//!
//! The substitution is deterministic for a secret, so the same address maps
//! to the same output across a run and across runs with the same secret.
//! It is not a prefix-preserving cipher below octet granularity.

mod error;
mod prefix;
mod trie;
mod mt19937;
mod cipher;
mod geo;
mod flow;
mod resolver;

pub mod cache;
pub mod loader;

pub use error::Error;
pub use prefix::{Ipv4Prefix, Locality, PrefixEntry};
pub use trie::{PrefixTrie, SplitPolicy, TrieBuilder};
pub use mt19937::Mt19937;
pub use cipher::{permutation, shuffle, PermutationTables, SubstitutionTable, SEED_RANGES};
pub use geo::{GeoInfo, GeoResolver, NullGeoResolver, UNKNOWN_COUNTRY};
pub use flow::{AnonymizedFlow, EnrichedFlow, Enrichment, FlowRecord};
pub use resolver::TopologyResolver;

pub type Result<T> = std::result::Result<T, Error>;

/// Constants shared by the pipeline
pub mod constants {
    /// Tag for public prefixes and for the default entry
    pub const PUBLIC_TAG: u32 = 0;

    /// Number of octet substitution tables
    pub const TABLE_COUNT: usize = 4;

    /// Longest IPv4 prefix
    pub const MAX_PREFIX_LEN: u8 = 32;
}
