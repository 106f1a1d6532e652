//! Network prefixes, prefix entries and endpoint locality

use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::constants::{MAX_PREFIX_LEN, PUBLIC_TAG};
use crate::Error;

/// An IPv4 CIDR block in canonical form (no host bits set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Prefix(Ipv4Network);

impl Ipv4Prefix {
    /// Create a prefix, rejecting lengths outside 1..=32 and set host bits
    pub fn new(network: Ipv4Addr, len: u8) -> crate::Result<Self> {
        if len == 0 || len > MAX_PREFIX_LEN {
            return Err(Error::InvalidPrefix(format!("{}/{}", network, len)));
        }
        let truncated = Ipv4Network::new_truncate(network, len)
            .map_err(|e| Error::InvalidPrefix(format!("{}/{}: {}", network, len, e)))?;
        if truncated.network_address() != network {
            return Err(Error::HostBitsSet {
                prefix: format!("{}/{}", network, len),
                network: truncated.to_string(),
            });
        }
        Ok(Self(truncated))
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network_address()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.netmask()
    }

    /// Check whether an address falls inside this block
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.0.contains(addr)
    }

    /// Attach a tag, producing the entry stored in a trie leaf
    pub fn with_tag(self, tag: u32) -> PrefixEntry {
        PrefixEntry {
            network: self.network(),
            prefix_len: self.prefix_len(),
            tag,
        }
    }
}

impl From<Ipv4Prefix> for Ipv4Network {
    fn from(prefix: Ipv4Prefix) -> Self {
        prefix.0
    }
}

impl FromStr for Ipv4Prefix {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidPrefix(s.to_string()))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::InvalidPrefix(s.to_string()))?;
        let len: u8 = len
            .parse()
            .map_err(|_| Error::InvalidPrefix(s.to_string()))?;
        Self::new(network, len)
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The owning network of an address together with its tag.
///
/// Public entries always carry tag 0; private entries carry the VLAN tag
/// assigned to their exact prefix, or 0 when none is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixEntry {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
    pub tag: u32,
}

impl PrefixEntry {
    /// Fallback for every address not covered by an inserted prefix
    pub const DEFAULT: PrefixEntry = PrefixEntry {
        network: Ipv4Addr::UNSPECIFIED,
        prefix_len: 0,
        tag: PUBLIC_TAG,
    };

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl Default for PrefixEntry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PrefixEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (tag {})", self.network, self.prefix_len, self.tag)
    }
}

/// Declared address space of a flow endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    /// Internal address space, resolved against the private trie
    Private,
    /// External address space, resolved against the public trie
    #[default]
    Public,
}

impl Locality {
    pub fn is_private(&self) -> bool {
        matches!(self, Locality::Private)
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locality::Private => write!(f, "private"),
            Locality::Public => write!(f, "public"),
        }
    }
}
