use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use flowanon_core::SplitPolicy;
use serde::{Deserialize, Serialize};

/// Default endpoint answering with the caller's external address
pub const DEFAULT_CHECKIP_URL: &str = "http://checkip.dyndns.org";

/// Elasticsearch flow index settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL, e.g. `http://localhost:9200`
    pub url: String,
    /// Index or index pattern
    pub index: String,
    /// Records per scroll page
    pub page_size: usize,
    /// Scroll context lifetime (`1h`, `30m`, ...)
    pub scroll: String,
    /// Drop flows with a multicast or reserved endpoint (224.0.0.0 and up)
    pub exclude_multicast: bool,
    /// Optional `@timestamp` window
    pub time_range: Option<TimeRange>,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".into(),
            index: "netflow-*".into(),
            page_size: 10_000,
            scroll: "1h".into(),
            exclude_multicast: true,
            time_range: None,
            request_timeout_secs: 120,
        }
    }
}

/// Elasticsearch date-math bounds, e.g. `now-5d` .. `now`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub gte: String,
    pub lte: String,
}

/// Local database files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasePaths {
    pub country_db: PathBuf,
    pub city_db: PathBuf,
    pub asn_db: PathBuf,
    /// GeoLite2 ASN blocks CSV feeding the public trie
    pub public_prefixes: PathBuf,
    pub private_prefixes: PathBuf,
    pub vlans: PathBuf,
    pub public_trie_cache: PathBuf,
}

impl DatabasePaths {
    /// Standard layout under a database directory:
    ///
    /// ```text
    /// db_dir/
    ///   GeoLite2-Country.mmdb
    ///   GeoLite2-City.mmdb
    ///   GeoLite2-ASN.mmdb
    ///   GeoLite2-ASN-Blocks-IPv4.csv
    ///   private_prefixes.csv
    ///   private_prefixes_vlans.csv
    ///   public_prefixes.trie
    /// ```
    pub fn from_db_dir(db_dir: impl AsRef<Path>) -> Self {
        let db = db_dir.as_ref();
        Self {
            country_db: db.join("GeoLite2-Country.mmdb"),
            city_db: db.join("GeoLite2-City.mmdb"),
            asn_db: db.join("GeoLite2-ASN.mmdb"),
            public_prefixes: db.join("GeoLite2-ASN-Blocks-IPv4.csv"),
            private_prefixes: db.join("private_prefixes.csv"),
            vlans: db.join("private_prefixes_vlans.csv"),
            public_trie_cache: db.join("public_prefixes.trie"),
        }
    }
}

impl Default for DatabasePaths {
    fn default() -> Self {
        Self::from_db_dir("./db")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    pub source: SourceConfig,
    pub databases: DatabasePaths,
    /// Directory receiving the `*_flows.bin.zst` artifact
    pub output_dir: PathBuf,
    /// Deployment's external address; discovered over HTTP when absent
    pub self_address: Option<Ipv4Addr>,
    pub checkip_url: String,
    pub split_policy: SplitPolicy,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self::from_base_dir(".")
    }
}

impl AnonymizerConfig {
    /// Config rooted at `base_dir`, with databases in `db/` and output in `out/`
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base = base_dir.into();
        Self {
            source: SourceConfig::default(),
            databases: DatabasePaths::from_db_dir(base.join("db")),
            output_dir: base.join("out"),
            self_address: None,
            checkip_url: DEFAULT_CHECKIP_URL.into(),
            split_policy: SplitPolicy::default(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("writing config {}", path.as_ref().display()))?;
        Ok(())
    }
}
