//! Trie construction from the prefix databases

use anyhow::Context;
use flowanon_core::cache;
use flowanon_core::loader;
use flowanon_core::{Ipv4Prefix, PrefixTrie, SplitPolicy, TrieBuilder};
use tracing::{info, warn};

use crate::config::DatabasePaths;
use crate::progress;

/// The two sealed tries
#[derive(Debug, Clone)]
pub struct Topology {
    pub private: PrefixTrie,
    pub public: PrefixTrie,
}

/// Builds both tries, reusing the public trie cache when it is fresh
pub struct TopologySetup<'a> {
    paths: &'a DatabasePaths,
    policy: SplitPolicy,
    quiet: bool,
}

impl<'a> TopologySetup<'a> {
    pub fn new(paths: &'a DatabasePaths, policy: SplitPolicy) -> Self {
        Self {
            paths,
            policy,
            quiet: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn build(&self) -> anyhow::Result<Topology> {
        Ok(Topology {
            private: self.private_trie()?,
            public: self.public_trie()?,
        })
    }

    /// Private prefixes tagged with their VLAN; never cached
    pub fn private_trie(&self) -> anyhow::Result<PrefixTrie> {
        let prefixes = loader::load_private_prefixes(&self.paths.private_prefixes)
            .with_context(|| format!("loading {}", self.paths.private_prefixes.display()))?;
        let vlans = loader::load_vlan_map(&self.paths.vlans)
            .with_context(|| format!("loading {}", self.paths.vlans.display()))?;

        let tagged = loader::tag_private_prefixes(prefixes, &vlans);
        let trie = self.build_trie(tagged, "private prefixes")?;

        info!(
            prefixes = trie.entry_count(),
            vlans = vlans.len(),
            nodes = trie.node_count(),
            "Built private trie"
        );
        Ok(trie)
    }

    /// Public prefixes with tag 0, loaded from cache when the CSV is unchanged
    pub fn public_trie(&self) -> anyhow::Result<PrefixTrie> {
        let csv = &self.paths.public_prefixes;
        let cache_path = &self.paths.public_trie_cache;
        let digest =
            cache::source_digest(csv).with_context(|| format!("reading {}", csv.display()))?;

        if let Some(trie) = cache::load_if_fresh(cache_path, self.policy, digest) {
            return Ok(trie);
        }
        if cache_path.exists() {
            std::fs::remove_file(cache_path)
                .with_context(|| format!("removing stale cache {}", cache_path.display()))?;
        }

        let prefixes = loader::load_public_prefixes(csv)
            .with_context(|| format!("loading {}", csv.display()))?;
        let tagged = prefixes
            .into_iter()
            .map(|prefix| (prefix, flowanon_core::constants::PUBLIC_TAG))
            .collect();
        let trie = self.build_trie(tagged, "public prefixes")?;

        info!(nodes = trie.node_count(), "Built public trie");

        if let Err(e) = cache::save_trie(cache_path, &trie, self.policy, digest) {
            warn!(path = %cache_path.display(), error = %e, "Failed to write trie cache");
        }
        Ok(trie)
    }

    fn build_trie(
        &self,
        prefixes: Vec<(Ipv4Prefix, u32)>,
        unit: &str,
    ) -> anyhow::Result<PrefixTrie> {
        let pb = progress::bar(prefixes.len() as u64, unit, self.quiet)?;
        let mut builder = TrieBuilder::with_policy(self.policy);
        for (prefix, tag) in prefixes {
            builder.insert(prefix, tag);
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(builder.seal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowanon_core::PrefixEntry;
    use std::net::Ipv4Addr;

    fn write_databases(dir: &std::path::Path) -> DatabasePaths {
        let paths = DatabasePaths::from_db_dir(dir);
        std::fs::write(
            &paths.public_prefixes,
            "network,autonomous_system_number,autonomous_system_organization\n\
             8.8.8.0/24,15169,Google LLC\n\
             93.184.216.0/24,15133,Edgecast\n",
        )
        .unwrap();
        std::fs::write(&paths.private_prefixes, "10.0.0.0/8\n10.1.0.0/16\n10.1.2.3/32\n").unwrap();
        std::fs::write(&paths.vlans, "prefix,vlan\n10.1.0.0/16,5\n10.0.0.0/8,N/A\n").unwrap();
        paths
    }

    #[test]
    fn test_private_trie_carries_vlans() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_databases(dir.path());
        let trie = TopologySetup::new(&paths, SplitPolicy::Overwrite)
            .quiet(true)
            .private_trie()
            .unwrap();

        let entry = trie.lookup(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(entry.network, Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(entry.tag, 5);
        // 10/8 was split by 10.1/16 and dropped
        assert_eq!(trie.lookup(Ipv4Addr::new(10, 2, 0, 1)), PrefixEntry::DEFAULT);
    }

    #[test]
    fn test_public_trie_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_databases(dir.path());
        let setup = TopologySetup::new(&paths, SplitPolicy::Overwrite).quiet(true);

        let built = setup.public_trie().unwrap();
        assert!(paths.public_trie_cache.exists());

        let cached = setup.public_trie().unwrap();
        assert_eq!(built, cached);
        assert_eq!(cached.lookup(Ipv4Addr::new(8, 8, 8, 8)).prefix_len, 24);
        assert_eq!(cached.lookup(Ipv4Addr::new(8, 8, 8, 8)).tag, 0);
    }

    #[test]
    fn test_changed_csv_rebuilds_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_databases(dir.path());
        let setup = TopologySetup::new(&paths, SplitPolicy::Overwrite).quiet(true);
        setup.public_trie().unwrap();

        std::fs::write(&paths.public_prefixes, "network\n1.1.1.0/24\n").unwrap();
        let rebuilt = setup.public_trie().unwrap();

        assert_eq!(rebuilt.lookup(Ipv4Addr::new(8, 8, 8, 8)), PrefixEntry::DEFAULT);
        assert_eq!(
            rebuilt.lookup(Ipv4Addr::new(1, 1, 1, 1)).network,
            Ipv4Addr::new(1, 1, 1, 0)
        );
    }

    #[test]
    fn test_missing_prefix_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatabasePaths::from_db_dir(dir.path());
        assert!(TopologySetup::new(&paths, SplitPolicy::Overwrite)
            .quiet(true)
            .build()
            .is_err());
    }
}
