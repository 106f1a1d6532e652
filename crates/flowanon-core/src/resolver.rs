//! Topology resolution: owning network, tag and geo data per endpoint

use std::net::Ipv4Addr;

use crate::flow::{EnrichedFlow, Enrichment, FlowRecord};
use crate::geo::{GeoInfo, GeoResolver};
use crate::prefix::Locality;
use crate::trie::PrefixTrie;

/// Resolves endpoints against the private and public tries.
///
/// Private endpoints take the deployment's own location instead of a
/// per-address geo lookup, since internal addresses have no public
/// geolocation of their own.
pub struct TopologyResolver<G> {
    private: PrefixTrie,
    public: PrefixTrie,
    geo: G,
    self_location: GeoInfo,
}

impl<G: GeoResolver> TopologyResolver<G> {
    pub fn new(private: PrefixTrie, public: PrefixTrie, geo: G, self_location: GeoInfo) -> Self {
        Self {
            private,
            public,
            geo,
            self_location,
        }
    }

    pub fn resolve(&self, addr: Ipv4Addr, locality: Locality) -> Enrichment {
        match locality {
            Locality::Private => Enrichment {
                entry: self.private.lookup(addr),
                geo: self.self_location.clone(),
            },
            Locality::Public => Enrichment {
                entry: self.public.lookup(addr),
                geo: self.geo.lookup(addr),
            },
        }
    }

    /// Resolve both endpoints of a flow
    pub fn enrich(&self, flow: FlowRecord) -> EnrichedFlow {
        let src = self.resolve(flow.src_addr, flow.src_locality);
        let dst = self.resolve(flow.dst_addr, flow.dst_locality);
        EnrichedFlow { flow, src, dst }
    }

    pub fn self_location(&self) -> &GeoInfo {
        &self.self_location
    }

    pub fn private_trie(&self) -> &PrefixTrie {
        &self.private
    }

    pub fn public_trie(&self) -> &PrefixTrie {
        &self.public
    }
}

impl<G> std::fmt::Debug for TopologyResolver<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyResolver")
            .field("private_nodes", &self.private.node_count())
            .field("public_nodes", &self.public.node_count())
            .field("self_location", &self.self_location)
            .finish_non_exhaustive()
    }
}
