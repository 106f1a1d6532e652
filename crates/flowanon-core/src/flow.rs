//! Flow records: raw, enriched, and the persisted anonymized form

use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv4Addr;

use crate::cipher::PermutationTables;
use crate::geo::GeoInfo;
use crate::prefix::{Locality, PrefixEntry};

/// A flow as delivered by the record source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub first_switched: Option<String>,
    pub last_switched: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub protocol: u8,
    pub src_addr: Ipv4Addr,
    #[serde(default)]
    pub src_port: u16,
    pub dst_addr: Ipv4Addr,
    #[serde(default)]
    pub dst_port: u16,
    #[serde(default, deserialize_with = "declared_locality")]
    pub src_locality: Locality,
    #[serde(default, deserialize_with = "declared_locality")]
    pub dst_locality: Locality,
    pub tcp_flags: Option<u16>,
    pub flow_seq_num: Option<u64>,
    pub host: Option<String>,
}

/// Only the exact label `private` selects the private trie; any other label,
/// null or a missing field is public address space.
fn declared_locality<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Locality, D::Error> {
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(match label.as_deref() {
        Some("private") => Locality::Private,
        _ => Locality::Public,
    })
}

/// Topology and geo data resolved for one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub entry: PrefixEntry,
    pub geo: GeoInfo,
}

/// A flow with both endpoints resolved
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedFlow {
    pub flow: FlowRecord,
    pub src: Enrichment,
    pub dst: Enrichment,
}

impl EnrichedFlow {
    /// Rewrite the four address-bearing fields through the cipher
    pub fn anonymize(&mut self, tables: &PermutationTables) {
        self.flow.src_addr = tables.anonymize(self.flow.src_addr);
        self.flow.dst_addr = tables.anonymize(self.flow.dst_addr);
        self.src.entry.network = tables.anonymize(self.src.entry.network);
        self.dst.entry.network = tables.anonymize(self.dst.entry.network);
    }
}

/// Flat record written to the output artifact.
///
/// Unresolved geo fields carry the legacy sentinels: country `"unknown"`,
/// coordinates `0.0`, ASN `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedFlow {
    pub first_switched: Option<String>,
    pub last_switched: Option<String>,
    pub bytes: u64,
    pub protocol: u8,
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
    pub src_locality: Locality,
    pub dst_locality: Locality,
    pub tcp_flags: Option<u16>,
    pub flow_seq_num: Option<u64>,
    pub host: Option<String>,

    pub src_network: Ipv4Addr,
    pub src_prefix_len: u8,
    pub src_vlan: u32,
    pub src_country_code: String,
    pub src_longitude: f64,
    pub src_latitude: f64,
    pub src_asn: u32,

    pub dst_network: Ipv4Addr,
    pub dst_prefix_len: u8,
    pub dst_vlan: u32,
    pub dst_country_code: String,
    pub dst_longitude: f64,
    pub dst_latitude: f64,
    pub dst_asn: u32,
}

impl From<EnrichedFlow> for AnonymizedFlow {
    fn from(enriched: EnrichedFlow) -> Self {
        let EnrichedFlow { flow, src, dst } = enriched;
        Self {
            src_network: src.entry.network,
            src_prefix_len: src.entry.prefix_len,
            src_vlan: src.entry.tag,
            src_country_code: src.geo.country_code_or_sentinel().to_string(),
            src_longitude: src.geo.longitude_or_sentinel(),
            src_latitude: src.geo.latitude_or_sentinel(),
            src_asn: src.geo.asn_or_sentinel(),

            dst_network: dst.entry.network,
            dst_prefix_len: dst.entry.prefix_len,
            dst_vlan: dst.entry.tag,
            dst_country_code: dst.geo.country_code_or_sentinel().to_string(),
            dst_longitude: dst.geo.longitude_or_sentinel(),
            dst_latitude: dst.geo.latitude_or_sentinel(),
            dst_asn: dst.geo.asn_or_sentinel(),

            first_switched: flow.first_switched,
            last_switched: flow.last_switched,
            bytes: flow.bytes,
            protocol: flow.protocol,
            src_addr: flow.src_addr,
            src_port: flow.src_port,
            dst_addr: flow.dst_addr,
            dst_port: flow.dst_port,
            src_locality: flow.src_locality,
            dst_locality: flow.dst_locality,
            tcp_flags: flow.tcp_flags,
            flow_seq_num: flow.flow_seq_num,
            host: flow.host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_flow() -> FlowRecord {
        FlowRecord {
            first_switched: Some("2019-01-31T10:01:00.000Z".into()),
            last_switched: Some("2019-01-31T10:01:05.000Z".into()),
            bytes: 1500,
            protocol: 6,
            src_addr: Ipv4Addr::new(10, 1, 10, 1),
            src_port: 51514,
            dst_addr: Ipv4Addr::new(192, 1, 50, 1),
            dst_port: 443,
            src_locality: Locality::Private,
            dst_locality: Locality::Public,
            tcp_flags: Some(0x1b),
            flow_seq_num: Some(7),
            host: Some("exporter-1".into()),
        }
    }

    fn enriched() -> EnrichedFlow {
        EnrichedFlow {
            flow: sample_flow(),
            src: Enrichment {
                entry: PrefixEntry {
                    network: Ipv4Addr::new(10, 1, 0, 0),
                    prefix_len: 16,
                    tag: 5,
                },
                geo: GeoInfo {
                    country_code: Some("DE".into()),
                    longitude: Some(13.4),
                    latitude: Some(52.5),
                    asn: Some(680),
                    resolved: true,
                },
            },
            dst: Enrichment {
                entry: PrefixEntry::DEFAULT,
                geo: GeoInfo::unresolved(),
            },
        }
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{
            "src_addr": "10.0.0.1", "dst_addr": "8.8.8.8",
            "src_locality": "private", "dst_locality": "public"
        }"#;
        let flow: FlowRecord = serde_json::from_str(json).unwrap();
        assert_eq!(flow.bytes, 0);
        assert_eq!(flow.host, None);
        assert_eq!(flow.dst_locality, Locality::Public);
    }

    #[test]
    fn test_unknown_or_missing_locality_is_public() {
        let json = r#"{
            "src_addr": "10.0.0.1", "dst_addr": "8.8.8.8",
            "src_locality": "external", "tcp_flags": 256
        }"#;
        let flow: FlowRecord = serde_json::from_str(json).unwrap();
        assert_eq!(flow.src_locality, Locality::Public);
        assert_eq!(flow.dst_locality, Locality::Public);
        assert_eq!(flow.tcp_flags, Some(256));

        let json = r#"{
            "src_addr": "10.0.0.1", "dst_addr": "10.0.0.2",
            "src_locality": null, "dst_locality": "private"
        }"#;
        let flow: FlowRecord = serde_json::from_str(json).unwrap();
        assert_eq!(flow.src_locality, Locality::Public);
        assert_eq!(flow.dst_locality, Locality::Private);
    }

    #[test]
    fn test_anonymize_rewrites_addresses_and_networks() {
        let tables = PermutationTables::derive(b"foobar").unwrap();
        let mut flow = enriched();
        flow.anonymize(&tables);

        assert_eq!(flow.flow.src_addr, Ipv4Addr::new(169, 149, 65, 128));
        assert_eq!(flow.flow.dst_addr, Ipv4Addr::new(233, 149, 181, 128));
        assert_eq!(flow.src.entry.network, Ipv4Addr::new(169, 149, 13, 68));
        assert_eq!(flow.dst.entry.network, Ipv4Addr::new(173, 79, 13, 68));
        assert_eq!(flow.src.entry.prefix_len, 16);
        assert_eq!(flow.src.entry.tag, 5);
    }

    #[test]
    fn test_flatten_applies_sentinels() {
        let out = AnonymizedFlow::from(enriched());
        assert_eq!(out.src_country_code, "DE");
        assert_eq!(out.src_asn, 680);
        assert_eq!(out.src_vlan, 5);
        assert_eq!(out.dst_country_code, "unknown");
        assert_eq!(out.dst_longitude, 0.0);
        assert_eq!(out.dst_latitude, 0.0);
        assert_eq!(out.dst_asn, 0);
        assert_eq!(out.dst_prefix_len, 0);
        assert_eq!(out.bytes, 1500);
        assert_eq!(out.host.as_deref(), Some("exporter-1"));
    }

    #[test]
    fn test_bincode_encoding_is_stable() {
        let out = AnonymizedFlow::from(enriched());
        let bytes = bincode::serialize(&vec![out.clone()]).unwrap();
        let back: Vec<AnonymizedFlow> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, vec![out]);
    }
}
