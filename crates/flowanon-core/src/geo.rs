//! Geo-location data attached to flow endpoints

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Country code written for unresolved endpoints
pub const UNKNOWN_COUNTRY: &str = "unknown";

/// Location and origin AS of an address.
///
/// Fields are `None` when the databases have no value. `resolved` is false
/// when the lookup itself failed (address not found or database error).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country_code: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub asn: Option<u32>,
    pub resolved: bool,
}

impl GeoInfo {
    /// Result of a failed lookup
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn country_code_or_sentinel(&self) -> &str {
        self.country_code.as_deref().unwrap_or(UNKNOWN_COUNTRY)
    }

    pub fn longitude_or_sentinel(&self) -> f64 {
        self.longitude.unwrap_or(0.0)
    }

    pub fn latitude_or_sentinel(&self) -> f64 {
        self.latitude.unwrap_or(0.0)
    }

    pub fn asn_or_sentinel(&self) -> u32 {
        self.asn.unwrap_or(0)
    }
}

/// Per-address geo lookup.
///
/// Implementations never fail: any internal error is reported as
/// [`GeoInfo::unresolved`].
pub trait GeoResolver {
    fn lookup(&self, addr: Ipv4Addr) -> GeoInfo;
}

impl<G: GeoResolver + ?Sized> GeoResolver for &G {
    fn lookup(&self, addr: Ipv4Addr) -> GeoInfo {
        (**self).lookup(addr)
    }
}

impl<G: GeoResolver + ?Sized> GeoResolver for Box<G> {
    fn lookup(&self, addr: Ipv4Addr) -> GeoInfo {
        (**self).lookup(addr)
    }
}

/// Resolver that knows nothing; every lookup is unresolved
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGeoResolver;

impl GeoResolver for NullGeoResolver {
    fn lookup(&self, _addr: Ipv4Addr) -> GeoInfo {
        GeoInfo::unresolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_sentinels() {
        let geo = GeoInfo::unresolved();
        assert!(!geo.resolved);
        assert_eq!(geo.country_code_or_sentinel(), "unknown");
        assert_eq!(geo.longitude_or_sentinel(), 0.0);
        assert_eq!(geo.latitude_or_sentinel(), 0.0);
        assert_eq!(geo.asn_or_sentinel(), 0);
    }

    #[test]
    fn test_partial_geo_keeps_known_fields() {
        let geo = GeoInfo {
            country_code: Some("DE".into()),
            asn: Some(3320),
            resolved: true,
            ..Default::default()
        };
        assert_eq!(geo.country_code_or_sentinel(), "DE");
        assert_eq!(geo.latitude_or_sentinel(), 0.0);
        assert_eq!(geo.asn_or_sentinel(), 3320);
    }

    #[test]
    fn test_null_resolver() {
        let geo = NullGeoResolver.lookup(Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(geo, GeoInfo::unresolved());
    }
}
