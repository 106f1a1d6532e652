//! MaxMind GeoLite2 adapter and self-location discovery

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use flowanon_core::{GeoInfo, GeoResolver};
use maxminddb::{geoip2, MaxMindDBError, Reader};

use crate::config::DatabasePaths;

/// Country, city and ASN databases opened once at startup
pub struct MaxMindGeoResolver {
    country: Reader<Vec<u8>>,
    city: Reader<Vec<u8>>,
    asn: Reader<Vec<u8>>,
}

fn open(path: &Path) -> anyhow::Result<Reader<Vec<u8>>> {
    let reader = Reader::open_readfile(path)
        .with_context(|| format!("opening geo database {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        db_type = %reader.metadata.database_type,
        build_epoch = reader.metadata.build_epoch,
        "Loaded geo database"
    );
    Ok(reader)
}

impl MaxMindGeoResolver {
    pub fn open(paths: &DatabasePaths) -> anyhow::Result<Self> {
        Ok(Self {
            country: open(&paths.country_db)?,
            city: open(&paths.city_db)?,
            asn: open(&paths.asn_db)?,
        })
    }

    fn try_lookup(&self, addr: Ipv4Addr) -> Result<GeoInfo, MaxMindDBError> {
        let ip = IpAddr::V4(addr);
        let country: geoip2::Country = self.country.lookup(ip)?;
        let city: geoip2::City = self.city.lookup(ip)?;
        let asn: geoip2::Asn = self.asn.lookup(ip)?;

        let location = city.location.as_ref();
        Ok(GeoInfo {
            country_code: country
                .country
                .and_then(|c| c.iso_code)
                .map(String::from),
            longitude: location.and_then(|l| l.longitude),
            latitude: location.and_then(|l| l.latitude),
            asn: asn.autonomous_system_number,
            resolved: true,
        })
    }
}

impl GeoResolver for MaxMindGeoResolver {
    /// All three databases must answer; any miss leaves the endpoint unresolved
    fn lookup(&self, addr: Ipv4Addr) -> GeoInfo {
        match self.try_lookup(addr) {
            Ok(info) => info,
            Err(e) => {
                tracing::trace!(%addr, error = %e, "Geo lookup failed");
                GeoInfo::unresolved()
            }
        }
    }
}

impl std::fmt::Debug for MaxMindGeoResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxMindGeoResolver")
            .field("country", &self.country.metadata.database_type)
            .field("city", &self.city.metadata.database_type)
            .field("asn", &self.asn.metadata.database_type)
            .finish()
    }
}

/// First dotted quad in a text body
pub fn find_ipv4(text: &str) -> Option<Ipv4Addr> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|token| token.trim_matches('.'))
        .filter(|token| token.split('.').count() == 4)
        .find_map(|token| token.parse().ok())
}

/// Ask a check-IP endpoint for this deployment's external address
pub async fn discover_external_ip(url: &str) -> anyhow::Result<Ipv4Addr> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?;
    if !resp.status().is_success() {
        anyhow::bail!("external IP lookup failed: {}", resp.status());
    }
    let body = resp.text().await?;
    find_ipv4(&body).with_context(|| format!("no IPv4 address in response from {}", url))
}

/// Geo data for the deployment itself, used for every private endpoint
pub async fn resolve_self_location<G: GeoResolver>(
    geo: &G,
    configured: Option<Ipv4Addr>,
    checkip_url: &str,
) -> anyhow::Result<GeoInfo> {
    let addr = match configured {
        Some(addr) => addr,
        None => discover_external_ip(checkip_url).await?,
    };
    let info = geo.lookup(addr);
    if info.resolved {
        tracing::info!(
            %addr,
            country = info.country_code_or_sentinel(),
            asn = info.asn_or_sentinel(),
            "Resolved self-location"
        );
    } else {
        tracing::warn!(%addr, "Self address not found in geo databases");
    }
    Ok(info)
}
