//! Keyed per-octet substitution cipher for IPv4 addresses
//!
//! Four independent byte permutations are derived from one secret, one per
//! octet position. Anonymization replaces octet `i` with `tables[i][octet]`,
//! so equal octets at the same position stay equal across all records of a
//! run. Prefix structure is only preserved on octet boundaries.
//!
//! Table derivation is bit-compatible with the legacy numpy path
//! `RandomState(seed).permutation(256)`: MT19937 seeded with `init_genrand`
//! followed by a Fisher-Yates shuffle that draws bounded integers by masked
//! rejection sampling.

use rand::RngCore;
use sha2::{Digest, Sha512};
use std::net::Ipv4Addr;

use crate::constants::TABLE_COUNT;
use crate::mt19937::Mt19937;
use crate::Error;

/// Bijection on 0..=255 for one octet position
pub type SubstitutionTable = [u8; 256];

/// Hex-digit ranges of the SHA-512 digest used as the four table seeds
pub const SEED_RANGES: [(usize, usize); TABLE_COUNT] = [(0, 8), (56, 64), (64, 72), (120, 128)];

/// Uniform integer in `0..=max` by masked rejection sampling
fn bounded<R: RngCore>(rng: &mut R, max: u32) -> u32 {
    if max == 0 {
        return 0;
    }
    let mut mask = max;
    mask |= mask >> 1;
    mask |= mask >> 2;
    mask |= mask >> 4;
    mask |= mask >> 8;
    mask |= mask >> 16;
    loop {
        let value = rng.next_u32() & mask;
        if value <= max {
            return value;
        }
    }
}

/// Shuffle in place, walking from the last element down to the second
pub fn shuffle<T, R: RngCore>(rng: &mut R, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = bounded(rng, i as u32) as usize;
        items.swap(i, j);
    }
}

/// Permutation of `0..n` for a seed, as produced by `RandomState(seed).permutation(n)`
pub fn permutation(seed: u32, n: usize) -> Vec<usize> {
    let mut rng = Mt19937::new(seed);
    let mut items: Vec<usize> = (0..n).collect();
    shuffle(&mut rng, &mut items);
    items
}

/// The four substitution tables derived from one secret
#[derive(Clone, PartialEq, Eq)]
pub struct PermutationTables {
    tables: [SubstitutionTable; TABLE_COUNT],
}

impl PermutationTables {
    /// Derive the tables from a secret
    pub fn derive(secret: &[u8]) -> crate::Result<Self> {
        Ok(Self::from_seeds(Self::seeds(secret)?))
    }

    /// Seeds for the four octet positions, taken from the SHA-512 hex digest
    pub fn seeds(secret: &[u8]) -> crate::Result<[u32; TABLE_COUNT]> {
        if secret.is_empty() {
            return Err(Error::InvalidSecret("secret must not be empty".into()));
        }
        let digest = hex::encode(Sha512::digest(secret));

        let mut seeds = [0u32; TABLE_COUNT];
        for (seed, &(start, end)) in seeds.iter_mut().zip(SEED_RANGES.iter()) {
            *seed = u32::from_str_radix(&digest[start..end], 16)
                .map_err(|e| Error::InvalidSecret(e.to_string()))?;
        }
        Ok(seeds)
    }

    pub fn from_seeds(seeds: [u32; TABLE_COUNT]) -> Self {
        let mut tables = [[0u8; 256]; TABLE_COUNT];
        for (table, seed) in tables.iter_mut().zip(seeds) {
            let mut rng = Mt19937::new(seed);
            let mut values: [u8; 256] = std::array::from_fn(|i| i as u8);
            shuffle(&mut rng, &mut values);
            *table = values;
        }
        Self { tables }
    }

    /// Table for octet position `0..4`
    pub fn table(&self, position: usize) -> &SubstitutionTable {
        &self.tables[position]
    }

    /// Replace each octet through the table of its position
    pub fn anonymize(&self, addr: Ipv4Addr) -> Ipv4Addr {
        let octets = addr.octets();
        Ipv4Addr::new(
            self.tables[0][octets[0] as usize],
            self.tables[1][octets[1] as usize],
            self.tables[2][octets[2] as usize],
            self.tables[3][octets[3] as usize],
        )
    }

    /// Parse and anonymize a dotted-quad string
    pub fn anonymize_str(&self, addr: &str) -> crate::Result<Ipv4Addr> {
        let parsed: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        Ok(self.anonymize(parsed))
    }
}

// Tables are secret-derived
impl std::fmt::Debug for PermutationTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermutationTables").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(table: &SubstitutionTable) -> bool {
        let mut seen = [false; 256];
        for &value in table.iter() {
            if seen[value as usize] {
                return false;
            }
            seen[value as usize] = true;
        }
        seen.iter().all(|&s| s)
    }

    #[test]
    fn test_matches_legacy_permutation() {
        assert_eq!(permutation(0, 10), vec![2, 8, 4, 9, 1, 6, 7, 3, 0, 5]);
    }

    #[test]
    fn test_seed_extraction() {
        let seeds = PermutationTables::seeds(b"foobar").unwrap();
        assert_eq!(seeds, [173_024_798, 863_994_209, 1_786_800_560, 29_303_845]);
    }

    #[test]
    fn test_known_tables() {
        let tables = PermutationTables::derive(b"foobar").unwrap();
        assert_eq!(&tables.table(0)[..8], &[173, 3, 39, 113, 69, 108, 95, 58]);
        assert_eq!(&tables.table(1)[..8], &[79, 149, 25, 209, 213, 81, 132, 230]);
        assert_eq!(&tables.table(2)[..8], &[13, 53, 250, 46, 216, 25, 42, 51]);
        assert_eq!(&tables.table(3)[..8], &[68, 128, 241, 207, 170, 61, 153, 216]);
    }

    #[test]
    fn test_tables_are_bijections() {
        let tables = PermutationTables::derive(b"some other secret").unwrap();
        for position in 0..4 {
            assert!(is_permutation(tables.table(position)), "table {position}");
        }
    }

    #[test]
    fn test_anonymize_known_addresses() {
        let tables = PermutationTables::derive(b"foobar").unwrap();
        assert_eq!(
            tables.anonymize(Ipv4Addr::new(10, 1, 10, 1)),
            Ipv4Addr::new(169, 149, 65, 128)
        );
        assert_eq!(
            tables.anonymize(Ipv4Addr::new(192, 1, 50, 1)),
            Ipv4Addr::new(233, 149, 181, 128)
        );
    }

    #[test]
    fn test_octet_locality() {
        let tables = PermutationTables::derive(b"foobar").unwrap();
        let a = tables.anonymize_str("10.1.10.1").unwrap().octets();
        let b = tables.anonymize_str("192.1.50.1").unwrap().octets();
        assert_eq!(a[1], b[1]);
        assert_eq!(a[3], b[3]);
        assert_ne!(a[0], b[0]);
        assert_ne!(a[2], b[2]);
    }

    #[test]
    fn test_deterministic_per_secret() {
        let addr = Ipv4Addr::new(93, 184, 216, 34);
        let first = PermutationTables::derive(b"secret-a").unwrap();
        let again = PermutationTables::derive(b"secret-a").unwrap();
        let other = PermutationTables::derive(b"secret-b").unwrap();

        assert_eq!(first.anonymize(addr), again.anonymize(addr));
        assert_ne!(first, other);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            PermutationTables::derive(b""),
            Err(Error::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_anonymize_str_rejects_garbage() {
        let tables = PermutationTables::derive(b"foobar").unwrap();
        assert!(tables.anonymize_str("10.1.2").is_err());
        assert!(tables.anonymize_str("not an address").is_err());
    }

    #[test]
    fn test_debug_redacts_tables() {
        let tables = PermutationTables::derive(b"foobar").unwrap();
        assert_eq!(format!("{:?}", tables), "PermutationTables { .. }");
    }
}
