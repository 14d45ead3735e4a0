//! Consistency checks over record sets.
//!
//! Small sets are compared record by record. Above the sampling threshold a
//! stratified sample is compared instead: the head and tail of the id order
//! plus uniformly drawn interior records. The sample RNG is seeded from the
//! set sizes, so the same pair of sets always yields the same verdict.

use crate::{
    canonical::{checksum, to_canonical_string},
    record::BookRecord,
    BookId, StoreId,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConfig {
    /// Sets larger than this are sampled
    pub sampling_threshold: usize,
    pub sample_size: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            sampling_threshold: 1000,
            sample_size: 200,
        }
    }
}

/// Result of [`verify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Verification {
    #[serde(rename_all = "camelCase")]
    Full {
        consistent: bool,
        integrity_percent: f64,
        /// Ids missing from one side or differing
        mismatched: Vec<BookId>,
    },
    #[serde(rename_all = "camelCase")]
    Sampled {
        integrity_percent: f64,
        sampled: usize,
        mismatched: Vec<BookId>,
        /// Whether both sets hold the same number of records
        counts_match: bool,
    },
}

impl Verification {
    pub fn integrity_percent(&self) -> f64 {
        match self {
            Verification::Full {
                integrity_percent, ..
            }
            | Verification::Sampled {
                integrity_percent, ..
            } => *integrity_percent,
        }
    }

    /// Whether no difference was observed.
    pub fn is_clean(&self) -> bool {
        match self {
            Verification::Full { consistent, .. } => *consistent,
            Verification::Sampled {
                mismatched,
                counts_match,
                ..
            } => mismatched.is_empty() && *counts_match,
        }
    }
}

fn index_by_id(records: &[BookRecord]) -> BTreeMap<&str, String> {
    records
        .iter()
        .map(|r| (r.id.as_str(), to_canonical_string(&r.to_json())))
        .collect()
}

fn percent(matched: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        matched as f64 * 100.0 / total as f64
    }
}

/// Compare `expected` against `actual`.
pub fn verify(expected: &[BookRecord], actual: &[BookRecord], config: &VerifyConfig) -> Verification {
    if expected.len().max(actual.len()) > config.sampling_threshold {
        verify_sampled(expected, actual, config)
    } else {
        verify_full(expected, actual)
    }
}

fn verify_full(expected: &[BookRecord], actual: &[BookRecord]) -> Verification {
    let a = index_by_id(expected);
    let b = index_by_id(actual);

    let mut ids: Vec<&str> = a.keys().chain(b.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mismatched: Vec<BookId> = ids
        .iter()
        .filter(|id| a.get(*id) != b.get(*id))
        .map(|id| id.to_string())
        .collect();

    Verification::Full {
        consistent: checksum(expected) == checksum(actual),
        integrity_percent: percent(ids.len() - mismatched.len(), ids.len()),
        mismatched,
    }
}

fn verify_sampled(expected: &[BookRecord], actual: &[BookRecord], config: &VerifyConfig) -> Verification {
    let a = index_by_id(expected);
    let b = index_by_id(actual);
    let ids: Vec<&str> = a.keys().copied().collect();

    let seed = ((expected.len() as u64) << 32) ^ actual.len() as u64;
    let positions = sample_positions(ids.len(), config.sample_size, seed);

    let mismatched: Vec<BookId> = positions
        .iter()
        .map(|&p| ids[p])
        .filter(|id| a.get(id) != b.get(id))
        .map(str::to_string)
        .collect();

    Verification::Sampled {
        integrity_percent: percent(positions.len() - mismatched.len(), positions.len()),
        sampled: positions.len(),
        mismatched,
        counts_match: a.len() == b.len(),
    }
}

/// Sorted, distinct positions: a quarter from the head, a quarter from the
/// tail, the rest drawn from the interior.
pub fn sample_positions(len: usize, sample_size: usize, seed: u64) -> Vec<usize> {
    if sample_size >= len {
        return (0..len).collect();
    }

    let edge = sample_size / 4;
    let mut positions: Vec<usize> = (0..edge).chain(len - edge..len).collect();

    let interior = len - 2 * edge;
    let wanted = (sample_size - 2 * edge).min(interior);
    let mut rng = StdRng::seed_from_u64(seed);
    positions.extend(
        rand::seq::index::sample(&mut rng, interior, wanted)
            .into_iter()
            .map(|i| i + edge),
    );

    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Convergence status of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConvergence {
    pub store_id: StoreId,
    pub checksum: String,
    /// Other devices holding the same checksum
    pub matching_peers: Vec<StoreId>,
    /// Whether the device holds the most common checksum
    pub in_majority: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceReport {
    /// True only when every device holds the same checksum
    pub converged: bool,
    pub devices: Vec<DeviceConvergence>,
}

/// Per-device convergence over record sets.
pub fn convergence(devices: &[(&str, &[BookRecord])]) -> ConvergenceReport {
    let checksums: Vec<(StoreId, String)> = devices
        .iter()
        .map(|(id, records)| (id.to_string(), checksum(*records)))
        .collect();
    convergence_of_checksums(&checksums)
}

/// Per-device convergence from precomputed checksums.
pub fn convergence_of_checksums(devices: &[(StoreId, String)]) -> ConvergenceReport {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (store, sum) in devices {
        groups.entry(sum.as_str()).or_default().push(store.as_str());
    }

    // Largest group wins; BTreeMap order breaks ties by checksum.
    let majority = groups
        .iter()
        .fold(None::<(&str, usize)>, |best, (sum, stores)| match best {
            Some((_, n)) if n >= stores.len() => best,
            _ => Some((*sum, stores.len())),
        })
        .map(|(sum, _)| sum);

    let mut report: Vec<DeviceConvergence> = devices
        .iter()
        .map(|(store, sum)| DeviceConvergence {
            store_id: store.clone(),
            checksum: sum.clone(),
            matching_peers: groups
                .get(sum.as_str())
                .map(|peers| {
                    peers
                        .iter()
                        .filter(|p| **p != store.as_str())
                        .map(|p| p.to_string())
                        .collect()
                })
                .unwrap_or_default(),
            in_majority: majority == Some(sum.as_str()),
        })
        .collect();
    report.sort_by(|a, b| a.store_id.cmp(&b.store_id));

    ConvergenceReport {
        converged: groups.len() <= 1,
        devices: report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books(n: usize) -> Vec<BookRecord> {
        (0..n)
            .map(|i| BookRecord::new(format!("b-{i:05}"), format!("T{i}"), "A", "2024-01-01T00:00:00Z"))
            .collect()
    }

    #[test]
    fn identical_sets_verify_fully() {
        let a = books(10);
        let result = verify(&a, &a, &VerifyConfig::default());
        assert!(result.is_clean());
        assert_eq!(result.integrity_percent(), 100.0);
        assert!(matches!(result, Verification::Full { .. }));
    }

    #[test]
    fn differences_are_listed() {
        let a = books(4);
        let mut b = a.clone();
        b[1].progress = 50;
        b.pop();

        match verify(&a, &b, &VerifyConfig::default()) {
            Verification::Full {
                consistent,
                integrity_percent,
                mismatched,
            } => {
                assert!(!consistent);
                assert_eq!(integrity_percent, 50.0);
                assert_eq!(mismatched, vec!["b-00001", "b-00003"]);
            }
            other => panic!("expected full verification, got {other:?}"),
        }
    }

    #[test]
    fn empty_sets_are_consistent() {
        let result = verify(&[], &[], &VerifyConfig::default());
        assert!(result.is_clean());
        assert_eq!(result.integrity_percent(), 100.0);
    }

    #[test]
    fn large_sets_are_sampled() {
        let a = books(1500);
        let config = VerifyConfig::default();

        match verify(&a, &a, &config) {
            Verification::Sampled {
                integrity_percent,
                sampled,
                counts_match,
                ..
            } => {
                assert_eq!(sampled, 200);
                assert_eq!(integrity_percent, 100.0);
                assert!(counts_match);
            }
            other => panic!("expected sampled verification, got {other:?}"),
        }
    }

    #[test]
    fn sampling_covers_head_and_tail_and_is_replayable() {
        let positions = sample_positions(1000, 200, 7);
        assert_eq!(positions.len(), 200);
        assert_eq!(positions[0], 0);
        assert_eq!(positions[49], 49);
        assert_eq!(*positions.last().unwrap(), 999);
        assert_eq!(positions, sample_positions(1000, 200, 7));
    }

    #[test]
    fn partial_convergence_is_per_device() {
        let a = books(3);
        let b = books(2);
        let report = convergence(&[
            ("laptop", a.as_slice()),
            ("phone", a.as_slice()),
            ("tablet", b.as_slice()),
        ]);

        assert!(!report.converged);
        let phone = &report.devices[1];
        assert_eq!(phone.matching_peers, vec!["laptop"]);
        assert!(phone.in_majority);
        assert!(!report.devices[2].in_majority);
        assert!(report.devices[2].matching_peers.is_empty());
    }

    #[test]
    fn all_equal_is_converged() {
        let a = books(3);
        let report = convergence(&[("laptop", a.as_slice()), ("phone", a.as_slice())]);
        assert!(report.converged);
    }
}
