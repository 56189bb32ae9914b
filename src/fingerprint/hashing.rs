//! Target-zone pairing and hash generation.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::FingerprintError;
use crate::fingerprint::peaks::Peak;

/// Length of a hash value in hex characters.
pub const HASH_LENGTH: usize = 20;

/// One stored occurrence of a hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FingerprintEntry {
    pub hash_value: String,
    pub offset: i64,
}

/// Hash value to the anchor frames it was seen at, in insertion order.
///
/// Keys iterate in ascending order so serialized output is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintMap {
    inner: BTreeMap<String, Vec<usize>>,
}

impl FingerprintMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `offset` to the list stored under `hash`.
    pub fn push(&mut self, hash: String, offset: usize) {
        self.inner.entry(hash).or_default().push(offset);
    }

    /// Append every list of `other` after the matching list of `self`.
    pub fn merge(&mut self, other: FingerprintMap) {
        for (hash, offsets) in other.inner {
            self.inner.entry(hash).or_default().extend(offsets);
        }
    }

    pub fn get(&self, hash: &str) -> Option<&[usize]> {
        self.inner.get(hash).map(Vec::as_slice)
    }

    /// Distinct hashes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Total number of (hash, offset) occurrences.
    pub fn occurrences(&self) -> usize {
        self.inner.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<usize>> {
        self.inner.iter()
    }

    /// Flatten into one row per occurrence, ordered by hash then offset list.
    pub fn into_entries(self) -> Vec<FingerprintEntry> {
        self.inner
            .into_iter()
            .flat_map(|(hash_value, offsets)| {
                offsets.into_iter().map(move |offset| FingerprintEntry {
                    hash_value: hash_value.clone(),
                    offset: offset as i64,
                })
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a FingerprintMap {
    type Item = (&'a String, &'a Vec<usize>);
    type IntoIter = btree_map::Iter<'a, String, Vec<usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub min_time_delta: i64,
    pub max_time_delta: i64,
    /// Pair every anchor with itself at a time delta of zero.
    pub include_self_pairs: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self { min_time_delta: 0, max_time_delta: 30, include_self_pairs: true }
    }
}

impl PairingConfig {
    pub fn validate(&self) -> Result<(), FingerprintError> {
        if self.min_time_delta > self.max_time_delta {
            return Err(FingerprintError::Configuration(format!(
                "min_time_delta ({}) exceeds max_time_delta ({})",
                self.min_time_delta, self.max_time_delta
            )));
        }
        Ok(())
    }
}

/// Hash of an anchor/target frequency pair and their time delta.
pub fn fingerprint_hash(anchor_bin: usize, target_bin: usize, time_delta: i64) -> String {
    let digest = Sha256::digest(format!("{anchor_bin}|{target_bin}|{time_delta}").as_bytes());
    hex::encode(&digest[..HASH_LENGTH / 2])
}

/// Pair every anchor with the peaks in its target zone.
///
/// Anchors are visited in row-major order, which fixes the order of each
/// offset list.
pub fn generate_hashes(peaks: &[Peak], config: &PairingConfig) -> Result<FingerprintMap, FingerprintError> {
    config.validate()?;

    let mut anchors = peaks.to_vec();
    anchors.sort_unstable();
    anchors.dedup();

    let mut by_time: Vec<(i64, usize)> = anchors
        .iter()
        .map(|p| (p.time_frame as i64, p.frequency_bin))
        .collect();
    by_time.sort_unstable();

    let mut fingerprints = FingerprintMap::new();
    for anchor in &anchors {
        let anchor_time = anchor.time_frame as i64;
        let earliest = anchor_time.saturating_add(config.min_time_delta);
        let latest = anchor_time.saturating_add(config.max_time_delta);

        let start = by_time.partition_point(|&(t, _)| t < earliest);
        for &(target_time, target_bin) in by_time[start..].iter().take_while(|&&(t, _)| t <= latest) {
            let time_delta = target_time - anchor_time;
            if !config.include_self_pairs && time_delta == 0 && target_bin == anchor.frequency_bin {
                continue;
            }
            fingerprints.push(
                fingerprint_hash(anchor.frequency_bin, target_bin, time_delta),
                anchor.time_frame,
            );
        }
    }

    debug!(
        anchors = anchors.len(),
        hashes = fingerprints.len(),
        occurrences = fingerprints.occurrences(),
        "hashes generated"
    );
    Ok(fingerprints)
}
